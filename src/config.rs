use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::writer::ClipFormat;

const DEFAULT_SOURCE_LOCATOR: &str = "stub://camera";
const DEFAULT_OUTPUT_DIR: &str = "recorded_videos";
const DEFAULT_CLIP_COUNT: u32 = 3;
const DEFAULT_CLIP_SECS: f64 = 5.0;
const DEFAULT_FRAME_RATE: f64 = 30.0;
const DEFAULT_BITRATE: u64 = 2_000_000;
const DEFAULT_INTER_CLIP_PAUSE_MS: u64 = 500;

/// Upper bound for every configured duration (clip length, pauses, retry delay).
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

const SUPPORTED_SCHEMES: &[&str] = &["rtsp", "rtsps", "stub"];

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    source: Option<SourceConfigFile>,
    recording: Option<RecordingConfigFile>,
    live: Option<LiveConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    locator: Option<String>,
    target_frame_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    output_dir: Option<PathBuf>,
    clip_count: Option<u32>,
    clip_duration_secs: Option<f64>,
    bitrate: Option<u64>,
    format: Option<ClipFormat>,
    inter_clip_pause_ms: Option<u64>,
    preview: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    /// Live stream locator (`rtsp://…`, or `stub://…` for the synthetic stream).
    pub source_locator: String,
    pub output_dir: PathBuf,
    /// Clips captured per recording request.
    pub clip_count: u32,
    pub clip_duration: Duration,
    pub target_frame_rate: f64,
    pub bitrate: u64,
    pub clip_format: ClipFormat,
    pub inter_clip_pause: Duration,
    /// Restart a failed live view after this delay. `None` leaves it stopped.
    pub reconnect_delay: Option<Duration>,
    /// Publish frames being recorded to the display.
    pub preview_while_recording: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            source_locator: DEFAULT_SOURCE_LOCATOR.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            clip_count: DEFAULT_CLIP_COUNT,
            clip_duration: Duration::from_secs_f64(DEFAULT_CLIP_SECS),
            target_frame_rate: DEFAULT_FRAME_RATE,
            bitrate: DEFAULT_BITRATE,
            clip_format: ClipFormat::default(),
            inter_clip_pause: Duration::from_millis(DEFAULT_INTER_CLIP_PAUSE_MS),
            reconnect_delay: None,
            preview_while_recording: true,
        }
    }
}

impl RecorderConfig {
    /// Load from `RECORDER_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RECORDER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RecorderConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let source = file.source.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();
        let live = file.live.unwrap_or_default();

        let clip_duration = match recording.clip_duration_secs {
            Some(secs) => duration_from_secs(secs, "recording.clip_duration_secs")?,
            None => defaults.clip_duration,
        };
        Ok(Self {
            source_locator: source.locator.unwrap_or(defaults.source_locator),
            output_dir: recording.output_dir.unwrap_or(defaults.output_dir),
            clip_count: recording.clip_count.unwrap_or(defaults.clip_count),
            clip_duration,
            target_frame_rate: source
                .target_frame_rate
                .unwrap_or(defaults.target_frame_rate),
            bitrate: recording.bitrate.unwrap_or(defaults.bitrate),
            clip_format: recording.format.unwrap_or(defaults.clip_format),
            inter_clip_pause: recording
                .inter_clip_pause_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_clip_pause),
            reconnect_delay: live.reconnect_delay_ms.map(Duration::from_millis),
            preview_while_recording: recording
                .preview
                .unwrap_or(defaults.preview_while_recording),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("RECORDER_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source_locator = url;
            }
        }
        if let Ok(dir) = std::env::var("RECORDER_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(count) = std::env::var("RECORDER_CLIP_COUNT") {
            self.clip_count = count
                .trim()
                .parse()
                .map_err(|_| anyhow!("RECORDER_CLIP_COUNT must be a positive integer"))?;
        }
        if let Ok(secs) = std::env::var("RECORDER_CLIP_SECS") {
            let secs: f64 = secs
                .trim()
                .parse()
                .map_err(|_| anyhow!("RECORDER_CLIP_SECS must be a number of seconds"))?;
            self.clip_duration = duration_from_secs(secs, "RECORDER_CLIP_SECS")?;
        }
        if let Ok(fps) = std::env::var("RECORDER_FPS") {
            self.target_frame_rate = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("RECORDER_FPS must be a number"))?;
        }
        if let Ok(bitrate) = std::env::var("RECORDER_BITRATE") {
            self.bitrate = bitrate
                .trim()
                .parse()
                .map_err(|_| anyhow!("RECORDER_BITRATE must be an integer (bits per second)"))?;
        }
        if let Ok(format) = std::env::var("RECORDER_CLIP_FORMAT") {
            self.clip_format = ClipFormat::parse(&format)
                .ok_or_else(|| anyhow!("RECORDER_CLIP_FORMAT must be 'rclip' or 'mp4'"))?;
        }
        Ok(())
    }

    /// Reject configurations the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        let locator = self.source_locator.trim();
        if locator.is_empty() {
            return Err(anyhow!("source locator must not be empty"));
        }
        let parsed = url::Url::parse(locator)
            .map_err(|e| anyhow!("invalid source locator '{}': {}", locator, e))?;
        if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
            return Err(anyhow!(
                "unsupported source scheme '{}' (expected one of: {})",
                parsed.scheme(),
                SUPPORTED_SCHEMES.join(", ")
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(anyhow!("output directory must not be empty"));
        }
        if self.clip_count == 0 {
            return Err(anyhow!("clip count must be at least 1"));
        }
        if self.clip_duration.is_zero() {
            return Err(anyhow!("clip duration must be greater than zero"));
        }
        for (what, value) in [
            ("clip duration", Some(self.clip_duration)),
            ("inter-clip pause", Some(self.inter_clip_pause)),
            ("reconnect delay", self.reconnect_delay),
        ] {
            if value.is_some_and(|d| d > MAX_DURATION) {
                return Err(anyhow!(
                    "{what} must not exceed {}s",
                    MAX_DURATION.as_secs()
                ));
            }
        }
        if !(self.target_frame_rate.is_finite() && self.target_frame_rate > 0.0) {
            return Err(anyhow!("target frame rate must be a positive number"));
        }
        if self.bitrate == 0 {
            return Err(anyhow!("bitrate must be greater than zero"));
        }
        Ok(())
    }
}

fn duration_from_secs(secs: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow!("{what} must be a non-negative number"))
}

fn read_config_file(path: &Path) -> Result<RecorderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RecorderConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.clip_count, 3);
        assert_eq!(cfg.clip_duration, Duration::from_secs(5));
        assert_eq!(cfg.output_dir, PathBuf::from("recorded_videos"));
    }

    #[test]
    fn nested_sections_override_defaults() -> Result<()> {
        let file: RecorderConfigFile = serde_json::from_str(
            r#"{
                "source": {"locator": "rtsp://10.0.0.2/stream", "target_frame_rate": 15},
                "recording": {"clip_count": 2, "clip_duration_secs": 1.5, "format": "mp4"},
                "live": {"reconnect_delay_ms": 250}
            }"#,
        )?;
        let cfg = RecorderConfig::from_file(file)?;
        assert_eq!(cfg.source_locator, "rtsp://10.0.0.2/stream");
        assert_eq!(cfg.target_frame_rate, 15.0);
        assert_eq!(cfg.clip_count, 2);
        assert_eq!(cfg.clip_duration, Duration::from_millis(1500));
        assert_eq!(cfg.clip_format, ClipFormat::Mp4);
        assert_eq!(cfg.reconnect_delay, Some(Duration::from_millis(250)));
        assert_eq!(cfg.bitrate, DEFAULT_BITRATE);
        Ok(())
    }

    #[test]
    fn negative_duration_is_rejected() -> Result<()> {
        let file: RecorderConfigFile =
            serde_json::from_str(r#"{"recording": {"clip_duration_secs": -1}}"#)?;
        assert!(RecorderConfig::from_file(file).is_err());
        Ok(())
    }

    #[test]
    fn huge_clip_duration_fails_validation() -> Result<()> {
        let file: RecorderConfigFile =
            serde_json::from_str(r#"{"recording": {"clip_duration_secs": 1e19}}"#)?;
        let cfg = RecorderConfig::from_file(file)?;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("clip duration must not exceed"));

        let mut cfg = RecorderConfig::default();
        cfg.clip_duration = MAX_DURATION;
        assert!(cfg.validate().is_ok());
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() {
        let cases: Vec<Box<dyn Fn(&mut RecorderConfig)>> = vec![
            Box::new(|c| c.source_locator = "  ".into()),
            Box::new(|c| c.source_locator = "http://camera/stream".into()),
            Box::new(|c| c.clip_count = 0),
            Box::new(|c| c.clip_duration = Duration::ZERO),
            Box::new(|c| c.target_frame_rate = f64::NAN),
            Box::new(|c| c.target_frame_rate = 0.0),
            Box::new(|c| c.bitrate = 0),
            Box::new(|c| c.clip_duration = MAX_DURATION + Duration::from_secs(1)),
            Box::new(|c| c.inter_clip_pause = Duration::MAX),
            Box::new(|c| c.reconnect_delay = Some(Duration::MAX)),
        ];
        for mutate in cases {
            let mut cfg = RecorderConfig::default();
            mutate(&mut cfg);
            assert!(cfg.validate().is_err(), "accepted {cfg:?}");
        }
    }
}
