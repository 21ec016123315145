//! RTSP frame source.
//!
//! This module provides `RtspSource` for pulling live frames from IP cameras.
//!
//! The RTSP source is responsible for:
//! - Connecting to the camera stream over TCP
//! - Decoding video frames to RGB24
//! - Classifying read failures as transient (stall) or fatal (error, EOS)
//!
//! The RTSP source MUST NOT:
//! - Reconnect on its own (the coordinator owns that policy)
//! - Retain frames after handing them to the caller
//!
//! `stub://` locators select a synthetic stream paced at the configured frame
//! rate. Query parameters tune it for tests: `width`, `height`, `fps`,
//! `drop_every` (every Nth grab fails transiently) and `fail_after` (the stream
//! dies after N frames).

use anyhow::{anyhow, Context, Result};
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Duration;
use std::time::Instant;

use super::{FrameSource, Grab, GrabError};
use crate::clock::Pacer;
use crate::frame::Frame;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// Expected stream rate; used for pacing synthetic frames and stall detection.
    pub target_fps: f64,
    /// Frame width for synthetic streams.
    pub width: u32,
    /// Frame height for synthetic streams.
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:8554/stream".to_string(),
            target_fps: 30.0,
            width: 640,
            height: 480,
        }
    }
}

/// RTSP frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticRtspSource::new(config)?),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("RTSP requires the rtsp-gstreamer feature ({})", config.url)
            }
        }
    }

    /// Connect to the RTSP stream.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    /// Frames delivered since connect.
    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.frame_count,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.frame_count,
        }
    }
}

impl FrameSource for RtspSource {
    fn grab(&mut self) -> Result<Grab, GrabError> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.grab(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.grab(),
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        match &self.backend {
            RtspBackend::Synthetic(source) => (source.width, source.height),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.dimensions(),
        }
    }

    fn native_frame_rate(&self) -> f64 {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.fps,
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.native_frame_rate(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    url: String,
    width: u32,
    height: u32,
    fps: f64,
    drop_every: Option<u64>,
    fail_after: Option<u64>,
    pacer: Pacer,
    grabs: u64,
    frame_count: u64,
    connected: bool,
}

impl SyntheticRtspSource {
    fn new(config: RtspConfig) -> Result<Self> {
        let parsed = url::Url::parse(&config.url)
            .with_context(|| format!("invalid synthetic stream url '{}'", config.url))?;
        let mut width = config.width;
        let mut height = config.height;
        let mut fps = config.target_fps;
        let mut drop_every = None;
        let mut fail_after = None;
        for (key, value) in parsed.query_pairs() {
            let bad = || anyhow!("invalid value '{}' for '{}' in {}", value, key, config.url);
            match key.as_ref() {
                "width" => width = value.parse().map_err(|_| bad())?,
                "height" => height = value.parse().map_err(|_| bad())?,
                "fps" => fps = value.parse().map_err(|_| bad())?,
                "drop_every" => drop_every = Some(value.parse().map_err(|_| bad())?),
                "fail_after" => fail_after = Some(value.parse().map_err(|_| bad())?),
                _ => log::debug!("RtspSource: ignoring synthetic option '{}'", key),
            }
        }
        if width == 0 || height == 0 {
            anyhow::bail!("synthetic stream needs non-zero dimensions");
        }
        if !(fps.is_finite() && fps > 0.0) {
            anyhow::bail!("synthetic stream needs a positive frame rate");
        }
        Ok(Self {
            url: config.url,
            width,
            height,
            fps,
            drop_every: drop_every.filter(|n| *n > 0),
            fail_after,
            pacer: Pacer::new(fps),
            grabs: 0,
            frame_count: 0,
            connected: false,
        })
    }

    /// Synthetic sources are always reachable.
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("RtspSource: connected to {} (synthetic)", self.url);
        Ok(())
    }

    fn grab(&mut self) -> Result<Grab, GrabError> {
        if !self.connected {
            return Err(GrabError::Fatal("synthetic stream is not connected".into()));
        }
        if let Some(limit) = self.fail_after {
            if self.frame_count >= limit {
                return Err(GrabError::Fatal(format!(
                    "synthetic stream died after {limit} frames"
                )));
            }
        }

        // Block like a real camera would until the next frame is due.
        let deadline = self.pacer.next_deadline(Instant::now());
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }

        self.grabs += 1;
        if let Some(every) = self.drop_every {
            if self.grabs % every == 0 {
                return Err(GrabError::Transient(format!(
                    "synthetic drop of grab #{}",
                    self.grabs
                )));
            }
        }

        self.frame_count += 1;
        Ok(Grab::Frame(Frame::new(
            self.generate_synthetic_pixels(),
            self.width,
            self.height,
        )))
    }

    /// Moving diagonal gradient so consecutive frames differ.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let mut pixels = vec![0u8; Frame::expected_len(self.width, self.height)];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }

    fn close(&mut self) -> Result<()> {
        if self.connected {
            self.connected = false;
            log::debug!(
                "RtspSource: closed {} after {} frames",
                self.url,
                self.frame_count
            );
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    pending: Option<Frame>,
    dimensions: (u32, u32),
    native_fps: Option<f64>,
    frame_count: u64,
    running: bool,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build the pipeline: rtspsrc (TCP) ! decodebin ! videoconvert ! appsink (RGB).
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} protocols=tcp latency=0 ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            dimensions: (config.width, config.height),
            config,
            pipeline,
            appsink,
            pending: None,
            native_fps: None,
            frame_count: 0,
            running: false,
        })
    }

    /// Start playing and wait for the first frame so dimensions are known.
    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.running = true;

        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_seconds(10))
            .ok_or_else(|| anyhow!("no video from {} within 10s", self.config.url))?;
        let frame = self.sample_to_frame(&sample)?;
        self.dimensions = (frame.width, frame.height);
        self.pending = Some(frame);
        log::info!(
            "RtspSource: connected to {} ({}x{})",
            self.config.url,
            self.dimensions.0,
            self.dimensions.1
        );
        Ok(())
    }

    fn grab(&mut self) -> Result<Grab, GrabError> {
        if let Some(frame) = self.pending.take() {
            self.frame_count += 1;
            return Ok(Grab::Frame(frame));
        }
        if let Some(message) = self.poll_bus() {
            return Err(GrabError::Fatal(message));
        }

        let timeout = self.frame_timeout();
        match self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64))
        {
            Some(sample) => {
                let frame = self
                    .sample_to_frame(&sample)
                    .map_err(|e| GrabError::Transient(format!("{e:#}")))?;
                self.frame_count += 1;
                Ok(Grab::Frame(frame))
            }
            None if self.appsink.is_eos() => Err(GrabError::Fatal("RTSP stream ended".into())),
            None => Err(GrabError::Transient("RTSP stream stalled".into())),
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn native_frame_rate(&self) -> f64 {
        self.native_fps.unwrap_or(self.config.target_fps)
    }

    fn close(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.pending = None;
        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("set RTSP pipeline to Null")?;
        log::debug!("RtspSource: closed {}", self.config.url);
        Ok(())
    }

    fn frame_timeout(&self) -> Duration {
        let fps = if self.config.target_fps > 0.0 {
            self.config.target_fps
        } else {
            10.0
        };
        Duration::from_secs_f64(4.0 / fps).max(Duration::from_millis(500))
    }

    fn poll_bus(&mut self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => return Some("gstreamer reached EOS".to_string()),
                _ => {}
            }
        }
        None
    }

    fn sample_to_frame(&mut self, sample: &gstreamer::Sample) -> Result<Frame> {
        let buffer = sample.buffer().context("RTSP sample missing buffer")?;
        let caps = sample.caps().context("RTSP sample missing caps")?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .context("parse RTSP caps as video info")?;

        let fps = info.fps();
        if fps.denom() > 0 && fps.numer() > 0 {
            self.native_fps = Some(fps.numer() as f64 / fps.denom() as f64);
        }

        let width = info.width();
        let height = info.height();
        let row_bytes = (width as usize) * 3;
        let stride = info.stride()[0] as usize;

        let map = buffer.map_readable().context("map RTSP buffer")?;
        let data = map.as_slice();

        if stride == row_bytes {
            return Ok(Frame::new(data.to_vec(), width, height));
        }

        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("RTSP buffer row is out of bounds")?,
            );
        }

        Ok(Frame::new(pixels, width, height))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(url: &str) -> RtspConfig {
        RtspConfig {
            url: url.to_string(),
            target_fps: 200.0,
            width: 8,
            height: 6,
        }
    }

    fn connected(url: &str) -> Result<RtspSource> {
        let mut source = RtspSource::new(stub_config(url))?;
        source.connect()?;
        Ok(source)
    }

    #[test]
    fn rtsp_source_produces_frames() -> Result<()> {
        let mut source = connected("stub://test")?;
        match source.grab() {
            Ok(Grab::Frame(frame)) => {
                assert_eq!((frame.width, frame.height), (8, 6));
                assert!(frame.is_well_formed());
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert_eq!(source.dimensions(), (8, 6));
        assert_eq!(source.frames_captured(), 1);
        Ok(())
    }

    #[test]
    fn query_overrides_dimensions_and_rate() -> Result<()> {
        let source = connected("stub://cam?width=4&height=2&fps=50")?;
        assert_eq!(source.dimensions(), (4, 2));
        assert_eq!(source.native_frame_rate(), 50.0);
        Ok(())
    }

    #[test]
    fn synthetic_stream_is_paced() -> Result<()> {
        let mut source = connected("stub://cam?fps=100")?;
        let started = Instant::now();
        for _ in 0..11 {
            assert!(matches!(source.grab(), Ok(Grab::Frame(_))));
        }
        // Eleven frames at 100 fps span ten intervals.
        assert!(started.elapsed() >= std::time::Duration::from_millis(95));
        Ok(())
    }

    #[test]
    fn drop_every_yields_transient_errors() -> Result<()> {
        let mut source = connected("stub://cam?drop_every=3")?;
        assert!(matches!(source.grab(), Ok(Grab::Frame(_))));
        assert!(matches!(source.grab(), Ok(Grab::Frame(_))));
        assert!(matches!(source.grab(), Err(GrabError::Transient(_))));
        assert!(matches!(source.grab(), Ok(Grab::Frame(_))));
        Ok(())
    }

    #[test]
    fn fail_after_is_fatal() -> Result<()> {
        let mut source = connected("stub://cam?fail_after=2")?;
        assert!(matches!(source.grab(), Ok(Grab::Frame(_))));
        assert!(matches!(source.grab(), Ok(Grab::Frame(_))));
        assert!(matches!(source.grab(), Err(GrabError::Fatal(_))));
        Ok(())
    }

    #[test]
    fn close_is_idempotent_and_stops_grabs() -> Result<()> {
        let mut source = connected("stub://cam")?;
        source.close()?;
        source.close()?;
        assert!(matches!(source.grab(), Err(GrabError::Fatal(_))));
        Ok(())
    }

    #[test]
    fn bad_query_values_are_rejected() {
        assert!(RtspSource::new(stub_config("stub://cam?fps=fast")).is_err());
        assert!(RtspSource::new(stub_config("stub://cam?width=0")).is_err());
    }
}
