//! Media back end: the narrow contract between the workers and codec libraries.
//!
//! Workers never construct sources or writers directly; they ask a
//! `MediaBackend`. Tests substitute instrumented back ends here.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::config::RecorderConfig;
use crate::ingest::{FileConfig, FileSource, FrameSource, RtspConfig, RtspSource, SourceLocator};
use crate::writer::container::ContainerWriter;
use crate::writer::{ClipFormat, ClipWriter, WriterParams};

const DEFAULT_STUB_WIDTH: u32 = 640;
const DEFAULT_STUB_HEIGHT: u32 = 480;

/// Opens frame sources and clip writers.
pub trait MediaBackend: Send + Sync {
    /// Open and connect a source. A failed connect releases whatever was acquired.
    fn open_source(&self, locator: &SourceLocator) -> Result<Box<dyn FrameSource>>;

    fn open_writer(&self, path: &Path, params: &WriterParams) -> Result<Box<dyn ClipWriter>>;

    /// File extension (without dot) for clips produced by `open_writer`.
    fn clip_extension(&self) -> &'static str;
}

/// Dispatches on locator scheme and clip extension.
#[derive(Clone, Debug)]
pub struct DefaultBackend {
    target_fps: f64,
    clip_format: ClipFormat,
}

impl DefaultBackend {
    pub fn new(config: &RecorderConfig) -> Result<Self> {
        // Recording mp4 is pointless unless playback can decode it again.
        if config.clip_format == ClipFormat::Mp4
            && !(cfg!(feature = "encode-ffmpeg") && cfg!(feature = "ingest-file-ffmpeg"))
        {
            return Err(anyhow!(
                "mp4 clips require the encode-ffmpeg and ingest-file-ffmpeg features"
            ));
        }
        Ok(Self {
            target_fps: config.target_frame_rate,
            clip_format: config.clip_format,
        })
    }
}

impl MediaBackend for DefaultBackend {
    fn open_source(&self, locator: &SourceLocator) -> Result<Box<dyn FrameSource>> {
        match locator {
            SourceLocator::Network(url) => {
                let mut source = RtspSource::new(RtspConfig {
                    url: url.clone(),
                    target_fps: self.target_fps,
                    width: DEFAULT_STUB_WIDTH,
                    height: DEFAULT_STUB_HEIGHT,
                })?;
                if let Err(err) = source.connect() {
                    let _ = source.close();
                    return Err(err);
                }
                Ok(Box::new(source))
            }
            SourceLocator::File(path) => {
                let mut source = FileSource::new(FileConfig {
                    path: path.clone(),
                    fallback_fps: self.target_fps,
                })?;
                if let Err(err) = source.connect() {
                    let _ = source.close();
                    return Err(err);
                }
                Ok(Box::new(source))
            }
        }
    }

    fn open_writer(&self, path: &Path, params: &WriterParams) -> Result<Box<dyn ClipWriter>> {
        match self.clip_format {
            ClipFormat::Rclip => Ok(Box::new(ContainerWriter::create(path, params)?)),
            #[cfg(feature = "encode-ffmpeg")]
            ClipFormat::Mp4 => Ok(Box::new(crate::writer::ffmpeg::FfmpegClipWriter::create(
                path, params,
            )?)),
            #[cfg(not(feature = "encode-ffmpeg"))]
            ClipFormat::Mp4 => Err(anyhow!(
                "cannot write {}: mp4 clips require the encode-ffmpeg feature",
                path.display()
            )),
        }
    }

    fn clip_extension(&self) -> &'static str {
        self.clip_format.extension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::ingest::Grab;

    #[test]
    fn written_clip_opens_as_file_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = DefaultBackend::new(&RecorderConfig::default())?;
        let path = dir.path().join(format!("c.{}", backend.clip_extension()));

        let mut live = backend.open_source(&SourceLocator::Network(
            "stub://cam?width=4&height=4&fps=500".into(),
        ))?;
        let (width, height) = live.dimensions();
        let mut writer = backend.open_writer(
            &path,
            &WriterParams {
                width,
                height,
                frame_rate: 500.0,
                bitrate: 1,
            },
        )?;
        for _ in 0..5 {
            if let Ok(Grab::Frame(frame)) = live.grab() {
                writer.write_frame(&frame)?;
            }
        }
        writer.close()?;
        live.close()?;

        let mut replay = backend.open_source(&SourceLocator::File(path))?;
        assert_eq!(replay.dimensions(), (4, 4));
        let mut frames = 0;
        while let Ok(Grab::Frame(frame)) = replay.grab() {
            assert_eq!(frame.byte_len(), Frame::expected_len(4, 4));
            frames += 1;
        }
        assert!(frames > 0);
        Ok(())
    }

    #[cfg(feature = "encode-ffmpeg")]
    #[test]
    fn mp4_clip_plays_back_through_file_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = RecorderConfig {
            clip_format: ClipFormat::Mp4,
            ..RecorderConfig::default()
        };
        let backend = DefaultBackend::new(&config)?;
        assert_eq!(backend.clip_extension(), "mp4");
        let path = dir.path().join("c.mp4");

        let mut live = backend.open_source(&SourceLocator::Network(
            "stub://cam?width=16&height=16&fps=500".into(),
        ))?;
        let mut writer = backend.open_writer(
            &path,
            &WriterParams {
                width: 16,
                height: 16,
                frame_rate: 25.0,
                bitrate: 200_000,
            },
        )?;
        let mut written = 0;
        while written < 12 {
            if let Ok(Grab::Frame(frame)) = live.grab() {
                writer.write_frame(&frame)?;
                written += 1;
            }
        }
        writer.close()?;
        live.close()?;

        let mut replay = backend.open_source(&SourceLocator::File(path))?;
        assert_eq!(replay.dimensions(), (16, 16));
        let mut frames = 0;
        while let Ok(Grab::Frame(frame)) = replay.grab() {
            assert_eq!(frame.byte_len(), Frame::expected_len(16, 16));
            frames += 1;
        }
        assert!(frames > 0);
        replay.close()?;
        Ok(())
    }

    #[cfg(not(feature = "encode-ffmpeg"))]
    #[test]
    fn mp4_without_ffmpeg_is_refused_up_front() {
        let config = RecorderConfig {
            clip_format: ClipFormat::Mp4,
            ..RecorderConfig::default()
        };
        let err = DefaultBackend::new(&config).unwrap_err();
        assert!(err.to_string().contains("ingest-file-ffmpeg"));
    }

    #[test]
    fn unfinalized_clip_is_refused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = DefaultBackend::new(&RecorderConfig::default())?;
        let path = dir.path().join("partial.rclip");
        std::fs::write(&path, b"RCLIP\0\0\x01 definitely not a whole clip ....................")?;
        assert!(backend.open_source(&SourceLocator::File(path)).is_err());
        Ok(())
    }

    #[test]
    fn unknown_scheme_fails_to_open() -> Result<()> {
        let backend = DefaultBackend::new(&RecorderConfig::default())?;
        if cfg!(feature = "rtsp-gstreamer") {
            return Ok(());
        }
        assert!(backend
            .open_source(&SourceLocator::Network("rtsp://127.0.0.1:1/x".into()))
            .is_err());
        Ok(())
    }
}
