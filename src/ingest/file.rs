//! Recorded clip frame source.
//!
//! This module provides `FileSource` for replaying clips from local storage.
//! The file source is responsible for:
//! - Reading frames from a local clip file (no network access)
//! - Decoding frames in-memory to RGB24
//! - Reporting the clip's native frame rate so playback can pace itself
//! - Signalling `EndOfStream` once the last frame has been delivered
//!
//! The file source MUST NOT:
//! - Fetch remote URLs
//! - Pace frames itself (the playback worker owns timing)
//!
//! `.rclip` files are always readable. Other containers (e.g. `.mp4`) need the
//! `ingest-file-ffmpeg` feature.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, Grab, GrabError};
use crate::frame::Frame;
use crate::writer::container::{self, ContainerReader, ContainerRecord};

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local clip path (e.g., "recorded_videos/clip_20240309T101500.000Z_0001.rclip").
    pub path: PathBuf,
    /// Rate reported when the file carries no usable frame rate.
    pub fallback_fps: f64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            fallback_fps: 30.0,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Native(NativeFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if has_native_extension(&config.path) {
            Ok(Self {
                backend: FileBackend::Native(NativeFileSource::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                Ok(Self {
                    backend: FileBackend::Ffmpeg(FfmpegFileSource::new(config)?),
                })
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                Err(anyhow!(
                    "{} needs the ingest-file-ffmpeg feature",
                    config.path.display()
                ))
            }
        }
    }

    /// Open the file and validate its container.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Native(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    /// Frames delivered so far.
    pub fn frames_read(&self) -> u64 {
        match &self.backend {
            FileBackend::Native(source) => source.frame_count,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_read(),
        }
    }
}

impl FrameSource for FileSource {
    fn grab(&mut self) -> Result<Grab, GrabError> {
        match &mut self.backend {
            FileBackend::Native(source) => source.grab(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.grab(),
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        match &self.backend {
            FileBackend::Native(source) => source.dimensions(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.dimensions(),
        }
    }

    fn native_frame_rate(&self) -> f64 {
        match &self.backend {
            FileBackend::Native(source) => source.native_frame_rate(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.native_frame_rate(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Native(source) => source.close(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Native .rclip source
// ----------------------------------------------------------------------------

struct NativeFileSource {
    config: FileConfig,
    reader: Option<ContainerReader>,
    frame_count: u64,
    finished: bool,
}

impl NativeFileSource {
    fn new(config: FileConfig) -> Self {
        Self {
            config,
            reader: None,
            frame_count: 0,
            finished: false,
        }
    }

    fn connect(&mut self) -> Result<()> {
        let reader = ContainerReader::open(&self.config.path)?;
        log::info!(
            "FileSource: opened {} ({} frames at {:.1} fps)",
            self.config.path.display(),
            reader.frame_count(),
            reader.header().frame_rate
        );
        self.reader = Some(reader);
        Ok(())
    }

    fn grab(&mut self) -> Result<Grab, GrabError> {
        if self.finished {
            return Ok(Grab::EndOfStream);
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| GrabError::Fatal("clip file is not open".into()))?;
        let (width, height) = (reader.header().width, reader.header().height);
        match reader.next_record() {
            Ok(ContainerRecord::Frame { pixels, .. }) => {
                self.frame_count += 1;
                Ok(Grab::Frame(Frame::new(pixels, width, height)))
            }
            Ok(ContainerRecord::End) => {
                self.finished = true;
                Ok(Grab::EndOfStream)
            }
            Err(err) => Err(GrabError::Fatal(format!(
                "{}: {err:#}",
                self.config.path.display()
            ))),
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        self.reader
            .as_ref()
            .map(|r| (r.header().width, r.header().height))
            .unwrap_or((0, 0))
    }

    fn native_frame_rate(&self) -> f64 {
        self.reader
            .as_ref()
            .map(|r| r.header().frame_rate)
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(self.config.fallback_fps)
    }

    fn close(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            log::debug!(
                "FileSource: closed {} after {} frames",
                self.config.path.display(),
                self.frame_count
            );
        }
        Ok(())
    }
}

fn is_local_file_path(path: &std::path::Path) -> bool {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return false;
    }
    !text.contains("://")
}

fn has_native_extension(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(container::EXTENSION))
}
