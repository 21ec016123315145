//! Clip writers: persist a sequence of frames into one container file.
//!
//! - `.rclip` native container (always available)
//! - H.264/MP4 through FFmpeg (feature: encode-ffmpeg)
//!
//! A writer's `close()` finalizes the container. Only clips whose writer closed
//! without error are valid archive entries.

pub mod container;
#[cfg(feature = "encode-ffmpeg")]
pub(crate) mod ffmpeg;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use crate::backend::MediaBackend;
use crate::error::RecorderError;
use crate::frame::Frame;

/// Encoding parameters for one clip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriterParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub bitrate: u64,
}

/// A frame-to-container persister. `close` must be idempotent.
pub trait ClipWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Finalize the container (index, trailer, metadata).
    fn close(&mut self) -> Result<()>;
}

/// Container format used for new clips.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipFormat {
    #[default]
    Rclip,
    Mp4,
}

impl ClipFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ClipFormat::Rclip => container::EXTENSION,
            ClipFormat::Mp4 => "mp4",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rclip" => Some(ClipFormat::Rclip),
            "mp4" => Some(ClipFormat::Mp4),
            _ => None,
        }
    }
}

/// File name for a clip: sortable UTC timestamp, then the session sequence index.
///
/// Lexicographic order of these names equals creation order.
pub fn clip_file_name(created_at: DateTime<Utc>, sequence: u32, extension: &str) -> String {
    format!(
        "clip_{}_{:04}.{}",
        created_at.format("%Y%m%dT%H%M%S%.3fZ"),
        sequence,
        extension
    )
}

// ----------------------------------------------------------------------------
// ScopedWriter: the writer is closed on every exit path
// ----------------------------------------------------------------------------

/// Open writer that is finalized when dropped, unless `finish` already did so.
pub struct ScopedWriter {
    inner: Box<dyn ClipWriter>,
    path: PathBuf,
    clip: u32,
    finished: bool,
}

impl ScopedWriter {
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        params: &WriterParams,
        clip: u32,
    ) -> Result<Self, RecorderError> {
        let inner = backend
            .open_writer(path, params)
            .map_err(|source| RecorderError::Writer {
                clip,
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
            clip,
            finished: false,
        })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), RecorderError> {
        self.inner
            .write_frame(frame)
            .map_err(|source| self.error(source))
    }

    /// Finalize the clip. Only an `Ok` here makes the clip archivable.
    pub fn finish(mut self) -> Result<(), RecorderError> {
        self.finished = true;
        self.inner.close().map_err(|source| self.error(source))
    }

    fn error(&self, source: anyhow::Error) -> RecorderError {
        RecorderError::Writer {
            clip: self.clip,
            path: self.path.clone(),
            source,
        }
    }
}

impl Deref for ScopedWriter {
    type Target = dyn ClipWriter;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for ScopedWriter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for ScopedWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.inner.close() {
            log::warn!(
                "recording: failed to finalize abandoned clip {} ({}): {:#}",
                self.clip,
                self.path.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clip_names_sort_by_creation() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 58).unwrap();
        let names = [
            clip_file_name(t0, 1, "rclip"),
            clip_file_name(t0 + chrono::Duration::milliseconds(5_500), 2, "rclip"),
            clip_file_name(t0 + chrono::Duration::milliseconds(11_000), 3, "rclip"),
        ];
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
        assert_eq!(names[0], "clip_20240309T235958.000Z_0001.rclip");
    }

    #[test]
    fn same_instant_breaks_ties_by_sequence() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(clip_file_name(t0, 9, "mp4") < clip_file_name(t0, 10, "mp4"));
    }

    #[test]
    fn clip_format_parses_case_insensitively() {
        assert_eq!(ClipFormat::parse("MP4"), Some(ClipFormat::Mp4));
        assert_eq!(ClipFormat::parse("rclip"), Some(ClipFormat::Rclip));
        assert_eq!(ClipFormat::parse("avi"), None);
        assert_eq!(ClipFormat::Rclip.extension(), "rclip");
    }
}
