//! Frame ingestion sources.
//!
//! This module provides the sources workers pull decoded frames from:
//! - RTSP streams (live view and recording), `stub://` synthetic streams for tests
//! - Recorded clip files (playback)
//!
//! Every source is used through `ScopedSource`, which closes it on every exit path.
//! Sources do not reconnect on their own; the coordinator decides when to open a
//! new one.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod rtsp;

use anyhow::Result;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;

use crate::backend::MediaBackend;
use crate::error::{Phase, RecorderError};
use crate::frame::Frame;

pub use file::{FileConfig, FileSource};
pub use rtsp::{RtspConfig, RtspSource};

/// Where a source reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocator {
    /// Live network stream (`rtsp://…`, or `stub://…` for the synthetic stream).
    Network(String),
    /// Previously recorded clip on local storage.
    File(PathBuf),
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Network(url) => f.write_str(url),
            SourceLocator::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Outcome of a successful grab.
#[derive(Debug)]
pub enum Grab {
    Frame(Frame),
    EndOfStream,
}

/// Classification of a failed grab.
#[derive(Debug, thiserror::Error)]
pub enum GrabError {
    /// The frame is lost but the source can keep going.
    #[error("transient read failure: {0}")]
    Transient(String),
    /// The source cannot produce further frames.
    #[error("source unusable: {0}")]
    Fatal(String),
}

/// A connected decoded-frame producer.
///
/// `grab` may block for a bounded time. `close` must be idempotent.
pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<Grab, GrabError>;

    /// Native frame dimensions (width, height).
    fn dimensions(&self) -> (u32, u32);

    fn native_frame_rate(&self) -> f64;

    fn close(&mut self) -> Result<()>;
}

// ----------------------------------------------------------------------------
// ScopedSource: acquire -> use -> guaranteed release
// ----------------------------------------------------------------------------

/// Open source that is closed when the guard goes out of scope.
pub struct ScopedSource {
    inner: Box<dyn FrameSource>,
    locator: SourceLocator,
    phase: Phase,
}

impl ScopedSource {
    pub fn open(
        backend: &dyn MediaBackend,
        locator: &SourceLocator,
        phase: Phase,
    ) -> Result<Self, RecorderError> {
        let inner = backend
            .open_source(locator)
            .map_err(|source| RecorderError::SourceOpen {
                phase,
                locator: locator.to_string(),
                source,
            })?;
        Ok(Self {
            inner,
            locator: locator.clone(),
            phase,
        })
    }

    pub fn locator(&self) -> &SourceLocator {
        &self.locator
    }

    /// Lift a fatal grab failure into a reportable error.
    pub fn read_error(&self, message: impl Into<String>) -> RecorderError {
        RecorderError::SourceRead {
            phase: self.phase,
            locator: self.locator.to_string(),
            message: message.into(),
        }
    }
}

impl Deref for ScopedSource {
    type Target = dyn FrameSource;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for ScopedSource {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for ScopedSource {
    fn drop(&mut self) {
        if let Err(err) = self.inner.close() {
            log::warn!(
                "{}: failed to close source {}: {:#}",
                self.phase,
                self.locator,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MediaBackend;
    use crate::writer::{ClipWriter, WriterParams};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn grab(&mut self) -> Result<Grab, GrabError> {
            Err(GrabError::Fatal("always broken".to_string()))
        }

        fn dimensions(&self) -> (u32, u32) {
            (1, 1)
        }

        fn native_frame_rate(&self) -> f64 {
            1.0
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingBackend {
        closes: Arc<AtomicUsize>,
    }

    impl MediaBackend for CountingBackend {
        fn open_source(&self, locator: &SourceLocator) -> Result<Box<dyn FrameSource>> {
            match locator {
                SourceLocator::Network(_) => Ok(Box::new(CountingSource {
                    closes: self.closes.clone(),
                })),
                SourceLocator::File(path) => {
                    anyhow::bail!("no such clip {}", path.display())
                }
            }
        }

        fn open_writer(&self, _path: &Path, _params: &WriterParams) -> Result<Box<dyn ClipWriter>> {
            anyhow::bail!("writers not supported")
        }

        fn clip_extension(&self) -> &'static str {
            "test"
        }
    }

    #[test]
    fn scoped_source_closes_on_drop() -> anyhow::Result<()> {
        let closes = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            closes: closes.clone(),
        };
        {
            let mut source = ScopedSource::open(
                &backend,
                &SourceLocator::Network("stub://a".to_string()),
                Phase::Streaming,
            )?;
            assert!(matches!(source.grab(), Err(GrabError::Fatal(_))));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn failed_open_reports_phase_and_locator() {
        let backend = CountingBackend {
            closes: Arc::new(AtomicUsize::new(0)),
        };
        let err = ScopedSource::open(
            &backend,
            &SourceLocator::File(PathBuf::from("/missing.rclip")),
            Phase::Playback,
        )
        .err()
        .expect("open must fail");
        assert!(matches!(
            err,
            RecorderError::SourceOpen {
                phase: Phase::Playback,
                ..
            }
        ));
        assert!(err.to_string().contains("/missing.rclip"));
    }
}
