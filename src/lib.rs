//! RTSP Clip Recorder
//!
//! This crate implements the mode-coordination and frame-pipeline engine behind a
//! live camera viewer that can, on demand, record a series of timed clips or
//! replay the recorded clips newest first.
//!
//! # Architecture
//!
//! The engine guarantees by construction:
//!
//! 1. **One worker at a time**: live view, recording and playback never overlap.
//! 2. **Serialized control**: every command passes through a single coordinator
//!    thread and a single transition function over `Mode`.
//! 3. **Release before spawn**: an outgoing worker is stopped and joined, with its
//!    source and writer closed, before the next worker starts.
//! 4. **Only finalized clips are archived**: a clip enters the archive after its
//!    writer closed cleanly, and playback replays the archive in exact reverse.
//!
//! # Module Structure
//!
//! - `coordinator`: Mode state machine, command handling, worker ownership
//! - `worker`: Live view, recording and playback tasks
//! - `ingest`: Frame sources (RTSP / synthetic streams, recorded clip files)
//! - `writer`: Clip writers (native `.rclip` container, FFmpeg MP4)
//! - `backend`: Media back end that opens sources and writers
//! - `frame`: Frames, the display handoff slot, the sink hook
//! - `archive`: Append-only clip archive
//! - `clock`: Stop signal and frame pacing
//! - `config`: Configuration loading and validation
//! - `error`: Error taxonomy

pub mod archive;
pub mod backend;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod worker;
pub mod writer;

pub use archive::{ArchiveSnapshot, Clip, ClipArchive};
pub use backend::{DefaultBackend, MediaBackend};
pub use clock::{Pacer, StopSignal};
pub use config::RecorderConfig;
pub use coordinator::{
    Command, CoordinatorHandle, Event, Mode, ModeCoordinator, ModeEvent, ShutdownReport,
    Transition,
};
pub use error::{Phase, RecorderError};
pub use frame::{Frame, FrameHandoff, FrameSink, NullSink};
pub use ingest::{
    FileConfig, FileSource, FrameSource, Grab, GrabError, RtspConfig, RtspSource, ScopedSource,
    SourceLocator,
};
pub use worker::{WorkerExit, WorkerKind};
pub use writer::{clip_file_name, ClipFormat, ClipWriter, ScopedWriter, WriterParams};
