//! Error taxonomy for the recorder core.
//!
//! Back ends report failures with `anyhow` context chains. Workers lift those into
//! `RecorderError`, attaching the phase and the locator or clip index so every
//! reported error can be diagnosed without inspecting coordinator state.

use std::fmt;
use std::path::PathBuf;

use crate::coordinator::{Mode, WorkerKind};

/// Which activity was running when an error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Streaming,
    Recording,
    Playback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Streaming => "streaming",
            Phase::Recording => "recording",
            Phase::Playback => "playback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("{phase}: cannot open source {locator}: {source:#}")]
    SourceOpen {
        phase: Phase,
        locator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{phase}: source {locator} became unusable: {message}")]
    SourceRead {
        phase: Phase,
        locator: String,
        message: String,
    },

    #[error("recording: clip {clip} ({}): {source:#}", .path.display())]
    Writer {
        clip: u32,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("playback: clip {clip} file not found: {}", .path.display())]
    NotFound { clip: u64, path: PathBuf },

    #[error("busy: request rejected while mode is {mode}")]
    Busy { mode: Mode },

    #[error("nothing to play: clip archive is empty")]
    EmptyArchive,

    #[error("failed to start {kind} worker: {source}")]
    WorkerSpawn {
        kind: WorkerKind,
        #[source]
        source: std::io::Error,
    },
}

impl RecorderError {
    /// Phase the error belongs to, when it is tied to a running activity.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            RecorderError::SourceOpen { phase, .. } | RecorderError::SourceRead { phase, .. } => {
                Some(*phase)
            }
            RecorderError::Writer { .. } => Some(Phase::Recording),
            RecorderError::NotFound { .. } => Some(Phase::Playback),
            RecorderError::Busy { .. }
            | RecorderError::EmptyArchive
            | RecorderError::WorkerSpawn { .. } => None,
        }
    }

    /// True for rejections of a command that left the coordinator untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RecorderError::Busy { .. } | RecorderError::EmptyArchive
        )
    }
}
