//! Bounded worker tasks driven by the coordinator.
//!
//! Each worker runs on its own named thread, owns at most one source (and, when
//! recording, one writer) through scoped guards, and observes its `StopSignal`
//! at every frame boundary. When the worker body returns, its guards have been
//! dropped; only then is the completion message delivered.

mod live;
mod playback;
mod recording;

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::archive::ClipArchive;
use crate::backend::MediaBackend;
use crate::clock::StopSignal;
use crate::config::RecorderConfig;
use crate::coordinator::Event;
use crate::error::RecorderError;
use crate::frame::{Frame, FrameHandoff, FrameSink};

/// The three worker roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Live,
    Recording,
    Playback,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerKind::Live => "live view",
            WorkerKind::Recording => "recording",
            WorkerKind::Playback => "playback",
        };
        f.write_str(name)
    }
}

/// How a worker body ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// Ran to its natural end (all clips recorded or played).
    Completed,
    /// Observed the stop signal.
    Cancelled,
    /// Could not continue; the error was already reported.
    Failed,
    /// The worker thread panicked.
    Panicked,
}

/// Everything a worker needs, shared with the coordinator.
pub(crate) struct WorkerContext {
    pub config: Arc<RecorderConfig>,
    pub backend: Arc<dyn MediaBackend>,
    pub handoff: Arc<FrameHandoff>,
    pub sink: Arc<dyn FrameSink>,
    pub archive: Arc<ClipArchive>,
    pub events: Sender<Event>,
    pub stop: StopSignal,
}

impl WorkerContext {
    /// Log an error and forward it to event listeners.
    pub fn report(&self, err: RecorderError) {
        log::error!("{err}");
        self.emit(Event::Error(err));
    }

    pub fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Hand a frame to the display.
    pub fn present(&self, frame: Frame) {
        self.handoff.publish(frame);
        self.sink.frame_ready();
    }
}

/// Sends the completion message when the worker thread unwinds or returns.
struct DoneNotifier<F: FnOnce(WorkerExit)> {
    notify: Option<F>,
    exit: WorkerExit,
}

impl<F: FnOnce(WorkerExit)> Drop for DoneNotifier<F> {
    fn drop(&mut self) {
        if let Some(notify) = self.notify.take() {
            notify(self.exit);
        }
    }
}

/// Start `kind` on a dedicated thread. `on_done` runs on that thread after
/// every handle the worker opened has been released.
pub(crate) fn spawn<F>(
    kind: WorkerKind,
    ctx: WorkerContext,
    on_done: F,
) -> Result<JoinHandle<()>, RecorderError>
where
    F: FnOnce(WorkerExit) + Send + 'static,
{
    let name = match kind {
        WorkerKind::Live => "live-view",
        WorkerKind::Recording => "recording",
        WorkerKind::Playback => "playback",
    };
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut done = DoneNotifier {
                notify: Some(on_done),
                exit: WorkerExit::Panicked,
            };
            done.exit = match kind {
                WorkerKind::Live => live::run(&ctx),
                WorkerKind::Recording => recording::run(&ctx),
                WorkerKind::Playback => playback::run(&ctx),
            };
            log::debug!("{kind} worker exited: {:?}", done.exit);
        })
        .map_err(|source| RecorderError::WorkerSpawn { kind, source })
}
