//! Mode coordinator: the single owner of `Mode` and of the active worker.
//!
//! All requests go through one coordinator thread, so they are serialized in
//! arrival order. Every transition follows the same barrier: signal the outgoing
//! worker, join it (its source and writer are released before the join
//! returns), and only then spawn the incoming worker.

use parking_lot::Mutex;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::archive::{ArchiveSnapshot, Clip, ClipArchive};
use crate::backend::MediaBackend;
use crate::clock::StopSignal;
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::frame::{FrameHandoff, FrameSink};
use crate::worker::{self, WorkerContext, WorkerExit};

pub use crate::worker::WorkerKind;

// ----------------------------------------------------------------------------
// Mode and the transition function
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Live,
    Recording,
    Playback,
    Terminating,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Live => "live",
            Mode::Recording => "recording",
            Mode::Playback => "playback",
            Mode::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Inputs to the transition function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeEvent {
    StartRecording,
    StartPlayback { archive_empty: bool },
    RecordingComplete,
    PlaybackComplete,
    Shutdown,
}

/// Result of applying a `ModeEvent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    To(Mode),
    Busy,
    EmptyArchive,
    /// Completion for a mode that is no longer current.
    Ignored,
}

impl Mode {
    /// The complete transition table.
    pub fn on(self, event: ModeEvent) -> Transition {
        use Mode::*;
        match (self, event) {
            (Terminating, ModeEvent::Shutdown) => Transition::Ignored,
            (_, ModeEvent::Shutdown) => Transition::To(Terminating),

            (Live, ModeEvent::StartRecording) => Transition::To(Recording),
            (_, ModeEvent::StartRecording) => Transition::Busy,

            (Live, ModeEvent::StartPlayback { archive_empty: true }) => Transition::EmptyArchive,
            (Live, ModeEvent::StartPlayback { archive_empty: false }) => Transition::To(Playback),
            (_, ModeEvent::StartPlayback { .. }) => Transition::Busy,

            (Recording, ModeEvent::RecordingComplete) => Transition::To(Live),
            (Playback, ModeEvent::PlaybackComplete) => Transition::To(Live),
            (_, ModeEvent::RecordingComplete | ModeEvent::PlaybackComplete) => Transition::Ignored,
        }
    }
}

// ----------------------------------------------------------------------------
// Public surface
// ----------------------------------------------------------------------------

/// External commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    StartRecording,
    StartPlayback,
    Shutdown,
}

/// Notifications for listeners (UI, logs, tests).
#[derive(Debug)]
pub enum Event {
    ModeChanged { from: Mode, to: Mode },
    ClipArchived(Clip),
    ClipPlaying(Clip),
    Error(RecorderError),
}

/// Outcome of shutdown. Cleanup problems are collected here, never raised.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Worker that was active when shutdown arrived.
    pub interrupted: Option<WorkerKind>,
    pub clips_archived: usize,
    pub cleanup_errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.cleanup_errors.is_empty()
    }
}

/// Worker a caller may ask for. Live view is only ever started by the
/// coordinator itself.
#[derive(Debug, Clone, Copy)]
enum Request {
    Recording,
    Playback,
}

impl Request {
    fn kind(self) -> WorkerKind {
        match self {
            Request::Recording => WorkerKind::Recording,
            Request::Playback => WorkerKind::Playback,
        }
    }
}

enum Message {
    Start {
        request: Request,
        reply: Sender<Result<(), RecorderError>>,
    },
    Shutdown {
        reply: Sender<ShutdownReport>,
    },
    WorkerDone {
        generation: u64,
        exit: WorkerExit,
    },
}

/// Client side of a running coordinator. Dropping it shuts the coordinator down.
pub struct CoordinatorHandle {
    tx: Sender<Message>,
    mode: Arc<Mutex<Mode>>,
    archive: Arc<ClipArchive>,
    join: Option<JoinHandle<()>>,
    report: Option<ShutdownReport>,
}

pub struct ModeCoordinator;

impl ModeCoordinator {
    /// Start the coordinator thread in `Live` mode with a live view running.
    ///
    /// Returns the control handle and the event stream. The stream ends once the
    /// coordinator has shut down.
    pub fn spawn(
        config: RecorderConfig,
        backend: Arc<dyn MediaBackend>,
        handoff: Arc<FrameHandoff>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(CoordinatorHandle, Receiver<Event>), RecorderError> {
        let (tx, rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let mode = Arc::new(Mutex::new(Mode::Live));
        let archive = Arc::new(ClipArchive::new());

        let state = Coordinator {
            config: Arc::new(config),
            backend,
            handoff,
            sink,
            archive: archive.clone(),
            events: events_tx,
            tx: tx.clone(),
            mode: mode.clone(),
            current: Mode::Live,
            active: None,
            generation: 0,
            reconnect_at: None,
        };
        let join = std::thread::Builder::new()
            .name("mode-coordinator".to_string())
            .spawn(move || state.run(rx))
            .map_err(|source| RecorderError::WorkerSpawn {
                kind: WorkerKind::Live,
                source,
            })?;

        Ok((
            CoordinatorHandle {
                tx,
                mode,
                archive,
                join: Some(join),
                report: None,
            },
            events_rx,
        ))
    }
}

impl CoordinatorHandle {
    /// Stop live view and record `clip_count` clips. Rejected unless `Live`.
    pub fn start_recording(&self) -> Result<(), RecorderError> {
        self.request(Request::Recording)
    }

    /// Stop live view and replay the archive newest first. Rejected unless
    /// `Live` with at least one clip.
    pub fn start_playback(&self) -> Result<(), RecorderError> {
        self.request(Request::Playback)
    }

    pub fn dispatch(&mut self, command: Command) -> Result<(), RecorderError> {
        match command {
            Command::StartRecording => self.start_recording(),
            Command::StartPlayback => self.start_playback(),
            Command::Shutdown => {
                self.shutdown();
                Ok(())
            }
        }
    }

    /// Stop the active worker, release its handles and end the coordinator.
    ///
    /// Safe to call more than once; later calls return the first report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut report = match self.tx.send(Message::Shutdown { reply: reply_tx }) {
            Ok(()) => reply_rx.recv().unwrap_or_else(|_| ShutdownReport {
                cleanup_errors: vec!["coordinator exited without a shutdown report".into()],
                ..ShutdownReport::default()
            }),
            Err(_) => ShutdownReport {
                cleanup_errors: vec!["coordinator was not running".into()],
                ..ShutdownReport::default()
            },
        };
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                report
                    .cleanup_errors
                    .push("coordinator thread panicked".to_string());
            }
        }
        report.clips_archived = self.archive.len();
        self.report = Some(report.clone());
        report
    }

    pub fn mode(&self) -> Mode {
        *self.mode.lock()
    }

    /// Current archive contents in creation order.
    pub fn archive(&self) -> ArchiveSnapshot {
        self.archive.snapshot()
    }

    fn request(&self, request: Request) -> Result<(), RecorderError> {
        let terminated = || RecorderError::Busy {
            mode: Mode::Terminating,
        };
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Message::Start {
                request,
                reply: reply_tx,
            })
            .map_err(|_| terminated())?;
        reply_rx.recv().map_err(|_| terminated())?
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            let report = self.shutdown();
            if !report.is_clean() {
                log::warn!("coordinator: shutdown on drop: {:?}", report.cleanup_errors);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Coordinator thread
// ----------------------------------------------------------------------------

struct ActiveWorker {
    kind: WorkerKind,
    generation: u64,
    stop: StopSignal,
    join: JoinHandle<()>,
}

struct Coordinator {
    config: Arc<RecorderConfig>,
    backend: Arc<dyn MediaBackend>,
    handoff: Arc<FrameHandoff>,
    sink: Arc<dyn FrameSink>,
    archive: Arc<ClipArchive>,
    events: Sender<Event>,
    tx: Sender<Message>,
    mode: Arc<Mutex<Mode>>,
    current: Mode,
    active: Option<ActiveWorker>,
    generation: u64,
    reconnect_at: Option<Instant>,
}

impl Coordinator {
    fn run(mut self, rx: Receiver<Message>) {
        self.spawn_live();
        loop {
            let message = match self.reconnect_at {
                Some(at) => match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => {
                        self.reconnect_live();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            match message {
                Message::Start { request, reply } => {
                    let _ = reply.send(self.start(request));
                }
                Message::WorkerDone { generation, exit } => self.worker_done(generation, exit),
                Message::Shutdown { reply } => {
                    let report = self.shutdown();
                    let _ = reply.send(report);
                    break;
                }
            }
        }
        log::debug!("coordinator: exited");
    }

    fn start(&mut self, request: Request) -> Result<(), RecorderError> {
        let kind = request.kind();
        let event = match request {
            Request::Recording => ModeEvent::StartRecording,
            Request::Playback => ModeEvent::StartPlayback {
                archive_empty: self.archive.is_empty(),
            },
        };
        let next = match self.current.on(event) {
            Transition::To(next) => next,
            Transition::Busy | Transition::Ignored => {
                log::info!("coordinator: {kind} request ignored while {}", self.current);
                return Err(RecorderError::Busy { mode: self.current });
            }
            Transition::EmptyArchive => {
                log::info!("coordinator: playback requested with an empty archive");
                return Err(RecorderError::EmptyArchive);
            }
        };

        self.stop_active();
        self.reconnect_at = None;
        self.set_mode(next);
        if let Err(err) = self.spawn_worker(kind) {
            log::error!("{err}");
            self.set_mode(Mode::Live);
            self.spawn_live();
            return Err(err);
        }
        Ok(())
    }

    fn worker_done(&mut self, generation: u64, exit: WorkerExit) {
        let Some(active) = self.active.take_if_generation(generation) else {
            log::debug!("coordinator: ignoring stale completion from generation {generation}");
            return;
        };
        if active.join.join().is_err() {
            log::error!("coordinator: {} worker panicked", active.kind);
        }

        let event = match active.kind {
            WorkerKind::Recording => ModeEvent::RecordingComplete,
            WorkerKind::Playback => ModeEvent::PlaybackComplete,
            WorkerKind::Live => {
                if exit != WorkerExit::Cancelled {
                    self.schedule_reconnect();
                }
                return;
            }
        };
        if let Transition::To(next) = self.current.on(event) {
            self.set_mode(next);
            self.spawn_live();
        }
    }

    /// Signal, then join. The worker's handles are closed once this returns.
    fn stop_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.stop.stop();
        if active.join.join().is_err() {
            log::error!("coordinator: {} worker panicked while stopping", active.kind);
        }
        log::debug!("coordinator: {} worker released", active.kind);
    }

    fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if let Transition::To(next) = self.current.on(ModeEvent::Shutdown) {
            self.set_mode(next);
        }
        self.reconnect_at = None;
        if let Some(active) = self.active.take() {
            report.interrupted = Some(active.kind);
            active.stop.stop();
            if active.join.join().is_err() {
                report
                    .cleanup_errors
                    .push(format!("{} worker panicked during shutdown", active.kind));
            }
        }
        self.handoff.clear();
        report.clips_archived = self.archive.len();
        log::info!(
            "coordinator: shut down ({} clips archived, {} cleanup errors)",
            report.clips_archived,
            report.cleanup_errors.len()
        );
        report
    }

    fn spawn_live(&mut self) {
        if let Err(err) = self.spawn_worker(WorkerKind::Live) {
            log::error!("{err}");
            self.emit(Event::Error(err));
            self.schedule_reconnect();
        }
    }

    fn reconnect_live(&mut self) {
        self.reconnect_at = None;
        if self.current == Mode::Live && self.active.is_none() {
            log::info!("coordinator: restarting live view");
            self.spawn_live();
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.config.reconnect_delay {
            Some(delay) if self.current == Mode::Live => {
                log::info!(
                    "coordinator: live view stopped, retrying in {:.1}s",
                    delay.as_secs_f64()
                );
                self.reconnect_at = Instant::now().checked_add(delay);
            }
            _ => log::warn!("coordinator: live view stopped, no active producer"),
        }
    }

    fn spawn_worker(&mut self, kind: WorkerKind) -> Result<(), RecorderError> {
        self.generation += 1;
        let generation = self.generation;
        let stop = StopSignal::new();
        let ctx = WorkerContext {
            config: self.config.clone(),
            backend: self.backend.clone(),
            handoff: self.handoff.clone(),
            sink: self.sink.clone(),
            archive: self.archive.clone(),
            events: self.events.clone(),
            stop: stop.clone(),
        };
        let done = self.tx.clone();
        let join = worker::spawn(kind, ctx, move |exit| {
            let _ = done.send(Message::WorkerDone { generation, exit });
        })?;
        log::debug!("coordinator: started {kind} worker (generation {generation})");
        self.active = Some(ActiveWorker {
            kind,
            generation,
            stop,
            join,
        });
        Ok(())
    }

    fn set_mode(&mut self, next: Mode) {
        let from = self.current;
        if from == next {
            return;
        }
        self.current = next;
        *self.mode.lock() = next;
        log::info!("coordinator: mode {from} -> {next}");
        self.emit(Event::ModeChanged { from, to: next });
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

trait TakeIfGeneration {
    fn take_if_generation(&mut self, generation: u64) -> Option<ActiveWorker>;
}

impl TakeIfGeneration for Option<ActiveWorker> {
    fn take_if_generation(&mut self, generation: u64) -> Option<ActiveWorker> {
        match self {
            Some(active) if active.generation == generation => self.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_MODES: [Mode; 4] = [Mode::Live, Mode::Recording, Mode::Playback, Mode::Terminating];

    #[test]
    fn recording_only_starts_from_live() {
        assert_eq!(
            Mode::Live.on(ModeEvent::StartRecording),
            Transition::To(Mode::Recording)
        );
        for mode in [Mode::Recording, Mode::Playback, Mode::Terminating] {
            assert_eq!(mode.on(ModeEvent::StartRecording), Transition::Busy);
        }
    }

    #[test]
    fn playback_needs_live_and_clips() {
        assert_eq!(
            Mode::Live.on(ModeEvent::StartPlayback {
                archive_empty: false
            }),
            Transition::To(Mode::Playback)
        );
        assert_eq!(
            Mode::Live.on(ModeEvent::StartPlayback {
                archive_empty: true
            }),
            Transition::EmptyArchive
        );
        // Busy wins over an empty archive.
        assert_eq!(
            Mode::Recording.on(ModeEvent::StartPlayback {
                archive_empty: true
            }),
            Transition::Busy
        );
    }

    #[test]
    fn completions_return_to_live_only_from_their_mode() {
        assert_eq!(
            Mode::Recording.on(ModeEvent::RecordingComplete),
            Transition::To(Mode::Live)
        );
        assert_eq!(
            Mode::Playback.on(ModeEvent::PlaybackComplete),
            Transition::To(Mode::Live)
        );
        assert_eq!(
            Mode::Live.on(ModeEvent::RecordingComplete),
            Transition::Ignored
        );
        assert_eq!(
            Mode::Terminating.on(ModeEvent::PlaybackComplete),
            Transition::Ignored
        );
        assert_eq!(
            Mode::Playback.on(ModeEvent::RecordingComplete),
            Transition::Ignored
        );
    }

    #[test]
    fn shutdown_is_always_accepted() {
        for mode in [Mode::Live, Mode::Recording, Mode::Playback] {
            assert_eq!(
                mode.on(ModeEvent::Shutdown),
                Transition::To(Mode::Terminating)
            );
        }
        assert_eq!(
            Mode::Terminating.on(ModeEvent::Shutdown),
            Transition::Ignored
        );
    }

    #[test]
    fn terminating_is_terminal() {
        let events = [
            ModeEvent::StartRecording,
            ModeEvent::StartPlayback {
                archive_empty: false,
            },
            ModeEvent::RecordingComplete,
            ModeEvent::PlaybackComplete,
            ModeEvent::Shutdown,
        ];
        for event in events {
            assert!(!matches!(
                Mode::Terminating.on(event),
                Transition::To(mode) if mode != Mode::Terminating
            ));
        }
    }

    #[test]
    fn no_event_reaches_a_mode_outside_the_table() {
        for mode in ALL_MODES {
            if let Transition::To(next) = mode.on(ModeEvent::StartRecording) {
                assert_eq!((mode, next), (Mode::Live, Mode::Recording));
            }
        }
    }

    #[test]
    fn take_if_generation_leaves_mismatches_in_place() {
        let join = std::thread::spawn(|| {});
        let mut slot = Some(ActiveWorker {
            kind: WorkerKind::Live,
            generation: 7,
            stop: StopSignal::new(),
            join,
        });
        assert!(slot.take_if_generation(6).is_none());
        assert!(slot.is_some());
        let active = slot.take_if_generation(7).expect("matching generation");
        assert_eq!(active.kind, WorkerKind::Live);
        active.join.join().expect("join test thread");
    }
}
