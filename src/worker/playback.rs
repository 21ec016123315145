//! Playback: replay archived clips newest first, paced at each clip's own rate.

use super::{WorkerContext, WorkerExit};
use crate::archive::Clip;
use crate::clock::Pacer;
use crate::coordinator::Event;
use crate::error::{Phase, RecorderError};
use crate::ingest::{Grab, GrabError, ScopedSource, SourceLocator};

enum ClipOutcome {
    Played(u64),
    Skipped,
    Cancelled,
}

pub(super) fn run(ctx: &WorkerContext) -> WorkerExit {
    let snapshot = ctx.archive.snapshot();
    log::info!("playback: replaying {} clips, newest first", snapshot.len());

    let mut played = 0usize;
    for clip in snapshot.newest_first() {
        if ctx.stop.is_stopped() {
            log::info!("playback: cancelled after {played} clips");
            return WorkerExit::Cancelled;
        }
        match play_clip(ctx, clip) {
            ClipOutcome::Played(frames) => {
                played += 1;
                log::info!("playback: clip {} done ({} frames)", clip.id(), frames);
            }
            ClipOutcome::Skipped => {}
            ClipOutcome::Cancelled => {
                log::info!("playback: cancelled during clip {}", clip.id());
                return WorkerExit::Cancelled;
            }
        }
    }

    log::info!("playback: finished, {played} of {} clips played", snapshot.len());
    WorkerExit::Completed
}

fn play_clip(ctx: &WorkerContext, clip: &Clip) -> ClipOutcome {
    if !clip.path().exists() {
        ctx.report(RecorderError::NotFound {
            clip: clip.id(),
            path: clip.path().to_path_buf(),
        });
        return ClipOutcome::Skipped;
    }

    let locator = SourceLocator::File(clip.path().to_path_buf());
    let mut source = match ScopedSource::open(ctx.backend.as_ref(), &locator, Phase::Playback) {
        Ok(source) => source,
        Err(err) => {
            ctx.report(err);
            return ClipOutcome::Skipped;
        }
    };
    ctx.emit(Event::ClipPlaying(clip.clone()));

    let native = source.native_frame_rate();
    let fps = if native.is_finite() && native > 0.0 {
        native
    } else {
        ctx.config.target_frame_rate
    };
    let mut pacer = Pacer::new(fps);
    let mut frames = 0u64;

    loop {
        if pacer.wait(&ctx.stop) {
            return ClipOutcome::Cancelled;
        }
        match source.grab() {
            Ok(Grab::Frame(frame)) => {
                ctx.present(frame);
                frames += 1;
            }
            Ok(Grab::EndOfStream) => return ClipOutcome::Played(frames),
            Err(GrabError::Transient(message)) => {
                log::debug!("playback: clip {}: skipped frame: {}", clip.id(), message);
            }
            Err(GrabError::Fatal(message)) => {
                ctx.report(source.read_error(format!("clip {}: {}", clip.id(), message)));
                return ClipOutcome::Skipped;
            }
        }
    }
}
