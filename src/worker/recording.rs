//! Recording: capture a fixed number of timed clips from the network source.
//!
//! Each clip opens its own source and writer, both released before the next
//! clip starts. A clip is archived only when the full duration was captured and
//! its writer finalized cleanly.

use chrono::Utc;
use std::time::Instant;

use super::{WorkerContext, WorkerExit};
use crate::coordinator::Event;
use crate::error::{Phase, RecorderError};
use crate::ingest::{Grab, GrabError, ScopedSource, SourceLocator};
use crate::writer::{clip_file_name, ScopedWriter, WriterParams};

enum ClipOutcome {
    Archived,
    Cancelled,
}

pub(super) fn run(ctx: &WorkerContext) -> WorkerExit {
    let count = ctx.config.clip_count;
    log::info!(
        "recording: capturing {} clips of {:.1}s into {}",
        count,
        ctx.config.clip_duration.as_secs_f64(),
        ctx.config.output_dir.display()
    );

    let mut archived = 0u32;
    for sequence in 1..=count {
        if ctx.stop.is_stopped() {
            return cancelled(archived, count);
        }
        match record_clip(ctx, sequence) {
            Ok(ClipOutcome::Archived) => archived += 1,
            Ok(ClipOutcome::Cancelled) => return cancelled(archived, count),
            Err(err) => ctx.report(err),
        }
        if sequence < count && ctx.stop.wait_timeout(ctx.config.inter_clip_pause) {
            return cancelled(archived, count);
        }
    }

    log::info!("recording: finished, {archived} of {count} clips archived");
    WorkerExit::Completed
}

fn cancelled(archived: u32, count: u32) -> WorkerExit {
    log::info!("recording: cancelled, {archived} of {count} clips archived");
    WorkerExit::Cancelled
}

fn record_clip(ctx: &WorkerContext, sequence: u32) -> Result<ClipOutcome, RecorderError> {
    let backend = ctx.backend.as_ref();
    let locator = SourceLocator::Network(ctx.config.source_locator.clone());
    let mut source = ScopedSource::open(backend, &locator, Phase::Recording)?;
    let (width, height) = source.dimensions();

    let created_at = Utc::now();
    let path = ctx.config.output_dir.join(clip_file_name(
        created_at,
        sequence,
        backend.clip_extension(),
    ));
    let params = WriterParams {
        width,
        height,
        frame_rate: ctx.config.target_frame_rate,
        bitrate: ctx.config.bitrate,
    };
    let mut writer = ScopedWriter::open(backend, &path, &params, sequence)?;

    // `None` only for durations past the clock's range: record until stopped.
    let deadline = Instant::now().checked_add(ctx.config.clip_duration);
    let mut frames = 0u64;
    while deadline.map_or(true, |deadline| Instant::now() < deadline) {
        if ctx.stop.is_stopped() {
            drop(source);
            if let Err(err) = writer.finish() {
                log::warn!("{err}");
            }
            log::info!(
                "recording: clip {} cut short after {} frames, not archived",
                sequence,
                frames
            );
            return Ok(ClipOutcome::Cancelled);
        }
        match source.grab() {
            Ok(Grab::Frame(frame)) => {
                writer.write(&frame)?;
                frames += 1;
                if ctx.config.preview_while_recording {
                    ctx.present(frame);
                }
            }
            Ok(Grab::EndOfStream) => {
                return Err(source.read_error(format!(
                    "stream ended during clip {sequence}"
                )))
            }
            Err(GrabError::Transient(message)) => {
                log::debug!("recording: clip {sequence}: skipped frame: {message}");
            }
            Err(GrabError::Fatal(message)) => {
                return Err(source.read_error(format!("clip {sequence}: {message}")))
            }
        }
    }

    drop(source);
    writer.finish()?;
    if frames == 0 {
        log::warn!("recording: clip {sequence} captured no frames");
    }
    let clip = ctx.archive.append(path, created_at);
    log::info!(
        "recording: clip {} of {} done ({} frames)",
        sequence,
        ctx.config.clip_count,
        frames
    );
    ctx.emit(Event::ClipArchived(clip));
    Ok(ClipOutcome::Archived)
}
