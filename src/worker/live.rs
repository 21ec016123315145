//! Live view: stream the network source into the display until superseded.

use std::time::{Duration, Instant};

use super::{WorkerContext, WorkerExit};
use crate::error::Phase;
use crate::ingest::{Grab, GrabError, ScopedSource, SourceLocator};

const TRANSIENT_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub(super) fn run(ctx: &WorkerContext) -> WorkerExit {
    let locator = SourceLocator::Network(ctx.config.source_locator.clone());
    let mut source = match ScopedSource::open(ctx.backend.as_ref(), &locator, Phase::Streaming) {
        Ok(source) => source,
        Err(err) => {
            ctx.report(err);
            return WorkerExit::Failed;
        }
    };
    log::info!("live view: streaming from {}", source.locator());

    let mut presented: u64 = 0;
    let mut skipped: u64 = 0;
    let mut last_skip_log: Option<Instant> = None;

    while !ctx.stop.is_stopped() {
        match source.grab() {
            Ok(Grab::Frame(frame)) => {
                ctx.present(frame);
                presented += 1;
            }
            Ok(Grab::EndOfStream) => {
                ctx.report(source.read_error("live stream ended"));
                return WorkerExit::Failed;
            }
            Err(GrabError::Transient(message)) => {
                skipped += 1;
                if last_skip_log.map_or(true, |at| at.elapsed() >= TRANSIENT_LOG_INTERVAL) {
                    log::warn!(
                        "live view: skipped frame from {} ({} so far): {}",
                        source.locator(),
                        skipped,
                        message
                    );
                    last_skip_log = Some(Instant::now());
                }
            }
            Err(GrabError::Fatal(message)) => {
                ctx.report(source.read_error(message));
                return WorkerExit::Failed;
            }
        }
    }

    log::info!(
        "live view: stopped after {} frames ({} skipped)",
        presented,
        skipped
    );
    WorkerExit::Cancelled
}
