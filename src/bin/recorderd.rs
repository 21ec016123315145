//! recorderd - live camera viewer with on-demand clip recording and playback
//!
//! This daemon:
//! 1. Streams the configured source into a display handoff (live view)
//! 2. On `1`/`record`: records the configured number of timed clips
//! 3. On `2`/`play`: replays the recorded clips newest first
//! 4. On `q`/`quit` or Ctrl-C: stops the active worker and exits
//!
//! There is no window; a render thread consumes frames from the handoff and
//! logs display health.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rtsp_clip_recorder::{
    Command, DefaultBackend, Event, FrameHandoff, MediaBackend, ModeCoordinator, NullSink, Phase,
    RecorderConfig, StopSignal,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "recorderd",
    about = "Live RTSP viewer with timed clip recording and reverse playback"
)]
struct Args {
    /// JSON config file (defaults to $RECORDER_CONFIG)
    #[arg(long, value_name = "PATH", env = "RECORDER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory clips are written to
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Live source locator (rtsp://... or stub://...)
    #[arg(long, value_name = "URL")]
    source: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = RecorderConfig::load_from(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(source) = args.source {
        config.source_locator = source;
    }
    config.validate()?;

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            config.output_dir.display()
        )
    })?;

    log::info!(
        "recorderd running. source={} output={} clips={}x{:.1}s format={}",
        config.source_locator,
        config.output_dir.display(),
        config.clip_count,
        config.clip_duration.as_secs_f64(),
        config.clip_format.extension()
    );

    let backend: Arc<dyn MediaBackend> = Arc::new(DefaultBackend::new(&config)?);
    let handoff = Arc::new(FrameHandoff::new());
    let (mut handle, events) =
        ModeCoordinator::spawn(config, backend, handoff.clone(), Arc::new(NullSink))?;

    let render_stop = StopSignal::new();
    let render = spawn_render_loop(handoff, render_stop.clone())?;
    let event_log = std::thread::Builder::new()
        .name("event-log".to_string())
        .spawn(move || {
            let mut tally = ErrorTally::default();
            for event in events {
                log_event(&event);
                if let Event::Error(err) = &event {
                    tally.count(err.phase());
                }
            }
            if !tally.is_empty() {
                log::info!("{tally}");
            }
        })
        .context("failed to start event logger")?;

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Shutdown);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {e}"))?;
    spawn_stdin_reader(tx)?;

    log::info!("commands: 1/record, 2/play, q/quit");
    while let Ok(command) = rx.recv() {
        if command == Command::Shutdown {
            break;
        }
        match handle.dispatch(command) {
            Ok(()) => {}
            Err(err) if err.is_rejection() => log::info!("{err}"),
            Err(err) => log::error!("{err}"),
        }
    }

    log::info!("shutdown requested, stopping workers...");
    let report = handle.shutdown();
    for err in &report.cleanup_errors {
        log::warn!("cleanup: {err}");
    }
    render_stop.stop();
    if render.join().is_err() {
        log::warn!("render thread panicked");
    }
    drop(handle);
    if event_log.join().is_err() {
        log::warn!("event logger panicked");
    }
    log::info!(
        "recorderd stopped ({} clips recorded this session)",
        report.clips_archived
    );
    Ok(())
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "1" | "record" => Some(Command::StartRecording),
        "2" | "play" => Some(Command::StartPlayback),
        "q" | "quit" | "exit" => Some(Command::Shutdown),
        _ => None,
    }
}

fn spawn_stdin_reader(tx: mpsc::Sender<Command>) -> Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            return;
                        }
                    }
                    None => log::warn!("unknown command '{}' (1/record, 2/play, q/quit)", line.trim()),
                }
            }
            // stdin closed: treat like quit.
            let _ = tx.send(Command::Shutdown);
        })
        .context("failed to start stdin reader")?;
    Ok(())
}

fn spawn_render_loop(
    handoff: Arc<FrameHandoff>,
    stop: StopSignal,
) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("render".to_string())
        .spawn(move || {
            let mut presented = 0u64;
            let mut last_health_log = Instant::now();
            let mut last_dimensions = None;
            while !stop.is_stopped() {
                if let Some(frame) = handoff.wait_take(Duration::from_millis(100)) {
                    presented += 1;
                    last_dimensions = Some((frame.width, frame.height));
                }
                if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                    match last_dimensions {
                        Some((width, height)) => log::info!(
                            "display health: presented={} dropped={} last={}x{}",
                            presented,
                            handoff.overwritten(),
                            width,
                            height
                        ),
                        None => log::info!("display health: no frames yet"),
                    }
                    last_health_log = Instant::now();
                }
            }
        })
        .context("failed to start render thread")
}

/// Errors seen this session, per activity.
#[derive(Debug, Default, PartialEq)]
struct ErrorTally {
    streaming: u64,
    recording: u64,
    playback: u64,
    other: u64,
}

impl ErrorTally {
    fn count(&mut self, phase: Option<Phase>) {
        let slot = match phase {
            Some(Phase::Streaming) => &mut self.streaming,
            Some(Phase::Recording) => &mut self.recording,
            Some(Phase::Playback) => &mut self.playback,
            None => &mut self.other,
        };
        *slot += 1;
    }

    fn is_empty(&self) -> bool {
        self.streaming + self.recording + self.playback + self.other == 0
    }
}

impl std::fmt::Display for ErrorTally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "session errors: streaming={} recording={} playback={} other={}",
            self.streaming, self.recording, self.playback, self.other
        )
    }
}

fn log_event(event: &Event) {
    match event {
        Event::ModeChanged { from, to } => log::info!("mode: {from} -> {to}"),
        Event::ClipArchived(clip) => log::info!(
            "clip {} saved: {} ({})",
            clip.id(),
            clip.path().display(),
            clip.created_at().to_rfc3339()
        ),
        Event::ClipPlaying(clip) => {
            log::info!("playing clip {}: {}", clip.id(), clip.path().display())
        }
        // Already logged where it happened.
        Event::Error(err) => log::debug!("error event: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bindings_map_to_commands() {
        assert_eq!(parse_command("1"), Some(Command::StartRecording));
        assert_eq!(parse_command(" Record "), Some(Command::StartRecording));
        assert_eq!(parse_command("2"), Some(Command::StartPlayback));
        assert_eq!(parse_command("q"), Some(Command::Shutdown));
        assert_eq!(parse_command("x"), None);
    }

    #[test]
    fn error_tally_groups_by_phase() {
        use rtsp_clip_recorder::RecorderError;
        use std::path::PathBuf;

        let mut tally = ErrorTally::default();
        assert!(tally.is_empty());
        for err in [
            RecorderError::NotFound {
                clip: 2,
                path: PathBuf::from("/clips/clip_2.rclip"),
            },
            RecorderError::SourceRead {
                phase: Phase::Recording,
                locator: "stub://cam".to_string(),
                message: "end of stream".to_string(),
            },
            RecorderError::EmptyArchive,
        ] {
            tally.count(err.phase());
        }
        assert_eq!(
            tally,
            ErrorTally {
                streaming: 0,
                recording: 1,
                playback: 1,
                other: 1,
            }
        );
        assert!(tally.to_string().contains("playback=1"));
    }
}
