//! Cancellation and pacing primitives shared by the workers.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative stop flag that can also be slept on.
///
/// Workers poll `is_stopped` at frame boundaries and use `wait_timeout` /
/// `wait_until` for pauses, which return early as soon as `stop` is called.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.changed.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep for `timeout`. Returns true if stopped before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                let mut stopped = self.inner.stopped.lock();
                while !*stopped {
                    self.inner.changed.wait(&mut stopped);
                }
                true
            }
        }
    }

    /// Sleep until `deadline`. Returns true if stopped before or during the wait.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self
                .inner
                .changed
                .wait_until(&mut stopped, deadline)
                .timed_out()
            {
                break;
            }
        }
        *stopped
    }
}

/// Deadline-based frame pacer.
///
/// Deadlines advance by a fixed interval from the previous deadline rather than
/// from "now", so sleep overshoot does not accumulate. If the caller falls more
/// than one interval behind, the schedule restarts from the current instant
/// instead of bursting to catch up.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_deadline: Option<Instant>,
}

impl Pacer {
    pub fn new(frames_per_second: f64) -> Self {
        let fps = if frames_per_second.is_finite() && frames_per_second > 0.0 {
            frames_per_second
        } else {
            1.0
        };
        Self {
            interval: Duration::from_secs_f64(1.0 / fps),
            next_deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Deadline for the next frame given the current instant, advancing the schedule.
    ///
    /// The first call returns `now`.
    pub fn next_deadline(&mut self, now: Instant) -> Instant {
        let deadline = match self.next_deadline {
            None => now,
            Some(scheduled) if now > scheduled + self.interval => now,
            Some(scheduled) => scheduled,
        };
        self.next_deadline = Some(deadline + self.interval);
        deadline
    }

    /// Block until the next frame is due. Returns true if `stop` fired first.
    pub fn wait(&mut self, stop: &StopSignal) -> bool {
        let deadline = self.next_deadline(Instant::now());
        if deadline <= Instant::now() {
            return stop.is_stopped();
        }
        stop.wait_until(deadline)
    }
}
