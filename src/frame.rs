//! Decoded frames and the live display handoff.
//!
//! - `Frame`: one decoded RGB24 image with its dimensions and capture instant.
//! - `FrameHandoff`: single-slot buffer between a worker and the rendering context.
//! - `FrameSink`: the external renderer's notification hook.
//!
//! A frame has exactly one owner at a time. Workers hand it to a writer (by
//! reference) or into the handoff (by value) and never keep it afterwards.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bytes per pixel for the RGB24 layout every back end produces.
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded image. Not `Clone`: frames move, they are not duplicated.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic instant at which the source produced this frame.
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        }
    }

    /// Packed RGB24 rows, `width * height * 3` bytes when well-formed.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == Self::expected_len(self.width, self.height)
    }
}

// ----------------------------------------------------------------------------
// FrameHandoff: most-recent-wins slot
// ----------------------------------------------------------------------------

/// Single-slot buffer decoupling frame production from display.
///
/// Publishing overwrites whatever is in the slot, so a slow renderer never
/// backs up a worker. Taking a frame empties the slot.
#[derive(Debug, Default)]
pub struct FrameHandoff {
    slot: Mutex<Option<Frame>>,
    ready: Condvar,
    published: AtomicU64,
    overwritten: AtomicU64,
}

impl FrameHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the latest undisplayed frame.
    ///
    /// Returns true when an undisplayed frame was discarded to make room.
    pub fn publish(&self, frame: Frame) -> bool {
        let replaced = {
            let mut slot = self.slot.lock();
            slot.replace(frame).is_some()
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        replaced
    }

    /// Take the pending frame, if any, leaving the slot empty.
    pub fn take(&self) -> Option<Frame> {
        self.slot.lock().take()
    }

    /// Wait up to `timeout` for a frame and take it.
    pub fn wait_take(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.take()
    }

    /// Drop any pending frame. Used when the producing worker changes.
    pub fn clear(&self) {
        self.slot.lock().take();
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames replaced before the renderer consumed them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// FrameSink: external renderer hook
// ----------------------------------------------------------------------------

/// Rendering destination. The core only tells it that a frame is waiting.
///
/// `frame_ready` is called on worker threads and must return promptly; the
/// renderer pulls the frame from its `FrameHandoff` on its own context.
pub trait FrameSink: Send + Sync {
    fn frame_ready(&self);
}

/// Sink that ignores notifications, for headless operation.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn frame_ready(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(tag: u8) -> Frame {
        Frame::new(vec![tag; Frame::expected_len(2, 2)], 2, 2)
    }

    #[test]
    fn latest_frame_wins() {
        let handoff = FrameHandoff::new();
        assert!(!handoff.publish(frame(1)));
        assert!(handoff.publish(frame(2)));
        assert!(handoff.publish(frame(3)));

        let shown = handoff.take().expect("pending frame");
        assert_eq!(shown.pixels()[0], 3);
        assert!(handoff.take().is_none());
        assert_eq!(handoff.published(), 3);
        assert_eq!(handoff.overwritten(), 2);
    }

    #[test]
    fn wait_take_times_out_on_empty_slot() {
        let handoff = FrameHandoff::new();
        let started = Instant::now();
        assert!(handoff.wait_take(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_take_wakes_on_publish() {
        let handoff = Arc::new(FrameHandoff::new());
        let producer = {
            let handoff = handoff.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                handoff.publish(frame(9));
            })
        };
        let got = handoff.wait_take(Duration::from_secs(5)).expect("frame");
        assert_eq!(got.pixels()[0], 9);
        producer.join().expect("producer thread");
    }

    #[test]
    fn well_formed_checks_rgb_length() {
        assert!(frame(0).is_well_formed());
        assert!(!Frame::new(vec![0; 5], 2, 2).is_well_formed());
    }
}
