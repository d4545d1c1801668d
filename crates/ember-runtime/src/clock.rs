//! Frame clock and time sources

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time since some fixed origin
pub trait TimeSource {
    fn now(&self) -> Duration;
}

/// Wall-clock time source backed by `Instant`
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced time source.
///
/// Clones share the same underlying counter, so a test can keep one
/// handle and give another to the system under test.
#[derive(Clone, Default)]
pub struct ManualTime {
    now: Rc<Cell<Duration>>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn advance_ms(&self, ms: f64) {
        self.advance(Duration::from_nanos((ms * 1_000_000.0).round() as u64));
    }

    pub fn set(&self, at: Duration) {
        self.now.set(at);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Measures real elapsed time between consecutive frames
pub struct FrameClock {
    /// Total measured time in seconds
    pub total_time: f64,
    /// Time since last frame in seconds
    pub delta_time: f64,
    /// Upper clamp for a single frame's delta, in seconds
    pub max_delta: f64,
    /// Number of ticks that produced a delta
    pub frame_count: u64,
    /// Timestamp of the previous tick
    last: Option<Duration>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            total_time: 0.0,
            delta_time: 0.0,
            max_delta: 0.25,
            frame_count: 0,
            last: None,
        }
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock to `now`. Call once per frame.
    ///
    /// Returns the elapsed seconds since the previous tick, or `None` on the
    /// first tick (there is no previous frame to measure against).
    pub fn tick(&mut self, now: Duration) -> Option<f64> {
        let Some(last) = self.last.replace(now) else {
            self.delta_time = 0.0;
            return None;
        };

        let elapsed = now.saturating_sub(last).as_secs_f64();
        // Clamp so a debugger pause or window drag reads as one slow frame
        self.delta_time = elapsed.min(self.max_delta);
        self.total_time += self.delta_time;
        self.frame_count += 1;
        Some(self.delta_time)
    }

    /// Forget the previous timestamp; the next tick behaves like the first
    pub fn reset(&mut self) {
        self.last = None;
        self.delta_time = 0.0;
    }
}
