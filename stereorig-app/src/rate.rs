//! Frame-rate diagnostics.

use std::fmt;
use std::time::{Duration, Instant};

/// Frame-rate figures after one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub frames: u64,
    pub elapsed: Duration,
    /// Frames per second since the loop started.
    pub average_fps: f64,
    /// Mean milliseconds per frame since the loop started.
    pub frame_ms: f64,
    /// Frames per second over the last cycle.
    pub instant_fps: f64,
}

impl fmt::Display for RateSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames ({} ms) - {:.2} fps | {:.2} ms/frame",
            self.frames,
            self.elapsed.as_millis(),
            self.average_fps,
            self.frame_ms
        )
    }
}

/// Counts frames and wall-clock time since the loop started.
#[derive(Debug, Clone)]
pub struct FrameRateMonitor {
    start: Instant,
    last: Instant,
    frames: u64,
}

impl FrameRateMonitor {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            start,
            last: start,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn tick(&mut self) -> RateSample {
        self.tick_at(Instant::now())
    }

    /// Count one frame completed at `now`.
    pub fn tick_at(&mut self, now: Instant) -> RateSample {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.start);
        let since_last = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;

        let seconds = elapsed.as_secs_f64();
        RateSample {
            frames: self.frames,
            elapsed,
            average_fps: if seconds > 0.0 { self.frames as f64 / seconds } else { 0.0 },
            frame_ms: seconds * 1000.0 / self.frames as f64,
            instant_fps: if since_last > 0.0 { 1.0 / since_last } else { 0.0 },
        }
    }
}

impl Default for FrameRateMonitor {
    fn default() -> Self {
        Self::new()
    }
}
