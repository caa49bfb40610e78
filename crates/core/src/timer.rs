//! Timers for the frame loop.

use std::time::{Duration, Instant};

/// Monotonic timer measuring total and per-tick elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Total elapsed time since creation or the last `reset`.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Smoothed frame-time statistics, reported once per window.
///
/// Feed it one delta per frame; every `window` it publishes the average
/// frame time over that window.
#[derive(Debug)]
pub struct FrameTimer {
    timer: Timer,
    window: Duration,
    accumulated: Duration,
    frames: u32,
    average_frame_time: Duration,
}

impl FrameTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            timer: Timer::new(),
            window,
            accumulated: Duration::ZERO,
            frames: 0,
            average_frame_time: Duration::ZERO,
        }
    }

    /// Mark the end of a frame. Returns the frame delta.
    pub fn tick(&mut self) -> Duration {
        let delta = self.timer.tick();
        self.record(delta);
        delta
    }

    /// Account for a frame of the given duration.
    ///
    /// Returns `true` when a window closed and the average was refreshed.
    pub fn record(&mut self, delta: Duration) -> bool {
        self.accumulated += delta;
        self.frames += 1;
        if self.accumulated < self.window {
            return false;
        }
        self.average_frame_time = self.accumulated / self.frames;
        self.accumulated = Duration::ZERO;
        self.frames = 0;
        true
    }

    pub fn average_frame_time(&self) -> Duration {
        self.average_frame_time
    }

    /// Frames per second derived from the last published average; zero before
    /// the first window closes.
    pub fn fps(&self) -> f32 {
        let secs = self.average_frame_time.as_secs_f32();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timer_publishes_after_window() {
        let mut timer = FrameTimer::new(Duration::from_millis(40));
        assert!(!timer.record(Duration::from_millis(10)));
        assert!(!timer.record(Duration::from_millis(10)));
        assert!(!timer.record(Duration::from_millis(10)));
        assert!(timer.record(Duration::from_millis(10)));
        assert_eq!(timer.average_frame_time(), Duration::from_millis(10));
        assert!((timer.fps() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_frame_timer_fps_zero_before_first_window() {
        let timer = FrameTimer::default();
        assert_eq!(timer.fps(), 0.0);
    }
}
