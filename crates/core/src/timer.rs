//! Frame clock used to drive animation and report frame rate.

use std::time::{Duration, Instant};

/// How often [`FrameTimer::tick`] produces a frame-rate sample.
const FPS_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Measures time since startup and counts presented frames.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
    sample_start: Instant,
    sample_frames: u32,
}

/// Result of one [`FrameTimer::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    /// Time since the previous tick.
    pub delta: Duration,
    /// Frames per second over the last sample period, once per period.
    pub fps: Option<f32>,
}

impl FrameTimer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            sample_start: now,
            sample_frames: 0,
        }
    }

    /// Seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    /// Total number of ticks so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Records one frame.
    pub fn tick(&mut self) -> FrameTick {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> FrameTick {
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.frames += 1;
        self.sample_frames += 1;

        let window = now.saturating_duration_since(self.sample_start);
        let fps = if window >= FPS_SAMPLE_PERIOD {
            let fps = self.sample_frames as f32 / window.as_secs_f32();
            self.sample_start = now;
            self.sample_frames = 0;
            Some(fps)
        } else {
            None
        };

        FrameTick { delta, fps }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = FrameTimer::new();
        let start = timer.start;
        timer.tick_at(start + Duration::from_millis(10));
        timer.tick_at(start + Duration::from_millis(20));
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_fps_reported_once_per_period() {
        let mut timer = FrameTimer::new();
        let start = timer.start;

        let mut samples = Vec::new();
        for i in 1..=120u64 {
            let tick = timer.tick_at(start + Duration::from_millis(i * 10));
            if let Some(fps) = tick.fps {
                samples.push(fps);
            }
        }

        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_delta_is_time_since_last_tick() {
        let mut timer = FrameTimer::new();
        let start = timer.start;
        timer.tick_at(start + Duration::from_millis(5));
        let tick = timer.tick_at(start + Duration::from_millis(21));
        assert_eq!(tick.delta, Duration::from_millis(16));
    }
}
