// src/clock.rs
//! Monotonic time base and the running lap clock

use std::time::Instant;

/// Millisecond clock shared by the fix sources and the display.
///
/// Live fixes are stamped with this clock on arrival, so lap boundaries and the
/// displayed running time are measured on the same time base. A replay run
/// at a speed-up uses a scaled clock so it keeps pace with the recorded
/// timeline.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
    rate: f64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::scaled(1.0)
    }

    /// Clock that advances `rate` milliseconds per real millisecond
    pub fn scaled(rate: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
        Self {
            epoch: Instant::now(),
            rate,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn now_ms(&self) -> i64 {
        (self.epoch.elapsed().as_secs_f64() * 1000.0 * self.rate) as i64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Display-side lap clock, sampled at render cadence
#[derive(Debug, Clone, Default)]
pub struct TimingClock {
    lap_start_ms: Option<i64>,
    last_elapsed_ms: u64,
}

impl TimingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.lap_start_ms.is_some()
    }

    /// Follow the lap in progress. `None` freezes the last shown value.
    pub fn follow(&mut self, lap_start_ms: Option<i64>) {
        self.lap_start_ms = lap_start_ms;
    }

    pub fn start_lap(&mut self, at_ms: i64) {
        self.lap_start_ms = Some(at_ms);
    }

    /// Recording stopped: clear the readout
    pub fn stop(&mut self) {
        self.lap_start_ms = None;
        self.last_elapsed_ms = 0;
    }

    /// Elapsed time of the current lap at `now_ms`; never negative
    pub fn sample(&mut self, now_ms: i64) -> u64 {
        if let Some(start) = self.lap_start_ms {
            self.last_elapsed_ms = now_ms.saturating_sub(start).max(0) as u64;
        }
        self.last_elapsed_ms
    }
}
