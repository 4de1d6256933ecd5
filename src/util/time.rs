//! Time utilities for the simulation loop

use std::time::Instant;

/// Default authoritative tick length (10 ticks per second)
pub const DEFAULT_TICK_LENGTH: f64 = 0.1;
/// Default number of `AdvanceOnly` sub-steps issued per tick
pub const DEFAULT_SUB_STEPS: u32 = 5;

/// Fixed-size time quantization for the authoritative simulation.
///
/// Converts elapsed simulation seconds into whole ticks plus a remainder,
/// and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSchedule {
    tick_length: f64,
}

impl TickSchedule {
    pub fn new(tick_length: f64) -> Self {
        assert!(
            tick_length.is_finite() && tick_length > 0.0,
            "tick length must be positive"
        );
        Self { tick_length }
    }

    pub fn tick_length(&self) -> f64 {
        self.tick_length
    }

    /// Split elapsed seconds into `(whole_ticks, remainder_secs)`.
    ///
    /// The remainder is always in `[0, tick_length)`; negative input clamps to zero.
    pub fn split(&self, elapsed: f64) -> (u64, f64) {
        if elapsed <= 0.0 {
            return (0, 0.0);
        }
        let ticks = (elapsed / self.tick_length).floor();
        let remainder = (elapsed - ticks * self.tick_length).max(0.0);
        if remainder >= self.tick_length {
            // float error right at a boundary
            (ticks as u64 + 1, 0.0)
        } else {
            (ticks as u64, remainder)
        }
    }

    /// Seconds expressed in fractional tick units
    pub fn to_ticks(&self, secs: f64) -> f64 {
        secs / self.tick_length
    }

    /// Fractional tick units expressed in seconds
    pub fn to_secs(&self, ticks: f64) -> f64 {
        ticks * self.tick_length
    }

    /// Length of one physics step when a tick is split into
    /// `sub_steps` `AdvanceOnly` steps plus the final `Advance`.
    pub fn sub_step_length(&self, sub_steps: u32) -> f64 {
        self.tick_length / f64::from(sub_steps + 1)
    }
}

impl Default for TickSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_LENGTH)
    }
}

/// Monotonic clock reporting seconds since construction.
///
/// The server feeds `now()` into `Game::ready_to_tick`.
#[derive(Debug, Clone)]
pub struct SimClock {
    start: Instant,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_returns_whole_ticks_and_remainder() {
        let schedule = TickSchedule::new(0.1);

        let (ticks, remainder) = schedule.split(0.35);
        assert_eq!(ticks, 3);
        assert!((remainder - 0.05).abs() < 1e-9);

        assert_eq!(schedule.split(0.0), (0, 0.0));
        assert_eq!(schedule.split(-1.0), (0, 0.0));
    }

    #[test]
    fn split_remainder_stays_below_tick_length() {
        let schedule = TickSchedule::new(0.1);
        for i in 0..1000 {
            let (_, remainder) = schedule.split(i as f64 * 0.1);
            assert!(remainder < 0.1);
        }
    }

    #[test]
    fn tick_unit_conversion() {
        let schedule = TickSchedule::new(0.1);
        assert!((schedule.to_ticks(0.05) - 0.5).abs() < 1e-12);
        assert!((schedule.to_secs(2.5) - 0.25).abs() < 1e-12);
        assert!((schedule.sub_step_length(5) - 1.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "tick length must be positive")]
    fn zero_tick_length_rejected() {
        TickSchedule::new(0.0);
    }

    #[test]
    #[should_panic(expected = "tick length must be positive")]
    fn nan_tick_length_rejected() {
        TickSchedule::new(f64::NAN);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = SimClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
