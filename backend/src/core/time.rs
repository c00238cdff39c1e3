//! Time management for the simulation
//!
//! The simulation operates in discrete ticks. One tick is `TIME_FACTOR` seconds
//! of trace time, so an hour spans `TICKS_PER_HOUR` ticks. Hourly quantities
//! (carbon samples, instance prices, waiting budgets) are converted through
//! `TickClock` so the rest of the engine only ever sees ticks.

use serde::{Deserialize, Serialize};

/// Seconds of trace time covered by a single tick.
pub const TIME_FACTOR: usize = 5;

/// Ticks in one hour of trace time (3600 / `TIME_FACTOR`).
pub const TICKS_PER_HOUR: usize = 3600 / TIME_FACTOR;

/// Manages simulation time in discrete ticks
///
/// # Example
/// ```
/// use carbon_scheduler_core_rs::TickClock;
///
/// let mut clock = TickClock::new(720);
/// assert_eq!(clock.current_tick(), 0);
/// assert_eq!(clock.current_hour(), 0);
///
/// clock.advance_tick();
/// assert_eq!(clock.current_tick(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickClock {
    /// Total ticks elapsed since simulation start
    current_tick: usize,
    /// Number of ticks in one hour
    ticks_per_hour: usize,
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(TICKS_PER_HOUR)
    }
}

impl TickClock {
    /// Create a new TickClock
    ///
    /// # Arguments
    /// * `ticks_per_hour` - Number of ticks in one hour of trace time
    pub fn new(ticks_per_hour: usize) -> Self {
        assert!(ticks_per_hour > 0, "ticks_per_hour must be positive");
        Self {
            current_tick: 0,
            ticks_per_hour,
        }
    }

    /// Advance time by one tick
    pub fn advance_tick(&mut self) {
        self.current_tick += 1;
    }

    /// Jump forward to `tick`. Time never moves backwards.
    pub fn advance_to(&mut self, tick: usize) {
        self.current_tick = self.current_tick.max(tick);
    }

    /// Get the current tick (total ticks since start)
    pub fn current_tick(&self) -> usize {
        self.current_tick
    }

    /// Get the current hour (0-indexed)
    ///
    /// # Example
    /// ```
    /// use carbon_scheduler_core_rs::TickClock;
    ///
    /// let mut clock = TickClock::new(10);
    /// for _ in 0..25 {
    ///     clock.advance_tick();
    /// }
    /// assert_eq!(clock.current_hour(), 2);
    /// ```
    pub fn current_hour(&self) -> usize {
        self.current_tick / self.ticks_per_hour
    }

    /// Get ticks per hour
    pub fn ticks_per_hour(&self) -> usize {
        self.ticks_per_hour
    }

    /// Convert a (possibly fractional) number of hours to whole ticks.
    ///
    /// ```
    /// use carbon_scheduler_core_rs::TickClock;
    ///
    /// let clock = TickClock::new(720);
    /// assert_eq!(clock.hours_to_ticks(1.5), 1080);
    /// ```
    pub fn hours_to_ticks(&self, hours: f64) -> usize {
        (hours * self.ticks_per_hour as f64) as usize
    }

    /// Length of `ticks` expressed in hours.
    pub fn ticks_to_hours(&self, ticks: usize) -> f64 {
        ticks as f64 / self.ticks_per_hour as f64
    }

    /// Spread an hourly price over the ticks of one hour.
    pub fn per_tick_rate(&self, hourly_rate: f64) -> f64 {
        hourly_rate / self.ticks_per_hour as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "ticks_per_hour must be positive")]
    fn test_zero_ticks_per_hour_panics() {
        TickClock::new(0);
    }

    #[test]
    fn test_advance_to_never_rewinds() {
        let mut clock = TickClock::new(10);
        clock.advance_to(7);
        clock.advance_to(3);
        assert_eq!(clock.current_tick(), 7);
    }
}
