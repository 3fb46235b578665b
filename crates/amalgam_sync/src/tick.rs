//! # Tick Loop
//!
//! Fixed-timestep pacing for a session driven in real time.
//!
//! The ledger math never sees wall-clock time: every executed tick advances
//! transitions by exactly [`TickLoop::delta_secs`], however late it runs.
//! Wall-clock time only decides how many ticks are due.

use std::time::{Duration, Instant};

use crate::TICK_RATE;

/// Wall-clock timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest tick body observed (microseconds).
    pub min_tick_us: u64,
    /// Longest tick body observed (microseconds).
    pub max_tick_us: u64,
    /// Rolling average tick body (microseconds).
    pub avg_tick_us: u64,
    /// Ticks whose body overran the budget.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn new(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: budget.as_micros() as u64,
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

/// Fixed-timestep controller.
pub struct TickLoop {
    delta_secs: f64,
    budget: Duration,
    last_poll: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

impl TickLoop {
    /// Creates a loop running at `tick_rate` ticks per second.
    ///
    /// A rate of zero is treated as one.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let rate = tick_rate.max(1);
        let budget = Duration::from_nanos(1_000_000_000 / u64::from(rate));
        Self {
            delta_secs: 1.0 / f64::from(rate),
            budget,
            last_poll: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::new(budget),
        }
    }

    /// Seconds each tick represents.
    #[inline]
    #[must_use]
    pub const fn delta_secs(&self) -> f64 {
        self.delta_secs
    }

    /// Wall-clock budget for one tick.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Returns true while a tick is due. Call in a loop until it returns
    /// false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_poll);
        self.last_poll = now;
        self.accumulator >= self.budget
    }

    /// Consumes one due tick and returns its start time.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.budget);
        self.tick_count += 1;
        Instant::now()
    }

    /// Records how long the tick body took.
    pub fn end_tick(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        let us = elapsed.as_micros() as u64;

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + us) / 16;
        if elapsed > self.budget {
            self.stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let since = self.last_poll.elapsed() + self.accumulator;
        if since < self.budget {
            std::thread::sleep(self.budget - since);
        }
    }

    /// Ticks executed.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::new(TICK_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rate() {
        let tick_loop = TickLoop::default();
        assert_eq!(tick_loop.tick_count(), 0);
        assert!((tick_loop.delta_secs() - crate::TICK_DELTA_SECS).abs() < 1e-12);
        assert_eq!(tick_loop.budget(), Duration::from_nanos(16_666_666));
    }

    #[test]
    fn test_ticks_become_due() {
        let mut tick_loop = TickLoop::new(1000);
        std::thread::sleep(Duration::from_millis(5));

        assert!(tick_loop.should_tick());
        let start = tick_loop.begin_tick();
        tick_loop.end_tick(start);

        assert_eq!(tick_loop.tick_count(), 1);
        assert_eq!(tick_loop.stats().total_ticks, 1);
        assert!(tick_loop.stats().min_tick_us <= tick_loop.stats().max_tick_us);
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let tick_loop = TickLoop::new(0);
        assert!((tick_loop.delta_secs() - 1.0).abs() < f64::EPSILON);
    }
}
