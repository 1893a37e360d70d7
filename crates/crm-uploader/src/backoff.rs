//! Fibonacci backoff between idle polls
//!
//! The scheduler draws a new interval after every trigger and reseeds the
//! sequence when an upload succeeds, so an idle or failing uploader polls less
//! and less often while a productive one stays responsive.

use std::time::Duration;

/// Default length of one backoff step.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Stateful Fibonacci interval generator.
///
/// Draws are `1, 1, 2, 3, 5, 8, ...` multiplied by `unit`, optionally clamped
/// to `max_interval`. Not synchronized; the owner serializes access.
#[derive(Debug, Clone)]
pub struct Backoff {
    prev: u64,
    curr: u64,
    last: Duration,
    unit: Duration,
    max_interval: Option<Duration>,
}

impl Backoff {
    pub fn new(unit: Duration) -> Self {
        Self {
            prev: 0,
            curr: 1,
            last: Duration::ZERO,
            unit,
            max_interval: None,
        }
    }

    /// Clamp every returned interval to `max`.
    pub fn with_max_interval(mut self, max: Duration) -> Self {
        self.max_interval = Some(max);
        self
    }

    /// Return the next interval and advance the sequence.
    pub fn next(&mut self) -> Duration {
        let steps = self.curr;
        (self.prev, self.curr) = (self.curr, self.prev.saturating_add(self.curr));
        self.last = self.scale(steps);
        self.last
    }

    /// Reseed so the next draw is one unit again.
    pub fn reset(&mut self) {
        self.prev = 0;
        self.curr = 1;
        self.last = Duration::ZERO;
    }

    /// Interval most recently returned by [`Backoff::next`], zero after a
    /// reset.
    pub fn current(&self) -> Duration {
        self.last
    }

    /// Interval the next call to [`Backoff::next`] will return.
    pub fn peek(&self) -> Duration {
        self.scale(self.curr)
    }

    /// Raw `(prev, curr)` pair, for inspection.
    pub fn state(&self) -> (u64, u64) {
        (self.prev, self.curr)
    }

    fn scale(&self, steps: u64) -> Duration {
        let steps = u32::try_from(steps).unwrap_or(u32::MAX);
        let interval = self.unit.saturating_mul(steps);
        match self.max_interval {
            Some(max) => interval.min(max),
            None => interval,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_UNIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut Backoff) -> u64 {
        backoff.next().as_secs()
    }

    #[test]
    fn test_fresh_sequence() {
        let mut backoff = Backoff::default();
        let draws: Vec<u64> = (0..6).map(|_| secs(&mut backoff)).collect();
        assert_eq!(draws, vec![1, 1, 2, 3, 5, 8]);
    }

    #[test]
    fn test_reset_restarts_at_one() {
        let mut backoff = Backoff::default();
        for _ in 0..5 {
            backoff.next();
        }
        assert_eq!(backoff.current(), Duration::from_secs(5));
        backoff.reset();
        assert_eq!(backoff.state(), (0, 1));
        assert_eq!(backoff.current(), Duration::ZERO);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 1);
        assert_eq!(secs(&mut backoff), 2);
    }

    #[test]
    fn test_unit_scales_intervals() {
        let mut backoff = Backoff::new(Duration::from_millis(10));
        assert_eq!(backoff.next(), Duration::from_millis(10));
        assert_eq!(backoff.next(), Duration::from_millis(10));
        assert_eq!(backoff.next(), Duration::from_millis(20));
        assert_eq!(backoff.peek(), Duration::from_millis(30));
    }

    #[test]
    fn test_ceiling_keeps_sequence_non_decreasing() {
        let mut backoff = Backoff::default().with_max_interval(Duration::from_secs(4));
        let draws: Vec<u64> = (0..8).map(|_| secs(&mut backoff)).collect();
        assert_eq!(draws, vec![1, 1, 2, 3, 4, 4, 4, 4]);
        assert!(draws.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_long_runs_saturate_instead_of_overflowing() {
        let mut backoff = Backoff::new(Duration::from_nanos(1));
        let mut last = Duration::ZERO;
        for _ in 0..200 {
            let next = backoff.next();
            assert!(next >= last);
            last = next;
        }
    }
}
