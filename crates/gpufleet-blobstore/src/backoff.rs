//! Exponential backoff, lifted from `tower-retry-plus`'s `IntervalFunction`
//! abstraction but narrowed to a single curve: base 1s, multiplier 2, cap 30s.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier: 2.0,
            max_interval,
        }
    }

    /// `attempt` is 0-indexed: the delay before the *first* retry is
    /// `next_interval(0)`.
    pub fn next_interval(&self, attempt: usize) -> Duration {
        let interval = self.initial_interval.mul_f64(self.multiplier.powi(attempt as i32));
        interval.min(self.max_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.next_interval(0), Duration::from_secs(1));
        assert_eq!(backoff.next_interval(1), Duration::from_secs(2));
        assert_eq!(backoff.next_interval(2), Duration::from_secs(4));
        assert_eq!(backoff.next_interval(10), Duration::from_secs(30));
    }
}
