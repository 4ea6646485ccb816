//! # Fibonacci Backoff
//!
//! Short retry delays for store calls that failed for reasons other than contention.
//! The sequence grows more slowly than exponential backoff so that the small fixed
//! number of retries stays well inside a lock's TTL.

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_millis`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum delay in milliseconds (for reset)
    min_millis: u64,
    prev_millis: u64,
    current_millis: u64,
    max_millis: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff with minimum and maximum delays in milliseconds
    ///
    /// # Arguments
    ///
    /// * `min_millis` - first two delays
    /// * `max_millis` - cap for every later delay
    #[must_use]
    pub fn new(min_millis: u64, max_millis: u64) -> Self {
        Self {
            min_millis,
            prev_millis: 0,
            current_millis: min_millis,
            max_millis,
        }
    }

    /// Next delay, advancing the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_millis;

        let next = self.prev_millis + self.current_millis;
        self.prev_millis = self.current_millis;
        self.current_millis = std::cmp::min(next, self.max_millis);

        Duration::from_millis(result)
    }

    /// Reset to the initial state
    pub fn reset(&mut self) {
        self.prev_millis = 0;
        self.current_millis = self.min_millis;
    }
}

impl Default for FibonacciBackoff {
    /// 50ms, 50ms, 100ms, 150ms, 250ms, 400ms (max)
    fn default() -> Self {
        Self::new(50, 400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::default();

        assert_eq!(backoff.next_backoff(), Duration::from_millis(50));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(50));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(150));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(250));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
        // 650 would be next, capped at 400
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(10, 100);

        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(20));

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
    }
}
