// This file is part of Chainrelay.
//
// Chainrelay is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Chainrelay is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Chainrelay.
// If not, see https://www.gnu.org/licenses/.

//! Utilities for backing off between failed attempts.

use std::time::Duration;

use rand::Rng;

/// Options for exponential backoff with jitter.
#[derive(Clone, Copy, Debug)]
pub struct BackoffOpts {
    /// Wait after the first failure.
    pub min_wait: Duration,
    /// The maximum amount of time to wait between attempts.
    pub max_wait: Duration,
    /// The maximum amount of jitter to add to the wait time. Zero disables jitter.
    pub max_jitter: Duration,
}

impl Default for BackoffOpts {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            max_jitter: Duration::ZERO,
        }
    }
}

impl BackoffOpts {
    fn first_wait(&self) -> Duration {
        self.min_wait.min(self.max_wait)
    }
}

/// Doubling backoff state for a repeating operation.
///
/// Call [`ExponentialBackoff::next_wait`] after each failure and
/// [`ExponentialBackoff::reset`] after a success.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    opts: BackoffOpts,
    next_wait: Duration,
    failures: u32,
}

impl ExponentialBackoff {
    /// New backoff state with no recorded failures
    pub fn new(opts: BackoffOpts) -> Self {
        Self {
            opts,
            next_wait: opts.first_wait(),
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt
    pub fn next_wait(&mut self) -> Duration {
        let wait = self.next_wait;
        self.failures = self.failures.saturating_add(1);
        // max_wait wins if the options are inverted
        self.next_wait = self
            .next_wait
            .saturating_mul(2)
            .max(self.opts.min_wait)
            .min(self.opts.max_wait);
        wait + self.jitter()
    }

    /// Consecutive failures since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Forget all recorded failures
    pub fn reset(&mut self) {
        self.next_wait = self.opts.first_wait();
        self.failures = 0;
    }

    fn jitter(&self) -> Duration {
        if self.opts.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        // Grab a new rng each time because we can't hold it across awaits.
        rand::thread_rng().gen_range(Duration::ZERO..self.opts.max_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_and_caps() {
        let mut backoff = ExponentialBackoff::new(BackoffOpts {
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(5),
            max_jitter: Duration::ZERO,
        });
        let waits: Vec<_> = (0..5).map(|_| backoff.next_wait().as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 5, 5]);
        assert_eq!(backoff.failures(), 5);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_wait(), Duration::from_secs(1));
    }

    #[test]
    fn test_inverted_bounds_cap_at_max() {
        let mut backoff = ExponentialBackoff::new(BackoffOpts {
            min_wait: Duration::from_secs(10),
            max_wait: Duration::from_secs(5),
            max_jitter: Duration::ZERO,
        });
        let waits: Vec<_> = (0..3).map(|_| backoff.next_wait().as_secs()).collect();
        assert_eq!(waits, vec![5, 5, 5]);
    }

    #[test]
    fn test_huge_wait_saturates() {
        let mut backoff = ExponentialBackoff::new(BackoffOpts {
            min_wait: Duration::MAX,
            max_wait: Duration::MAX,
            max_jitter: Duration::ZERO,
        });
        assert_eq!(backoff.next_wait(), Duration::MAX);
        assert_eq!(backoff.next_wait(), Duration::MAX);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut backoff = ExponentialBackoff::new(BackoffOpts {
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_millis(100),
            max_jitter: Duration::from_millis(50),
        });
        for _ in 0..20 {
            let wait = backoff.next_wait();
            assert!(wait >= Duration::from_millis(100));
            assert!(wait < Duration::from_millis(150));
        }
    }
}
