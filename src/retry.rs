//! Retry policy for job attempts.
//!
//! A job is executed once and then re-executed up to `max_retries` more times
//! while it keeps failing. The policy is a plain value so the attempt loop can
//! be tested without spawning processes.

use std::thread;
use std::time::Duration;

/// How many times a failing job is re-run and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Additional attempts permitted after the initial one.
    pub max_retries: u32,
    /// Pause between a failed attempt and the next one. Zero means no pause.
    pub delay: Duration,
}

/// Result of driving a policy to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Number of attempts actually made (always >= 1).
    pub attempts: u32,
    /// Whether the last attempt succeeded.
    pub succeeded: bool,
}

impl RetryPolicy {
    /// Policy with `max_retries` retries and no delay.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Total attempts allowed: the initial one plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempts_made` failures.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts()
    }

    /// Run `attempt` until it returns `true` or the budget is exhausted.
    ///
    /// The closure receives the 1-based attempt number. Attempts run strictly
    /// one after another on the calling thread.
    pub fn execute<F>(&self, mut attempt: F) -> RetryOutcome
    where
        F: FnMut(u32) -> bool,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            if attempt(attempts) {
                return RetryOutcome {
                    attempts,
                    succeeded: true,
                };
            }
            if !self.should_retry(attempts) {
                return RetryOutcome {
                    attempts,
                    succeeded: false,
                };
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
        assert_eq!(RetryPolicy::new(5).max_attempts(), 6);
        assert_eq!(RetryPolicy::new(u32::MAX).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_permanent_failure_runs_budget_plus_one() {
        let mut calls = Vec::new();
        let outcome = RetryPolicy::new(3).execute(|n| {
            calls.push(n);
            false
        });
        assert_eq!(calls, vec![1, 2, 3, 4]);
        assert_eq!(
            outcome,
            RetryOutcome {
                attempts: 4,
                succeeded: false
            }
        );
    }

    #[test]
    fn test_success_stops_further_attempts() {
        let mut calls = 0;
        let outcome = RetryPolicy::new(5).execute(|n| {
            calls += 1;
            n == 2
        });
        assert_eq!(calls, 2);
        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn test_first_attempt_success_with_no_retry() {
        let outcome = RetryPolicy::no_retry().execute(|_| true);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.succeeded);
    }

    #[test]
    fn test_delay_between_attempts() {
        let policy = RetryPolicy::new(2).with_delay(Duration::from_millis(20));
        let start = Instant::now();
        let outcome = policy.execute(|_| false);
        assert_eq!(outcome.attempts, 3);
        // two pauses, none after the final attempt
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
