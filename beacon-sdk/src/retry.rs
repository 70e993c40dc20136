//! Retrying exports with exponential backoff and jitter.
//!
//! The [`RetryPolicy`] struct defines the retry behavior: the total number of
//! attempts, the initial delay, the maximum delay and the jitter added to each
//! delay. [`retry_with_backoff`] runs an export attempt until it succeeds,
//! fails permanently, runs out of attempts or would overrun a deadline.
//!
//! Retries run on the processor's worker thread, so the delay is a plain
//! `thread::sleep`.

use crate::export::{ExportError, ExportResult};
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included. `0` is treated as `1`.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay, jitter included.
    pub max_delay: Duration,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1600),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

// Generates a random jitter value up to max_jitter
fn generate_jitter(max_jitter: Duration) -> Duration {
    let max_ms = max_jitter.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Runs `operation` until it succeeds or the policy gives up.
///
/// `operation` receives the zero-based attempt number. Only
/// [`ExportError::Transient`] failures are retried. If a `deadline` is given,
/// no retry is scheduled whose delay would end past it. The error of the last
/// attempt is returned.
pub fn retry_with_backoff<F>(
    policy: &RetryPolicy,
    operation_name: &str,
    deadline: Option<Instant>,
    mut operation: F,
) -> ExportResult
where
    F: FnMut(usize) -> ExportResult,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        let err = match operation(attempt) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        attempt += 1;

        if let ExportError::Permanent(_) = err {
            return Err(err);
        }
        if attempt >= max_attempts {
            return Err(err);
        }

        let delay_with_jitter = (delay + generate_jitter(policy.jitter)).min(policy.max_delay);
        if let Some(deadline) = deadline {
            if Instant::now() + delay_with_jitter >= deadline {
                beacon_debug!(
                    name: "Retry.DeadlineReached",
                    operation = operation_name,
                    attempts = attempt
                );
                return Err(err);
            }
        }

        beacon_debug!(
            name: "Retry.Scheduled",
            operation = operation_name,
            attempt = attempt,
            error = err.to_string()
        );
        thread::sleep(delay_with_jitter);
        delay = (delay * 2).min(policy.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: Duration::from_millis(1),
        }
    }

    #[test]
    fn jitter_within_bound() {
        for _ in 0..100 {
            assert!(generate_jitter(Duration::from_millis(100)) <= Duration::from_millis(100));
        }
        assert_eq!(generate_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_millis(1600));
        assert_eq!(policy.jitter, Duration::from_millis(100));
    }

    #[test]
    fn succeeds_first_attempt() {
        let mut calls = 0;
        let result = retry_with_backoff(&fast_policy(), "test", None, |_| {
            calls += 1;
            Ok(())
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retries_transient_until_success() {
        let mut calls = 0;
        let result = retry_with_backoff(&fast_policy(), "test", None, |attempt| {
            calls += 1;
            if attempt < 2 {
                Err(ExportError::Transient("unavailable".into()))
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Ok(()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result = retry_with_backoff(&fast_policy(), "test", None, |_| {
            calls += 1;
            Err(ExportError::Transient("unavailable".into()))
        });
        assert_eq!(result, Err(ExportError::Transient("unavailable".into())));
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_error_not_retried() {
        let mut calls = 0;
        let result = retry_with_backoff(&fast_policy(), "test", None, |_| {
            calls += 1;
            Err(ExportError::Permanent("bad request".into()))
        });
        assert!(matches!(result, Err(ExportError::Permanent(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn deadline_stops_retries() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
            ..fast_policy()
        };
        let deadline = Instant::now() + Duration::from_millis(50);
        let start = Instant::now();
        let mut calls = 0;
        let result = retry_with_backoff(&policy, "test", Some(deadline), |_| {
            calls += 1;
            Err(ExportError::Transient("unavailable".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..fast_policy()
        };
        let mut calls = 0;
        let _ = retry_with_backoff(&policy, "test", None, |_| {
            calls += 1;
            Err(ExportError::Transient("unavailable".into()))
        });
        assert_eq!(calls, 1);
    }
}
