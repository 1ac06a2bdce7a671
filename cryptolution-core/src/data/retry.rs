//! Fixed-delay retry for transient provider failures.
//!
//! No backoff and no jitter: the job runs once a day and the provider either
//! comes back or it does not. The attempt budget is large by default but finite
//! so that an outage eventually fails the run instead of hanging it forever.

use super::provider::ProviderError;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently to retry a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included. `0` behaves like `1`.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100_000,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// Only `ProviderError::is_transient` errors are retried; anything else is
    /// returned at once. Running out yields `RetriesExhausted`.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Result<T, ProviderError>,
    {
        let budget = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt >= budget {
                        return Err(ProviderError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    warn!(
                        operation,
                        attempt,
                        error = %e,
                        "provider not available - retry after {:?}",
                        self.delay
                    );
                    std::thread::sleep(self.delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = quick(5).run("ohlc", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ProviderError::ProviderUnavailable("503".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausts_budget() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick(4).run("asset pairs", || {
            calls.set(calls.get() + 1);
            Err(ProviderError::ProviderUnavailable("connection refused".into()))
        });
        assert_eq!(calls.get(), 4);
        match result {
            Err(ProviderError::RetriesExhausted {
                operation,
                attempts,
                last_error,
            }) => {
                assert_eq!(operation, "asset pairs");
                assert_eq!(attempts, 4);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick(10).run("ohlc", || {
            calls.set(calls.get() + 1);
            Err(ProviderError::PairRejected {
                pair: "XXBTZEUR".into(),
                reason: "EQuery:Unknown asset pair".into(),
            })
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(ProviderError::PairRejected { .. })));
    }

    #[test]
    fn zero_budget_still_tries_once() {
        let calls = Cell::new(0);
        let _ = quick(0).run("ohlc", || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ProviderError::ProviderUnavailable("down".into()))
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn default_matches_batch_job_settings() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay, Duration::from_secs(5));
        assert!(policy.max_attempts >= 10_000);
    }
}
