use std::cmp;
use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Exponential-backoff retry for transient failures (lock contention,
/// short-lived I/O errors). Base 100ms, doubling per attempt, capped at 5s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn execute<T, E, F>(&self, op: &str, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        self.execute_where(op, |_| true, f)
    }

    /// Like `execute`, but only errors for which `retryable` returns true are
    /// retried; anything else is surfaced immediately.
    pub fn execute_where<T, E, F, P>(&self, op: &str, retryable: P, mut f: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt: u32 = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= self.max_retries || !retryable(&e) {
                        return Err(e);
                    }
                    let delay = cmp::min(self.base_delay * 2u32.pow(attempt), self.max_delay);
                    warn!(
                        op,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        };
        let mut calls = 0;
        let result: Result<u32, String> = policy.execute("test_op", || {
            calls += 1;
            if calls <= 2 {
                Err("transient".to_string())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        };
        let mut calls = 0;
        let result: Result<(), String> = policy.execute("test_op", || {
            calls += 1;
            Err("persistent".to_string())
        });
        assert_eq!(result, Err("persistent".to_string()));
        assert_eq!(calls, 3); // initial try + 2 retries
    }

    #[test]
    fn test_non_retryable_error_fails_fast() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<(), String> =
            policy.execute_where("test_op", |e: &String| e != "fatal", || {
                calls += 1;
                Err("fatal".to_string())
            });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
