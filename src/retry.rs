// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Outcome of a single attempt that did not succeed
#[derive(Debug)]
pub enum AttemptError<E> {
    /// The attempt exceeded the per-attempt timeout
    TimedOut,
    /// The operation itself failed
    Failed(E),
}

/// Timeout and bounded retry settings for one kind of network operation
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub attempts: u32,
    /// Limit for a single attempt
    pub timeout: Duration,
    /// Delay before the second attempt; grows linearly afterwards
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout: Duration, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout,
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. Returns the last error.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, AttemptError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    if !is_retryable(&e) {
                        return Err(AttemptError::Failed(e));
                    }
                    AttemptError::Failed(e)
                }
                Err(_) => AttemptError::TimedOut,
            };

            if attempt >= attempts {
                return Err(error);
            }

            match &error {
                AttemptError::TimedOut => warn!(
                    operation,
                    attempt,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "attempt timed out, retrying"
                ),
                AttemptError::Failed(e) => {
                    warn!(operation, attempt, error = %e, "attempt failed, retrying")
                }
            }

            tokio::time::sleep(self.backoff * attempt).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30), Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(200), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<u32, AttemptError<String>> = quick(3)
            .run("op", |_| true, move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("fail {n}")) } else { Ok(n) }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), AttemptError<String>> = quick(5)
            .run("op", |_| false, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            })
            .await;

        assert!(matches!(result, Err(AttemptError::Failed(ref e)) if e == "fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reports_timeout_after_last_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(1));

        let result: Result<(), AttemptError<String>> = policy
            .run("op", |_| true, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(AttemptError::TimedOut)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(quick(0).attempts, 1);
    }
}
