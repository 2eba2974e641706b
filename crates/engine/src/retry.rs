//! Retry layer wrapped around a single node's processor invocation.
//!
//! Transient failures are retried with exponential back-off up to the
//! policy's bound; validation failures return immediately. An optional
//! per-attempt timeout turns a hung attempt into a transient failure.
//!
//! With a concurrency gate, every attempt holds a permit while it runs. The
//! permit is taken before the timeout starts and released before back-off,
//! so queueing for a slot never counts against an attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use nodes::NodeError;

use crate::config::{ExecutorConfig, RetryPolicy};

/// Value produced by a successful attempt, with the attempt count.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Last error of a node that did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub error: NodeError,
    pub attempts: u32,
}

/// Announced before sleeping ahead of a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice<'a> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a NodeError,
}

#[derive(Debug, Clone, Default)]
pub struct RetryLayer {
    policy: RetryPolicy,
    timeout: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy, timeout: Option<Duration>) -> Self {
        Self {
            policy,
            timeout,
            gate: None,
        }
    }

    /// Layer for one run; `max_concurrency` becomes a gate shared by every
    /// clone of the returned layer.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.retry.clone(), config.node_timeout)
            .with_gate(config.max_concurrency.map(|limit| Arc::new(Semaphore::new(limit))))
    }

    /// Limit concurrently running attempts to the permits of `gate`.
    pub fn with_gate(mut self, gate: Option<Arc<Semaphore>>) -> Self {
        self.gate = gate;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the retry bound is exhausted. `attempt` receives the 1-based attempt
    /// number.
    pub async fn run<T, F, Fut>(
        &self,
        node_id: &str,
        mut attempt: F,
        mut on_retry: impl FnMut(RetryNotice<'_>),
    ) -> Result<Attempted<T>, AttemptFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let permit = match &self.gate {
                Some(gate) => gate.acquire().await.ok(),
                None => None,
            };
            let result = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt(attempts)).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Transient(format!(
                        "attempt timed out after {limit:?}"
                    ))),
                },
                None => attempt(attempts).await,
            };
            drop(permit);

            let error = match result {
                Ok(value) => return Ok(Attempted { value, attempts }),
                Err(error) => error,
            };

            if !error.is_retryable() || attempts >= max_attempts {
                return Err(AttemptFailure { error, attempts });
            }

            let delay = self.policy.delay_for(attempts);
            warn!(
                node_id,
                attempt = attempts,
                max_attempts,
                ?delay,
                error = %error,
                "transient node error, retrying"
            );
            on_retry(RetryNotice {
                attempt: attempts,
                delay,
                error: &error,
            });

            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn layer(max_retries: u32) -> RetryLayer {
        RetryLayer::new(
            RetryPolicy {
                max_retries,
                ..RetryPolicy::default()
            },
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_attempt_runs_n_plus_one_times() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<Attempted<()>, _> = layer(3)
            .run(
                "flaky",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(NodeError::Transient("503".into())) }
                },
                |_| {},
            )
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of back-off on virtual time
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn success_short_circuits_retries() {
        let calls = AtomicU32::new(0);
        let mut notices = Vec::new();

        let result = layer(3)
            .run(
                "flaky",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(NodeError::Transient("try again".into()))
                        } else {
                            Ok("done")
                        }
                    }
                },
                |notice| notices.push((notice.attempt, notice.delay)),
            )
            .await
            .unwrap();

        assert_eq!(result, Attempted { value: "done", attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            notices,
            vec![(1, Duration::from_secs(1)), (2, Duration::from_secs(2))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn validation_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let mut retries = 0;

        let failure = layer(3)
            .run(
                "strict",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(NodeError::missing_config("strict", "model")) }
                },
                |_| retries += 1,
            )
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_transient_failure() {
        let layer = RetryLayer::new(RetryPolicy::none(), Some(Duration::from_millis(100)));

        let failure = layer
            .run(
                "slow",
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                |_| {},
            )
            .await
            .unwrap_err();

        assert!(failure.error.is_retryable());
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_a_permit_does_not_count_against_the_timeout() {
        let gate = Arc::new(Semaphore::new(1));
        let held = Arc::clone(&gate).acquire_owned().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(held);
        });

        let layer = RetryLayer::new(RetryPolicy::none(), Some(Duration::from_secs(2)))
            .with_gate(Some(gate));
        let started = Instant::now();

        let result = layer
            .run(
                "queued",
                |_| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok("done")
                },
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(result.attempts, 1);
        assert!(started.elapsed() >= Duration::from_secs(11));
    }
}
