//! Bounded retry loop around unreliable upstream calls.
//!
//! An operation reports each try as an [`Attempt`]: success, a retryable
//! failure or a fatal one. [`RetryPolicy::run`] drives the loop over a fixed
//! sleep schedule and always returns a [`RetryOutcome`]; it never panics past
//! its boundary and never sleeps once the run is cancelled.

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::llm::prompt::char_len;

/// Result of a single try.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Success(T),
    /// Transient failure; try again after the next delay.
    Retry(String),
    /// Retrying cannot help; stop now.
    Fatal(String),
}

/// Result of the whole loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T> {
    Completed { value: T, attempts: usize },
    Exhausted { attempts: usize, last_reason: String },
    Fatal { attempts: usize, reason: String },
    Cancelled { attempts: usize },
}

impl<T> RetryOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Completed { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            RetryOutcome::Completed { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Fatal { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Sleep schedule between attempts. The first attempt runs immediately, so
/// `delays.len() + 1` attempts are made at most.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            attempt_timeout: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config
                .delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        )
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(Vec::new())
    }

    /// Abandon any attempt that runs longer than `timeout` and count it as
    /// retryable.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `op` until it succeeds, fails fatally, the schedule runs out or
    /// `cancel` fires. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts() {
            if attempt > 1 {
                let delay = self.delays[attempt - 2];
                tracing::info!("{label}: retrying in {}s (attempt {attempt})", delay.as_secs());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: attempt - 1 },
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return RetryOutcome::Cancelled {
                    attempts: attempt - 1,
                };
            }

            let guarded = AssertUnwindSafe(op(attempt)).catch_unwind();
            let timed = async {
                match self.attempt_timeout {
                    Some(limit) => match tokio::time::timeout(limit, guarded).await {
                        Ok(result) => result,
                        Err(_) => Ok(Attempt::Retry(format!(
                            "timed out after {}s",
                            limit.as_secs()
                        ))),
                    },
                    None => guarded.await,
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: attempt },
                result = timed => result,
            };

            match result {
                Ok(Attempt::Success(value)) => {
                    if attempt > 1 {
                        tracing::info!("{label}: succeeded on attempt {attempt}");
                    }
                    return RetryOutcome::Completed {
                        value,
                        attempts: attempt,
                    };
                }
                Ok(Attempt::Retry(reason)) => {
                    tracing::warn!("{label}: attempt {attempt} failed: {reason}");
                    last_reason = reason;
                }
                Ok(Attempt::Fatal(reason)) => {
                    tracing::error!("{label}: attempt {attempt} failed fatally: {reason}");
                    return RetryOutcome::Fatal {
                        attempts: attempt,
                        reason,
                    };
                }
                Err(_) => {
                    tracing::warn!("{label}: attempt {attempt} panicked");
                    last_reason = "attempt panicked".to_string();
                }
            }
        }

        tracing::error!(
            "{label}: giving up after {} attempts: {last_reason}",
            self.max_attempts()
        );
        RetryOutcome::Exhausted {
            attempts: self.max_attempts(),
            last_reason,
        }
    }
}

/// Classify an LLM text result. Errors and answers whose trimmed length is
/// not above `min_chars` are retryable.
pub fn classify_text(result: anyhow::Result<String>, min_chars: usize) -> Attempt<String> {
    match result {
        Ok(text) if char_len(text.trim()) > min_chars => Attempt::Success(text),
        Ok(text) => Attempt::Retry(format!(
            "answer too short ({} chars)",
            char_len(text.trim())
        )),
        Err(e) => Attempt::Retry(format!("{e:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy(n: usize) -> RetryPolicy {
        RetryPolicy::new(vec![Duration::from_secs(1); n])
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let outcome = policy(9)
            .run("test", &CancellationToken::new(), |n| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 4 {
                        Attempt::Retry("upstream 503".into())
                    } else {
                        Attempt::Success(n)
                    }
                }
            })
            .await;
        assert_eq!(
            outcome,
            RetryOutcome::Completed {
                value: 4,
                attempts: 4
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let outcome: RetryOutcome<()> = policy(9)
            .run("test", &CancellationToken::new(), |_| async {
                Attempt::Retry("nope".into())
            })
            .await;
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 10,
                last_reason: "nope".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_stops_immediately() {
        let outcome: RetryOutcome<()> = policy(9)
            .run("test", &CancellationToken::new(), |_| async {
                Attempt::Fatal("bad request".into())
            })
            .await;
        assert_eq!(outcome.attempts(), 1);
        assert!(matches!(outcome, RetryOutcome::Fatal { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_retryable() {
        let outcome = policy(2)
            .run("test", &CancellationToken::new(), |n| async move {
                if n == 1 {
                    panic!("provider client blew up");
                }
                Attempt::Success("ok")
            })
            .await;
        assert_eq!(outcome.into_value(), Some("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_retry() {
        let outcome = policy(1)
            .with_attempt_timeout(Duration::from_secs(60))
            .run("test", &CancellationToken::new(), |n| async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                }
                Attempt::Success(n)
            })
            .await;
        assert_eq!(outcome.into_value(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: RetryOutcome<()> = policy(9)
            .run("test", &cancel, |_| async { Attempt::Success(()) })
            .await;
        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_the_loop() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let outcome: RetryOutcome<()> = policy(9)
            .run("test", &cancel, move |_| {
                trigger.cancel();
                async { Attempt::Retry("fail".into()) }
            })
            .await;
        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 1 });
    }

    #[test]
    fn test_classify_text_threshold() {
        assert!(matches!(classify_text(Ok("  curto  ".into()), 10), Attempt::Retry(_)));
        assert!(matches!(classify_text(Ok("exatamente 10".into()), 10), Attempt::Success(_)));
        assert!(matches!(
            classify_text(Err(anyhow::anyhow!("connection reset")), 10),
            Attempt::Retry(_)
        ));
    }
}
