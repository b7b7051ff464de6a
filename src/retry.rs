//! Bounded retry with backoff around one query attempt
//!
//! Connection failures and attempt timeouts are absorbed here until the
//! attempt budget runs out; everything else propagates immediately. Every
//! attempt is expected to acquire a fresh client, so a crashed client is
//! never reused.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::types::options::RetryConfig;

/// Ceiling for exponential backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Notification emitted for every retryable failure
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// 1-based attempt that failed
    pub attempt: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Failure description
    pub error: String,
    /// Delay before the next attempt, `None` when the budget is spent
    pub next_delay: Option<Duration>,
}

/// Retry coordinator for one query
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    max_attempts: u32,
    base_delay: Duration,
    exponential: bool,
    attempt_timeout: Duration,
}

impl RetryCoordinator {
    /// Build from a session's retry configuration
    ///
    /// `max_retries` is the attempt budget: with `max_retries = 3` at most
    /// three attempts are made. A budget of zero still makes one attempt.
    /// Delays are clamped to the backoff ceiling.
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::try_from_secs_f64(config.retry_delay_secs.max(0.0))
                .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF)),
            exponential: config.exponential_backoff,
            attempt_timeout: config.attempt_timeout(),
        }
    }

    /// Attempt budget
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the given failed attempt
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `attempt` until it succeeds, fails terminally, or the budget is spent
    ///
    /// `on_retry` runs once per retryable failure, including the last one,
    /// before any backoff sleep. Both the attempt and the backoff observe
    /// `cancel`.
    ///
    /// # Errors
    /// - the attempt's own error when it is not retryable
    /// - `EngineError::RetriesExhausted` when every attempt failed
    /// - `EngineError::Cancelled` when `cancel` fires
    pub async fn run<T, A, AFut, R, RFut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: A,
        mut on_retry: R,
    ) -> Result<T>
    where
        A: FnMut(u32) -> AFut,
        AFut: Future<Output = Result<T>>,
        R: FnMut(RetryEvent) -> RFut,
        RFut: Future<Output = ()>,
    {
        let timeout_secs = self.attempt_timeout.as_secs();

        for n in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(EngineError::cancelled("query cancelled before attempt"));
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(EngineError::cancelled("query cancelled")),
                timed = tokio::time::timeout(self.attempt_timeout, attempt(n)) => match timed {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::attempt_timeout(timeout_secs)),
                },
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let exhausted = n == self.max_attempts;
            let next_delay = (!exhausted).then(|| self.delay_after(n));
            log::warn!(
                "Attempt {}/{} failed: {}{}",
                n,
                self.max_attempts,
                error,
                next_delay.map_or_else(String::new, |d| format!(", retrying in {d:?}"))
            );
            on_retry(RetryEvent {
                attempt: n,
                max_attempts: self.max_attempts,
                error: error.to_string(),
                next_delay,
            })
            .await;

            let Some(delay) = next_delay else {
                return Err(EngineError::RetriesExhausted {
                    attempts: n,
                    last_error: error.to_string(),
                });
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(EngineError::cancelled("query cancelled during retry backoff"));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        Err(EngineError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error: "no attempt was made".to_string(),
        })
    }
}
