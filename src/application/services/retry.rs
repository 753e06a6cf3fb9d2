use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::application::ports::Transient;

/// Bounded retry with doubling backoff and a per-attempt timeout. Applied to
/// every external call so a hung dependency never pins a worker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            call_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallError<E: fmt::Display> {
    #[error("{operation} timed out after {attempts} attempt(s)")]
    TimedOut {
        operation: &'static str,
        attempts: u32,
    },
    #[error("{operation} failed after {attempts} attempt(s): {error}")]
    Failed {
        operation: &'static str,
        attempts: u32,
        error: E,
    },
}

impl<E: fmt::Display + Transient> CallError<E> {
    /// True when the failure came from infrastructure (timeouts or retryable
    /// errors that exhausted the attempt cap) rather than a permanent error.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            CallError::TimedOut { .. } => true,
            CallError::Failed { error, .. } => error.is_transient(),
        }
    }
}

impl<E: fmt::Display> CallError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            CallError::TimedOut { attempts, .. } | CallError::Failed { attempts, .. } => *attempts,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry(call_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            call_timeout,
            ..Self::default()
        }
    }

    pub async fn call<T, E, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) if !error.is_transient() || attempt >= max_attempts => {
                    return Err(CallError::Failed {
                        operation,
                        attempts: attempt,
                        error,
                    });
                }
                Err(_) if attempt >= max_attempts => {
                    return Err(CallError::TimedOut {
                        operation,
                        attempts: attempt,
                    });
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis(),
                        "Transient failure, retrying"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        timeout_ms = self.call_timeout.as_millis(),
                        delay_ms = delay.as_millis(),
                        "Call timed out, retrying"
                    );
                }
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.max_backoff);
        }
    }
}
