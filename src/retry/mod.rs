//! Retry controller: exponential backoff around a single fallible async operation.

mod backoff;

pub use backoff::{DEFAULT_JITTER, ExponentialBackoff};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Decides whether a failed attempt is retried.
#[derive(Clone, Default)]
pub enum RetryOn {
    /// Retry every error except cancellation.
    #[default]
    All,
    /// Retry errors whose [`Error::kind`] is in the list.
    Kinds(Vec<String>),
    /// Retry errors the predicate accepts.
    Predicate(Arc<dyn Fn(&Error) -> bool + Send + Sync>),
}

impl RetryOn {
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RetryOn::Kinds(kinds.into_iter().map(Into::into).collect())
    }

    pub fn predicate(f: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
        RetryOn::Predicate(Arc::new(f))
    }

    pub fn matches(&self, error: &Error) -> bool {
        if matches!(error, Error::Cancelled) {
            return false;
        }
        match self {
            RetryOn::All => true,
            RetryOn::Kinds(kinds) => kinds.iter().any(|k| k == error.kind()),
            RetryOn::Predicate(f) => f(error),
        }
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOn::All => f.write_str("All"),
            RetryOn::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            RetryOn::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// What happens once retries are exhausted.
#[derive(Clone, Default)]
pub enum OnFailure {
    /// Return the last error.
    Raise,
    /// Replace the failure with a message describing the attempts and the error.
    #[default]
    ReturnMessage,
    /// Replace the failure with the formatter's text; a formatter error propagates.
    Custom(Arc<dyn Fn(&Error) -> Result<String> + Send + Sync>),
}

impl OnFailure {
    pub fn custom(f: impl Fn(&Error) -> Result<String> + Send + Sync + 'static) -> Self {
        OnFailure::Custom(Arc::new(f))
    }
}

impl fmt::Debug for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnFailure::Raise => f.write_str("Raise"),
            OnFailure::ReturnMessage => f.write_str("ReturnMessage"),
            OnFailure::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_on: RetryOn,
    pub backoff_factor: f64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub on_failure: OnFailure,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_on: RetryOn::All,
            backoff_factor: 2.0,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter: true,
            on_failure: OnFailure::ReturnMessage,
        }
    }
}

/// Last error of an exhausted retry loop.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: Error,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(Error::config(format!(
                "backoff_factor must be a non-negative number, got {}",
                self.backoff_factor
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::config(format!(
                "initial_delay ({}ms) must not exceed max_delay ({}ms)",
                self.initial_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        let backoff =
            ExponentialBackoff::new(self.initial_delay, self.max_delay, self.backoff_factor);
        if self.jitter {
            backoff.with_jitter(DEFAULT_JITTER)
        } else {
            backoff
        }
    }

    /// Run `operation` until it succeeds, the error is not retryable, retries
    /// run out, or `cancel` fires. The closure receives the 1-based attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> std::result::Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backoff = self.backoff();
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryFailure {
                    error: Error::Cancelled,
                    attempts: attempt,
                });
            }
            attempt += 1;

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if cancel.is_cancelled() {
                return Err(RetryFailure {
                    error: Error::Cancelled,
                    attempts: attempt,
                });
            }
            if attempt > self.max_retries || !self.retry_on.matches(&error) {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }

            let delay = backoff.delay_for(attempt);
            warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                kind = error.kind(),
                error = %error,
                "attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryFailure {
                        error: Error::Cancelled,
                        attempts: attempt,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Apply `on_failure` to an exhausted loop. `Ok` carries the replacement
    /// text; cancellation always propagates.
    pub fn resolve_failure(
        &self,
        failure: RetryFailure,
        describe: impl FnOnce(&Error, u32) -> String,
    ) -> Result<String> {
        if matches!(failure.error, Error::Cancelled) {
            return Err(failure.error);
        }
        match &self.on_failure {
            OnFailure::Raise => Err(failure.error),
            OnFailure::ReturnMessage => Ok(describe(&failure.error, failure.attempts)),
            OnFailure::Custom(formatter) => formatter(&failure.error),
        }
    }
}

/// "1 attempt", "3 attempts".
pub fn attempts_phrase(attempts: u32) -> String {
    if attempts == 1 {
        "1 attempt".to_string()
    } else {
        format!("{attempts} attempts")
    }
}

/// Default replacement text for an exhausted retry loop, e.g.
/// `Model call failed after 3 attempts with TimeoutError: timed out`.
pub fn failure_text(subject: &str, error: &Error, attempts: u32) -> String {
    let detail = match error {
        Error::Model(e) => e.message.clone(),
        Error::Tool(e) => e.message().to_string(),
        other => other.to_string(),
    };
    format!(
        "{subject} failed after {} with {}: {detail}",
        attempts_phrase(attempts),
        error.kind()
    )
}
