//! Bounded retry with backoff for network calls.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::Error;

type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// `2^attempt` milliseconds, capped at about a minute.
pub fn exponential_backoff(attempt: u32) -> Duration {
    Duration::from_millis(1u64 << attempt.min(16))
}

/// Runs fallible work up to `max_attempts` times, sleeping between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    timeout: Option<Duration>,
    max_attempts: u32,
    backoff: BackoffFn,
}

/// Failure of a retried call.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The overall timeout expired, however many attempts had completed.
    Timeout,
    /// Every attempt failed; carries the last error.
    Exhausted(E),
}

impl RetryPolicy {
    /// A policy with exponential backoff. `max_attempts` below one is treated as one.
    pub fn new(timeout: Option<Duration>, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(exponential_backoff),
        }
    }

    /// Replace the backoff function. It receives the number of attempts made so far.
    pub fn with_backoff(mut self, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `work` until it succeeds, attempts run out, or the timeout expires.
    pub async fn try_run<T, E, F, Fut>(&self, work: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let attempts = self.run_attempts(work);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, attempts)
                .await
                .unwrap_or(Err(RetryError::Timeout)),
            None => attempts.await,
        }
    }

    async fn run_attempts<T, E, F, Fut>(&self, mut work: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempts = 0;
        loop {
            match work().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.max_attempts {
                        return Err(RetryError::Exhausted(e));
                    }
                    debug!(attempts, error = %e, "Attempt failed, backing off");
                    tokio::time::sleep((self.backoff)(attempts)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(None, 3)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl<E> RetryError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout)
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Timeout => write!(f, "retry timed out"),
            RetryError::Exhausted(e) => e.fmt(f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl From<RetryError<Error>> for Error {
    fn from(err: RetryError<Error>) -> Self {
        match err {
            RetryError::Timeout => Error::Timeout("retry timed out".to_string()),
            RetryError::Exhausted(e) => e,
        }
    }
}
