//! Retry engine.
//!
//! Two surfaces share one attempt loop: the reusable [`Retryer`] and the
//! free function [`retry`]. Cancellation is checked before every attempt and
//! while waiting out a backoff, never inside a running attempt. Once the
//! token has fired the loop returns [`Error::Cancelled`], even if the last
//! attempt produced a different error.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::{BackoffPolicy, NoBackoff};
use crate::error::{ConfigError, Error};

/// Decides whether a failed attempt is retried.
pub trait RetryPolicy<E>: Send + Sync + 'static {
    /// Upper bound on attempts, `0` for unbounded.
    fn max_attempts(&self) -> u32;

    /// Called after each failed attempt; `attempt` counts the attempts made so far.
    fn should_retry(&self, token: &CancellationToken, attempt: u32, err: &Error<E>) -> bool;
}

/// Retries retryable errors until `attempts` attempts were made.
#[derive(Debug, Clone, Copy)]
pub struct FixedRetry {
    attempts: u32,
}

impl FixedRetry {
    /// Creates the policy. Zero attempts is treated as one.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }
}

impl<E> RetryPolicy<E> for FixedRetry {
    fn max_attempts(&self) -> u32 {
        self.attempts
    }

    fn should_retry(&self, token: &CancellationToken, attempt: u32, err: &Error<E>) -> bool {
        attempt < self.attempts && err.is_retryable() && !token.is_cancelled()
    }
}

/// Retries retryable errors for as long as the token allows.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E> RetryPolicy<E> for AlwaysRetry {
    fn max_attempts(&self) -> u32 {
        0
    }

    fn should_retry(&self, token: &CancellationToken, _attempt: u32, err: &Error<E>) -> bool {
        err.is_retryable() && !token.is_cancelled()
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<E> RetryPolicy<E> for NeverRetry {
    fn max_attempts(&self) -> u32 {
        1
    }

    fn should_retry(&self, _token: &CancellationToken, _attempt: u32, _err: &Error<E>) -> bool {
        false
    }
}

type OnRetryFn<E> = Arc<dyn Fn(u32, &Error<E>, Duration) + Send + Sync + 'static>;

/// Runs an operation repeatedly under a retry and a backoff policy.
///
/// A retryer holds no per-call state: concurrent and sequential calls on the
/// same instance each get their own attempt counter.
pub struct Retryer<E> {
    policy: Arc<dyn RetryPolicy<E>>,
    backoff: Arc<dyn BackoffPolicy>,
    on_retry: Option<OnRetryFn<E>>,
}

impl<E: 'static> Retryer<E> {
    /// Creates a retryer from a retry and a backoff policy.
    pub fn new<P, B>(policy: P, backoff: B) -> Self
    where
        P: RetryPolicy<E>,
        B: BackoffPolicy,
    {
        Self {
            policy: Arc::new(policy),
            backoff: Arc::new(backoff),
            on_retry: None,
        }
    }

    /// Creates a builder.
    pub fn builder() -> RetryBuilder<E> {
        RetryBuilder::new()
    }

    /// The retry policy in use.
    pub fn policy(&self) -> &dyn RetryPolicy<E> {
        self.policy.as_ref()
    }

    /// Runs `f` until it succeeds or the retry policy gives up.
    ///
    /// `f` receives a clone of `token` on every attempt.
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, f: F) -> Result<T, Error<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, Error<E>>>,
    {
        attempt_loop(
            token,
            self.policy.as_ref(),
            self.backoff.as_ref(),
            self.on_retry.as_ref(),
            f,
        )
        .await
    }
}

impl<E> Clone for Retryer<E> {
    fn clone(&self) -> Self {
        Self {
            policy: Arc::clone(&self.policy),
            backoff: Arc::clone(&self.backoff),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E: 'static> fmt::Debug for Retryer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retryer")
            .field("max_attempts", &self.policy.max_attempts())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Builder for [`Retryer`].
pub struct RetryBuilder<E> {
    policy: Option<Arc<dyn RetryPolicy<E>>>,
    backoff: Arc<dyn BackoffPolicy>,
    on_retry: Option<OnRetryFn<E>>,
}

impl<E> Default for RetryBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryBuilder<E> {
    /// Creates a builder with no retry policy and no backoff.
    pub fn new() -> Self {
        Self {
            policy: None,
            backoff: Arc::new(NoBackoff),
            on_retry: None,
        }
    }

    /// Sets the retry policy. Required.
    pub fn policy<P: RetryPolicy<E>>(mut self, policy: P) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Sets the backoff policy.
    pub fn backoff<B: BackoffPolicy>(mut self, backoff: B) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Sets a callback invoked before each backoff wait with the attempt
    /// number, the error that caused the retry and the upcoming delay.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &Error<E>, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Builds the retryer.
    pub fn build(self) -> Result<Retryer<E>, ConfigError> {
        let policy = self.policy.ok_or(ConfigError::MissingRetryPolicy)?;
        Ok(Retryer {
            policy,
            backoff: self.backoff,
            on_retry: self.on_retry,
        })
    }
}

/// Runs `f` with retries, without building a [`Retryer`].
///
/// Behaves exactly like [`Retryer::run`], cancellation included.
pub async fn retry<E: 'static, T, F, Fut>(
    token: &CancellationToken,
    policy: &dyn RetryPolicy<E>,
    backoff: &dyn BackoffPolicy,
    f: F,
) -> Result<T, Error<E>>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, Error<E>>>,
{
    attempt_loop(token, policy, backoff, None, f).await
}

async fn attempt_loop<E: 'static, T, F, Fut>(
    token: &CancellationToken,
    policy: &dyn RetryPolicy<E>,
    backoff: &dyn BackoffPolicy,
    on_retry: Option<&OnRetryFn<E>>,
    mut f: F,
) -> Result<T, Error<E>>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, Error<E>>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt: u32 = 0;

    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        attempt = attempt.saturating_add(1);
        let err = match f(token.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if token.is_cancelled() {
            debug!(attempt, "cancelled after failed attempt");
            return Err(Error::Cancelled);
        }

        let exhausted = max_attempts != 0 && attempt >= max_attempts;
        if exhausted || !policy.should_retry(token, attempt, &err) {
            if exhausted && err.is_retryable() {
                warn!(attempts = attempt, "retry attempts exhausted");
            } else {
                debug!(attempt, "giving up on non-retryable error");
            }
            return Err(err);
        }

        let delay = backoff.next_delay(attempt);
        if let Some(callback) = on_retry {
            callback(attempt, &err, delay);
        }
        drop(err);

        debug!(attempt, delay = ?delay, "retrying operation");
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
