//! Composing retries with a circuit breaker.
//!
//! Both composites build their own breaker from the configuration of the one
//! they are given. The breaker passed in is never touched, so its
//! `state()`/`counts()` say nothing about the composite; ask the composite.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::breaker::Breaker;
use crate::counts::Counts;
use crate::error::Error;
use crate::retry::Retryer;
use crate::state::State;

/// Sends every retry attempt through the breaker.
///
/// A burst of failures inside one call can trip the breaker. The next attempt
/// is then rejected without running, and since rejections are not retryable
/// the call ends right there with an open error and no further backoff.
pub struct BreakerRetryer<E> {
    breaker: Breaker<E>,
    retryer: Retryer<E>,
}

impl<E: 'static> BreakerRetryer<E> {
    /// Creates the composite with its own breaker configured like `breaker`.
    ///
    /// The new breaker shares the template's name and hooks: its transitions
    /// reach the template's hooks under the template's name. Build a
    /// dedicated template (own name, own hooks) to tell the two apart.
    pub fn new(breaker: &Breaker<E>, retryer: Retryer<E>) -> Self {
        Self {
            breaker: Breaker::with_config(breaker.config().clone()),
            retryer,
        }
    }

    /// The breaker this composite records into.
    pub fn breaker(&self) -> &Breaker<E> {
        &self.breaker
    }

    /// State of the composite's breaker.
    pub fn state(&self) -> State {
        self.breaker.state()
    }

    /// Counts of the composite's breaker.
    pub fn counts(&self) -> Counts {
        self.breaker.counts()
    }

    /// Runs `f` with retries, each attempt admitted and recorded separately.
    pub async fn run_with_retry<T, F, Fut>(&self, token: &CancellationToken, mut f: F) -> Result<T, Error<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, Error<E>>>,
    {
        let breaker = &self.breaker;
        self.retryer
            .run(token, |attempt_token| {
                // Admission happens before `f` is even called.
                let admitted = breaker
                    .admit(&attempt_token)
                    .map(|permit| (permit, f(attempt_token)));

                async move {
                    let (permit, operation) = admitted?;
                    let result = operation.await;
                    permit.report(&result);
                    result
                }
            })
            .await
    }
}

impl<E: 'static> fmt::Debug for BreakerRetryer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRetryer")
            .field("breaker", &self.breaker)
            .field("retryer", &self.retryer)
            .finish()
    }
}

/// Retries first and records only the final outcome in the breaker.
///
/// Admission is checked once, up front; an open breaker fails the call before
/// the retry policy is consulted. The retry loop then runs without touching
/// the breaker, and its final result is reported once through the same
/// exclude/success classification the breaker uses natively. A panic inside
/// the loop is recorded as a failure and then resumed unchanged.
pub struct RetryThenBreak<E> {
    breaker: Breaker<E>,
    retryer: Retryer<E>,
}

impl<E: 'static> RetryThenBreak<E> {
    /// Creates the composite with its own breaker configured like `breaker`.
    ///
    /// The new breaker shares the template's name and hooks: its transitions
    /// reach the template's hooks under the template's name. Build a
    /// dedicated template (own name, own hooks) to tell the two apart.
    pub fn new(breaker: &Breaker<E>, retryer: Retryer<E>) -> Self {
        Self {
            breaker: Breaker::with_config(breaker.config().clone()),
            retryer,
        }
    }

    /// The breaker this composite records into.
    pub fn breaker(&self) -> &Breaker<E> {
        &self.breaker
    }

    /// State of the composite's breaker.
    pub fn state(&self) -> State {
        self.breaker.state()
    }

    /// Counts of the composite's breaker.
    pub fn counts(&self) -> Counts {
        self.breaker.counts()
    }

    /// Runs `f` with retries and records one outcome for the whole sequence.
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, f: F) -> Result<T, Error<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, Error<E>>>,
    {
        let permit = self.breaker.admit(token)?;

        match AssertUnwindSafe(self.retryer.run(token, f)).catch_unwind().await {
            Ok(result) => {
                permit.report(&result);
                result
            }
            Err(payload) => {
                warn!(breaker = %self.breaker.name(), "operation panicked, recording failure");
                permit.failure();
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<E: 'static> fmt::Debug for RetryThenBreak<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryThenBreak")
            .field("breaker", &self.breaker)
            .field("retryer", &self.retryer)
            .finish()
    }
}
