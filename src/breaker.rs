//! Core circuit breaker implementation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BreakerBuilder, BreakerConfig};
use crate::counts::{Counts, Window};
use crate::error::{BreakerError, Error};
use crate::hook::StateChange;
use crate::state::{Limits, Outcome, State, StateMachine, Transition};

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner<E> {
    config: BreakerConfig<E>,
    machine: Mutex<StateMachine>,
}

/// A circuit breaker that can wrap function calls to prevent cascading failures.
///
/// Cloning is cheap and every clone shares the same state. The internal lock
/// only covers admission and outcome recording, never the guarded call.
pub struct Breaker<E> {
    inner: Arc<BreakerInner<E>>,
}

impl<E: 'static> Breaker<E> {
    /// Creates a new builder for customizing a circuit breaker.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder<E> {
        BreakerBuilder::new(name)
    }

    /// Creates a closed breaker with fresh counts from `config`.
    pub fn with_config(config: BreakerConfig<E>) -> Self {
        let limits = Limits {
            timeout: config.timeout,
            max_half_open_requests: config.max_half_open_requests,
            half_open_successes: config.half_open_successes,
        };
        let window = Window::new(config.interval, config.bucket_period);
        let machine = StateMachine::new(limits, window, Instant::now());

        Self {
            inner: Arc::new(BreakerInner {
                config,
                machine: Mutex::new(machine),
            }),
        }
    }

    /// Name of the breaker.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Configuration the breaker was built from.
    pub fn config(&self) -> &BreakerConfig<E> {
        &self.inner.config
    }

    /// Gets the current state of the circuit breaker.
    ///
    /// Time-driven transitions (open timeout expiry, window rollover) are
    /// applied first.
    pub fn state(&self) -> State {
        let now = Instant::now();
        self.with_machine(|m| {
            m.refresh(now);
            m.state()
        })
    }

    /// Gets a snapshot of the current window's counts.
    pub fn counts(&self) -> Counts {
        let now = Instant::now();
        self.with_machine(|m| {
            m.refresh(now);
            m.counts()
        })
    }

    /// Asks for admission without running anything.
    ///
    /// The returned [`Permit`] must be reported once the work is done.
    /// Dropping it unreported counts as a failure.
    pub fn allow(&self) -> Result<Permit<E>, BreakerError> {
        let now = Instant::now();
        match self.with_machine(|m| m.admit(now)) {
            Ok(generation) => Ok(Permit {
                breaker: self.clone(),
                generation,
                reported: false,
            }),
            Err(reason) => {
                debug!(breaker = %self.name(), reason = %reason, "call rejected");
                Err(BreakerError::new(Arc::clone(&self.inner.config.name), reason))
            }
        }
    }

    /// Executes a function wrapped by the circuit breaker.
    ///
    /// Errors returned by `f` come back unchanged, including rejections from
    /// nested breakers. If `f` panics, a failure is recorded and the panic
    /// continues.
    pub fn call<T, F>(&self, token: &CancellationToken, f: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Result<T, Error<E>>,
    {
        let permit = self.admit(token)?;
        let result = f();
        permit.report(&result);
        result
    }

    /// Executes an async function wrapped by the circuit breaker.
    ///
    /// Dropping the returned future before it completes records a failure.
    pub async fn call_async<T, F, Fut>(&self, token: &CancellationToken, f: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error<E>>>,
    {
        let permit = self.admit(token)?;
        let result = f().await;
        permit.report(&result);
        result
    }

    /// Cancellation check followed by admission.
    pub(crate) fn admit(&self, token: &CancellationToken) -> Result<Permit<E>, Error<E>> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.allow().map_err(Error::Rejected)
    }

    /// Exclude first, then success, everything else is a failure.
    fn classify<T>(&self, result: &Result<T, Error<E>>) -> Outcome {
        let err = match result {
            Ok(_) => return Outcome::Success,
            Err(err) => err,
        };

        let config = &self.inner.config;
        if let Some(policy) = &config.exclude_policy {
            if policy.is_excluded(err) {
                return Outcome::Excluded;
            }
        }
        if let Some(policy) = &config.success_policy {
            if policy.is_successful(err) {
                return Outcome::Success;
            }
        }

        Outcome::Failure
    }

    fn record(&self, generation: u64, outcome: Outcome) {
        let now = Instant::now();
        let trip = self.inner.config.trip_policy.as_ref();
        self.with_machine(|m| m.record(generation, outcome, trip, now));
    }

    /// Runs `f` under the lock, then notifies outside of it.
    fn with_machine<R>(&self, f: impl FnOnce(&mut StateMachine) -> R) -> R {
        let (result, transitions) = {
            let mut machine = self.inner.machine.lock();
            let result = f(&mut machine);
            (result, machine.take_transitions())
        };

        if !transitions.is_empty() {
            self.notify(transitions);
        }

        result
    }

    fn notify(&self, transitions: SmallVec<[Transition; 4]>) {
        let name = &self.inner.config.name;
        for Transition { from, to } in transitions {
            if to == State::Open {
                warn!(breaker = %name, from = %from, to = %to, "circuit breaker opened");
            } else {
                info!(breaker = %name, from = %from, to = %to, "circuit breaker state changed");
            }

            self.inner.config.hooks.dispatch(StateChange {
                name: Arc::clone(name),
                from,
                to,
            });
        }
    }
}

/// Executes `f` through `breaker`, returning its value.
pub fn execute<E: 'static, T, F>(token: &CancellationToken, breaker: &Breaker<E>, f: F) -> Result<T, Error<E>>
where
    F: FnOnce() -> Result<T, Error<E>>,
{
    breaker.call(token, f)
}

// Allow cloning of circuit breakers - cheap because inner state is Arc'd
impl<E> Clone for Breaker<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> fmt::Debug for Breaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Admission granted by [`Breaker::allow`].
///
/// Report the outcome exactly once with [`Permit::report`]. A permit dropped
/// without a report (for example while a panic unwinds, or when the future
/// holding it is dropped) is recorded as a failure, so a half-open probe
/// slot is always given back.
#[must_use = "an unreported permit is recorded as a failure when dropped"]
pub struct Permit<E: 'static> {
    breaker: Breaker<E>,
    generation: u64,
    reported: bool,
}

impl<E: 'static> Permit<E> {
    /// Records the outcome of the admitted work.
    ///
    /// Errors are classified through the breaker's exclude and success
    /// policies; `result` itself is left untouched.
    pub fn report<T>(mut self, result: &Result<T, Error<E>>) {
        let outcome = self.breaker.classify(result);
        self.finish(outcome);
    }

    /// Records a failure without classification.
    pub fn failure(mut self) {
        self.finish(Outcome::Failure);
    }

    fn finish(&mut self, outcome: Outcome) {
        self.reported = true;
        self.breaker.record(self.generation, outcome);
    }
}

impl<E: 'static> Drop for Permit<E> {
    fn drop(&mut self) {
        if !self.reported {
            debug!(breaker = %self.breaker.name(), "permit dropped without a report, recording failure");
            self.finish(Outcome::Failure);
        }
    }
}

impl<E: 'static> fmt::Debug for Permit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("breaker", &self.breaker.name())
            .field("generation", &self.generation)
            .finish()
    }
}
