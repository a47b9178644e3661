//! Configuration for circuit breakers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::breaker::Breaker;
use crate::error::ConfigError;
use crate::hook::{HookRegistry, StateChange};
use crate::policy::{ExcludePolicy, SuccessPolicy, TripPolicy};

/// Open-state timeout used when none (or zero) is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable configuration of a breaker.
///
/// Cloning is cheap; policies and hooks are shared. A clone handed to
/// [`Breaker::with_config`] yields a breaker with its own state.
pub struct BreakerConfig<E> {
    pub(crate) name: Arc<str>,
    pub(crate) timeout: Duration,
    pub(crate) max_half_open_requests: u32,
    pub(crate) half_open_successes: u32,
    pub(crate) interval: Duration,
    pub(crate) bucket_period: Duration,
    pub(crate) trip_policy: Arc<dyn TripPolicy>,
    pub(crate) success_policy: Option<Arc<dyn SuccessPolicy<E>>>,
    pub(crate) exclude_policy: Option<Arc<dyn ExcludePolicy<E>>>,
    pub(crate) hooks: Arc<HookRegistry>,
}

impl<E> BreakerConfig<E> {
    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How long the breaker stays open before probing.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Concurrent probes allowed while half-open.
    pub fn max_half_open_requests(&self) -> u32 {
        self.max_half_open_requests
    }

    /// Consecutive probe successes needed to close again.
    pub fn half_open_successes(&self) -> u32 {
        self.half_open_successes
    }

    /// Closed-state counting window, zero when counts never reset.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Bucket length of a rolling window, zero for a fixed window.
    pub fn bucket_period(&self) -> Duration {
        self.bucket_period
    }
}

impl<E> Clone for BreakerConfig<E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            timeout: self.timeout,
            max_half_open_requests: self.max_half_open_requests,
            half_open_successes: self.half_open_successes,
            interval: self.interval,
            bucket_period: self.bucket_period,
            trip_policy: Arc::clone(&self.trip_policy),
            success_policy: self.success_policy.clone(),
            exclude_policy: self.exclude_policy.clone(),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<E> fmt::Debug for BreakerConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("max_half_open_requests", &self.max_half_open_requests)
            .field("half_open_successes", &self.half_open_successes)
            .field("interval", &self.interval)
            .field("bucket_period", &self.bucket_period)
            .field("success_policy", &self.success_policy.is_some())
            .field("exclude_policy", &self.exclude_policy.is_some())
            .finish()
    }
}

/// Builder for creating circuit breakers with custom configurations.
pub struct BreakerBuilder<E> {
    name: String,
    timeout: Duration,
    max_half_open_requests: u32,
    half_open_successes: u32,
    interval: Duration,
    bucket_period: Duration,
    trip_policy: Option<Arc<dyn TripPolicy>>,
    success_policy: Option<Arc<dyn SuccessPolicy<E>>>,
    exclude_policy: Option<Arc<dyn ExcludePolicy<E>>>,
    hooks: HookRegistry,
}

impl<E: 'static> BreakerBuilder<E> {
    /// Creates a new builder with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: DEFAULT_TIMEOUT,
            max_half_open_requests: 1,
            half_open_successes: 1,
            interval: Duration::ZERO,
            bucket_period: Duration::ZERO,
            trip_policy: None,
            success_policy: None,
            exclude_policy: None,
            hooks: HookRegistry::new(),
        }
    }

    /// Sets how long the breaker stays open before admitting a probe.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Sets the number of concurrent probes allowed while half-open.
    pub fn max_half_open_requests(mut self, max: u32) -> Self {
        self.max_half_open_requests = max;
        self
    }

    /// Sets the number of consecutive probe successes required to close.
    pub fn half_open_successes(mut self, count: u32) -> Self {
        self.half_open_successes = count;
        self
    }

    /// Resets closed-state counts every `interval`.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Splits `interval` into buckets that expire one by one.
    pub fn bucket_period(mut self, period: Duration) -> Self {
        self.bucket_period = period;
        self
    }

    /// Sets the policy that decides when to open.
    pub fn trip_policy<P: TripPolicy>(mut self, policy: P) -> Self {
        self.trip_policy = Some(Arc::new(policy));
        self
    }

    /// Sets a policy that can count some errors as successes.
    pub fn success_policy<P: SuccessPolicy<E>>(mut self, policy: P) -> Self {
        self.success_policy = Some(Arc::new(policy));
        self
    }

    /// Sets a policy that removes some errors from accounting.
    pub fn exclude_policy<P: ExcludePolicy<E>>(mut self, policy: P) -> Self {
        self.exclude_policy = Some(Arc::new(policy));
        self
    }

    /// Adds the hooks set in `hooks`.
    ///
    /// Hooks already registered on the builder (for example through
    /// [`on_state_change`](Self::on_state_change)) are kept unless `hooks`
    /// sets the same slot, in which case the later one wins.
    pub fn hooks(self, hooks: HookRegistry) -> Self {
        self.hooks.absorb(hooks);
        self
    }

    /// Sets the hook called on every state change.
    pub fn on_state_change<F>(self, f: F) -> Self
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.hooks.set_on_state_change(f);
        self
    }

    /// Validates the settings and builds the configuration.
    pub fn build_config(self) -> Result<BreakerConfig<E>, ConfigError> {
        let trip_policy = self
            .trip_policy
            .ok_or_else(|| ConfigError::MissingTripPolicy(self.name.clone()))?;

        let mut bucket_period = self.bucket_period;
        if !bucket_period.is_zero() {
            if self.interval.is_zero() {
                warn!(
                    breaker = %self.name,
                    bucket_period = ?bucket_period,
                    "bucket period has no effect without an interval"
                );
                bucket_period = Duration::ZERO;
            } else if bucket_period > self.interval {
                warn!(
                    breaker = %self.name,
                    bucket_period = ?bucket_period,
                    interval = ?self.interval,
                    "bucket period exceeds interval, using a fixed window"
                );
                bucket_period = Duration::ZERO;
            }
        }

        let timeout = if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        };

        Ok(BreakerConfig {
            name: Arc::from(self.name),
            timeout,
            max_half_open_requests: self.max_half_open_requests.max(1),
            half_open_successes: self.half_open_successes.max(1),
            interval: self.interval,
            bucket_period,
            trip_policy,
            success_policy: self.success_policy,
            exclude_policy: self.exclude_policy,
            hooks: Arc::new(self.hooks),
        })
    }

    /// Builds a new circuit breaker with the configured settings.
    pub fn build(self) -> Result<Breaker<E>, ConfigError> {
        self.build_config().map(Breaker::with_config)
    }
}
