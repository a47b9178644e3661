//! Policy engine for circuit breaker trip decisions and outcome classification.

use std::sync::Arc;

use crate::counts::Counts;
use crate::error::Error;

/// Decides when a closed breaker should open.
///
/// Called with the current window's counts after every recorded outcome.
/// Implementations must be pure: the breaker calls them while holding its lock.
pub trait TripPolicy: Send + Sync + 'static {
    /// Returns `true` when the breaker should open.
    fn ready_to_trip(&self, counts: &Counts) -> bool;
}

impl<F> TripPolicy for F
where
    F: Fn(&Counts) -> bool + Send + Sync + 'static,
{
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        self(counts)
    }
}

/// Overrides the default "only `Ok` is a success" rule for errors.
pub trait SuccessPolicy<E>: Send + Sync + 'static {
    /// Returns `true` if `err` should be counted as a success.
    fn is_successful(&self, err: &Error<E>) -> bool;
}

impl<E, F> SuccessPolicy<E> for F
where
    F: Fn(&Error<E>) -> bool + Send + Sync + 'static,
{
    fn is_successful(&self, err: &Error<E>) -> bool {
        self(err)
    }
}

/// Removes an outcome from all accounting. Checked before [`SuccessPolicy`].
pub trait ExcludePolicy<E>: Send + Sync + 'static {
    /// Returns `true` if `err` should be neither a success nor a failure.
    fn is_excluded(&self, err: &Error<E>) -> bool;
}

impl<E, F> ExcludePolicy<E> for F
where
    F: Fn(&Error<E>) -> bool + Send + Sync + 'static,
{
    fn is_excluded(&self, err: &Error<E>) -> bool {
        self(err)
    }
}

/// Adapts a predicate over the business error into a success or exclude policy.
///
/// Breaker rejections and cancellations never match.
pub fn on_operation_error<E, F>(predicate: F) -> impl Fn(&Error<E>) -> bool + Send + Sync + 'static
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync + 'static,
{
    move |err: &Error<E>| err.operation_error().is_some_and(&predicate)
}

/// Trips after `threshold` failures in a row.
#[derive(Debug, Clone, Copy)]
pub struct ConsecutiveFailures {
    threshold: u64,
}

impl ConsecutiveFailures {
    /// Creates the policy. A threshold of zero is treated as one.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }
}

impl TripPolicy for ConsecutiveFailures {
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.consecutive_failures >= self.threshold
    }
}

/// Trips once the window holds `threshold` failures.
#[derive(Debug, Clone, Copy)]
pub struct FailureCount {
    threshold: u64,
}

impl FailureCount {
    /// Creates the policy. A threshold of zero is treated as one.
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }
}

impl TripPolicy for FailureCount {
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.total_failures >= self.threshold
    }
}

/// Trips when the failure ratio reaches `ratio` over at least `min_requests` calls.
#[derive(Debug, Clone, Copy)]
pub struct FailureRatio {
    ratio: f64,
    min_requests: u64,
}

impl FailureRatio {
    /// Creates the policy. `ratio` is clamped to `[0, 1]`; NaN becomes `1`.
    pub fn new(ratio: f64, min_requests: u64) -> Self {
        let ratio = if ratio.is_nan() { 1.0 } else { ratio.clamp(0.0, 1.0) };
        Self {
            ratio,
            min_requests,
        }
    }
}

impl TripPolicy for FailureRatio {
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.requests == 0 || counts.requests < self.min_requests {
            return false;
        }

        counts.failure_ratio() >= self.ratio
    }
}

/// Slow-call ratio policy.
///
/// This does not measure durations. Pair it with a [`SuccessPolicy`] (or an
/// operation that returns an error for slow calls) that marks slow calls as
/// failures; the ratio is then computed exactly like [`FailureRatio`].
pub type SlowCallRatio = FailureRatio;

/// Trips when any of its policies trips.
#[derive(Clone, Default)]
pub struct Composite {
    policies: Vec<Arc<dyn TripPolicy>>,
}

impl Composite {
    /// Creates a composite from a list of policies.
    pub fn new(policies: Vec<Arc<dyn TripPolicy>>) -> Self {
        Self { policies }
    }

    /// Adds a policy.
    pub fn with<P: TripPolicy>(mut self, policy: P) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Number of policies consulted.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if the composite holds no policy and can never trip.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl FromIterator<Option<Arc<dyn TripPolicy>>> for Composite {
    fn from_iter<I: IntoIterator<Item = Option<Arc<dyn TripPolicy>>>>(iter: I) -> Self {
        Self {
            policies: iter.into_iter().flatten().collect(),
        }
    }
}

impl TripPolicy for Composite {
    fn ready_to_trip(&self, counts: &Counts) -> bool {
        self.policies.iter().any(|p| p.ready_to_trip(counts))
    }
}

/// Never trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl TripPolicy for Never {
    fn ready_to_trip(&self, _counts: &Counts) -> bool {
        false
    }
}

/// Trips after the first recorded outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl TripPolicy for Always {
    fn ready_to_trip(&self, _counts: &Counts) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(successes: u64, failures: u64, consecutive_failures: u64) -> Counts {
        Counts {
            requests: successes + failures,
            total_successes: successes,
            total_failures: failures,
            consecutive_successes: 0,
            consecutive_failures,
        }
    }

    #[test]
    fn consecutive_failures_threshold() {
        let policy = ConsecutiveFailures::new(3);
        assert!(!policy.ready_to_trip(&counts(0, 2, 2)));
        assert!(policy.ready_to_trip(&counts(5, 3, 3)));
        assert!(ConsecutiveFailures::new(0).ready_to_trip(&counts(0, 1, 1)));
    }

    #[test]
    fn failure_count_ignores_interleaved_successes() {
        let policy = FailureCount::new(3);
        assert!(!policy.ready_to_trip(&counts(10, 2, 0)));
        assert!(policy.ready_to_trip(&counts(10, 3, 0)));
    }

    #[test]
    fn failure_ratio_requires_minimum_requests() {
        let policy = FailureRatio::new(0.5, 4);
        assert!(!policy.ready_to_trip(&Counts::default()));
        assert!(!policy.ready_to_trip(&counts(0, 3, 3)));
        assert!(policy.ready_to_trip(&counts(2, 2, 2)));
        assert!(!policy.ready_to_trip(&counts(3, 1, 1)));

        let zero_minimum = FailureRatio::new(0.0, 0);
        assert!(!zero_minimum.ready_to_trip(&Counts::default()));
    }

    #[test]
    fn composite_is_logical_or_and_drops_missing_policies() {
        let composite: Composite = vec![
            None,
            Some(Arc::new(FailureCount::new(10)) as Arc<dyn TripPolicy>),
            Some(Arc::new(ConsecutiveFailures::new(2)) as Arc<dyn TripPolicy>),
        ]
        .into_iter()
        .collect();

        assert_eq!(composite.len(), 2);
        assert!(!composite.ready_to_trip(&counts(4, 1, 1)));
        assert!(composite.ready_to_trip(&counts(4, 2, 2)));
        assert!(!Composite::default().ready_to_trip(&counts(0, 100, 100)));
    }

    #[test]
    fn closures_are_policies() {
        let policy = |c: &Counts| c.requests > 1;
        assert!(!policy.ready_to_trip(&counts(1, 0, 0)));
        assert!(Always.ready_to_trip(&Counts::default()));
        assert!(!Never.ready_to_trip(&counts(0, 100, 100)));
    }
}
