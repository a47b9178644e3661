//! Request counters and the closed-state counting window.

use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// Counters a breaker keeps for the current window.
///
/// Requests only counts calls whose outcome was recorded; excluded outcomes
/// and rejected calls never show up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Recorded calls in the current window.
    pub requests: u64,
    /// Successful calls in the current window.
    pub total_successes: u64,
    /// Failed calls in the current window.
    pub total_failures: u64,
    /// Successes since the last failure.
    pub consecutive_successes: u64,
    /// Failures since the last success.
    pub consecutive_failures: u64,
}

impl Counts {
    /// Share of recorded calls that failed, `0.0` when nothing was recorded.
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }

        self.total_failures as f64 / self.requests as f64
    }

    pub(crate) fn on_success(&mut self) {
        self.requests += 1;
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    pub(crate) fn on_failure(&mut self) {
        self.requests += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn forget(&mut self, bucket: &Bucket) {
        self.requests = self.requests.saturating_sub(bucket.successes + bucket.failures);
        self.total_successes = self.total_successes.saturating_sub(bucket.successes);
        self.total_failures = self.total_failures.saturating_sub(bucket.failures);

        // A run is always a suffix of the recorded calls and buckets expire
        // oldest first, so what is left of the run is bounded by what is left.
        self.consecutive_successes = self.consecutive_successes.min(self.requests);
        self.consecutive_failures = self.consecutive_failures.min(self.requests);
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    successes: u64,
    failures: u64,
}

#[derive(Debug)]
enum Mode {
    /// Counts only reset on state transitions.
    Unbounded,
    /// Counts reset all at once every `interval`.
    Fixed { interval: Duration, expiry: Instant },
    /// Counts phase out one bucket at a time.
    Rolling {
        interval: Duration,
        bucket_period: Duration,
        buckets: SmallVec<[Bucket; 16]>,
    },
}

/// The counting window used while the breaker is closed.
#[derive(Debug)]
pub(crate) struct Window {
    counts: Counts,
    mode: Mode,
}

impl Window {
    /// `bucket_period` is ignored unless it subdivides a non-zero `interval`.
    pub fn new(interval: Duration, bucket_period: Duration) -> Self {
        let now = Instant::now();
        let mode = if interval.is_zero() {
            Mode::Unbounded
        } else if bucket_period.is_zero() || bucket_period > interval {
            Mode::Fixed {
                interval,
                expiry: now + interval,
            }
        } else {
            Mode::Rolling {
                interval,
                bucket_period,
                buckets: SmallVec::new(),
            }
        };

        Self {
            counts: Counts::default(),
            mode,
        }
    }

    pub fn counts(&self) -> &Counts {
        &self.counts
    }

    /// Clears all counters and starts a new window at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.counts = Counts::default();
        match &mut self.mode {
            Mode::Unbounded => {}
            Mode::Fixed { interval, expiry } => *expiry = now + *interval,
            Mode::Rolling { buckets, .. } => buckets.clear(),
        }
    }

    /// Expires old data. Returns `true` when a fixed window was reset wholesale.
    pub fn roll(&mut self, now: Instant) -> bool {
        match &mut self.mode {
            Mode::Unbounded => false,
            Mode::Fixed { expiry, .. } => {
                if now < *expiry {
                    return false;
                }
                self.reset(now);
                true
            }
            Mode::Rolling {
                interval, buckets, ..
            } => {
                while let Some(bucket) = buckets.first() {
                    if now.saturating_duration_since(bucket.start) >= *interval {
                        let expired = buckets.remove(0);
                        self.counts.forget(&expired);
                    } else {
                        break;
                    }
                }
                false
            }
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        self.counts.on_success();
        if let Some(bucket) = self.current_bucket(now) {
            bucket.successes += 1;
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.counts.on_failure();
        if let Some(bucket) = self.current_bucket(now) {
            bucket.failures += 1;
        }
    }

    fn current_bucket(&mut self, now: Instant) -> Option<&mut Bucket> {
        let Mode::Rolling {
            bucket_period,
            buckets,
            ..
        } = &mut self.mode
        else {
            return None;
        };

        let fresh = match buckets.last() {
            Some(bucket) => now.saturating_duration_since(bucket.start) >= *bucket_period,
            None => true,
        };
        if fresh {
            buckets.push(Bucket {
                start: now,
                successes: 0,
                failures: 0,
            });
        }

        buckets.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_ratio_guards_empty_counts() {
        assert_eq!(Counts::default().failure_ratio(), 0.0);

        let mut counts = Counts::default();
        counts.on_failure();
        counts.on_success();
        counts.on_success();
        counts.on_failure();
        assert_eq!(counts.failure_ratio(), 0.5);
        assert_eq!(counts.consecutive_failures, 1);
        assert_eq!(counts.consecutive_successes, 0);
    }

    #[test]
    fn fixed_window_resets_at_expiry() {
        let start = Instant::now();
        let mut window = Window::new(Duration::from_secs(10), Duration::ZERO);
        window.reset(start);

        window.record_failure(start);
        window.record_failure(start + Duration::from_secs(5));
        assert!(!window.roll(start + Duration::from_secs(9)));
        assert_eq!(window.counts().total_failures, 2);

        assert!(window.roll(start + Duration::from_secs(10)));
        assert_eq!(*window.counts(), Counts::default());
    }

    #[test]
    fn rolling_window_phases_out_per_bucket() {
        let start = Instant::now();
        let mut window = Window::new(Duration::from_secs(10), Duration::from_secs(2));
        window.reset(start);

        window.record_failure(start);
        window.record_failure(start + Duration::from_secs(1));
        window.record_success(start + Duration::from_secs(4));
        window.record_failure(start + Duration::from_secs(8));
        assert_eq!(window.counts().requests, 4);

        // Only the first bucket (two failures) has aged out.
        assert!(!window.roll(start + Duration::from_secs(11)));
        let counts = *window.counts();
        assert_eq!(counts.requests, 2);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(counts.total_successes, 1);
        assert_eq!(counts.consecutive_failures, 1);

        window.roll(start + Duration::from_secs(30));
        assert_eq!(*window.counts(), Counts::default());
    }

    #[test]
    fn rolling_window_shortens_consecutive_runs() {
        let start = Instant::now();
        let mut window = Window::new(Duration::from_secs(10), Duration::from_secs(2));
        window.reset(start);

        window.record_failure(start);
        window.record_failure(start + Duration::from_secs(1));
        window.record_failure(start + Duration::from_secs(4));
        assert_eq!(window.counts().consecutive_failures, 3);

        // The run spans both buckets; only the part in the live bucket remains.
        window.roll(start + Duration::from_secs(11));
        let counts = *window.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.consecutive_failures, 1);

        window.record_success(start + Duration::from_secs(12));
        window.roll(start + Duration::from_secs(15));
        let counts = *window.counts();
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.consecutive_successes, 1);
        assert_eq!(counts.consecutive_failures, 0);
    }

    #[test]
    fn bucket_longer_than_interval_falls_back_to_fixed() {
        let start = Instant::now();
        let mut window = Window::new(Duration::from_secs(1), Duration::from_secs(5));
        window.reset(start);
        window.record_failure(start);
        assert!(window.roll(start + Duration::from_secs(1)));
        assert_eq!(window.counts().requests, 0);
    }
}
