//! Backoff policies: how long to wait before the next attempt.

use std::time::Duration;

use rand::Rng;

/// Computes the wait before retrying.
///
/// `attempt` is the number of attempts already made (1-based). Values below
/// one are treated as one.
pub trait BackoffPolicy: Send + Sync + 'static {
    /// Delay to wait after `attempt` failed attempts.
    fn next_delay(&self, attempt: u32) -> Duration;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync + 'static,
{
    fn next_delay(&self, attempt: u32) -> Duration {
        self(attempt.max(1))
    }
}

/// Retries immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl BackoffPolicy for NoBackoff {
    fn next_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Waits the same delay every time.
#[derive(Debug, Clone, Copy)]
pub struct Fixed {
    delay: Duration,
}

impl Fixed {
    /// Creates a constant backoff.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffPolicy for Fixed {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// `initial * multiplier^(attempt - 1)`, perturbed by jitter and capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Default for Exponential {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30), 2.0, 0.0)
    }
}

impl Exponential {
    /// Creates an exponential backoff.
    ///
    /// `multiplier` below one (or NaN) is raised to one; `jitter` is clamped
    /// to `[0, 1]`, NaN meaning no jitter.
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        let multiplier = if multiplier.is_nan() { 1.0 } else { multiplier.max(1.0) };
        let jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        Self {
            initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Replaces the jitter factor.
    pub fn with_jitter(self, jitter: f64) -> Self {
        Self::new(self.initial, self.max, self.multiplier, jitter)
    }
}

impl BackoffPolicy for Exponential {
    fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = f64::from(attempt.max(1) - 1);
        let mut nanos = self.initial.as_nanos() as f64 * self.multiplier.powf(exponent);

        if self.jitter > 0.0 {
            let spread: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            nanos *= 1.0 + spread * self.jitter;
        }

        // inf * 0 yields NaN and NaN compares false against everything, so it
        // has to be caught explicitly or it would slip past the clamp.
        if nanos.is_nan() || nanos < 0.0 || nanos >= self.max.as_nanos() as f64 {
            return self.max;
        }

        Duration::from_nanos(nanos as u64)
    }
}

/// `initial + increment * (attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Linear {
    initial: Duration,
    increment: Duration,
    max: Duration,
}

impl Linear {
    /// Creates a linear backoff.
    pub fn new(initial: Duration, increment: Duration, max: Duration) -> Self {
        Self {
            initial,
            increment,
            max,
        }
    }
}

impl BackoffPolicy for Linear {
    fn next_delay(&self, attempt: u32) -> Duration {
        if self.initial >= self.max {
            return self.max;
        }

        let steps = attempt.max(1) - 1;
        if steps == 0 || self.increment.is_zero() {
            return self.initial;
        }

        // Divide before multiplying so a huge attempt count can never wrap.
        let headroom = self.max - self.initial;
        if u128::from(steps) > headroom.as_nanos() / self.increment.as_nanos() {
            return self.max;
        }

        self.initial + self.increment * steps
    }
}
