//! Circuit breaker state machine implementation.

use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::counts::{Counts, Window};
use crate::error::Rejection;
use crate::policy::TripPolicy;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed = 0,

    /// Circuit is open and operations are rejected.
    Open = 1,

    /// Circuit is allowing a limited number of operations to test recovery.
    HalfOpen = 2,
}

impl State {
    /// Lower-case name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded transition, dispatched to hooks once the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub from: State,
    pub to: State,
}

/// How a finished call is accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
    Excluded,
}

/// Static limits the machine needs to drive its transitions.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub timeout: Duration,
    pub max_half_open_requests: u32,
    pub half_open_successes: u32,
}

/// Mutable breaker state. Always accessed under the breaker's mutex; every
/// method takes `now` so transitions are a pure function of the inputs.
pub(crate) struct StateMachine {
    state: State,
    generation: u64,
    window: Window,
    opened_at: Instant,
    half_open_in_flight: u32,
    limits: Limits,
    pending: SmallVec<[Transition; 4]>,
}

impl StateMachine {
    pub fn new(limits: Limits, window: Window, now: Instant) -> Self {
        let mut machine = Self {
            state: State::Closed,
            generation: 0,
            window,
            opened_at: now,
            half_open_in_flight: 0,
            limits,
            pending: SmallVec::new(),
        };
        machine.window.reset(now);
        machine
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn counts(&self) -> Counts {
        *self.window.counts()
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Applies the transitions that only depend on elapsed time.
    pub fn refresh(&mut self, now: Instant) {
        match self.state {
            State::Closed => {
                if self.window.roll(now) {
                    self.generation = self.generation.wrapping_add(1);
                }
            }
            State::Open => {
                if now.saturating_duration_since(self.opened_at) >= self.limits.timeout {
                    self.transition(State::HalfOpen, now);
                }
            }
            State::HalfOpen => {}
        }
    }

    /// Admission check. Returns the generation the caller must report against.
    pub fn admit(&mut self, now: Instant) -> Result<u64, Rejection> {
        self.refresh(now);

        match self.state {
            State::Closed => Ok(self.generation),
            State::Open => Err(Rejection::Open),
            State::HalfOpen => {
                if self.half_open_in_flight >= self.limits.max_half_open_requests {
                    return Err(Rejection::TooManyRequests);
                }
                self.half_open_in_flight += 1;
                Ok(self.generation)
            }
        }
    }

    /// Records the outcome of an admitted call.
    pub fn record(&mut self, generation: u64, outcome: Outcome, trip: &dyn TripPolicy, now: Instant) {
        self.refresh(now);

        // The call belongs to a window or state that has already ended.
        if generation != self.generation {
            return;
        }

        if self.state == State::HalfOpen {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }

        match outcome {
            Outcome::Excluded => {}
            Outcome::Success => {
                self.window.record_success(now);
                match self.state {
                    State::Closed => {
                        if trip.ready_to_trip(self.window.counts()) {
                            self.transition(State::Open, now);
                        }
                    }
                    State::HalfOpen => {
                        let successes = self.window.counts().consecutive_successes;
                        if successes >= u64::from(self.limits.half_open_successes) {
                            self.transition(State::Closed, now);
                        }
                    }
                    State::Open => {}
                }
            }
            Outcome::Failure => {
                self.window.record_failure(now);
                match self.state {
                    State::Closed => {
                        if trip.ready_to_trip(self.window.counts()) {
                            self.transition(State::Open, now);
                        }
                    }
                    State::HalfOpen => self.transition(State::Open, now),
                    State::Open => {}
                }
            }
        }
    }

    /// Drains transitions recorded since the last call.
    pub fn take_transitions(&mut self) -> SmallVec<[Transition; 4]> {
        std::mem::take(&mut self.pending)
    }

    fn transition(&mut self, to: State, now: Instant) {
        let from = self.state;
        if from == to {
            return;
        }

        self.state = to;
        self.generation = self.generation.wrapping_add(1);
        self.half_open_in_flight = 0;
        self.window.reset(now);

        match to {
            State::Open => self.opened_at = now,
            State::HalfOpen => {
                // The caller that observed the expiry becomes the first probe.
            }
            State::Closed => {}
        }

        self.pending.push(Transition { from, to });
    }
}
