//! Error types for breaker, retry and composition operations.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use thiserror::Error;

use crate::state::State;

/// Result type for guarded operations.
pub type BreakerResult<T, E> = Result<T, Error<E>>;

/// Why a breaker refused to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// The breaker is open.
    Open,

    /// The breaker is half-open and all probe slots are taken.
    TooManyRequests,
}

impl Rejection {
    /// The state a breaker must have been in to produce this rejection.
    pub fn state(&self) -> State {
        match self {
            Rejection::Open => State::Open,
            Rejection::TooManyRequests => State::HalfOpen,
        }
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Open => write!(f, "circuit breaker is open"),
            Rejection::TooManyRequests => write!(f, "too many requests"),
        }
    }
}

/// A call rejected by a breaker without being executed.
///
/// The recorded [`State`] comes from the rejection itself, not from a later
/// look at the breaker, so it stays correct when the breaker moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{name}' ({state}): {reason}")]
pub struct BreakerError {
    name: Arc<str>,
    reason: Rejection,
    state: State,
}

impl BreakerError {
    pub(crate) fn new(name: Arc<str>, reason: Rejection) -> Self {
        Self {
            name,
            state: reason.state(),
            reason,
        }
    }

    /// Name of the breaker that rejected the call.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rejection condition.
    pub fn reason(&self) -> Rejection {
        self.reason
    }

    /// State of the breaker when it rejected the call.
    pub fn state(&self) -> State {
        self.state
    }

    /// Breaker rejections are never worth retrying.
    pub fn retryable(&self) -> bool {
        false
    }
}

/// Error type for guarded operations.
///
/// Business closures return `Result<T, Error<E>>`. A plain `E` converts into
/// [`Error::Operation`] through `?`; use [`Error::permanent`] or
/// [`Error::temporary`] to override the default retry classification.
#[derive(Debug, Clone, Error)]
pub enum Error<E> {
    /// A breaker refused the call.
    #[error(transparent)]
    Rejected(BreakerError),

    /// The cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation failed; retryable by default.
    #[error("operation failed: {0}")]
    Operation(#[source] E),

    /// The operation failed and must not be retried.
    #[error("operation failed permanently: {0}")]
    Permanent(#[source] E),

    /// The operation failed and should be retried.
    #[error("operation failed temporarily: {0}")]
    Temporary(#[source] E),
}

impl<E> Error<E> {
    /// Marks `err` as not retryable.
    pub fn permanent(err: E) -> Self {
        Error::Permanent(err)
    }

    /// Marks `err` as retryable.
    pub fn temporary(err: E) -> Self {
        Error::Temporary(err)
    }

    /// Returns `true` if a breaker rejected the call because it was open.
    pub fn is_open(&self) -> bool {
        matches!(self, Error::Rejected(e) if e.reason() == Rejection::Open)
    }

    /// Returns `true` if a half-open breaker had no probe slot left.
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, Error::Rejected(e) if e.reason() == Rejection::TooManyRequests)
    }

    /// Returns `true` for any breaker rejection.
    pub fn is_breaker_error(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }

    /// Returns `true` if the cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns `true` if the error was explicitly marked permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Permanent(_))
    }

    /// Retry classification shared by every retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Operation(_) | Error::Temporary(_) => true,
            Error::Permanent(_) | Error::Rejected(_) | Error::Cancelled => false,
        }
    }

    /// The breaker rejection, if this is one.
    pub fn breaker_error(&self) -> Option<&BreakerError> {
        match self {
            Error::Rejected(e) => Some(e),
            _ => None,
        }
    }

    /// The business error, whatever its marker.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Error::Operation(e) | Error::Permanent(e) | Error::Temporary(e) => Some(e),
            Error::Rejected(_) | Error::Cancelled => None,
        }
    }

    /// Consumes the error and returns the business error, whatever its marker.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Error::Operation(e) | Error::Permanent(e) | Error::Temporary(e) => Some(e),
            Error::Rejected(_) | Error::Cancelled => None,
        }
    }
}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Error::Operation(err)
    }
}

/// Invalid configuration reported by the builders.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A breaker needs a trip policy.
    #[error("circuit breaker '{0}' has no trip policy")]
    MissingTripPolicy(String),

    /// A retryer needs a retry policy.
    #[error("retryer has no retry policy")]
    MissingRetryPolicy,
}
