//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use resilience_rs::prelude::*;
//! ```

pub use crate::backoff::{BackoffPolicy, Exponential, Fixed, Linear, NoBackoff};
pub use crate::breaker::{Breaker, Permit};
pub use crate::compose::{BreakerRetryer, RetryThenBreak};
pub use crate::counts::Counts;
pub use crate::error::{BreakerError, Error};
pub use crate::policy::{ConsecutiveFailures, FailureCount, FailureRatio, TripPolicy};
pub use crate::retry::{AlwaysRetry, FixedRetry, NeverRetry, RetryPolicy, Retryer};
pub use crate::state::State;
