//! # resilience-rs
//!
//! Retry-with-backoff and circuit breaking, and the two ways of composing them.
//!
//! ## The Circuit Breaker
//!
//! A [`Breaker`] guards calls to a dependency and operates in three states:
//!
//! - **Closed**: Normal operation. Calls pass through and their outcomes are
//!   counted; a [`TripPolicy`] decides from the [`Counts`] when to open.
//! - **Open**: Calls are immediately rejected without attempting to reach the resource.
//! - **Half-Open**: After the timeout, a limited number of concurrent probes is
//!   admitted. One failure re-opens the breaker, enough successes close it.
//!
//! Outcomes are classified exclude-first: an [`ExcludePolicy`] can remove an
//! error from all accounting, then a [`SuccessPolicy`] can count it as a success.
//! State changes are reported to a [`HookRegistry`] off the calling thread.
//!
//! ## Basic Usage
//!
//! ```rust
//! use resilience_rs::{Breaker, ConsecutiveFailures, Error};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! struct ServiceError(String);
//!
//! let breaker = Breaker::<ServiceError>::builder("inventory")
//!     .trip_policy(ConsecutiveFailures::new(5))
//!     .timeout(Duration::from_secs(30))
//!     .build()
//!     .expect("trip policy is set");
//!
//! let token = CancellationToken::new();
//! match breaker.call(&token, || Ok::<_, Error<ServiceError>>("stock: 42".to_string())) {
//!     Ok(body) => println!("call succeeded: {body}"),
//!     Err(err) if err.is_breaker_error() => println!("rejected: {err:?}"),
//!     Err(err) => println!("call failed: {err:?}"),
//! }
//! ```
//!
//! ## Retries
//!
//! A [`Retryer`] pairs a [`RetryPolicy`] with a [`BackoffPolicy`]. The free
//! function [`retry`] runs the same loop without building one. Both stop as
//! soon as the [`CancellationToken`](tokio_util::sync::CancellationToken)
//! fires and then return [`Error::Cancelled`].
//!
//! ```rust,no_run
//! use resilience_rs::{Error, Exponential, FixedRetry, Retryer};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), Error<std::io::Error>> {
//! let retryer = Retryer::new(
//!     FixedRetry::new(3),
//!     Exponential::new(Duration::from_millis(100), Duration::from_secs(2), 2.0, 0.2),
//! );
//! let token = CancellationToken::new();
//! let body = retryer
//!     .run(&token, |_token| async { Ok::<_, Error<std::io::Error>>("ok") })
//!     .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```
//!
//! ## Composition
//!
//! - [`BreakerRetryer`] sends every attempt through the breaker, so a burst of
//!   failures can trip it mid-sequence and stop the retries.
//! - [`RetryThenBreak`] admits once, retries without touching the breaker, and
//!   records only the final outcome (panics included).

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod backoff;
mod breaker;
mod compose;
mod config;
mod counts;
mod error;
mod hook;
mod policy;
pub mod prelude;
mod retry;
mod state;

// Re-exports
pub use backoff::{BackoffPolicy, Exponential, Fixed, Linear, NoBackoff};
pub use breaker::{execute, Breaker, Permit};
pub use compose::{BreakerRetryer, RetryThenBreak};
pub use config::{BreakerBuilder, BreakerConfig, DEFAULT_TIMEOUT};
pub use counts::Counts;
pub use error::{BreakerError, BreakerResult, ConfigError, Error, Rejection};
pub use hook::{HookRegistry, StateChange};
pub use policy::{
    on_operation_error, Always, Composite, ConsecutiveFailures, ExcludePolicy, FailureCount,
    FailureRatio, Never, SlowCallRatio, SuccessPolicy, TripPolicy,
};
pub use retry::{retry, AlwaysRetry, FixedRetry, NeverRetry, RetryBuilder, RetryPolicy, Retryer};
pub use state::State;
