//! Retry-then-break example
//!
//! This example demonstrates:
//! 1. Building a breaker and a retryer
//! 2. Retrying inside one breaker admission with `RetryThenBreak`
//! 3. Letting the breaker see every attempt with `BreakerRetryer`
//! 4. Watching state changes through hooks

use resilience_rs::{
    Breaker, BreakerRetryer, ConsecutiveFailures, Error, Exponential, FixedRetry, HookRegistry,
    RetryThenBreak, Retryer,
};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl std::error::Error for ServiceError {}

// Fails the first `failures` calls, then recovers.
async fn external_service_call(
    calls: &AtomicU32,
    failures: u32,
) -> Result<String, Error<ServiceError>> {
    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
    if n <= failures {
        Err(ServiceError(format!("call {n} timed out")).into())
    } else {
        Ok(format!("response to call {n}"))
    }
}

#[tokio::main]
async fn main() {
    println!("=== Retry-then-break Example ===\n");

    let hooks = HookRegistry::new();
    hooks.set_on_state_change(|change| {
        println!("  [hook] {}: {} -> {}", change.name, change.from, change.to)
    });

    let breaker = Breaker::<ServiceError>::builder("inventory")
        .trip_policy(ConsecutiveFailures::new(3))
        .timeout(Duration::from_millis(500))
        .hooks(hooks)
        .build()
        .expect("trip policy is set");

    let retryer = Retryer::builder()
        .policy(FixedRetry::new(4))
        .backoff(Exponential::new(
            Duration::from_millis(20),
            Duration::from_millis(200),
            2.0,
            0.1,
        ))
        .on_retry(|attempt, err: &Error<ServiceError>, delay| {
            println!("  retry #{attempt} after {delay:?}: {err}")
        })
        .build()
        .expect("retry policy is set");

    let token = CancellationToken::new();

    println!("1. RetryThenBreak: three failures absorbed by one admission");
    let composite = RetryThenBreak::new(&breaker, retryer.clone());
    let calls = AtomicU32::new(0);
    match composite.run(&token, |_| external_service_call(&calls, 3)).await {
        Ok(body) => println!("  ok: {body}"),
        Err(err) => println!("  failed: {err}"),
    }
    println!("  state: {}, counts: {:?}\n", composite.state(), composite.counts());

    println!("2. BreakerRetryer: the same failures trip the breaker mid-sequence");
    let composite = BreakerRetryer::new(&breaker, retryer);
    let calls = AtomicU32::new(0);
    match composite
        .run_with_retry(&token, |_| external_service_call(&calls, 3))
        .await
    {
        Ok(body) => println!("  ok: {body}"),
        Err(err) if err.is_open() => println!("  stopped by the breaker: {err}"),
        Err(err) => println!("  failed: {err}"),
    }
    println!("  state: {}, attempts made: {}\n", composite.state(), calls.load(Ordering::SeqCst));

    println!("3. Waiting for the breaker timeout");
    tokio::time::sleep(Duration::from_millis(600)).await;
    let calls = AtomicU32::new(0);
    match composite
        .run_with_retry(&token, |_| external_service_call(&calls, 0))
        .await
    {
        Ok(body) => println!("  probe ok: {body}"),
        Err(err) => println!("  probe failed: {err}"),
    }
    println!("  state: {}", composite.state());

    // Give the hook threads a moment to print.
    tokio::time::sleep(Duration::from_millis(50)).await;
}
