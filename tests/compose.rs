use futures::FutureExt;
use resilience_rs::{
    on_operation_error, Breaker, BreakerRetryer, ConsecutiveFailures, Error, FixedRetry, Never,
    NeverRetry, NoBackoff, RetryThenBreak, Retryer, State,
};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
struct TestError(String);

impl TestError {
    fn new(msg: &str) -> Self {
        TestError(msg.to_string())
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test error: {}", self.0)
    }
}

impl std::error::Error for TestError {}

fn breaker(threshold: u64) -> Breaker<TestError> {
    Breaker::builder("compose")
        .trip_policy(ConsecutiveFailures::new(threshold))
        .timeout(Duration::from_secs(3600))
        .build()
        .unwrap()
}

async fn always_fails(calls: &AtomicU32) -> Result<(), Error<TestError>> {
    calls.fetch_add(1, Ordering::SeqCst);
    Err(TestError::new("down").into())
}

async fn flaky(calls: &AtomicU32, failures: u32) -> Result<u32, Error<TestError>> {
    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt <= failures {
        Err(TestError::new("transient").into())
    } else {
        Ok(attempt)
    }
}

#[tokio::test]
async fn test_breaker_retryer_stops_when_breaker_trips() {
    let template = breaker(1);
    let composite = BreakerRetryer::new(&template, Retryer::new(FixedRetry::new(5), NoBackoff));
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let err = composite
        .run_with_retry(&token, |_| always_fails(&calls))
        .await
        .unwrap_err();

    assert!(err.is_open());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(composite.state(), State::Open);

    // The breaker handed in is only a configuration template.
    assert_eq!(template.state(), State::Closed);
    assert_eq!(template.counts(), Default::default());
}

#[tokio::test]
async fn test_breaker_retryer_records_every_attempt() {
    let composite = BreakerRetryer::new(&breaker(3), Retryer::new(FixedRetry::new(5), NoBackoff));
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let value = composite
        .run_with_retry(&token, |_| flaky(&calls, 2))
        .await
        .unwrap();
    assert_eq!(value, 3);

    let counts = composite.counts();
    assert_eq!(counts.requests, 3);
    assert_eq!(counts.total_failures, 2);
    assert_eq!(counts.total_successes, 1);
    assert_eq!(composite.state(), State::Closed);
}

#[tokio::test]
async fn test_breaker_retryer_honours_cancellation() {
    let composite = BreakerRetryer::new(&breaker(1), Retryer::new(FixedRetry::new(5), NoBackoff));
    let token = CancellationToken::new();
    token.cancel();
    let calls = AtomicU32::new(0);

    let err = composite
        .run_with_retry(&token, |_| flaky(&calls, 0))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(composite.counts().requests, 0);
}

#[tokio::test]
async fn test_retry_then_break_records_once() {
    let composite = RetryThenBreak::new(&breaker(5), Retryer::new(FixedRetry::new(3), NoBackoff));
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let err = composite
        .run(&token, |_| always_fails(&calls))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Operation(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let counts = composite.counts();
    assert_eq!(counts.requests, 1);
    assert_eq!(counts.total_failures, 1);
}

#[tokio::test]
async fn test_retry_then_break_fails_fast_when_open() {
    let composite = RetryThenBreak::new(&breaker(1), Retryer::new(FixedRetry::new(3), NoBackoff));
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let _ = composite.run(&token, |_| always_fails(&calls)).await;
    assert_eq!(composite.state(), State::Open);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let err = composite
        .run(&token, |_| flaky(&calls, 0))
        .await
        .unwrap_err();
    assert!(err.is_open());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_then_break_records_panic_and_resumes_it() {
    let template = Breaker::<TestError>::builder("panic")
        .trip_policy(Never)
        .build()
        .unwrap();
    let composite = RetryThenBreak::new(&template, Retryer::new(FixedRetry::new(3), NoBackoff));
    let token = CancellationToken::new();

    let outcome = AssertUnwindSafe(composite.run(&token, |_| async {
        if true {
            panic!("boom");
        }
        Ok::<(), Error<TestError>>(())
    }))
    .catch_unwind()
    .await;

    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    assert_eq!(composite.counts().total_failures, 1);
    assert_eq!(composite.state(), State::Closed);
}

#[tokio::test]
async fn test_retry_then_break_applies_exclusion_to_final_outcome() {
    let template = Breaker::<TestError>::builder("exclude")
        .trip_policy(ConsecutiveFailures::new(1))
        .exclude_policy(on_operation_error(|e: &TestError| e.0 == "down"))
        .build()
        .unwrap();
    let composite = RetryThenBreak::new(&template, Retryer::new(FixedRetry::new(2), NoBackoff));
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let err = composite
        .run(&token, |_| always_fails(&calls))
        .await
        .unwrap_err();
    assert_eq!(err.into_operation_error(), Some(TestError::new("down")));
    assert_eq!(composite.counts().requests, 0);
    assert_eq!(composite.state(), State::Closed);
}

#[tokio::test]
async fn test_retry_then_break_applies_success_policy_to_final_outcome() {
    let template = Breaker::<TestError>::builder("success")
        .trip_policy(ConsecutiveFailures::new(1))
        .success_policy(|err: &Error<TestError>| err.is_permanent())
        .build()
        .unwrap();
    let composite = RetryThenBreak::new(&template, Retryer::new(FixedRetry::new(3), NoBackoff));
    let token = CancellationToken::new();

    let err = composite
        .run(&token, |_| async {
            Err::<(), _>(Error::permanent(TestError::new("rejected input")))
        })
        .await
        .unwrap_err();
    assert!(err.is_permanent());
    assert_eq!(composite.counts().total_successes, 1);
    assert_eq!(composite.state(), State::Closed);
}

#[tokio::test]
async fn test_retry_then_break_cancellation_is_recorded_as_failure() {
    let composite = RetryThenBreak::new(&breaker(5), Retryer::new(FixedRetry::new(3), NoBackoff));
    let token = CancellationToken::new();

    let err = composite
        .run(&token, |attempt_token| {
            attempt_token.cancel();
            async { Err::<(), _>(Error::Operation(TestError::new("late"))) }
        })
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(composite.counts().total_failures, 1);
}

#[tokio::test]
async fn test_composite_transitions_reach_template_hooks() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let template = Breaker::<TestError>::builder("orders")
        .trip_policy(ConsecutiveFailures::new(1))
        .timeout(Duration::from_secs(3600))
        .on_state_change(move |change| {
            let _ = tx.send((change.name.to_string(), change.from, change.to));
        })
        .build()
        .unwrap();
    let composite = RetryThenBreak::new(&template, Retryer::new(NeverRetry, NoBackoff));
    let token = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let _ = composite.run(&token, |_| always_fails(&calls)).await;

    let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, ("orders".to_string(), State::Closed, State::Open));
    assert_eq!(composite.breaker().name(), "orders");
    assert_eq!(template.state(), State::Closed);
}
