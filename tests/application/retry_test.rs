use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use invoice_copilot::application::ports::LlmClientError;
use invoice_copilot::application::services::{CallError, RetryPolicy};

fn policy(max_attempts: u32, call_timeout: Duration) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        call_timeout,
    }
}

#[tokio::test]
async fn given_transient_errors_when_calling_then_every_attempt_is_used() {
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let result: Result<(), _> = policy(3, Duration::from_secs(1))
        .call("flaky", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmClientError::RateLimited)
        })
        .await;

    let error = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(error.attempts(), 3);
    assert!(error.is_infrastructure());
}

#[tokio::test]
async fn given_permanent_error_when_calling_then_no_retry_happens() {
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let result: Result<(), _> = policy(3, Duration::from_secs(1))
        .call("broken", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LlmClientError::InvalidResponse("not json".to_string()))
        })
        .await;

    let error = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        error,
        CallError::Failed {
            operation: "broken",
            attempts: 1,
            ..
        }
    ));
    assert!(!error.is_infrastructure());
}

#[tokio::test]
async fn given_transient_then_success_when_calling_then_value_is_returned() {
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let result = policy(3, Duration::from_secs(1))
        .call("recovering", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LlmClientError::Timeout)
            } else {
                Ok("done")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn given_hung_call_when_calling_then_timed_out_is_reported() {
    let result: Result<(), CallError<LlmClientError>> = policy(2, Duration::from_millis(20))
        .call("hung", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

    assert!(matches!(
        result,
        Err(CallError::TimedOut {
            operation: "hung",
            attempts: 2
        })
    ));
}

#[tokio::test]
async fn given_repeated_failures_when_calling_then_backoff_doubles() {
    let started = Mutex::new(Vec::new());
    let log = &started;

    let _: Result<(), _> = policy(3, Duration::from_secs(1))
        .call("backoff", move || async move {
            log.lock().unwrap().push(Instant::now());
            Err(LlmClientError::RateLimited)
        })
        .await;

    let started = started.into_inner().unwrap();
    assert_eq!(started.len(), 3);
    assert!(started[1] - started[0] >= Duration::from_millis(20));
    assert!(started[2] - started[1] >= Duration::from_millis(40));
}

#[test]
fn given_no_retry_policy_when_built_then_single_attempt() {
    let policy = RetryPolicy::no_retry(Duration::from_secs(3));

    assert_eq!(policy.max_attempts, 1);
    assert_eq!(policy.call_timeout, Duration::from_secs(3));
}
