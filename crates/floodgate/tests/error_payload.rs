//! Overload payload shape and the observer callback.

use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use floodgate::{BackpressureConfig, Limiter, OVERLOAD_MESSAGE, OverloadError, RejectReason};
use futures::poll;
use serde_json::json;

#[tokio::test]
async fn json_rpc_object_is_bit_stable() {
    let limiter = Limiter::new(
        BackpressureConfig::new(2)
            .unwrap()
            .with_queue_size(4)
            .with_queue_timeout(Duration::from_secs(30)),
    );
    let _a = limiter.admit().await.unwrap();
    let _b = limiter.admit().await.unwrap();

    let mut parked = pin!(limiter.admit());
    assert!(poll!(parked.as_mut()).is_pending());

    // Fill the remaining queue slots, then overflow.
    let mut others = Vec::new();
    for _ in 0..3 {
        let mut fut = Box::pin(limiter.admit());
        assert!(poll!(fut.as_mut()).is_pending());
        others.push(fut);
    }

    let err = limiter.admit().await.unwrap_err();
    assert_eq!(
        err.to_json_rpc(),
        json!({
            "code": -32001,
            "message": "SERVER_OVERLOADED",
            "data": {
                "reason": "queue_full",
                "active": 2,
                "queued": 4,
                "max_concurrent": 2,
                "queue_size": 4,
                "queue_timeout_ms": 30000,
                "retry_after_ms": 1000,
            }
        })
    );
}

#[tokio::test]
async fn custom_code_and_retry_advisory_pass_through() {
    let limiter = Limiter::new(
        BackpressureConfig::new(1)
            .unwrap()
            .with_overload_code(-32099)
            .with_retry_after(Duration::from_millis(2500)),
    );
    let _held = limiter.admit().await.unwrap();

    let err = limiter.admit().await.unwrap_err();
    assert_eq!(err.code(), -32099);
    assert_eq!(err.retry_after_ms(), 2500);
    assert_eq!(err.to_json_rpc()["code"], json!(-32099));
    assert_eq!(err.to_json_rpc()["data"]["retry_after_ms"], json!(2500));
}

#[tokio::test]
async fn display_is_message_and_reason() {
    let limiter = Limiter::new(BackpressureConfig::new(1).unwrap());
    let _held = limiter.admit().await.unwrap();

    let err = limiter.admit().await.unwrap_err();
    assert_eq!(err.to_string(), "SERVER_OVERLOADED: concurrency_limit");
    assert_eq!(err.to_json_rpc()["message"], json!(OVERLOAD_MESSAGE));
}

#[tokio::test]
async fn observer_sees_every_rejection() {
    let seen: Arc<Mutex<Vec<OverloadError>>> = Arc::new(Mutex::new(Vec::new()));
    let limiter = Limiter::new(
        BackpressureConfig::new(1).unwrap().with_overload_observer({
            let seen = Arc::clone(&seen);
            move |err| seen.lock().unwrap().push(err.clone())
        }),
    );
    let _held = limiter.admit().await.unwrap();

    let first = limiter.admit().await.unwrap_err();
    let second = limiter.admit().await.unwrap_err();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].reason(), first.reason());
    assert_eq!(seen[1].reason(), second.reason());
    assert_eq!(seen[0].reason(), RejectReason::ConcurrencyLimit);
}

#[tokio::test]
async fn panicking_observer_is_contained() {
    let limiter = Limiter::new(
        BackpressureConfig::new(1)
            .unwrap()
            .with_overload_observer(|_| panic!("observer bug")),
    );
    let _held = limiter.admit().await.unwrap();

    // The structured rejection must come back, not the observer's panic.
    let err = limiter.admit().await.unwrap_err();
    assert_eq!(err.reason(), RejectReason::ConcurrencyLimit);

    // And the limiter keeps working afterwards.
    let err = limiter.admit().await.unwrap_err();
    assert_eq!(err.reason(), RejectReason::ConcurrencyLimit);
    assert_eq!(limiter.metrics().rejected_concurrency_limit, 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_payload_reflects_departure_instant() {
    let limiter = Limiter::new(
        BackpressureConfig::new(1)
            .unwrap()
            .with_queue_size(2)
            .with_queue_timeout(Duration::from_millis(40)),
    );
    let _held = limiter.admit().await.unwrap();

    let err = limiter.admit().await.unwrap_err();
    assert_eq!(err.reason(), RejectReason::QueueTimeout);
    // The rejected waiter still counted itself at the instant it departed.
    assert_eq!(err.data()["queued"], 1);
    assert_eq!(limiter.metrics().queued, 0);
}
