//! Fast-path admission and immediate rejection without a queue.

use std::sync::Arc;

use floodgate::{BackpressureConfig, BackpressureMiddleware, Limiter, RejectReason};
use tokio::sync::Barrier;

fn limiter(max_concurrent: u32) -> Limiter {
    Limiter::new(BackpressureConfig::new(max_concurrent).unwrap())
}

#[tokio::test]
async fn concurrent_arrivals_all_proceed_within_capacity() {
    let middleware = Arc::new(BackpressureMiddleware::new(
        BackpressureConfig::new(3).unwrap(),
    ));
    let barrier = Arc::new(Barrier::new(3));

    // Three handlers rendezvous while all still hold their tokens, so each
    // observes the gauge at its peak.
    let run = |name: &'static str| {
        let middleware = Arc::clone(&middleware);
        let barrier = Arc::clone(&barrier);
        async move {
            middleware
                .handle(|| async {
                    barrier.wait().await;
                    (name, middleware.metrics().active)
                })
                .await
        }
    };

    let (a, b, c) = tokio::join!(run("a"), run("b"), run("c"));
    for result in [a, b, c] {
        let (_, active_at_peak) = result.expect("admitted");
        assert_eq!(active_at_peak, 3);
    }

    assert_eq!(middleware.metrics().active, 0);
    assert_eq!(middleware.metrics().total_rejected, 0);
}

#[tokio::test]
async fn arrival_beyond_capacity_is_rejected_with_state() {
    let limiter = limiter(2);

    let _a = limiter.admit().await.unwrap();
    let _b = limiter.admit().await.unwrap();

    let err = limiter.admit().await.unwrap_err();
    assert_eq!(err.reason(), RejectReason::ConcurrencyLimit);

    let data = err.data();
    assert_eq!(data["active"], 2);
    assert_eq!(data["queued"], 0);
    assert_eq!(data["max_concurrent"], 2);
}

#[tokio::test]
async fn capacity_recovers_after_burst() {
    let limiter = limiter(3);

    for _ in 0..5 {
        let a = limiter.admit().await.unwrap();
        let b = limiter.admit().await.unwrap();
        let c = limiter.admit().await.unwrap();
        drop((a, b, c));
    }

    let metrics = limiter.metrics();
    assert_eq!(metrics.active, 0);
    assert_eq!(metrics.queued, 0);
    assert_eq!(metrics.total_rejected, 0);
}

#[tokio::test]
async fn rejections_count_per_reason() {
    let limiter = limiter(1);
    let _held = limiter.admit().await.unwrap();

    for _ in 0..3 {
        let err = limiter.admit().await.unwrap_err();
        assert_eq!(err.reason(), RejectReason::ConcurrencyLimit);
    }

    let metrics = limiter.metrics();
    assert_eq!(metrics.rejected_concurrency_limit, 3);
    assert_eq!(metrics.total_rejected, 3);
    assert_eq!(metrics.rejected_queue_full, 0);
    assert_eq!(metrics.rejected_queue_timeout, 0);
}
