//! Burst-load driver: floods the middleware and prints what happened.
//!
//! Run:
//!     cargo run --example load_simulation

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

use floodgate::{BackpressureConfig, BackpressureMiddleware};

const WAVES: usize = 4;
const REQUESTS_PER_WAVE: usize = 30;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let middleware = Arc::new(BackpressureMiddleware::new(
        BackpressureConfig::new(4)
            .unwrap()
            .with_queue_size(8)
            .with_queue_timeout(Duration::from_millis(500)),
    ));

    let completed = Arc::new(AtomicU64::new(0));
    let shed = Arc::new(AtomicU64::new(0));

    for wave in 0..WAVES {
        info!(wave, "launching {REQUESTS_PER_WAVE} requests");

        let mut tasks = Vec::with_capacity(REQUESTS_PER_WAVE);
        for n in 0..REQUESTS_PER_WAVE {
            let middleware = Arc::clone(&middleware);
            let completed = Arc::clone(&completed);
            let shed = Arc::clone(&shed);

            // Deterministic spread of "tool" runtimes, 20..=130 ms.
            let work = Duration::from_millis(20 + (n as u64 * 37) % 111);

            tasks.push(tokio::spawn(async move {
                match middleware
                    .handle(|| tokio::time::sleep(work))
                    .await
                {
                    Ok(()) => {
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(overload) => {
                        shed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            reason = %overload.reason(),
                            retry_after_ms = overload.retry_after_ms(),
                            "request shed"
                        );
                    }
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }

        let metrics = middleware.metrics();
        info!(
            wave,
            completed = completed.load(Ordering::Relaxed),
            shed = shed.load(Ordering::Relaxed),
            rejected_queue_full = metrics.rejected_queue_full,
            rejected_queue_timeout = metrics.rejected_queue_timeout,
            "wave finished"
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let metrics = middleware.metrics();
    info!(
        active = metrics.active,
        queued = metrics.queued,
        total_rejected = metrics.total_rejected,
        "simulation settled"
    );
    assert_eq!(metrics.active, 0);
    assert_eq!(metrics.queued, 0);
}
