//! floodgate: backpressure admission control for JSON-RPC tool servers.
//!
//! Bounds concurrent in-flight work in front of a request-handler pipeline.
//! An arriving request either proceeds immediately, parks in a bounded FIFO
//! queue until a capacity slot is handed to it, or is rejected with a
//! structured overload payload (`queue_full`, `queue_timeout`, or
//! `concurrency_limit`). Every resource is released on every exit path,
//! including abrupt cancellation of the caller.
//!
//! ```no_run
//! # async fn demo() -> Result<(), floodgate::OverloadError> {
//! use std::time::Duration;
//!
//! use floodgate::{BackpressureConfig, BackpressureMiddleware};
//!
//! let middleware = BackpressureMiddleware::new(
//!     BackpressureConfig::new(5)
//!         .unwrap()
//!         .with_queue_size(10)
//!         .with_queue_timeout(Duration::from_secs(30)),
//! );
//!
//! match middleware.handle(|| async { /* run the tool */ }).await {
//!     Ok(_output) => { /* respond */ }
//!     Err(overload) => {
//!         // Render straight into the JSON-RPC error member.
//!         let _error_object = overload.to_json_rpc();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod limiter;
mod metrics;
mod middleware;

pub use config::{
    BackpressureConfig, ConfigError, DEFAULT_OVERLOAD_CODE, DEFAULT_QUEUE_TIMEOUT,
    DEFAULT_RETRY_AFTER,
};
pub use error::{OVERLOAD_MESSAGE, OverloadError, RejectReason};
pub use limiter::{Admission, CancellationToken, Limiter, ReleaseToken};
pub use metrics::MetricsSnapshot;
pub use middleware::{BackpressureMiddleware, HandleError};
