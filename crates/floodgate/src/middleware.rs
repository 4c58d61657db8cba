//! Request-pipeline wrapper around the admission protocol.
//!
//! Sits in front of a handler chain (typically tool dispatch in a JSON-RPC
//! server): admit, run the downstream handler under the capacity token,
//! release on every exit path including a panic unwinding through the
//! handler.

use std::future::Future;

use crate::config::BackpressureConfig;
use crate::error::OverloadError;
use crate::limiter::{Admission, CancellationToken, Limiter};
use crate::metrics::MetricsSnapshot;

/// Why a wrapped request did not run.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error(transparent)]
    Overloaded(#[from] OverloadError),
    /// The caller's cancellation signal fired before admission.
    #[error("request cancelled before admission")]
    Cancelled,
}

/// Concurrency-limiting middleware for a request handler chain.
///
/// ```no_run
/// # async fn demo() -> Result<(), floodgate::OverloadError> {
/// use floodgate::{BackpressureConfig, BackpressureMiddleware};
///
/// let middleware = BackpressureMiddleware::new(
///     BackpressureConfig::new(5).unwrap().with_queue_size(10),
/// );
///
/// let response = middleware.handle(|| async { "handled" }).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackpressureMiddleware {
    limiter: Limiter,
}

impl BackpressureMiddleware {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            limiter: Limiter::new(config),
        }
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.limiter.metrics()
    }

    /// Admit, then run the handler under the capacity token.
    ///
    /// Overload comes back as `Err`; handler output passes through
    /// untouched. Cancellation is by dropping the returned future, which
    /// releases whatever the admission had acquired.
    pub async fn handle<F, Fut, R>(&self, call_next: F) -> Result<R, OverloadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let token = self.limiter.admit().await?;
        let response = call_next().await;
        drop(token);
        Ok(response)
    }

    /// Like [`handle`](Self::handle), but also honors an explicit
    /// cancellation signal while waiting for admission.
    ///
    /// The signal gates admission only; once the handler is running,
    /// cancellation is the caller's business (drop the future, or make the
    /// handler observe the same signal).
    pub async fn handle_with_cancel<F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        call_next: F,
    ) -> Result<R, HandleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        match self.limiter.admit_with_cancel(cancel).await {
            Admission::Admitted(token) => {
                let response = call_next().await;
                drop(token);
                Ok(response)
            }
            Admission::Rejected(error) => Err(HandleError::Overloaded(error)),
            Admission::Cancelled => Err(HandleError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectReason;

    fn middleware(max_concurrent: u32) -> BackpressureMiddleware {
        BackpressureMiddleware::new(BackpressureConfig::new(max_concurrent).unwrap())
    }

    #[tokio::test]
    async fn passes_handler_output_through() {
        let mw = middleware(1);
        let out = mw.handle(|| async { 42 }).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(mw.metrics().active, 0);
    }

    #[tokio::test]
    async fn overload_surfaces_as_error_value() {
        let mw = middleware(1);
        let _held = mw.limiter().admit().await.unwrap();

        let err = mw.handle(|| async {}).await.unwrap_err();
        assert_eq!(err.reason(), RejectReason::ConcurrencyLimit);
    }

    #[tokio::test]
    async fn cancelled_signal_is_distinct_from_overload() {
        let mw = middleware(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = mw
            .handle_with_cancel(&cancel, || async {})
            .await
            .unwrap_err();
        assert!(matches!(err, HandleError::Cancelled));
    }

    #[tokio::test]
    async fn handler_panic_still_releases_capacity() {
        let mw = std::sync::Arc::new(middleware(1));

        let task = tokio::spawn({
            let mw = std::sync::Arc::clone(&mw);
            async move {
                mw.handle(|| async { panic!("handler exploded") }).await
            }
        });
        assert!(task.await.unwrap_err().is_panic());

        // The unwind dropped the token; capacity is back.
        assert_eq!(mw.metrics().active, 0);
        let token = mw.limiter().admit().await.unwrap();
        drop(token);
    }
}
