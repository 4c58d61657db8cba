//! The admission protocol: fast path, queued path, timeout path, cancel path.
//!
//! One call to [`Limiter::admit`] atomically decides reject-now, enqueue, or
//! execute, and every resource it touches (capacity unit, queue slot,
//! counters) is released on every exit path, including the admit future
//! being dropped at any await point.

mod gate;
mod queue;

use std::sync::Arc;

use tokio::time::Instant;
pub use tokio_util::sync::CancellationToken;

use crate::config::BackpressureConfig;
use crate::error::{OverloadError, RejectReason};
use crate::metrics::MetricsSnapshot;

use gate::{GateEntry, GateInner};
use queue::ParkOutcome;

pub use gate::ReleaseToken;

/// Result of one admission attempt with an explicit cancellation signal.
#[derive(Debug)]
pub enum Admission {
    /// Run the request now; drop the token when the handler finishes.
    Admitted(ReleaseToken),
    /// The server is overloaded; the payload says why and how it looked.
    Rejected(OverloadError),
    /// The caller's cancellation signal fired before a slot was granted.
    Cancelled,
}

/// Bounds concurrent in-flight work, with an optional bounded wait queue.
///
/// Cloning shares the same capacity gate and counters, so one `Limiter` can
/// be handed to every request path of a server.
#[derive(Clone)]
pub struct Limiter {
    gate: Arc<GateInner>,
}

impl Limiter {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            gate: GateInner::new(config),
        }
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.gate.config
    }

    /// Current counters: in-flight, parked, and cumulative rejections.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.gate.counters.snapshot()
    }

    /// Non-blocking admission: take a free slot right now or get `None`.
    ///
    /// Never parks and never counts a rejection.
    pub fn try_admit(&self) -> Option<ReleaseToken> {
        self.gate.try_acquire()
    }

    /// Admit one request. Cancellation is by dropping the returned future;
    /// a dropped `admit` releases everything it acquired.
    pub async fn admit(&self) -> Result<ReleaseToken, OverloadError> {
        match self.admit_inner(None).await {
            Admission::Admitted(token) => Ok(token),
            Admission::Rejected(error) => Err(error),
            Admission::Cancelled => unreachable!("no cancellation signal was supplied"),
        }
    }

    /// Admit one request, also honoring an explicit cancellation signal
    /// linked to the caller. Cancellation is reported as a distinct outcome,
    /// never as an overload.
    pub async fn admit_with_cancel(&self, cancel: &CancellationToken) -> Admission {
        self.admit_inner(Some(cancel)).await
    }

    async fn admit_inner(&self, cancel: Option<&CancellationToken>) -> Admission {
        if let Some(token) = cancel
            && token.is_cancelled()
        {
            return Admission::Cancelled;
        }

        let arrival = Instant::now();

        let parked = match self.gate.enter() {
            GateEntry::Admitted(token) => return Admission::Admitted(token),
            GateEntry::Rejected(reason, snapshot) => {
                return Admission::Rejected(self.reject(reason, snapshot));
            }
            GateEntry::Parked(waiter) => waiter,
        };

        let deadline = arrival + self.gate.config.queue_timeout();
        match parked.park(deadline, cancel).await {
            ParkOutcome::Woken(mut token) => {
                token.mark_active();
                Admission::Admitted(token)
            }
            ParkOutcome::TimedOut(snapshot) => {
                Admission::Rejected(self.reject(RejectReason::QueueTimeout, snapshot))
            }
            ParkOutcome::Cancelled => Admission::Cancelled,
        }
    }

    /// Count the rejection, notify the observer, build the payload. The
    /// snapshot was taken before either, so the payload reflects the state
    /// that caused the rejection.
    fn reject(&self, reason: RejectReason, snapshot: MetricsSnapshot) -> OverloadError {
        self.gate.counters.inc_rejected(reason);
        let error = OverloadError::new(reason, snapshot, &self.gate.config);
        tracing::debug!(
            reason = %reason,
            active = snapshot.active,
            queued = snapshot.queued,
            "request rejected"
        );
        self.notify_observer(&error);
        error
    }

    fn notify_observer(&self, error: &OverloadError) {
        let Some(observer) = self.gate.config.on_overload() else {
            return;
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| observer(error)));
        if outcome.is_err() {
            tracing::warn!(
                reason = %error.reason(),
                "overload observer panicked; rejection returned unchanged"
            );
        }
    }
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("config", &self.gate.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}
