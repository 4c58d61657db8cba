//! Admission counters and their read-only snapshot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use crate::error::RejectReason;

/// Atomic tally of in-flight, parked, and rejected requests.
///
/// Each field is updated atomically on its own; a snapshot is not globally
/// consistent across fields. That is enough for the diagnostic payloads and
/// the metrics surface.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    active: AtomicU32,
    queued: AtomicU32,
    rejected_concurrency_limit: AtomicU64,
    rejected_queue_full: AtomicU64,
    rejected_queue_timeout: AtomicU64,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_active(&self) {
        self.active.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn dec_active(&self) {
        self.active.fetch_sub(1, Ordering::Release);
    }

    pub(crate) fn inc_queued(&self) {
        self.queued.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn dec_queued(&self) {
        self.queued.fetch_sub(1, Ordering::Release);
    }

    pub(crate) fn inc_rejected(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::ConcurrencyLimit => &self.rejected_concurrency_limit,
            RejectReason::QueueFull => &self.rejected_queue_full,
            RejectReason::QueueTimeout => &self.rejected_queue_timeout,
        };
        counter.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let rejected_concurrency_limit = self.rejected_concurrency_limit.load(Ordering::Acquire);
        let rejected_queue_full = self.rejected_queue_full.load(Ordering::Acquire);
        let rejected_queue_timeout = self.rejected_queue_timeout.load(Ordering::Acquire);

        MetricsSnapshot {
            active: self.active.load(Ordering::Acquire),
            queued: self.queued.load(Ordering::Acquire),
            total_rejected: rejected_concurrency_limit + rejected_queue_full + rejected_queue_timeout,
            rejected_concurrency_limit,
            rejected_queue_full,
            rejected_queue_timeout,
        }
    }
}

/// Point-in-time view of the admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests currently executing.
    pub active: u32,
    /// Requests currently parked in the queue.
    pub queued: u32,
    /// All rejections since construction.
    pub total_rejected: u64,
    pub rejected_concurrency_limit: u64,
    pub rejected_queue_full: u64,
    pub rejected_queue_timeout: u64,
}
