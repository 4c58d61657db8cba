//! Bounded FIFO wait queue: parking, deadlines, and race settlement.
//!
//! A waiter owns its queue slot through a scoped guard armed in the same
//! critical section that reserved the slot. Whatever way the wait ends
//! (handoff, deadline, cancellation, or the future being dropped), the slot
//! is released exactly once.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::gate::{GateInner, ReleaseToken};
use crate::metrics::MetricsSnapshot;

/// Outcome of one parked wait.
pub(super) enum ParkOutcome {
    /// A releaser handed this waiter a capacity unit.
    Woken(ReleaseToken),
    /// The deadline fired first. Carries the counters as seen at departure,
    /// while the departing waiter still occupied its queue slot.
    TimedOut(MetricsSnapshot),
    /// The caller's cancellation signal fired first.
    Cancelled,
}

enum Departure {
    Deadline,
    Cancel,
}

/// A reserved queue slot with its wake channel, not yet awaited.
pub(super) struct ParkedWaiter {
    gate: Arc<GateInner>,
    id: u64,
    rx: oneshot::Receiver<ReleaseToken>,
    slot: QueueSlotGuard,
}

impl ParkedWaiter {
    pub(super) fn new(gate: Arc<GateInner>, id: u64, rx: oneshot::Receiver<ReleaseToken>) -> Self {
        let slot = QueueSlotGuard {
            gate: Arc::clone(&gate),
            id,
        };
        Self { gate, id, rx, slot }
    }

    /// Suspend until handoff, deadline, or cancellation.
    ///
    /// A waiter that lost the detach race to a concurrent handoff is woken,
    /// not timed out, even if its deadline passed while the token was in
    /// flight. A cancelled waiter that already received a token gives the
    /// unit straight back.
    pub(super) async fn park(
        self,
        deadline: Instant,
        cancel: Option<&CancellationToken>,
    ) -> ParkOutcome {
        // No Drop impl on ParkedWaiter itself, so the pieces can be moved
        // out; the slot guard keeps covering an abandoned future.
        let Self {
            gate,
            id,
            mut rx,
            slot,
        } = self;

        let departure = tokio::select! {
            biased;
            res = &mut rx => {
                return match res {
                    Ok(token) => {
                        drop(slot);
                        ParkOutcome::Woken(token)
                    }
                    Err(_) => {
                        // Sender dropped without a send: nothing can arrive
                        // anymore. Treat the wait as expired.
                        let snapshot = gate.counters.snapshot();
                        drop(slot);
                        ParkOutcome::TimedOut(snapshot)
                    }
                };
            }
            _ = cancelled(cancel) => Departure::Cancel,
            _ = tokio::time::sleep_until(deadline) => Departure::Deadline,
        };

        // Settle the race against a concurrent handoff: once detached here,
        // no token can ever be sent to this waiter.
        let detached = {
            let mut state = gate.lock();
            state.detach_waiter(id)
        };

        if !detached {
            // A releaser already popped this waiter, and send/pop share a
            // critical section, so the token is sitting in the channel.
            if let Ok(token) = rx.try_recv() {
                return match departure {
                    Departure::Deadline => {
                        drop(slot);
                        ParkOutcome::Woken(token)
                    }
                    Departure::Cancel => {
                        // Caller is gone; the unit goes straight back.
                        drop(token);
                        drop(slot);
                        ParkOutcome::Cancelled
                    }
                };
            }
        }

        match departure {
            Departure::Deadline => {
                // Snapshot while this waiter still counts as queued, so the
                // payload shows the queue state that starved it.
                let snapshot = gate.counters.snapshot();
                drop(slot);
                ParkOutcome::TimedOut(snapshot)
            }
            Departure::Cancel => {
                drop(slot);
                ParkOutcome::Cancelled
            }
        }
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Scoped ownership of one queue slot.
///
/// Armed in the critical section that reserves the slot; drop detaches the
/// waiter (if a handoff has not already claimed it) and gives the slot back.
struct QueueSlotGuard {
    gate: Arc<GateInner>,
    id: u64,
}

impl Drop for QueueSlotGuard {
    fn drop(&mut self) {
        {
            let mut state = self.gate.lock();
            state.detach_waiter(self.id);
            state.release_slot();
        }
        self.gate.counters.dec_queued();
    }
}
