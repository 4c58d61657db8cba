//! Capacity gate: free units, the waiter list, and direct handoff.
//!
//! All gate state lives behind one mutex so that an admission decision
//! (take a unit / reserve a queue slot / reject) and a release (hand the
//! unit to the head waiter / raise the free count) are each a single
//! critical section. The lock is never held across an await.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::config::BackpressureConfig;
use crate::error::RejectReason;
use crate::metrics::{Counters, MetricsSnapshot};

use super::queue::ParkedWaiter;

/// Where one arrival ends up after the gate's atomic admission decision.
pub(super) enum GateEntry {
    /// A free unit was taken; the token is already counted active.
    Admitted(ReleaseToken),
    /// No unit and no room to wait. Snapshot taken inside the decision's
    /// critical section.
    Rejected(RejectReason, MetricsSnapshot),
    /// A queue slot was reserved and a wake channel installed.
    Parked(ParkedWaiter),
}

pub(super) struct GateInner {
    pub(super) config: BackpressureConfig,
    pub(super) counters: Counters,
    state: Mutex<GateState>,
}

pub(super) struct GateState {
    /// Capacity units not held by any token and not in flight to a waiter.
    free: u32,
    /// Queue slots currently reserved by live waiters.
    reserved: u32,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<ReleaseToken>,
}

impl GateInner {
    pub(super) fn new(config: BackpressureConfig) -> Arc<Self> {
        let free = config.max_concurrent();
        Arc::new(Self {
            config,
            counters: Counters::new(),
            state: Mutex::new(GateState {
                free,
                reserved: 0,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            }),
        })
    }

    /// A poisoned lock still guards consistent counts; recover the guard so
    /// capacity is never stranded behind an unrelated panic.
    pub(super) fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Non-blocking acquire of one capacity unit.
    pub(super) fn try_acquire(self: &Arc<Self>) -> Option<ReleaseToken> {
        let mut state = self.lock();
        if state.free == 0 {
            return None;
        }
        state.free -= 1;
        let mut token = ReleaseToken::new(Arc::clone(self));
        token.mark_active();
        Some(token)
    }

    /// The admission decision: fast path, reject, or reserve-and-park.
    ///
    /// Runs entirely under the state lock, so a concurrent release cannot
    /// slip a freed unit past an arrival that is about to park.
    pub(super) fn enter(self: &Arc<Self>) -> GateEntry {
        let mut state = self.lock();
        debug_assert!(state.free == 0 || state.waiters.is_empty());

        if state.free > 0 {
            state.free -= 1;
            let mut token = ReleaseToken::new(Arc::clone(self));
            token.mark_active();
            return GateEntry::Admitted(token);
        }

        if self.config.queue_size() == 0 {
            return GateEntry::Rejected(RejectReason::ConcurrencyLimit, self.counters.snapshot());
        }

        if state.reserved >= self.config.queue_size() {
            return GateEntry::Rejected(RejectReason::QueueFull, self.counters.snapshot());
        }

        state.reserved += 1;
        self.counters.inc_queued();
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { id, tx });
        GateEntry::Parked(ParkedWaiter::new(Arc::clone(self), id, rx))
    }

    /// Return one capacity unit: hand it to the head live waiter, skipping
    /// waiters whose receiver is already gone, or raise the free count.
    ///
    /// The pop and the send share the critical section, so a waiter that
    /// finds itself detached knows its token is already in the channel.
    fn release_unit(self: &Arc<Self>) {
        let mut state = self.lock();
        let mut token = ReleaseToken::new(Arc::clone(self));
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(token) {
                Ok(()) => return,
                Err(returned) => {
                    tracing::debug!(waiter = waiter.id, "waiter gone before handoff, reoffering");
                    token = returned;
                }
            }
        }
        token.disarm();
        state.free += 1;
        debug_assert!(state.free <= self.config.max_concurrent());
    }
}

impl GateState {
    /// Detach a waiter by id. Returns false when a handoff already claimed it.
    pub(super) fn detach_waiter(&mut self, id: u64) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.id != id);
        self.waiters.len() != before
    }

    /// Give back one reserved queue slot.
    pub(super) fn release_slot(&mut self) {
        debug_assert!(self.reserved > 0);
        self.reserved = self.reserved.saturating_sub(1);
    }
}

/// Owned handle for one unit of gate capacity.
///
/// Dropping the token releases the unit exactly once: it is handed directly
/// to the head waiter when one is parked, otherwise returned to the free
/// pool. Tokens cannot be cloned, and the private constructor means they
/// cannot be forged.
pub struct ReleaseToken {
    gate: Option<Arc<GateInner>>,
    counted: bool,
}

impl ReleaseToken {
    pub(super) fn new(gate: Arc<GateInner>) -> Self {
        Self {
            gate: Some(gate),
            counted: false,
        }
    }

    /// Count this token in the `active` gauge. Called in the same critical
    /// section as the acquire on the fast path, and on wake for handoffs.
    pub(super) fn mark_active(&mut self) {
        if let Some(gate) = &self.gate
            && !self.counted
        {
            gate.counters.inc_active();
            self.counted = true;
        }
    }

    /// Consume the token without releasing; the caller has already accounted
    /// for the unit under the state lock.
    fn disarm(&mut self) {
        self.gate = None;
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            if self.counted {
                gate.counters.dec_active();
            }
            gate.release_unit();
        }
    }
}

impl fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseToken")
            .field("counted", &self.counted)
            .finish_non_exhaustive()
    }
}
