// src/engine/gate.rs

//! Priority-ordered concurrency gate.
//!
//! At most `max_concurrency` permits are outstanding at any instant. Every
//! caller joins a priority queue and yields once before slots are handed out,
//! so callers that become ready in the same scheduler tick are admitted in
//! priority order (FIFO among equal priorities). A released permit goes
//! directly to the highest-priority waiter, and a freshly arriving
//! low-priority caller can never overtake a queued high-priority one.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::trace;

use crate::errors::{OpgraphError, Result};

#[derive(Clone)]
pub struct WorkGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    max_concurrency: usize,
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    active: usize,
    next_seq: u64,
    waiting: BinaryHeap<Waiter>,
}

struct Waiter {
    priority: u64,
    seq: u64,
    admit: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier arrival.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl WorkGate {
    /// Create a gate admitting at most `max_concurrency` holders (minimum 1).
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                max_concurrency: max_concurrency.max(1),
                state: Mutex::new(GateState::default()),
            }),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        self.state().active
    }

    /// Number of callers waiting for admission.
    pub fn waiting(&self) -> usize {
        self.state().waiting.len()
    }

    /// Wait for admission. The returned permit releases its slot on drop.
    ///
    /// Dropping the returned future before admission gives up the place in
    /// the queue without leaking a slot.
    pub async fn acquire(&self, priority: u64) -> Result<GatePermit> {
        let admit_rx = {
            let mut state = self.state();
            let (admit, admit_rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(Waiter {
                priority,
                seq,
                admit,
            });
            trace!(priority, waiting = state.waiting.len(), "gate: queued");
            admit_rx
        };

        let mut pending = PendingAdmission {
            gate: self,
            admit_rx,
            settled: false,
        };

        // Let every caller that is ready right now queue up first.
        tokio::task::yield_now().await;
        self.dispatch();

        let admitted = (&mut pending.admit_rx).await;
        pending.settled = true;

        match admitted {
            Ok(()) => Ok(GatePermit { gate: self.clone() }),
            Err(_) => Err(OpgraphError::Internal(
                "work gate dropped a queued caller without admitting it".to_string(),
            )),
        }
    }

    /// Run `work` once admitted, holding the slot for its whole duration.
    pub async fn queue_work<F, T>(&self, priority: u64, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire(priority).await?;
        Ok(work.await)
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill free slots from the queue, best waiter first.
    fn dispatch(&self) {
        let mut state = self.state();
        while state.active < self.inner.max_concurrency {
            let Some(waiter) = state.waiting.pop() else {
                break;
            };
            // A closed receiver means the caller gave up; skip it.
            if waiter.admit.send(()).is_ok() {
                state.active += 1;
                trace!(
                    priority = waiter.priority,
                    active = state.active,
                    "gate: admitted"
                );
            }
        }
    }

    fn release(&self) {
        {
            let mut state = self.state();
            state.active = state.active.saturating_sub(1);
            trace!(active = state.active, "gate: slot released");
        }
        self.dispatch();
    }
}

impl fmt::Debug for WorkGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("WorkGate")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("active", &state.active)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}

/// A held slot in the gate.
pub struct GatePermit {
    gate: WorkGate,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePermit").finish_non_exhaustive()
    }
}

/// Guards a queued `acquire` against being dropped mid-wait.
struct PendingAdmission<'a> {
    gate: &'a WorkGate,
    admit_rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.admit_rx.close();
        // A slot may have been handed over just before we gave up.
        if self.admit_rx.try_recv().is_ok() {
            self.gate.release();
        }
    }
}
