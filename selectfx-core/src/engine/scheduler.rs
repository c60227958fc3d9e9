//! Cycle Scheduler
//!
//! The scheduler sits between sessions and the registry. During the render
//! phase it accumulates what every closed session requested; when the host
//! signals that the cycle is complete it hands the accumulated demand to the
//! registry in exactly one commit.
//!
//! # Algorithm
//!
//! 1. Each closed session contributes its (already deduplicated) requests.
//!    A key's reference count is the number of sessions that asked for it.
//! 2. Each request also marks its key as `Requested` in the registry, so the
//!    state machine never skips from absent straight to running.
//! 3. `finish_cycle` takes the accumulator, commits it, and starts the next
//!    cycle empty.
//! 4. `discard_pass` throws away a speculative pass: the accumulator is
//!    cleared and keys that were only requested are released, so nothing
//!    from a rejected evaluation ever reaches a commit.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::map::Entry as MapEntry;
use parking_lot::Mutex;

use crate::effect::{EffectKey, EffectRequest};
use crate::error::{EffectError, Result};

use super::registry::{CommitReport, CycleDemand, Demand, EffectRegistry};

/// Accumulates demand across one render cycle and commits it once.
pub struct CycleScheduler<S> {
    /// Demand collected since the last commit or discard.
    pass: Mutex<CycleDemand<S>>,

    /// Number of cycles committed so far.
    cycle: AtomicU64,
}

impl<S> CycleScheduler<S> {
    /// Create a scheduler with an empty accumulator.
    pub fn new() -> Self {
        Self {
            pass: Mutex::new(CycleDemand::new()),
            cycle: AtomicU64::new(0),
        }
    }

    /// Add the requests of one closed session to the current pass.
    pub fn collect(&self, registry: &EffectRegistry<S>, requests: Vec<EffectRequest<S>>) {
        let mut pass = self.pass.lock();
        for request in requests {
            registry.ensure(&request);
            let key = request.key().clone();
            let count = match pass.entry(key.clone()) {
                MapEntry::Occupied(mut slot) => {
                    slot.get_mut().ref_count += 1;
                    slot.get().ref_count
                }
                MapEntry::Vacant(slot) => {
                    slot.insert(Demand {
                        request,
                        ref_count: 1,
                    });
                    1
                }
            };
            registry.track_pending(key.as_str(), count);
        }
    }

    /// Withdraw one session's request for `key` from the current pass.
    ///
    /// The key's pass reference count drops by one. When no session is left
    /// asking for it, its demand is removed, so the next commit treats it as
    /// unrequested, and an entry that never started is dropped right away.
    ///
    /// Returns whether the key no longer has any demand in this pass.
    pub fn release(&self, registry: &EffectRegistry<S>, key: &str) -> bool {
        let mut pass = self.pass.lock();
        let remaining = match pass.get_mut(key) {
            Some(demand) => {
                demand.ref_count -= 1;
                demand.ref_count
            }
            None => {
                tracing::warn!(%key, "release of effect not requested in this pass");
                return false;
            }
        };

        if remaining > 0 {
            registry.track_pending(key, remaining);
            tracing::trace!(%key, remaining, "request released");
            return false;
        }

        pass.shift_remove(key);
        registry.release(key);
        tracing::trace!(%key, "demand withdrawn");
        true
    }

    /// Throw away everything collected since the last commit.
    ///
    /// Returns the number of distinct keys that were discarded.
    pub fn discard_pass(&self, registry: &EffectRegistry<S>) -> usize {
        let discarded = std::mem::take(&mut *self.pass.lock());
        for key in discarded.keys() {
            registry.release(key.as_str());
        }
        if !discarded.is_empty() {
            tracing::warn!(keys = discarded.len(), "speculative pass discarded");
        }
        discarded.len()
    }

    /// Commit the current pass and start a new cycle.
    pub fn finish_cycle(&self, registry: &EffectRegistry<S>, store: &S) -> Result<CommitReport> {
        if registry.is_committing() {
            return Err(EffectError::ReentrantCommit);
        }

        let demand = std::mem::take(&mut *self.pass.lock());
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let _span = tracing::debug_span!("cycle", cycle, requested = demand.len()).entered();

        registry.commit(store, &demand)
    }

    /// Keys collected in the current pass, in first-request order.
    pub fn pending_keys(&self) -> Vec<EffectKey> {
        self.pass.lock().keys().cloned().collect()
    }

    /// Number of sessions that requested `key` in the current pass.
    pub fn pending_ref_count(&self, key: &str) -> Option<usize> {
        self.pass.lock().get(key).map(|d| d.ref_count)
    }

    /// Number of cycles committed so far.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }
}

impl<S> Default for CycleScheduler<S> {
    fn default() -> Self {
        Self::new()
    }
}
