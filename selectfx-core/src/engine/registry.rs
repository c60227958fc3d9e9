//! Effect Registry
//!
//! The registry is the live table of effect instances for one context. It is
//! the only place effects are started or stopped, and it only does so inside
//! [`EffectRegistry::commit`].
//!
//! # Commit Algorithm
//!
//! Given the keys requested during one cycle (with their per-cycle reference
//! counts):
//!
//! 1. Diff the requested keys against the current entries.
//! 2. Remove every entry that was not requested and run its teardown.
//! 3. Leave running entries that are still requested untouched, only updating
//!    their reference count.
//! 4. Start every requested key that has no running entry yet and store the
//!    teardown it returns.
//!
//! Teardowns run before starts, so an effect that restarts with new
//! parameters is always stopped before its replacement begins.
//!
//! # Reentrancy
//!
//! No lock is held while user code runs. A body or teardown that calls
//! `commit` on the same registry gets [`EffectError::ReentrantCommit`]
//! instead of deadlocking.
//!
//! # Failures
//!
//! A body that returns an error or panics leaves its entry in `Failed`. The
//! entry is not retried while its key stays requested; once it is evicted, a
//! later request starts a fresh attempt. Teardown panics are reported and the
//! entry is removed regardless.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::effect::{EffectKey, EffectRequest};
use crate::error::{EffectError, Result};

use super::diff::KeyDiff;
use super::entry::{Entry, EntryState};

/// Demand for one key during a cycle.
pub struct Demand<S> {
    /// The request to start if the key has no running entry.
    pub request: EffectRequest<S>,
    /// Number of sessions that requested the key this cycle.
    pub ref_count: usize,
}

impl<S> Clone for Demand<S> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            ref_count: self.ref_count,
        }
    }
}

impl<S> std::fmt::Debug for Demand<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demand")
            .field("key", self.request.key())
            .field("ref_count", &self.ref_count)
            .finish()
    }
}

/// All demand collected during one cycle, in first-request order.
pub type CycleDemand<S> = IndexMap<EffectKey, Demand<S>>;

/// What one commit did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommitReport {
    /// Keys whose body ran and returned successfully.
    pub started: Vec<EffectKey>,
    /// Keys left as they were because they were already running or failed.
    pub kept: Vec<EffectKey>,
    /// Running keys whose teardown was invoked.
    pub stopped: Vec<EffectKey>,
    /// Keys whose body failed this commit.
    pub failed: Vec<EffectKey>,
    /// Start and teardown failures, in the order they happened.
    pub failures: Vec<EffectError>,
}

impl CommitReport {
    /// Whether the commit started, stopped, and failed nothing.
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

/// Resets the commit flag when a commit ends, even by unwinding.
struct CommitGuard<'a>(&'a AtomicBool);

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Table of active effect instances for one context.
pub struct EffectRegistry<S> {
    entries: Mutex<IndexMap<EffectKey, Entry<S>>>,
    committing: AtomicBool,
    catch_panics: bool,
}

impl<S> EffectRegistry<S> {
    /// Create an empty registry.
    ///
    /// With `catch_panics`, a panicking body or teardown is recorded as a
    /// failure; otherwise the panic unwinds out of `commit`.
    pub fn new(catch_panics: bool) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            committing: AtomicBool::new(false),
            catch_panics,
        }
    }

    /// Mark a key as requested. Creates a `Requested` entry if the key has no
    /// entry yet; otherwise does nothing. Never runs the body.
    ///
    /// Returns whether an entry was created.
    pub fn ensure(&self, request: &EffectRequest<S>) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(request.key()) {
            return false;
        }
        tracing::trace!(key = %request.key(), "effect requested");
        entries.insert(request.key().clone(), Entry::requested(request));
        true
    }

    /// Record how many sessions requested a key that has not started yet.
    /// Started entries keep the count of their last committed cycle.
    pub(crate) fn track_pending(&self, key: &str, count: usize) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            if entry.state == EntryState::Requested {
                entry.ref_count = count;
            }
        }
    }

    /// Drop the entry for a key whose demand was withdrawn in this cycle.
    ///
    /// Only an entry that was requested and never started is dropped. Started
    /// entries are left alone: their fate is decided by the next commit's
    /// demand, not by running subtraction. Callers must withdraw the pass
    /// demand first, or the next commit recreates the entry.
    ///
    /// Returns whether an entry was dropped.
    pub(crate) fn release(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key).map(|entry| entry.state) {
            Some(EntryState::Requested) => {
                entries.shift_remove(key);
                tracing::trace!(%key, "request withdrawn");
                true
            }
            Some(state) => {
                tracing::trace!(%key, ?state, "release deferred to commit");
                false
            }
            None => {
                tracing::warn!(%key, "release of unknown effect");
                false
            }
        }
    }

    /// Whether a commit is in progress.
    pub fn is_committing(&self) -> bool {
        self.committing.load(Ordering::SeqCst)
    }

    /// Reconcile the registry against one cycle's demand.
    ///
    /// This is the only transition point: effects start and stop here and
    /// nowhere else. Effect failures are collected in the report; only usage
    /// errors are returned as `Err`.
    pub fn commit(&self, store: &S, demand: &CycleDemand<S>) -> Result<CommitReport> {
        let _guard = self.begin_commit()?;
        let mut report = CommitReport::default();

        let (diff, stopping) = {
            let mut entries = self.entries.lock();
            let diff = KeyDiff::compute(
                &*entries,
                demand.values().map(|d| d.request.descriptor()),
            );

            for (key, d) in demand {
                match entries.get_mut(key) {
                    Some(entry) => entry.ref_count = d.ref_count,
                    None => {
                        let mut entry = Entry::requested(&d.request);
                        entry.ref_count = d.ref_count;
                        entries.insert(key.clone(), entry);
                    }
                }
            }

            let stopping: Vec<_> = diff
                .stop
                .iter()
                .filter_map(|descriptor| entries.shift_remove(descriptor.key()))
                .collect();

            (diff, stopping)
        };

        for (prev, next) in diff.superseded() {
            tracing::debug!(from = %prev.key(), to = %next.key(), "effect superseded");
        }

        for entry in stopping {
            let key = entry.descriptor.key().clone();
            match entry.teardown {
                Some(teardown) => {
                    if let Err(message) = self.guarded(|| teardown.run()) {
                        tracing::error!(%key, %message, "effect teardown failed");
                        report.failures.push(EffectError::TeardownFailed {
                            key: key.clone(),
                            message,
                        });
                    }
                    tracing::debug!(%key, "effect stopped");
                    report.stopped.push(key);
                }
                None => tracing::trace!(%key, state = ?entry.state, "entry evicted"),
            }
        }

        report.kept = diff.keep;

        for descriptor in &diff.start {
            let key = descriptor.key();
            let body = match self.entries.lock().get(key) {
                Some(entry) => Arc::clone(&entry.body),
                None => continue,
            };

            let outcome = match self.guarded(|| body.start(store)) {
                Ok(Ok(teardown)) => Ok(teardown),
                Ok(Err(err)) => Err(err.to_string()),
                Err(message) => Err(message),
            };

            let orphaned = {
                let mut entries = self.entries.lock();
                match entries.get_mut(key) {
                    Some(entry) => {
                        match outcome {
                            Ok(teardown) => {
                                entry.state = EntryState::Running;
                                entry.teardown = Some(teardown);
                                tracing::debug!(%key, ref_count = entry.ref_count, "effect started");
                                report.started.push(key.clone());
                            }
                            Err(message) => {
                                entry.state = EntryState::Failed;
                                tracing::error!(%key, %message, "effect failed to start");
                                report.failed.push(key.clone());
                                report.failures.push(EffectError::StartFailed {
                                    key: key.clone(),
                                    message,
                                });
                            }
                        }
                        None
                    }
                    None => outcome.ok(),
                }
            };

            // The entry was withdrawn by the body itself; undo what it started.
            if let Some(teardown) = orphaned {
                tracing::warn!(%key, "effect released while starting");
                teardown.run();
            }
        }

        Ok(report)
    }

    /// Stop every running effect and clear the registry.
    pub fn shutdown(&self) -> Result<CommitReport> {
        let _guard = self.begin_commit()?;
        let mut report = CommitReport::default();

        let drained: Vec<_> = self.entries.lock().drain(..).collect();
        for (key, entry) in drained {
            if let Some(teardown) = entry.teardown {
                if let Err(message) = self.guarded(|| teardown.run()) {
                    tracing::error!(%key, %message, "effect teardown failed");
                    report.failures.push(EffectError::TeardownFailed {
                        key: key.clone(),
                        message,
                    });
                }
                report.stopped.push(key);
            }
        }

        tracing::debug!(stopped = report.stopped.len(), "registry shut down");
        Ok(report)
    }

    /// State of the entry for `key`, if any.
    pub fn state(&self, key: &str) -> Option<EntryState> {
        self.entries.lock().get(key).map(|entry| entry.state)
    }

    /// Reference count of `key`: the number of sessions that requested it in
    /// the last committed cycle, or in the current pass if it has not started
    /// yet. At least 1 while the entry exists.
    pub fn ref_count(&self, key: &str) -> Option<usize> {
        self.entries.lock().get(key).map(|entry| entry.ref_count)
    }

    /// Whether `key` has a running effect.
    pub fn is_running(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| entry.is_running())
    }

    /// All keys with an entry, in insertion order.
    pub fn keys(&self) -> Vec<EffectKey> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn begin_commit(&self) -> Result<CommitGuard<'_>> {
        if self.committing.swap(true, Ordering::SeqCst) {
            return Err(EffectError::ReentrantCommit);
        }
        Ok(CommitGuard(&self.committing))
    }

    fn guarded<T>(&self, f: impl FnOnce() -> T) -> std::result::Result<T, String> {
        if self.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
        } else {
            Ok(f())
        }
    }
}

impl<S> Default for EffectRegistry<S> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<S> std::fmt::Debug for EffectRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("entries", &self.entries.lock().values().collect::<Vec<_>>())
            .field("committing", &self.is_committing())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
