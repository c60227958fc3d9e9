//! Registry Entries
//!
//! This module defines the per-key records the registry keeps.

use std::fmt;
use std::sync::Arc;

use crate::effect::{EffectBody, EffectDescriptor, EffectRequest, Teardown};

/// Lifecycle state of an active entry.
///
/// Keys move `absent -> Requested -> Running -> absent`. A running effect
/// that is still needed stays `Running`; it never goes back to `Requested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Requested during evaluation, waiting for the next commit to start it.
    Requested,

    /// Started; holds its teardown until released.
    Running,

    /// The body failed to start. Not retried while the key stays requested.
    Failed,
}

/// An entry in the effect registry.
pub(crate) struct Entry<S> {
    /// Identity of the effect instance.
    pub(crate) descriptor: EffectDescriptor,

    /// Current lifecycle state.
    pub(crate) state: EntryState,

    /// Number of sessions that requested this key: in the last committed
    /// cycle once started, in the current pass while `Requested`. Never zero.
    pub(crate) ref_count: usize,

    /// Body to run on start.
    pub(crate) body: Arc<dyn EffectBody<S>>,

    /// Cleanup returned by the body. Present only while `Running`.
    pub(crate) teardown: Option<Teardown>,
}

impl<S> Entry<S> {
    /// Create an entry in the `Requested` state for its first requester.
    pub(crate) fn requested(request: &EffectRequest<S>) -> Self {
        Self {
            descriptor: request.descriptor().clone(),
            state: EntryState::Requested,
            ref_count: 1,
            body: Arc::clone(request.body()),
            teardown: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == EntryState::Running
    }
}

impl<S> fmt::Debug for Entry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", self.descriptor.key())
            .field("state", &self.state)
            .field("ref_count", &self.ref_count)
            .field("teardown", &self.teardown)
            .finish()
    }
}
