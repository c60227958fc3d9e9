//! Interception Sessions
//!
//! A session records the effects one selector evaluation asks for. The
//! wrapped selection primitive opens a session, hands it to the selector as
//! an explicit `&mut Session` argument, and closes it as soon as the selector
//! returns. Nothing is started here: a session only records intent.
//!
//! # One Session at a Time
//!
//! Each context owns one [`Interceptor`]. Only one session may be open on it
//! at a time; opening a second one (for example, a selector that evaluates
//! another wrapped selector from inside its own body) is a usage error.
//!
//! The open flag is cleared when the session is dropped, so a selector that
//! panics does not leave the interceptor wedged.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::{EffectError, Result};

use super::body::EffectRequest;
use super::descriptor::EffectKey;
use super::param::IntoParams;
use crate::context::ParamEffect;

/// Unique identifier for a session, used in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// The raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Gate that hands out sessions for one context.
#[derive(Debug, Default)]
pub struct Interceptor {
    open: AtomicBool,
    next_id: AtomicU64,
}

impl Interceptor {
    /// Create an interceptor with no open session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin recording a selector evaluation.
    pub fn open<S>(&self) -> Result<Session<'_, S>> {
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(EffectError::SessionAlreadyOpen);
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(session = id.raw(), "session opened");

        Ok(Session {
            interceptor: self,
            id,
            pending: IndexMap::new(),
            error: None,
        })
    }

    /// Whether a session is currently recording.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Recording of the effects requested during one selector evaluation.
pub struct Session<'a, S> {
    interceptor: &'a Interceptor,
    id: SessionId,
    pending: IndexMap<EffectKey, EffectRequest<S>>,
    error: Option<EffectError>,
}

impl<'a, S> Session<'a, S> {
    /// This session's identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Record a request. A key already pending in this session is ignored,
    /// so one evaluation counts once per key no matter how often it asks.
    pub fn request(&mut self, request: EffectRequest<S>) {
        if self.pending.contains_key(request.key()) {
            tracing::trace!(session = self.id.raw(), key = %request.key(), "duplicate request ignored");
            return;
        }
        tracing::trace!(session = self.id.raw(), key = %request.key(), "effect requested");
        self.pending.insert(request.key().clone(), request);
    }

    /// Build a request from a parameterized effect and record it.
    ///
    /// Invalid parameters do not interrupt the selector; the first such error
    /// is reported when the session closes.
    pub fn request_with<P>(&mut self, effect: &ParamEffect<P, S>, params: P)
    where
        P: IntoParams + Send + Sync + 'static,
        S: 'static,
    {
        match effect.with(params) {
            Ok(request) => self.request(request),
            Err(err) => {
                tracing::warn!(session = self.id.raw(), effect = effect.name(), %err, "invalid effect request");
                self.error.get_or_insert(err);
            }
        }
    }

    /// Number of distinct keys recorded so far.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Stop recording and return the requests in first-request order.
    pub fn close(mut self) -> Result<Vec<EffectRequest<S>>> {
        tracing::trace!(session = self.id.raw(), requests = self.pending.len(), "session closed");
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        Ok(std::mem::take(&mut self.pending).into_values().collect())
    }
}

impl<S> Drop for Session<'_, S> {
    fn drop(&mut self) {
        self.interceptor.open.store(false, Ordering::SeqCst);
    }
}
