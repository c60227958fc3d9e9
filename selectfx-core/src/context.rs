//! Effect Context
//!
//! The context is the boundary between the engine and one application
//! instance. It owns the registry, scheduler and interceptor for that
//! instance and the store handle every effect body receives, so separate
//! application instances (for example, parallel tests) never share state.
//!
//! # Surface
//!
//! - [`EffectContext::select`] is the wrapped selection primitive. It runs a
//!   selector inside an interception session and returns the selected value.
//! - [`EffectContext::effect`] registers a named effect with no parameters.
//! - [`EffectContext::param_effect`] registers a named effect whose body is
//!   built from the parameters it is requested with.
//! - [`EffectContext::commit`] is called by the host once per cycle, after
//!   its own commit phase, and is the only place effects start or stop.
//!
//! # Example
//!
//! ```rust,ignore
//! let ctx = EffectContext::new(store);
//!
//! let ensure_user = ctx.param_effect("ensureUserIsFetched", |&(id,): &(u32,), store: &AppStore| {
//!     if !store.get_state().users.contains_key(&id) {
//!         store.dispatch(Action::FetchUser(id));
//!     }
//! })?;
//!
//! // Render phase: the component only sees the selected value.
//! let user = ctx.select(&state, |state, fx| {
//!     fx.request_with(&ensure_user, (7,));
//!     state.users.get(&7).cloned()
//! })?;
//!
//! // Post-commit: the fetch is dispatched once.
//! ctx.commit()?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EffectConfig;
use crate::effect::{
    EffectBody, EffectDescriptor, EffectKey, EffectRequest, IntoOutcome, IntoParams, Params,
    Session,
};
use crate::effect::{EffectOutcome, Interceptor};
use crate::engine::{CommitReport, CycleScheduler, EffectRegistry, EntryState};
use crate::error::{EffectError, Result};

/// The store contract effect bodies rely on.
///
/// The engine never calls these methods itself; it only hands the store to
/// effect bodies.
pub trait Store: Send + Sync + 'static {
    /// Snapshot of the application state.
    type State;
    /// Actions the store accepts.
    type Action;

    /// Send an action to the store.
    fn dispatch(&self, action: Self::Action);

    /// Read the current state.
    fn get_state(&self) -> Self::State;
}

/// Unique identifier for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate a new unique context ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

type ErrorHook = Arc<dyn Fn(&EffectError) + Send + Sync>;

/// An effect registered under a name, with no parameters.
pub struct RegisteredEffect<S> {
    request: EffectRequest<S>,
}

impl<S> RegisteredEffect<S> {
    /// The request a selector passes to [`Session::request`].
    pub fn request(&self) -> EffectRequest<S> {
        self.request.clone()
    }

    /// The effect's descriptor.
    pub fn descriptor(&self) -> &EffectDescriptor {
        self.request.descriptor()
    }
}

impl<S> Clone for RegisteredEffect<S> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
        }
    }
}

impl<S> fmt::Debug for RegisteredEffect<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredEffect")
            .field("key", self.request.key())
            .finish()
    }
}

/// An effect registered under a name whose body depends on parameters.
pub struct ParamEffect<P, S> {
    name: Arc<str>,
    factory: Arc<dyn Fn(&P, &S) -> EffectOutcome + Send + Sync>,
    max_params: usize,
    _params: PhantomData<fn(P)>,
}

impl<P, S> ParamEffect<P, S>
where
    P: IntoParams + Send + Sync + 'static,
    S: 'static,
{
    /// The registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the request for one set of parameters.
    pub fn with(&self, params: P) -> Result<EffectRequest<S>> {
        let descriptor = self.descriptor(&params)?;
        let factory = Arc::clone(&self.factory);
        let body = move |store: &S| factory(&params, store);

        Ok(EffectRequest::new(descriptor, Arc::new(body)))
    }

    /// Descriptor for one set of parameters, without building a body.
    pub fn descriptor(&self, params: &P) -> Result<EffectDescriptor> {
        EffectDescriptor::new(Arc::clone(&self.name), self.params(params)?)
    }

    fn params(&self, params: &P) -> Result<Params> {
        let list = params.to_params();
        if list.len() > self.max_params {
            return Err(EffectError::UnsupportedParam {
                reason: format!(
                    "{} parameters exceed the limit of {}",
                    list.len(),
                    self.max_params
                ),
            });
        }
        Ok(list)
    }
}

impl<P, S> Clone for ParamEffect<P, S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            factory: Arc::clone(&self.factory),
            max_params: self.max_params,
            _params: PhantomData,
        }
    }
}

impl<P, S> fmt::Debug for ParamEffect<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamEffect")
            .field("name", &self.name)
            .finish()
    }
}

/// Effect engine bound to one application instance.
pub struct EffectContext<S> {
    id: ContextId,
    config: EffectConfig,
    store: Arc<S>,
    registry: EffectRegistry<S>,
    scheduler: CycleScheduler<S>,
    interceptor: Interceptor,
    names: Mutex<HashSet<Arc<str>>>,
    error_hook: Mutex<Option<ErrorHook>>,
}

impl<S> EffectContext<S>
where
    S: Send + Sync + 'static,
{
    /// Create a context with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, EffectConfig::default())
    }

    /// Create a context with an explicit configuration.
    pub fn with_config(store: S, config: EffectConfig) -> Self {
        let id = ContextId::new();
        tracing::debug!(context = id.raw(), label = ?config.label, "effect context created");

        Self {
            id,
            registry: EffectRegistry::new(config.catch_panics),
            scheduler: CycleScheduler::new(),
            interceptor: Interceptor::new(),
            store: Arc::new(store),
            names: Mutex::new(HashSet::new()),
            error_hook: Mutex::new(None),
            config,
        }
    }

    /// This context's identifier.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The configuration in use.
    pub fn config(&self) -> &EffectConfig {
        &self.config
    }

    /// The store handle supplied to every effect body.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The registry, for inspection.
    pub fn registry(&self) -> &EffectRegistry<S> {
        &self.registry
    }

    /// Install the host error boundary. It receives every start and teardown
    /// failure, in addition to the failures listed in each commit report.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&EffectError) + Send + Sync + 'static,
    {
        *self.error_hook.lock() = Some(Arc::new(hook));
    }

    /// Register a named effect with no parameters.
    pub fn effect<B>(&self, name: &str, body: B) -> Result<RegisteredEffect<S>>
    where
        B: EffectBody<S> + 'static,
    {
        let descriptor = EffectDescriptor::new(name, [])?;
        self.claim_name(name)?;

        Ok(RegisteredEffect {
            request: EffectRequest::new(descriptor, Arc::new(body)),
        })
    }

    /// Register a named effect whose body is built from its parameters.
    pub fn param_effect<P, F, R>(&self, name: &str, factory: F) -> Result<ParamEffect<P, S>>
    where
        P: IntoParams + Send + Sync + 'static,
        F: Fn(&P, &S) -> R + Send + Sync + 'static,
        R: IntoOutcome,
    {
        EffectDescriptor::new(name, [])?;
        self.claim_name(name)?;

        Ok(ParamEffect {
            name: Arc::from(name),
            factory: Arc::new(move |params: &P, store: &S| factory(params, store).into_outcome()),
            max_params: self.config.max_params,
            _params: PhantomData,
        })
    }

    /// Run a selector, recording the effects it requests.
    ///
    /// The selector receives the state and the open session; the session is
    /// closed as soon as it returns. Effects are only recorded here and start
    /// at the next [`commit`](Self::commit).
    pub fn select<St, T, F>(&self, state: &St, selector: F) -> Result<T>
    where
        St: ?Sized,
        F: FnOnce(&St, &mut Session<'_, S>) -> T,
    {
        let mut session = self.interceptor.open()?;
        let value = selector(state, &mut session);
        let requests = session.close()?;
        self.scheduler.collect(&self.registry, requests);
        Ok(value)
    }

    /// Signal that the host finished a cycle: reconcile everything collected
    /// since the last commit.
    ///
    /// Calling this from inside a selector fails with
    /// [`EffectError::CommitDuringEvaluation`]; effects never start while a
    /// selector is being evaluated.
    pub fn commit(&self) -> Result<CommitReport> {
        self.ensure_not_evaluating()?;
        let _span = tracing::debug_span!(
            "commit",
            context = self.id.raw(),
            label = ?self.config.label
        )
        .entered();

        let report = self.scheduler.finish_cycle(&self.registry, &self.store)?;
        self.report_failures(&report);
        Ok(report)
    }

    /// Drop everything collected since the last commit, for hosts that throw
    /// away a speculative render pass. Returns the number of discarded keys.
    pub fn discard_pass(&self) -> usize {
        self.scheduler.discard_pass(&self.registry)
    }

    /// Withdraw one selector's request for `key` from the current pass.
    ///
    /// Once no selector in the pass asks for the key anymore, the next commit
    /// treats it as unrequested: it never starts, or stops if it was running.
    /// Returns whether the key has no demand left in this pass.
    pub fn release(&self, key: &str) -> bool {
        self.scheduler.release(&self.registry, key)
    }

    /// Stop every running effect.
    pub fn shutdown(&self) -> Result<CommitReport> {
        self.ensure_not_evaluating()?;
        self.scheduler.discard_pass(&self.registry);
        let report = self.registry.shutdown()?;
        self.report_failures(&report);
        Ok(report)
    }

    /// Whether the effect with `key` is running.
    pub fn is_running(&self, key: &str) -> bool {
        self.registry.is_running(key)
    }

    /// State of the effect with `key`, if it has an entry.
    pub fn state(&self, key: &str) -> Option<EntryState> {
        self.registry.state(key)
    }

    /// Keys collected in the current, uncommitted pass.
    pub fn pending_keys(&self) -> Vec<EffectKey> {
        self.scheduler.pending_keys()
    }

    fn ensure_not_evaluating(&self) -> Result<()> {
        if self.interceptor.is_open() {
            tracing::warn!(context = self.id.raw(), "commit requested during evaluation");
            return Err(EffectError::CommitDuringEvaluation);
        }
        Ok(())
    }

    fn claim_name(&self, name: &str) -> Result<()> {
        if !self.names.lock().insert(Arc::from(name)) {
            return Err(EffectError::DuplicateEffectName {
                name: name.to_string(),
            });
        }
        tracing::trace!(context = self.id.raw(), effect = name, "effect registered");
        Ok(())
    }

    fn report_failures(&self, report: &CommitReport) {
        if report.failures.is_empty() {
            return;
        }
        let hook = self.error_hook.lock().clone();
        if let Some(hook) = hook {
            for failure in &report.failures {
                hook(failure);
            }
        }
    }
}

impl<S> Drop for EffectContext<S> {
    fn drop(&mut self) {
        if !self.config.teardown_on_drop {
            return;
        }
        match self.registry.shutdown() {
            Ok(report) => {
                for failure in &report.failures {
                    tracing::error!(context = self.id.raw(), %failure, "teardown failed during drop");
                }
            }
            Err(err) => tracing::warn!(context = self.id.raw(), %err, "context dropped mid-commit"),
        }
    }
}

impl<S> fmt::Debug for EffectContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectContext")
            .field("id", &self.id)
            .field("label", &self.config.label)
            .field("registry", &self.registry)
            .finish()
    }
}
