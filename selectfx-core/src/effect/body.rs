//! Effect Bodies
//!
//! An effect body is the code that actually performs a side effect, such as
//! dispatching a fetch action to the store. It receives the context's store
//! handle and may return a [`Teardown`] that cancels whatever it started.
//!
//! Bodies run only at commit time, at most once per key while that key stays
//! requested. The engine never awaits them: an async body spawns its work and
//! returns, and cancellation goes through the teardown.

use std::fmt;
use std::sync::Arc;

use super::descriptor::{EffectDescriptor, EffectKey};

/// Error type effect bodies may fail with.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// What an effect body produces when started.
pub type EffectOutcome = Result<Teardown, BodyError>;

/// Cleanup procedure returned by a started effect.
///
/// Runs at most once: `run` consumes the teardown.
#[derive(Default)]
pub struct Teardown(Option<Box<dyn FnOnce() + Send>>);

impl Teardown {
    /// A teardown that does nothing.
    pub fn none() -> Self {
        Self(None)
    }

    /// Wrap a cleanup function.
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(cleanup)))
    }

    /// Whether this teardown has any work to do.
    pub fn is_noop(&self) -> bool {
        self.0.is_none()
    }

    /// Run the cleanup.
    pub fn run(self) {
        if let Some(cleanup) = self.0 {
            cleanup();
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Teardown")
            .field(&if self.is_noop() { "none" } else { "some" })
            .finish()
    }
}

/// Values an effect body may return.
pub trait IntoOutcome {
    /// Normalize into an [`EffectOutcome`].
    fn into_outcome(self) -> EffectOutcome;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> EffectOutcome {
        Ok(Teardown::none())
    }
}

impl IntoOutcome for Teardown {
    fn into_outcome(self) -> EffectOutcome {
        Ok(self)
    }
}

impl<E: Into<BodyError>> IntoOutcome for Result<Teardown, E> {
    fn into_outcome(self) -> EffectOutcome {
        self.map_err(Into::into)
    }
}

impl<E: Into<BodyError>> IntoOutcome for Result<(), E> {
    fn into_outcome(self) -> EffectOutcome {
        self.map(|()| Teardown::none()).map_err(Into::into)
    }
}

/// The code behind a named effect.
///
/// `S` is the store handle the context hands to every body. Any
/// `Fn(&S) -> R` closure with `R: IntoOutcome` is a body.
pub trait EffectBody<S>: Send + Sync {
    /// Start the effect.
    fn start(&self, store: &S) -> EffectOutcome;
}

impl<S, F, R> EffectBody<S> for F
where
    F: Fn(&S) -> R + Send + Sync,
    R: IntoOutcome,
{
    fn start(&self, store: &S) -> EffectOutcome {
        self(store).into_outcome()
    }
}

/// A descriptor paired with the body to run if it gets started.
pub struct EffectRequest<S> {
    descriptor: EffectDescriptor,
    body: Arc<dyn EffectBody<S>>,
}

impl<S> EffectRequest<S> {
    /// Pair a descriptor with its body.
    pub fn new(descriptor: EffectDescriptor, body: Arc<dyn EffectBody<S>>) -> Self {
        Self { descriptor, body }
    }

    /// The requested instance.
    pub fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    /// Shorthand for the descriptor's key.
    pub fn key(&self) -> &EffectKey {
        self.descriptor.key()
    }

    pub(crate) fn body(&self) -> &Arc<dyn EffectBody<S>> {
        &self.body
    }
}

impl<S> Clone for EffectRequest<S> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            body: Arc::clone(&self.body),
        }
    }
}

impl<S> fmt::Debug for EffectRequest<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRequest")
            .field("key", self.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn teardown_runs_its_cleanup() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let teardown = Teardown::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!teardown.is_noop());

        teardown.run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closures_are_bodies() {
        let unit = |_: &()| {};
        assert!(unit.start(&()).unwrap().is_noop());

        let with_teardown = |_: &()| Teardown::new(|| {});
        assert!(!with_teardown.start(&()).unwrap().is_noop());

        let failing = |_: &()| -> Result<(), String> { Err("offline".to_string()) };
        let err = failing.start(&()).unwrap_err();
        assert_eq!(err.to_string(), "offline");
    }

    #[test]
    fn body_sees_the_store() {
        let seen = Arc::new(AtomicUsize::new(0));
        let body = |store: &Arc<AtomicUsize>| {
            store.fetch_add(5, Ordering::SeqCst);
        };

        body.start(&seen).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
