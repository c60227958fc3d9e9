//! Selectfx Core
//!
//! This crate lets selectors declare side effects ("make sure this user is
//! fetched") without the component that calls them knowing an effect was
//! ever scheduled. It implements:
//!
//! - Effect descriptors with structural identity
//! - Interception sessions that record what a selector asked for
//! - A ref-counted registry of running effects
//! - A two-phase scheduler: collect during render, commit afterwards
//!
//! Each distinct effect (name plus parameters) is started exactly once while
//! some selector needs it, and torn down exactly once when none does.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `effect`: parameters, descriptors, bodies and sessions
//! - `engine`: the registry, identity diff and cycle scheduler
//! - `context`: the per-application boundary tying it all together
//!
//! # Example
//!
//! ```rust,ignore
//! use selectfx_core::{EffectContext, Teardown};
//!
//! let ctx = EffectContext::new(store);
//! let ensure_user = ctx.param_effect("ensureUserIsFetched", |&(id,): &(u32,), store: &AppStore| {
//!     store.dispatch(Action::FetchUser(id));
//!     Teardown::none()
//! })?;
//!
//! let user = ctx.select(&state, |state, fx| {
//!     fx.request_with(&ensure_user, (props.user_id,));
//!     state.users.get(&props.user_id).cloned()
//! })?;
//!
//! // After the host commits its render:
//! ctx.commit()?;
//! ```

pub mod config;
pub mod context;
pub mod effect;
pub mod engine;
pub mod error;

pub use config::EffectConfig;
pub use context::{ContextId, EffectContext, ParamEffect, RegisteredEffect, Store};
pub use effect::{
    key_of, make_descriptor, same_instance, EffectDescriptor, EffectKey, EffectRequest, Param,
    Session, Teardown,
};
pub use engine::{CommitReport, EntryState};
pub use error::{EffectError, Result};
