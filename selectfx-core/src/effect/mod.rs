//! Effect Requests
//!
//! This module holds the values that flow from selectors into the engine:
//! parameters, descriptors, bodies, and the session that records them.
//!
//! # Concepts
//!
//! ## Descriptors
//!
//! A descriptor identifies one effect instance by name and parameters. Its
//! key is canonical, so two descriptors built from deep-equal parameters on
//! different renders share a key and are treated as the same instance.
//!
//! ## Bodies
//!
//! A body performs the side effect when the engine decides to start it, and
//! may hand back a teardown that the engine calls exactly once when no
//! selector needs the effect anymore.
//!
//! ## Sessions
//!
//! A session is the recording of one selector evaluation. Selectors receive
//! it explicitly and call [`Session::request`] on it; nothing runs until the
//! cycle commits.

mod body;
mod descriptor;
mod param;
mod session;

pub use body::{BodyError, EffectBody, EffectOutcome, EffectRequest, IntoOutcome, Teardown};
pub use descriptor::{key_of, make_descriptor, same_instance, EffectDescriptor, EffectKey};
pub use param::{IntoParams, Param, Params};
pub use session::{Interceptor, Session, SessionId};
