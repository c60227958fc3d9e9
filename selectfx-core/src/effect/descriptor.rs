//! Effect Descriptors and Keys
//!
//! A descriptor names one potential effect instance: the effect's kind plus
//! the parameters it was requested with. Its [`EffectKey`] is the canonical
//! string form used by the registry, `name:` followed by the JSON encoding of
//! the parameter list, e.g. `ensureUserIsFetched:[7]`.
//!
//! Names may not contain `:`, which keeps keys collision-free: the name is
//! always everything before the first separator.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::{EffectError, Result};

use super::param::{Param, Params};

/// Canonical identity of an effect instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectKey(Arc<str>);

impl EffectKey {
    /// Wrap an already-canonical key string.
    ///
    /// Useful for lookups; keys for new effects should come from
    /// [`key_of`] so they are guaranteed canonical.
    pub fn from_raw(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The effect name part of the key.
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or(&*self.0, |(name, _)| name)
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EffectKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Immutable identity of one requested effect instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectDescriptor {
    name: Arc<str>,
    params: Params,
    key: EffectKey,
}

impl EffectDescriptor {
    /// Create a descriptor, validating the name and every parameter.
    pub fn new<I>(name: impl Into<Arc<str>>, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = Param>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(EffectError::EmptyName);
        }
        if name.contains(':') {
            return Err(EffectError::InvalidName {
                name: name.to_string(),
            });
        }

        let params = params
            .into_iter()
            .map(Param::validate)
            .collect::<Result<Params>>()?;

        let encoded = serde_json::to_string(params.as_slice()).map_err(|e| {
            EffectError::UnsupportedParam {
                reason: e.to_string(),
            }
        })?;
        let key = EffectKey(format!("{name}:{encoded}").into());

        Ok(Self { name, params, key })
    }

    /// The effect kind.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical parameter list.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// The canonical key.
    pub fn key(&self) -> &EffectKey {
        &self.key
    }
}

/// Build a descriptor. Fails on an empty name or unsupported parameters.
pub fn make_descriptor<I>(name: &str, params: I) -> Result<EffectDescriptor>
where
    I: IntoIterator<Item = Param>,
{
    EffectDescriptor::new(name, params)
}

/// Canonical key of a descriptor. Equal for deep-equal parameters.
pub fn key_of(descriptor: &EffectDescriptor) -> EffectKey {
    descriptor.key.clone()
}

/// Whether two descriptors denote the same effect instance.
pub fn same_instance(a: &EffectDescriptor, b: &EffectDescriptor) -> bool {
    a.name == b.name && a.key == b.key
}
