//! Context Configuration
//!
//! Options that tune how an [`EffectContext`](crate::EffectContext) treats
//! effect failures and its own shutdown. Every field has a default, so an
//! empty JSON object is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::{EffectError, Result};

/// Configuration for one effect context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectConfig {
    /// Diagnostic name attached to the context's tracing spans.
    pub label: Option<String>,

    /// Recover panicking effect bodies and teardowns as failures instead of
    /// unwinding through `commit`.
    pub catch_panics: bool,

    /// Tear down every running effect when the context is dropped.
    pub teardown_on_drop: bool,

    /// Maximum number of parameters a descriptor may carry.
    pub max_params: usize,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            label: None,
            catch_panics: true,
            teardown_on_drop: true,
            max_params: 16,
        }
    }
}

impl EffectConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EffectError::Config(e.to_string()))
    }

    /// Set the diagnostic label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Enable or disable panic recovery.
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }
}
