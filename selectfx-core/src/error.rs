//! Error Types
//!
//! Two families of errors flow through the engine:
//!
//! - Usage errors (empty names, unsupported parameters, reentrant sessions or
//!   commits, commits from inside a selector, duplicate effect names). These
//!   are returned as `Err` right away and leave all registry state untouched.
//! - Effect failures (a body or a teardown that failed or panicked). These
//!   never abort a commit. They are collected in the commit report and
//!   forwarded to the host error hook.

use thiserror::Error;

use crate::effect::EffectKey;

/// Error type for all engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    /// An effect descriptor was built with an empty name.
    #[error("effect name must not be empty")]
    EmptyName,

    /// An effect name contains the key separator.
    #[error("effect name '{name}' must not contain ':'")]
    InvalidName { name: String },

    /// A parameter value falls outside the supported value domain.
    #[error("unsupported effect parameter: {reason}")]
    UnsupportedParam { reason: String },

    /// A session was opened while another one was still recording.
    #[error("an interception session is already open on this context")]
    SessionAlreadyOpen,

    /// `commit` was called while a commit for the same registry was running.
    #[error("commit re-entered while another commit is in progress")]
    ReentrantCommit,

    /// `commit` or `shutdown` was called while a selector was still being
    /// evaluated.
    #[error("commit called while a selector is being evaluated")]
    CommitDuringEvaluation,

    /// Two effects were registered under the same name.
    #[error("effect '{name}' is already registered")]
    DuplicateEffectName { name: String },

    /// An effect body failed or panicked while starting.
    #[error("effect {key} failed to start: {message}")]
    StartFailed { key: EffectKey, message: String },

    /// A teardown panicked while stopping an effect.
    #[error("teardown of effect {key} failed: {message}")]
    TeardownFailed { key: EffectKey, message: String },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EffectError {
    /// Whether this error reports a violated usage invariant rather than a
    /// failure inside an effect body.
    pub fn is_usage_error(&self) -> bool {
        !matches!(
            self,
            EffectError::StartFailed { .. } | EffectError::TeardownFailed { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = EffectError> = std::result::Result<T, E>;
