//! Error taxonomy for the simulation core.

use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::Handle;

/// Error type returned by user callbacks and host commands.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, SimError>;

/// Hook point a callback was registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Initialize,
    Presolve,
    Postsolve,
    Command,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Initialize => "initialize",
            Hook::Presolve => "presolve",
            Hook::Postsolve => "postsolve",
            Hook::Command => "command",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid particle handle {0}")]
    InvalidHandle(Handle),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("invalid value for attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("{hook} callback failed: {source}")]
    CallbackFailure {
        hook: Hook,
        #[source]
        source: CallbackError,
    },

    #[error("failed to grow particle storage: {0}")]
    AllocationFailure(#[from] std::collections::TryReserveError),

    #[error("operation not allowed: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SimError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaViolation(message.into())
    }

    pub fn attribute(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn callback(hook: Hook, source: CallbackError) -> Self {
        Self::CallbackFailure { hook, source }
    }

    /// Whether the loop must stop regardless of the configured error policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailure(_) | Self::SchemaViolation(_) | Self::Config(_)
        )
    }
}
