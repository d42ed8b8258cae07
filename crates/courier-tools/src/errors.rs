//! Tool error types.

use std::io;

use thiserror::Error;

use crate::invocation::InvocationState;

/// Errors that can occur while confirming or executing a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Parameter validation failed.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The invocation state machine refused a transition.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the invocation was in.
        from: InvocationState,
        /// State that was requested.
        to: InvocationState,
    },

    /// Operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (catch-all).
    #[error("{message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl ToolError {
    /// Shorthand for a [`ToolError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
