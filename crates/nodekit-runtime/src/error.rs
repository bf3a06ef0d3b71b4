//! Error types for nodekit-runtime
//!
//! Re-exports core errors from nodekit-engine and adds runtime-specific errors.

use thiserror::Error;

use crate::exception::ScriptException;

// Re-export core error types
pub use nodekit_engine::{EngineError as CoreError, EngineResult as CoreResult};

/// Errors that can occur during runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Core engine error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A script raised an exception and no handler consumed it
    #[error("Uncaught {0}")]
    Script(ScriptException),

    /// A value was handed to a context of another engine group
    #[error("Value from engine group {actual} used in engine group {expected}")]
    CrossGroupViolation { expected: u64, actual: u64 },

    /// The context was closed and accepts no more work
    #[error("Engine context is closed")]
    ContextClosed,

    /// The queue thread posted to its own queue while it was full
    #[error("Engine queue is full ({0} operations waiting)")]
    QueueFull(usize),

    /// An operation panicked on the engine queue
    #[error("Engine queue panic: {0}")]
    Panicked(String),
}

impl RuntimeError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Core(CoreError::script_error(error_type, message))
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Core(CoreError::type_error(expected, actual))
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Core(CoreError::Internal(message.into()))
    }

    /// The script exception, if this error carries one
    pub fn as_script_exception(&self) -> Option<&ScriptException> {
        match self {
            Self::Script(exception) => Some(exception),
            _ => None,
        }
    }

    /// Whether the error is a type mismatch raised while marshaling
    pub fn is_type_error(&self) -> bool {
        matches!(self, Self::Core(CoreError::TypeError { .. }))
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Core(CoreError::JsonError(e))
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
