//! Core error types for script engine operations
//!
//! Thrown script values are carried as handles so the layer above can read
//! `name`, `message` and `stack` off the error object while it is still alive.

use thiserror::Error;

use crate::types::{ContextId, ValueRef};

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Structured error types for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to create an engine context
    #[error("Context creation failed: {message}")]
    ContextCreation { message: String },

    /// The context was released and can no longer be used
    #[error("Context {0} has been released")]
    ContextReleased(ContextId),

    /// A script threw; the payload is the thrown value
    #[error("Uncaught exception (value {0})")]
    Exception(ValueRef),

    /// A script error reported without a live error value
    #[error("{error_type}: {message}")]
    ScriptError {
        error_type: String,
        message: String,
        stack: Option<String>,
    },

    /// Type conversion error
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// The handle does not refer to a live value
    #[error("Invalid value handle {0}")]
    InvalidHandle(ValueRef),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScriptError {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The thrown value, if this error carries one
    pub fn thrown_value(&self) -> Option<ValueRef> {
        match self {
            Self::Exception(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the error type name (e.g., "TypeError", "RangeError")
    pub fn error_type(&self) -> &str {
        match self {
            Self::ScriptError { error_type, .. } => error_type,
            Self::Exception(_) => "Error",
            Self::TypeError { .. } => "TypeError",
            Self::ContextCreation { .. } => "ContextError",
            Self::ContextReleased(_) => "ContextError",
            Self::InvalidHandle(_) => "ReferenceError",
            Self::JsonError(_) => "SyntaxError",
            Self::Internal(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_display() {
        let err = EngineError::script_error("TypeError", "undefined is not a function");
        assert_eq!(err.to_string(), "TypeError: undefined is not a function");
        assert_eq!(err.error_type(), "TypeError");
    }

    #[test]
    fn test_type_error_display() {
        let err = EngineError::type_error("number", "string");
        assert_eq!(err.to_string(), "Type error: expected number, got string");
    }

    #[test]
    fn test_thrown_value() {
        let value = ValueRef::from_raw(7);
        assert_eq!(EngineError::Exception(value).thrown_value(), Some(value));
        assert_eq!(EngineError::internal("boom").thrown_value(), None);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: EngineError = json_err.into();
        assert!(matches!(err, EngineError::JsonError(_)));
        assert_eq!(err.error_type(), "SyntaxError");
    }
}
