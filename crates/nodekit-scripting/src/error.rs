//! Error types for nodekit-scripting

use thiserror::Error;

use nodekit_runtime::ScriptException;

pub use nodekit_runtime::{RuntimeError, RuntimeResult};

/// Errors raised while binding plugins or dispatching script messages
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Runtime error from the underlying engine context
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A message that does not follow the wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An argument could not be converted to the declared parameter type
    #[error("Argument {index} of {method}: {message}")]
    Argument {
        method: String,
        index: usize,
        message: String,
    },

    /// The native method reported a failure
    #[error("{method} failed: {message}")]
    Invocation { method: String, message: String },

    /// The channel was disposed
    #[error("Channel {0} is not bound")]
    Unbound(String),

    /// The plugin cannot be bound the way it was asked to
    #[error("Cannot bind {plugin}: {message}")]
    Bind { plugin: String, message: String },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an invocation error
    pub fn invocation(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Whether the message should be logged and dropped instead of surfaced
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// The error thrown into script code for this failure
    pub fn into_runtime(self) -> RuntimeError {
        match self {
            Self::Runtime(e) => e,
            other => RuntimeError::Script(ScriptException::new("Error", other.to_string())),
        }
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_is_transparent() {
        let err: BridgeError = RuntimeError::ContextClosed.into();
        assert_eq!(err.to_string(), "Engine context is closed");
        assert!(!err.is_protocol());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            BridgeError::protocol("missing $opcode").to_string(),
            "Protocol error: missing $opcode"
        );
        assert_eq!(
            BridgeError::invocation("add", "overflow").to_string(),
            "add failed: overflow"
        );
        let err = BridgeError::Argument {
            method: "add".into(),
            index: 1,
            message: "invalid type: string \"x\", expected i64".into(),
        };
        assert!(err.to_string().starts_with("Argument 1 of add:"));
    }

    #[test]
    fn test_into_runtime() {
        let thrown = BridgeError::invocation("add", "overflow").into_runtime();
        let exception = thrown.as_script_exception().unwrap();
        assert_eq!(exception.name, "Error");
        assert_eq!(exception.message, "add failed: overflow");

        let closed = BridgeError::from(RuntimeError::ContextClosed).into_runtime();
        assert!(matches!(closed, RuntimeError::ContextClosed));
    }
}
