//! The seam between channels and the script context hosting their stubs.
//!
//! A [`ScriptContext`] evaluates and injects script text and routes messages
//! posted by script code to named [`MessageHandler`]s.

use serde_json::Value;
use std::sync::Arc;

use crate::error::BridgeResult;

/// Script text plus the URL it is reported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub source: String,
    pub url: String,
}

impl ScriptSource {
    pub fn new(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            url: url.into(),
        }
    }
}

/// Receives messages posted by script code under a handler name
pub trait MessageHandler: Send + Sync {
    /// Fire-and-forget message
    fn did_receive(&self, body: &Value);

    /// Message whose result is returned to the posting script
    fn did_receive_sync(&self, body: &Value) -> BridgeResult<Value>;
}

/// A script context that channels can inject stubs into
pub trait ScriptContext: Send + Sync {
    /// Stable identifier of this context
    fn id(&self) -> u64;

    /// Evaluate `source` for its side effects, recording its URL
    fn inject(&self, source: &ScriptSource) -> BridgeResult<()>;

    /// Evaluate `script` and return its JSON value
    fn evaluate(&self, script: &str) -> BridgeResult<Value>;

    /// Schedule `script` for evaluation. Scripts run in the order they were
    /// scheduled.
    fn evaluate_async(&self, script: &str) -> BridgeResult<()>;

    fn add_message_handler(&self, name: &str, handler: Arc<dyn MessageHandler>) -> BridgeResult<()>;

    /// Returns whether a handler was registered under `name`
    fn remove_message_handler(&self, name: &str) -> bool;
}
