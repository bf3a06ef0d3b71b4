//! Headless script context that records what channels ask of it.
//!
//! Useful for hosts that evaluate scripts elsewhere (a web view, a remote
//! engine) and for inspecting generated stubs. Script code is simulated by
//! posting messages directly to the registered handlers.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::context::{MessageHandler, ScriptContext, ScriptSource};
use crate::error::{BridgeError, BridgeResult};

static NEXT_RECORDING_ID: AtomicU64 = AtomicU64::new(1);

pub struct RecordingContext {
    id: u64,
    injected: Mutex<Vec<ScriptSource>>,
    evaluated: Mutex<Vec<String>>,
    scheduled: Mutex<Vec<String>>,
    responses: Mutex<FxHashMap<String, Value>>,
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingContext {
    pub fn new() -> Self {
        Self {
            id: NEXT_RECORDING_ID.fetch_add(1, Ordering::Relaxed),
            injected: Mutex::new(Vec::new()),
            evaluated: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
            responses: Mutex::new(FxHashMap::default()),
            handlers: DashMap::new(),
        }
    }

    /// Make `evaluate(script)` return `value` instead of `null`
    pub fn respond(&self, script: impl Into<String>, value: Value) {
        self.responses.lock().insert(script.into(), value);
    }

    pub fn injected(&self) -> Vec<ScriptSource> {
        self.injected.lock().clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().clone()
    }

    /// Scripts passed to `evaluate_async`, in scheduling order
    pub fn scheduled(&self) -> Vec<String> {
        self.scheduled.lock().clone()
    }

    pub fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    /// Deliver a fire-and-forget message as script code would. Returns
    /// whether a handler took it.
    pub fn post_message(&self, name: &str, body: Value) -> bool {
        match self.handler(name) {
            Some(handler) => {
                handler.did_receive(&body);
                true
            }
            None => {
                warn!(handler = name, "No message handler registered");
                false
            }
        }
    }

    /// Deliver a message and wait for its result as script code would
    pub fn post_message_sync(&self, name: &str, body: Value) -> BridgeResult<Value> {
        let handler = self
            .handler(name)
            .ok_or_else(|| BridgeError::protocol(format!("no message handler named {name}")))?;
        handler.did_receive_sync(&body)
    }
}

impl ScriptContext for RecordingContext {
    fn id(&self) -> u64 {
        self.id
    }

    fn inject(&self, source: &ScriptSource) -> BridgeResult<()> {
        self.injected.lock().push(source.clone());
        Ok(())
    }

    fn evaluate(&self, script: &str) -> BridgeResult<Value> {
        self.evaluated.lock().push(script.to_string());
        Ok(self
            .responses
            .lock()
            .get(script)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn evaluate_async(&self, script: &str) -> BridgeResult<()> {
        self.scheduled.lock().push(script.to_string());
        Ok(())
    }

    fn add_message_handler(&self, name: &str, handler: Arc<dyn MessageHandler>) -> BridgeResult<()> {
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    fn remove_message_handler(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl MessageHandler for Echo {
        fn did_receive(&self, _body: &Value) {}

        fn did_receive_sync(&self, body: &Value) -> BridgeResult<Value> {
            Ok(body.clone())
        }
    }

    #[test]
    fn test_records_and_routes() {
        let context = RecordingContext::new();
        context.respond("1 + 1", json!(2));
        assert_eq!(context.evaluate("1 + 1").unwrap(), json!(2));
        assert_eq!(context.evaluate("other").unwrap(), Value::Null);
        assert_eq!(context.evaluated().len(), 2);

        context.add_message_handler("7", Arc::new(Echo)).unwrap();
        assert_eq!(context.handler_names(), vec!["7"]);
        assert_eq!(context.post_message_sync("7", json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert!(context.post_message("7", Value::Null));

        assert!(context.remove_message_handler("7"));
        assert!(!context.post_message("7", Value::Null));
        assert!(context.post_message_sync("7", Value::Null).unwrap_err().is_protocol());
    }

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(RecordingContext::new().id(), RecordingContext::new().id());
    }
}
