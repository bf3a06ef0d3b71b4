//! Conversion between script exceptions and native errors.
//!
//! A thrown script value becomes a [`ScriptException`]. If a handler is
//! installed it receives the exception instead of the caller. The handler is
//! detached while it runs, so an exception raised from inside it reaches its
//! own caller as a plain error. Afterwards it is put back whatever the
//! outcome, unless a new handler was installed while it ran.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use nodekit_engine::{ContextId, EngineResult, ScriptEngine, ValueRef};

use crate::error::{RuntimeError, RuntimeResult};

/// An exception raised by script code
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{name}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ScriptException {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: Option<String>,
    pub line: Option<u32>,
}

impl ScriptException {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            source_url: None,
            line: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Read `name`, `message`, `stack`, `sourceURL` and `line` off a thrown
    /// value, falling back to `fileName` and `lineNumber` as QuickJS sets
    /// them. Primitives thrown directly become an `Error` carrying their
    /// string form.
    pub fn from_thrown(engine: &dyn ScriptEngine, ctx: ContextId, thrown: ValueRef) -> Self {
        let is_object = engine
            .kind_of(ctx, thrown)
            .map(|kind| kind.is_object())
            .unwrap_or(false);
        if !is_object {
            let message = engine.to_js_string(ctx, thrown).unwrap_or_default();
            return Self::new("Error", message);
        }

        let property = |name: &str| -> Option<ValueRef> {
            let value = engine.get_property(ctx, thrown, name).ok()?;
            let kind = engine.kind_of(ctx, value).ok()?;
            (!kind.is_nullish()).then_some(value)
        };
        let text = |name: &str| property(name).and_then(|v| engine.to_js_string(ctx, v).ok());

        Self {
            name: text("name").unwrap_or_else(|| "Error".to_string()),
            message: text("message").unwrap_or_default(),
            stack: text("stack"),
            source_url: text("sourceURL").or_else(|| text("fileName")),
            line: property("line")
                .or_else(|| property("lineNumber"))
                .and_then(|v| engine.to_number(ctx, v).ok())
                .filter(|n| n.is_finite() && *n >= 0.0)
                .map(|n| n as u32),
        }
    }
}

/// Build the engine error value thrown for a native failure
pub fn error_value(
    engine: &dyn ScriptEngine,
    ctx: ContextId,
    error: &RuntimeError,
) -> EngineResult<ValueRef> {
    match error {
        RuntimeError::Script(exception) => {
            let value = engine.make_error(ctx, &exception.name, &exception.message)?;
            if let Some(stack) = &exception.stack {
                let stack = engine.make_string(ctx, stack)?;
                engine.set_property(ctx, value, "stack", stack)?;
            }
            Ok(value)
        }
        other => engine.make_error(ctx, "Error", &other.to_string()),
    }
}

/// Callback receiving script exceptions
pub type ExceptionHandler = Arc<dyn Fn(&ScriptException) -> RuntimeResult<()> + Send + Sync>;

#[derive(Default)]
pub struct ExceptionBridge {
    handler: Mutex<Option<ExceptionHandler>>,
}

impl ExceptionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(&self, handler: ExceptionHandler) {
        *self.handler.lock() = Some(handler);
    }

    pub fn clear_handler(&self) {
        self.handler.lock().take();
    }

    /// Whether a handler is installed and not currently running
    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Route an exception to the handler, or hand it back as an error
    pub fn dispatch(&self, exception: ScriptException) -> RuntimeResult<()> {
        let Some(handler) = self.handler.lock().take() else {
            return Err(RuntimeError::Script(exception));
        };
        debug!(name = %exception.name, message = %exception.message, "Dispatching script exception");

        let reattach = handler.clone();
        let _guard = scopeguard::guard((), move |_| {
            let mut slot = self.handler.lock();
            if slot.is_none() {
                *slot = Some(reattach);
            }
        });
        handler(&exception)
    }
}
