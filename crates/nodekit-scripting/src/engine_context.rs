//! [`ScriptContext`] over an [`EngineContext`].
//!
//! Script code reaches native handlers through two global functions,
//! `__nk_post_message(name, body)` and `__nk_post_message_sync(name, body)`.
//! Attaching also injects the `NKScripting` bootstrap script.

use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use nodekit_runtime::{EngineContext, NativeCallable, NativeType, NativeValue, RuntimeError};

use crate::context::{MessageHandler, ScriptContext, ScriptSource};
use crate::error::{BridgeError, BridgeResult};

pub const POST_MESSAGE: &str = "__nk_post_message";
pub const POST_MESSAGE_SYNC: &str = "__nk_post_message_sync";

pub const BOOTSTRAP_SOURCE: &str = include_str!("../js/nkscripting.js");
pub const BOOTSTRAP_URL: &str = "nodekit://lib-scripting/nkscripting.js";

type HandlerMap = Arc<DashMap<String, Arc<dyn MessageHandler>>>;

pub struct EngineScriptContext {
    ctx: EngineContext,
    handlers: HandlerMap,
}

impl EngineScriptContext {
    /// Install the message functions and the bootstrap script on `ctx`.
    ///
    /// A context can be attached once; a second attach fails.
    pub fn attach(ctx: EngineContext) -> BridgeResult<Arc<Self>> {
        let global = ctx.global_object()?;
        if global.has(POST_MESSAGE)? {
            return Err(RuntimeError::internal(format!(
                "{POST_MESSAGE} is already installed in {}",
                ctx.id()
            ))
            .into());
        }

        let handlers: HandlerMap = Arc::new(DashMap::new());
        for (name, sync) in [(POST_MESSAGE, false), (POST_MESSAGE_SYNC, true)] {
            let function = ctx.make_function(name, post_callable(handlers.clone(), sync))?;
            global.set(name, function)?;
        }

        let context = Arc::new(Self { ctx, handlers });
        context.inject(&ScriptSource::new(BOOTSTRAP_SOURCE, BOOTSTRAP_URL))?;
        debug!(context = context.id(), "Script context attached");
        Ok(context)
    }

    pub fn engine_context(&self) -> &EngineContext {
        &self.ctx
    }
}

fn post_callable(handlers: HandlerMap, sync: bool) -> NativeCallable {
    NativeCallable::new(vec![NativeType::String, NativeType::Any], move |args| {
        let name = args[0].as_str().unwrap_or_default().to_string();
        let body = args[1].to_json()?;
        // Cloned out so the handler may add or remove handlers itself
        let handler = handlers.get(&name).map(|entry| entry.value().clone());
        let Some(handler) = handler else {
            warn!(handler = %name, "No message handler registered");
            return Ok(if sync { NativeValue::Bool(false) } else { NativeValue::Undefined });
        };
        if !sync {
            handler.did_receive(&body);
            return Ok(NativeValue::Undefined);
        }
        handler
            .did_receive_sync(&body)
            .map(NativeValue::from)
            .map_err(BridgeError::into_runtime)
    })
}

impl ScriptContext for EngineScriptContext {
    fn id(&self) -> u64 {
        self.ctx.id().as_u64()
    }

    fn inject(&self, source: &ScriptSource) -> BridgeResult<()> {
        self.ctx
            .evaluate_with_source(&source.source, Some(&source.url))?;
        Ok(())
    }

    fn evaluate(&self, script: &str) -> BridgeResult<Value> {
        let value = self.ctx.evaluate(script)?;
        Ok(value.to_json_value()?)
    }

    fn evaluate_async(&self, script: &str) -> BridgeResult<()> {
        let script = script.to_string();
        self.ctx.post(move |ctx| {
            if let Err(e) = ctx.evaluate(&script) {
                warn!(error = %e, "Scheduled script failed");
            }
        })?;
        Ok(())
    }

    fn add_message_handler(&self, name: &str, handler: Arc<dyn MessageHandler>) -> BridgeResult<()> {
        if self.ctx.is_closed() {
            return Err(RuntimeError::ContextClosed.into());
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    fn remove_message_handler(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }
}

impl fmt::Debug for EngineScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineScriptContext")
            .field("context", &self.ctx.id())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodekit_runtime::NativeValue;
    use serde_json::json;

    struct Doubler;

    impl MessageHandler for Doubler {
        fn did_receive(&self, _body: &Value) {}

        fn did_receive_sync(&self, body: &Value) -> BridgeResult<Value> {
            let n = body["n"]
                .as_i64()
                .ok_or_else(|| BridgeError::protocol("n must be a number"))?;
            Ok(json!(n * 2))
        }
    }

    #[test]
    fn test_attach_installs_functions_and_bootstrap() {
        let ctx = EngineContext::new().unwrap();
        let context = EngineScriptContext::attach(ctx.clone()).unwrap();
        let global = ctx.global_object().unwrap();
        assert!(global.get(POST_MESSAGE).unwrap().is_function());
        assert!(global.get(POST_MESSAGE_SYNC).unwrap().is_function());
        assert!(EngineScriptContext::attach(ctx.clone()).is_err());
        assert_eq!(context.id(), ctx.id().as_u64());
    }

    #[test]
    fn test_sync_post_reaches_handler() {
        let ctx = EngineContext::new().unwrap();
        let context = EngineScriptContext::attach(ctx.clone()).unwrap();
        context.add_message_handler("3", Arc::new(Doubler)).unwrap();

        let post = ctx
            .global_object()
            .unwrap()
            .get(POST_MESSAGE_SYNC)
            .unwrap()
            .as_function()
            .unwrap();
        let body = ctx.value_from_json(&json!({"n": 21})).unwrap();
        let result = post
            .call(None, vec!["3".into(), NativeValue::from(body)])
            .unwrap();
        assert_eq!(result.to_number().unwrap(), 42.0);

        let err = post
            .call(None, vec!["3".into(), NativeValue::from(json!({}))])
            .unwrap_err();
        assert!(err.to_string().contains("n must be a number"));

        let missing = post.call(None, vec!["9".into(), NativeValue::Null]).unwrap();
        assert!(!missing.to_boolean().unwrap());
    }
}
