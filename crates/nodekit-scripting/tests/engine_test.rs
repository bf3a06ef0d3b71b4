//! Channels over a QuickJS-backed context: the bootstrap and the generated
//! stubs run as script, and script calls reach the bound native object

use std::sync::Arc;

use nodekit_runtime::{EngineContext, JsFunction, NativeValue};
use nodekit_scripting::{
    BridgeError, ChannelRegistry, Completion, EngineScriptContext, POST_MESSAGE, POST_MESSAGE_SYNC,
    PluginClass, PluginType, REFERENCE_SIGNATURE, ScriptContext, ScriptMessage,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Math {
    pending: Mutex<Vec<Completion>>,
}

fn math_class() -> Arc<PluginType> {
    PluginClass::<Math>::new("Math")
        .method("add", 2, |_, call| Ok(call.arg::<i64>(0)? + call.arg::<i64>(1)?))
        .method("divide", 2, |_, call| {
            let divisor: i64 = call.arg(1)?;
            if divisor == 0 {
                return Err(BridgeError::invocation("divide", "division by zero"));
            }
            Ok(call.arg::<i64>(0)? / divisor)
        })
        .async_method("later", 1, |math, _, completion| {
            math.pending.lock().push(completion);
            Ok(())
        })
        .build()
}

fn setup() -> (EngineContext, Arc<EngineScriptContext>) {
    init_tracing();
    let ctx = EngineContext::new().unwrap();
    let context = EngineScriptContext::attach(ctx.clone()).unwrap();
    (ctx, context)
}

fn bind_math(context: &Arc<EngineScriptContext>) -> (ChannelRegistry, Arc<Math>, nodekit_scripting::ScriptChannel) {
    let registry = ChannelRegistry::new(context.clone());
    let math = Arc::new(Math {
        pending: Mutex::new(Vec::new()),
    });
    let channel = registry
        .bind_object(&math_class(), math.clone(), "io.math")
        .unwrap()
        .unwrap();
    (registry, math, channel)
}

fn global_function(ctx: &EngineContext, name: &str) -> JsFunction {
    ctx.global_object()
        .unwrap()
        .get(name)
        .unwrap()
        .as_function()
        .unwrap()
}

fn post(function: &JsFunction, handler: &str, message: &ScriptMessage) -> nodekit_runtime::RuntimeResult<Value> {
    function
        .call(None, vec![handler.into(), NativeValue::from(message.to_json())])?
        .to_json_value()
}

#[test]
fn test_bootstrap_and_stubs_are_evaluated() {
    let (_ctx, context) = setup();
    assert_eq!(context.evaluate("typeof NKScripting").unwrap(), json!("function"));
    assert_eq!(context.evaluate("typeof io").unwrap(), json!("undefined"));

    let (_registry, _math, _channel) = bind_math(&context);
    let shape = context
        .evaluate("[typeof io.math.add, typeof io.math.laterAsync, io.math instanceof NKScripting]")
        .unwrap();
    assert_eq!(shape, json!(["function", "function", true]));
}

#[test]
fn test_script_calls_native_method() {
    let (_ctx, context) = setup();
    let (_registry, _math, _channel) = bind_math(&context);

    assert_eq!(context.evaluate("io.math.add(40, 2)").unwrap(), json!(42));
    assert_eq!(
        context.evaluate("[1, 2, 3].map(n => io.math.add(n, n * 10))").unwrap(),
        json!([11, 22, 33])
    );
}

#[test]
fn test_sync_call_through_global() {
    let (ctx, context) = setup();
    let (_registry, _math, channel) = bind_math(&context);
    let post_sync = global_function(&ctx, POST_MESSAGE_SYNC);

    let message = ScriptMessage::invoke("add#2s", 0, vec![json!(40), json!(2)]);
    assert_eq!(post(&post_sync, &channel.handler_name(), &message).unwrap(), json!(42));

    let unknown = ScriptMessage::invoke("nope#0s", 0, vec![]);
    assert_eq!(post(&post_sync, &channel.handler_name(), &unknown).unwrap(), json!(false));
    assert_eq!(post(&post_sync, "17", &message).unwrap(), json!(false));
}

#[test]
fn test_failure_is_thrown_into_script() {
    let (_ctx, context) = setup();
    let (_registry, _math, _channel) = bind_math(&context);

    let caught = context
        .evaluate("try { io.math.divide(1, 0); 'returned' } catch (e) { e.message }")
        .unwrap();
    assert!(caught.as_str().unwrap().contains("division by zero"));

    let err = context.evaluate("io.math.divide(1, 0)").unwrap_err();
    assert!(err.to_string().contains("division by zero"));
    assert_eq!(context.evaluate("io.math.divide(9, 3)").unwrap(), json!(3));
}

#[test]
fn test_completions_reach_script_callbacks() {
    let (ctx, context) = setup();
    let (_registry, math, _channel) = bind_math(&context);

    context
        .evaluate(
            "var results = [];\n\
             for (var i = 0; i < 3; i++) {\n\
               io.math.laterAsync((function (n) { return function (v) { results.push([n, v]); }; })(i));\n\
             }",
        )
        .unwrap();
    let completions = std::mem::take(&mut *math.pending.lock());
    assert_eq!(completions.len(), 3);
    for (index, completion) in completions.into_iter().enumerate().rev() {
        completion.complete(index * 10).unwrap();
    }
    ctx.sync(|_| Ok(())).unwrap();

    assert_eq!(
        context.evaluate("results").unwrap(),
        json!([[2, 20], [1, 10], [0, 0]])
    );
}

#[test]
fn test_completion_from_script_reference_message() {
    let (ctx, context) = setup();
    let (_registry, math, channel) = bind_math(&context);
    context
        .evaluate("var seen = null; io.math.$references.push(function (v) { seen = v; });")
        .unwrap();

    let post_async = global_function(&ctx, POST_MESSAGE);
    let callback = json!({ "$sig": REFERENCE_SIGNATURE, "$ref": 0 });
    let message = ScriptMessage::invoke("later#1a", 0, vec![callback]);
    post(&post_async, &channel.handler_name(), &message).unwrap();

    let completion = math.pending.lock().pop().unwrap();
    completion.complete("done").unwrap();
    ctx.sync(|_| Ok(())).unwrap();
    assert_eq!(context.evaluate("seen").unwrap(), json!("done"));
}

#[test]
fn test_handler_removed_on_unbind() {
    let (ctx, context) = setup();
    let (registry, _math, channel) = bind_math(&context);
    assert!(registry.unbind("io.math"));
    assert!(!context.remove_message_handler(&channel.handler_name()));

    let post_sync = global_function(&ctx, POST_MESSAGE_SYNC);
    let message = ScriptMessage::invoke("add#2s", 0, vec![json!(1), json!(1)]);
    assert_eq!(post(&post_sync, &channel.handler_name(), &message).unwrap(), json!(false));
    assert_eq!(context.evaluate("io.math.add(1, 1)").unwrap(), json!(false));
}

#[test]
fn test_closed_context_rejects_binding() {
    let (ctx, context) = setup();
    let registry = ChannelRegistry::new(context.clone());
    ctx.close().unwrap();

    let math = Arc::new(Math {
        pending: Mutex::new(Vec::new()),
    });
    assert!(registry.bind_object(&math_class(), math, "io.math").is_err());
    assert!(registry.is_empty());
}
