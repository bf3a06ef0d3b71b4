//! Channel lifecycle and dispatch, driven through a recording context

use nodekit_scripting::{
    BridgeError, BridgeResult, ChannelRegistry, Completion, PluginClass, PluginType,
    REFERENCE_SIGNATURE, RecordingContext, ScriptChannel, ScriptMessage, generate_stubs,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

struct Counter {
    value: AtomicI64,
}

impl Counter {
    fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }
}

fn counter_class() -> Arc<PluginType> {
    PluginClass::<Counter>::new("Counter")
        .constructor(1, |call| Ok(Counter::new(call.arg(0)?)))
        .method("value", 0, |counter, _| Ok(counter.value.load(Ordering::SeqCst)))
        .action("add", 1, |counter, call| {
            counter.value.fetch_add(call.arg(0)?, Ordering::SeqCst);
            Ok(())
        })
        .method("fail", 0, |_, _| {
            Err::<(), _>(BridgeError::invocation("fail", "counter is broken"))
        })
        .build()
}

#[derive(Default)]
struct Fetcher {
    pending: Mutex<Vec<(String, Completion)>>,
}

fn fetcher_class() -> Arc<PluginType> {
    PluginClass::<Fetcher>::new("Fetcher")
        .async_method("fetch", 2, |fetcher, call, completion| {
            let url: String = call.arg(0)?;
            fetcher.pending.lock().push((url, completion));
            Ok(())
        })
        .build()
}

fn send(context: &RecordingContext, channel: &ScriptChannel, message: ScriptMessage) -> BridgeResult<Value> {
    context.post_message_sync(&channel.handler_name(), message.to_json())
}

fn callback(index: i64) -> Value {
    json!({ "$sig": REFERENCE_SIGNATURE, "$ref": index })
}

#[test]
fn test_construct_and_invoke() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_class(&counter_class(), "io.Counter")
        .unwrap()
        .unwrap();

    let created = send(&context, &channel, ScriptMessage::construct(1, vec![json!(5)])).unwrap();
    assert_eq!(created, json!(true));
    assert_eq!(channel.instance_ids(), vec![1]);
    assert_eq!(channel.instance_value(1).unwrap().namespace(), "io.Counter[1]");

    let value = send(&context, &channel, ScriptMessage::invoke("value#0s", 1, vec![])).unwrap();
    assert_eq!(value, json!(5));

    send(&context, &channel, ScriptMessage::invoke("add#1a", 1, vec![json!(2)])).unwrap();
    assert_eq!(channel.instance_as::<Counter>(1).unwrap().value.load(Ordering::SeqCst), 7);
}

#[test]
fn test_instance_ids() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_class(&counter_class(), "io.Counter")
        .unwrap()
        .unwrap();

    send(&context, &channel, ScriptMessage::construct(7, vec![json!(0)])).unwrap();
    send(&context, &channel, ScriptMessage::construct(0, vec![json!(0)])).unwrap();
    assert_eq!(channel.instance_ids(), vec![7, 8]);

    // Constructing over a live instance is not a construction
    let again = send(&context, &channel, ScriptMessage::construct(7, vec![json!(1)])).unwrap();
    assert_eq!(again, json!(false));
    assert_eq!(channel.instance_count(), 2);
}

#[test]
fn test_dispose_instance() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_class(&counter_class(), "io.Counter")
        .unwrap()
        .unwrap();

    send(&context, &channel, ScriptMessage::construct(1, vec![json!(1)])).unwrap();
    let object = channel.instance(1).unwrap();
    assert!(registry.script_value_for(&object).is_some());

    assert_eq!(send(&context, &channel, ScriptMessage::dispose(1)).unwrap(), Value::Null);
    assert!(channel.instance(1).is_none());
    assert!(registry.script_value_for(&object).is_none());
    assert!(channel.is_bound());
}

#[test]
fn test_dispose_principal_unbinds() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let class = counter_class();
    let channel = registry.bind_class(&class, "io.Counter").unwrap().unwrap();

    for _ in 0..3 {
        send(&context, &channel, ScriptMessage::construct(0, vec![json!(1)])).unwrap();
    }
    let objects: Vec<_> = channel
        .instance_ids()
        .into_iter()
        .filter_map(|id| channel.instance(id))
        .collect();
    assert_eq!(objects.len(), 3);

    assert_eq!(send(&context, &channel, ScriptMessage::dispose(0)).unwrap(), Value::Null);
    assert!(!channel.is_bound());
    assert_eq!(channel.instance_count(), 0);
    assert!(registry.channel("io.Counter").is_none());
    assert!(registry.is_empty());
    assert!(context.handler_names().is_empty());
    for object in &objects {
        assert!(registry.script_value_for(object).is_none());
        assert_eq!(Arc::strong_count(object), 1);
    }

    // The namespace is free again and gets a fresh channel
    let rebound = registry.bind_class(&class, "io.Counter").unwrap().unwrap();
    assert_eq!(rebound.id(), 1);
    assert!(!rebound.ptr_eq(&channel));
    send(&context, &rebound, ScriptMessage::construct(0, vec![json!(1)])).unwrap();
    assert_eq!(rebound.instance_ids(), vec![1]);
    assert_eq!(context.injected().len(), 2);
}

#[test]
fn test_stub_injected_once() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let class = counter_class();

    let channel = registry.bind_class(&class, "io.Counter").unwrap().unwrap();
    assert!(registry.bind_class(&class, "io.Counter").unwrap().is_none());

    let injected = context.injected();
    assert_eq!(injected.len(), 1);
    assert_eq!(injected[0].url, "io.Counter/plugin/Counter.js");
    assert_eq!(injected[0].source, generate_stubs(&class, channel.id(), "io.Counter"));
    assert_eq!(
        injected[0].source,
        "(function(exports) {\n\
         exports.add = function(){return NKScripting.invokeNative.bind(this, 'add#1a').apply(null, arguments);}\n\
         exports.fail = function(){return NKScripting.invokeNative.bind(this, 'fail#0s').apply(null, arguments);}\n\
         exports.value = function(){return NKScripting.invokeNative.bind(this, 'value#0s').apply(null, arguments);}\n\
         })(NKScripting.createPlugin('0', 'io.Counter', '#1a'));\n"
    );
    assert_eq!(context.handler_names(), vec!["0".to_string()]);
}

#[test]
fn test_unresolved_messages_are_discarded() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_object(&counter_class(), Arc::new(Counter::new(3)), "io.counter")
        .unwrap()
        .unwrap();
    let name = channel.handler_name();

    let unknown = json!({ "$opcode": "nope#0s", "$target": 99 });
    assert_eq!(context.post_message_sync(&name, unknown.clone()).unwrap(), json!(false));
    assert!(context.post_message(&name, unknown));

    let missing = ScriptMessage::invoke("missing#0s", 0, vec![]);
    assert_eq!(send(&context, &channel, missing).unwrap(), json!(false));
    assert_eq!(context.post_message_sync(&name, Value::Null).unwrap(), json!(false));
    assert_eq!(context.post_message_sync(&name, json!([1, 2])).unwrap(), json!(false));

    // A principal object cannot be constructed over
    let construct = ScriptMessage::construct(0, vec![json!(1)]);
    assert_eq!(send(&context, &channel, construct).unwrap(), json!(false));

    assert_eq!(send(&context, &channel, ScriptMessage::invoke("value#0s", 0, vec![])).unwrap(), json!(3));
}

#[test]
fn test_message_after_unbind_is_discarded() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_object(&counter_class(), Arc::new(Counter::new(3)), "io.counter")
        .unwrap()
        .unwrap();
    assert!(channel.unbind());

    let body = ScriptMessage::invoke("value#0s", 0, vec![]).to_json();
    assert_eq!(channel.handle_message_sync(&body).unwrap(), json!(false));
}

#[test]
fn test_invocation_error_propagates() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_object(&counter_class(), Arc::new(Counter::new(0)), "io.counter")
        .unwrap()
        .unwrap();

    let err = send(&context, &channel, ScriptMessage::invoke("fail#0s", 0, vec![])).unwrap_err();
    assert!(matches!(err, BridgeError::Invocation { .. }));
    assert!(err.to_string().contains("counter is broken"));

    let err = send(&context, &channel, ScriptMessage::invoke("add#1a", 0, vec![json!("x")])).unwrap_err();
    assert!(matches!(err, BridgeError::Argument { index: 0, .. }));
}

#[test]
fn test_principal_message_handler() {
    struct Echo;

    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let class = PluginClass::<Echo>::new("Echo")
        .message_handler(|_, message| Ok(json!(format!("handled:{}", message.opcode))))
        .build();
    let channel = registry.bind_object(&class, Arc::new(Echo), "io.echo").unwrap().unwrap();

    let reply = send(&context, &channel, ScriptMessage::new("custom", 42, vec![])).unwrap();
    assert_eq!(reply, json!("handled:custom"));
}

#[test]
fn test_async_completions_in_finish_order() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let fetcher = Arc::new(Fetcher::default());
    let channel = registry
        .bind_object(&fetcher_class(), fetcher.clone(), "io.fetch")
        .unwrap()
        .unwrap();
    let name = channel.handler_name();

    for (index, url) in ["a", "b"].iter().enumerate() {
        let message = ScriptMessage::invoke("fetch#2a", 0, vec![json!(url), callback(index as i64)]);
        assert!(context.post_message(&name, message.to_json()));
    }
    assert_eq!(channel.completions().inflight(), 2);

    let mut pending = std::mem::take(&mut *fetcher.pending.lock());
    while let Some((url, completion)) = pending.pop() {
        completion.complete(url.to_uppercase()).unwrap();
    }

    let scheduled = context.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert!(scheduled[0].contains(r#"io.fetch.$references[1]("B")"#));
    assert!(scheduled[1].contains(r#"io.fetch.$references[0]("A")"#));
    assert_eq!(channel.completions().inflight(), 0);
    assert_eq!(channel.completions().delivered(), 2);
}

#[test]
fn test_async_completion_to_receiver() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let fetcher = Arc::new(Fetcher::default());
    let channel = registry
        .bind_object(&fetcher_class(), fetcher.clone(), "io.fetch")
        .unwrap()
        .unwrap();

    send(&context, &channel, ScriptMessage::invoke("fetch#2a", 0, vec![json!("c")])).unwrap();
    let (url, completion) = fetcher.pending.lock().pop().unwrap();
    assert_eq!(url, "c");
    assert_eq!(completion.target().namespace(), "io.fetch");

    let err = send(&context, &channel, ScriptMessage::invoke("fetch#2a", 0, vec![json!("d"), json!(1)]))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Argument { index: 1, .. }));
}

#[test]
fn test_completion_from_another_thread() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let fetcher = Arc::new(Fetcher::default());
    let channel = registry
        .bind_object(&fetcher_class(), fetcher.clone(), "io.fetch")
        .unwrap()
        .unwrap();

    send(&context, &channel, ScriptMessage::invoke("fetch#2a", 0, vec![json!("x"), callback(0)])).unwrap();
    let (url, completion) = fetcher.pending.lock().pop().unwrap();
    std::thread::spawn(move || completion.complete(url))
        .join()
        .unwrap()
        .unwrap();

    assert_eq!(context.scheduled().len(), 1);
    assert!(context.scheduled()[0].contains(r#"io.fetch.$references[0]("x")"#));
}

#[test]
fn test_adopt_native() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_class(&counter_class(), "io.Counter")
        .unwrap()
        .unwrap();

    let first = Arc::new(Counter::new(5));
    let second = Arc::new(Counter::new(6));
    let value = registry.adopt_native("io.Counter", first.clone()).unwrap();
    assert_eq!(value.namespace(), "io.Counter[-1]");
    assert_eq!(
        registry.adopt_native("io.Counter", second.clone()).unwrap().namespace(),
        "io.Counter[-2]"
    );
    assert_eq!(registry.adopt_native("io.Counter", first.clone()).unwrap(), value);
    assert_eq!(channel.instance_ids(), vec![-2, -1]);

    assert!(registry.channel_for_native(&first).unwrap().ptr_eq(&channel));
    assert_eq!(registry.script_value_for(&second).unwrap().namespace(), "io.Counter[-2]");

    let result = send(&context, &channel, ScriptMessage::invoke("value#0s", -1, vec![])).unwrap();
    assert_eq!(result, json!(5));

    assert!(matches!(
        registry.adopt_native("io.missing", Arc::new(Counter::new(0))),
        Err(BridgeError::Unbound(_))
    ));
    assert!(matches!(
        registry.adopt_native("io.Counter", Arc::new(5u8)),
        Err(BridgeError::Bind { .. })
    ));
}

#[test]
fn test_principal_identity() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let counter = Arc::new(Counter::new(1));
    let channel = registry
        .bind_object(&counter_class(), counter.clone(), "io.counter")
        .unwrap()
        .unwrap();

    assert_eq!(registry.script_value_for(&counter).unwrap().namespace(), "io.counter");
    assert!(registry.channel_by_id(channel.id()).unwrap().ptr_eq(&channel));
    assert!(registry.channel_for_native(&counter).unwrap().ptr_eq(&channel));
}

#[test]
fn test_bind_errors() {
    struct Plain;

    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let plain = PluginClass::<Plain>::new("Plain").action("noop", 0, |_, _| Ok(())).build();

    assert!(matches!(
        registry.bind_class(&plain, "io.plain"),
        Err(BridgeError::Bind { .. })
    ));
    assert!(matches!(
        registry.bind_object(&plain, Arc::new(Counter::new(0)), "io.plain"),
        Err(BridgeError::Bind { .. })
    ));
    assert!(context.injected().is_empty());
    assert!(registry.is_empty());
}

#[test]
fn test_registry_drop_unbinds() {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let channel = registry
        .bind_class(&counter_class(), "io.Counter")
        .unwrap()
        .unwrap();
    registry
        .bind_object(&counter_class(), Arc::new(Counter::new(0)), "io.counter")
        .unwrap();
    assert_eq!(registry.namespaces(), vec!["io.Counter", "io.counter"]);

    drop(registry);
    assert!(!channel.is_bound());
    assert!(context.handler_names().is_empty());
    assert_eq!(
        context.post_message_sync("0", ScriptMessage::construct(0, vec![json!(1)]).to_json()).ok(),
        None
    );
}
