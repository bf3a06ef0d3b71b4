//! Benchmarks for message dispatch and stub generation
//!
//! Run with: cargo bench -p nodekit-scripting

use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use nodekit_scripting::{ChannelRegistry, PluginClass, PluginType, RecordingContext, ScriptMessage, generate_stubs};

struct Counter(AtomicI64);

fn counter_class() -> Arc<PluginType> {
    PluginClass::<Counter>::new("Counter")
        .constructor(1, |call| Ok(Counter(AtomicI64::new(call.arg(0)?))))
        .method("value", 0, |counter, _| Ok(counter.0.load(Ordering::Relaxed)))
        .method("add", 2, |_, call| Ok(call.arg::<i64>(0)? + call.arg::<i64>(1)?))
        .action("set", 1, |counter, call| {
            counter.0.store(call.arg(0)?, Ordering::Relaxed);
            Ok(())
        })
        .build()
}

fn dispatch_benchmarks(c: &mut Criterion) {
    let context = Arc::new(RecordingContext::new());
    let registry = ChannelRegistry::new(context.clone());
    let class = counter_class();
    let channel = registry
        .bind_object(&class, Arc::new(Counter(AtomicI64::new(0))), "bench.counter")
        .unwrap()
        .unwrap();
    let name = channel.handler_name();

    c.bench_function("dispatch_sync_invoke", |b| {
        let body = ScriptMessage::invoke("add#2s", 0, vec![json!(40), json!(2)]).to_json();
        b.iter(|| context.post_message_sync(&name, black_box(body.clone())).unwrap())
    });

    c.bench_function("dispatch_action", |b| {
        let body = ScriptMessage::invoke("set#1a", 0, vec![json!(7)]).to_json();
        b.iter(|| context.post_message(&name, black_box(body.clone())))
    });

    c.bench_function("generate_stubs", |b| {
        b.iter(|| generate_stubs(black_box(&class), 3, "bench.Counter"))
    });

    let factory = registry.bind_class(&class, "bench.Counter").unwrap().unwrap();
    let factory_name = factory.handler_name();
    c.bench_function("construct_dispose", |b| {
        let construct = ScriptMessage::construct(0, vec![json!(1)]).to_json();
        b.iter(|| {
            context.post_message_sync(&factory_name, construct.clone()).unwrap();
            let id = factory.instance_ids()[0];
            context
                .post_message_sync(&factory_name, ScriptMessage::dispose(id).to_json())
                .unwrap()
        })
    });
}

criterion_group!(benches, dispatch_benchmarks);
criterion_main!(benches);
