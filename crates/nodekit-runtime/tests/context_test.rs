//! Integration tests for context lifecycle, identity and pinning

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use nodekit_engine::{QuickJsEngine, ScriptEngine};
use nodekit_runtime::{EngineContext, EngineGroup, RuntimeConfig, RuntimeError};
use parking_lot::Mutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn context_with_engine(threshold: usize) -> (Arc<QuickJsEngine>, EngineContext) {
    let engine = QuickJsEngine::new().unwrap();
    let group = EngineGroup::with_engine(engine.clone());
    let config = RuntimeConfig::new()
        .queue_name("context-test")
        .dead_ref_threshold(threshold);
    let ctx = EngineContext::with_config(&group, config).unwrap();
    (engine, ctx)
}

/// Runs two empty operations so the maintenance hook of the first has
/// finished before the second returns
fn settle(ctx: &EngineContext) {
    ctx.sync(|_| Ok(())).unwrap();
    ctx.sync(|_| Ok(())).unwrap();
}

#[test]
fn test_identity_is_stable() {
    let ctx = EngineContext::new().unwrap();
    let object = ctx.make_object().unwrap();

    let first = ctx.wrap(object.handle()).unwrap();
    let second = ctx.wrap(object.handle()).unwrap();
    assert!(first.ptr_eq(&second));
    assert!(first.ptr_eq(object.as_value()));

    let global = ctx.global_object().unwrap();
    let again = ctx.global_object().unwrap();
    assert_eq!(global, again);
}

#[test]
fn test_identity_from_property_reads() {
    let ctx = EngineContext::new().unwrap();
    let outer = ctx.make_object().unwrap();
    let inner = ctx.make_object().unwrap();
    outer.set("inner", inner.clone()).unwrap();

    let read = outer.get("inner").unwrap();
    assert!(read.ptr_eq(inner.as_value()));
}

#[test]
fn test_dropped_wrapper_is_unregistered() {
    let ctx = EngineContext::new().unwrap();
    let object = ctx.make_object().unwrap();
    assert_eq!(ctx.live_wrappers(), 1);
    drop(object);
    assert_eq!(ctx.live_wrappers(), 0);
    assert_eq!(ctx.refcount_stats().pending, 1);
}

#[test]
fn test_pins_released_in_batches() {
    let (engine, ctx) = context_with_engine(3);

    let objects: Vec<_> = (0..5).map(|_| ctx.make_object().unwrap()).collect();
    let handles: Vec<_> = objects.iter().map(|o| o.handle()).collect();
    assert!(handles.iter().all(|h| engine.protect_count(*h) == Some(1)));

    // Below the threshold nothing is released
    let mut objects = objects.into_iter();
    drop(objects.next());
    drop(objects.next());
    settle(&ctx);
    assert_eq!(ctx.refcount_stats().pending, 2);
    assert_eq!(engine.protect_count(handles[0]), Some(1));

    drop(objects);
    settle(&ctx);
    let stats = ctx.refcount_stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.unpinned, 5);
    assert!(handles.iter().all(|h| engine.protect_count(*h) == Some(0)));

    ctx.garbage_collect_sync().unwrap();
    assert!(handles.iter().all(|h| !engine.is_live(*h)));
}

#[test]
fn test_rewrap_repins_before_old_pin_is_released() {
    let (engine, ctx) = context_with_engine(100);
    let object = ctx.make_object().unwrap();
    let handle = object.handle();
    drop(object);

    // The dead pin has not been flushed yet; wrapping again takes a new one
    let again = ctx.wrap(handle).unwrap();
    assert_eq!(engine.protect_count(handle), Some(2));

    assert_eq!(ctx.flush_dead_references().unwrap(), 1);
    ctx.garbage_collect_sync().unwrap();
    assert_eq!(engine.protect_count(handle), Some(1));
    assert!(again.is_object());
}

#[test]
fn test_wrapper_dropped_on_other_thread() {
    let (engine, ctx) = context_with_engine(100);
    let object = ctx.make_object().unwrap();
    let handle = object.handle();

    thread::spawn(move || drop(object)).join().unwrap();
    assert_eq!(ctx.flush_dead_references().unwrap(), 1);
    assert_eq!(engine.protect_count(handle), Some(0));
}

#[test]
fn test_sync_calls_keep_submission_order() {
    let ctx = EngineContext::new().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let seen = seen.clone();
        if i % 3 == 0 {
            ctx.sync(move |_| {
                seen.lock().push(i);
                Ok(())
            })
            .unwrap();
        } else {
            ctx.post(move |_| seen.lock().push(i)).unwrap();
        }
    }
    ctx.sync(|_| Ok(())).unwrap();
    assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_exception_surfaces_without_handler() {
    let ctx = EngineContext::new().unwrap();
    let err = ctx.evaluate("notDefined").unwrap_err();
    let exception = err.as_script_exception().unwrap();
    assert_eq!(exception.name, "ReferenceError");
    assert!(exception.message.contains("notDefined"));
    assert!(exception.stack.is_some());
}

#[test]
fn test_handler_does_not_recurse() {
    let ctx = EngineContext::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let inner_errors = Arc::new(AtomicUsize::new(0));

    let handler_ctx = ctx.clone();
    let handler_calls = calls.clone();
    let handler_inner = inner_errors.clone();
    ctx.set_exception_handler(move |exception| {
        handler_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(exception.name, "ReferenceError");
        // Raised while the handler is detached: reaches us as a plain error
        if let Err(RuntimeError::Script(_)) = handler_ctx.evaluate("alsoMissing") {
            handler_inner.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    });

    let value = ctx.evaluate("missing").unwrap();
    assert!(value.is_undefined());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(inner_errors.load(Ordering::SeqCst), 1);

    // Reattached afterwards
    ctx.evaluate("missingAgain").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    ctx.clear_exception_handler();
    assert!(ctx.evaluate("missing").is_err());
    ctx.close().unwrap();
}

#[test]
fn test_handler_reattached_after_panic() {
    let ctx = EngineContext::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let panicked = Arc::new(AtomicBool::new(false));

    let handler_calls = calls.clone();
    let handler_panicked = panicked.clone();
    ctx.set_exception_handler(move |_| {
        handler_calls.fetch_add(1, Ordering::SeqCst);
        if !handler_panicked.swap(true, Ordering::SeqCst) {
            panic!("handler failed");
        }
        Ok(())
    });

    let err = ctx.evaluate("missing").unwrap_err();
    assert!(matches!(err, RuntimeError::Panicked(_)));

    ctx.evaluate("missing").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cross_group_value_is_rejected() {
    let a = EngineContext::new().unwrap();
    let b = EngineContext::new().unwrap();
    let value = a.make_object().unwrap();

    let err = b.marshaler().to_engine(value.clone()).unwrap_err();
    assert!(matches!(err, RuntimeError::CrossGroupViolation { .. }));

    let holder = b.make_object().unwrap();
    assert!(matches!(
        holder.set("foreign", value),
        Err(RuntimeError::CrossGroupViolation { .. })
    ));
}

#[test]
fn test_same_group_contexts_share_values() {
    let group = EngineGroup::new().unwrap();
    let a = EngineContext::with_group(&group).unwrap();
    let b = EngineContext::with_group(&group).unwrap();
    let value = a.marshaler().to_engine("shared").unwrap();

    let holder = b.make_object().unwrap();
    holder.set("value", value.clone()).unwrap();
    assert_eq!(holder.get("value").unwrap().to_js_string().unwrap(), "shared");
}

#[test]
fn test_close_releases_everything() {
    init_tracing();
    let (engine, ctx) = context_with_engine(100);
    let kept = ctx.make_object().unwrap();
    let _others: Vec<_> = (0..3).map(|_| ctx.make_object().unwrap()).collect();

    ctx.close().unwrap();
    assert!(ctx.is_closed());
    assert_eq!(engine.statistics().live_values, 0);

    assert!(matches!(ctx.evaluate("1"), Err(RuntimeError::ContextClosed)));
    assert!(matches!(kept.to_js_string(), Err(RuntimeError::ContextClosed)));

    // Closing twice is fine and dropping wrappers afterwards is harmless
    ctx.close().unwrap();
    drop(kept);
    assert_eq!(ctx.refcount_stats().pending, 0);
}

#[test]
fn test_drop_of_last_reference_tears_down() {
    let engine = QuickJsEngine::new().unwrap();
    let group = EngineGroup::with_engine(engine.clone());
    {
        let ctx = EngineContext::with_group(&group).unwrap();
        let value = ctx.make_object().unwrap();
        value.set("n", 1).unwrap();
    }
    assert_eq!(engine.statistics().live_values, 0);
}

#[test]
fn test_queue_stats_track_operations() {
    let ctx = EngineContext::new().unwrap();
    ctx.evaluate("1").unwrap();
    ctx.make_object().unwrap();
    let stats = ctx.queue_stats();
    assert!(stats.submitted >= 2);
}
