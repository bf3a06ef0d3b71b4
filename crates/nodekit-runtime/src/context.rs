//! Engine contexts.
//!
//! An [`EngineContext`] owns one engine context together with the queue
//! thread that serializes access to it, the identity map of its wrappers,
//! the pin bookkeeping and the exception bridge. Clones share the same
//! context. It is torn down by [`EngineContext::close`], or when the last
//! clone and the last wrapper are gone.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use nodekit_engine::{
    ContextId, EngineError, EngineResult, HeapStatistics, ScriptEngine, TypedArrayKind, ValueRef,
};

use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::exception::{ExceptionBridge, ScriptException};
use crate::group::EngineGroup;
use crate::handle::ContextHandle;
use crate::handles::HandleTable;
use crate::marshal::{NativeCallable, ValueMarshaler, callable_function};
use crate::queue::{EngineQueue, MaintenanceHook, QueueStatsSnapshot};
use crate::refs::{RefcountGuard, RefcountStats};
use crate::value::{JsArrayBuffer, JsError, JsFunction, JsObject, JsTypedArray, JsValue, WrapperCore};

struct ContextInner {
    id: ContextId,
    group: EngineGroup,
    config: RuntimeConfig,
    queue: EngineQueue,
    handles: HandleTable,
    refs: Arc<RefcountGuard>,
    exceptions: ExceptionBridge,
    closed: AtomicBool,
}

impl ContextInner {
    fn teardown(&self) -> RuntimeResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let engine = self.group.engine().clone();
        let refs = self.refs.clone();
        let id = self.id;
        let collect = self.config.collect_on_close;
        let result = self.queue.sync(move || {
            refs.flush()?;
            if collect {
                engine.garbage_collect(id)?;
            }
            engine.release_context(id)?;
            Ok(())
        });
        self.queue.shutdown();
        debug!(context = %self.id, "Engine context closed");
        result
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(context = %self.id, error = %e, "Engine context teardown failed");
        }
    }
}

/// A live engine context
#[derive(Clone)]
pub struct EngineContext {
    inner: Arc<ContextInner>,
}

/// Non-owning reference to an [`EngineContext`]
#[derive(Clone)]
pub(crate) struct WeakContext(Weak<ContextInner>);

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<EngineContext> {
        self.0
            .upgrade()
            .filter(|inner| !inner.closed.load(Ordering::SeqCst))
            .map(|inner| EngineContext { inner })
    }
}

impl EngineContext {
    /// Create a context in a fresh group
    pub fn new() -> RuntimeResult<Self> {
        Self::with_group(&EngineGroup::new()?)
    }

    /// Create a context sharing the engine of `group`
    pub fn with_group(group: &EngineGroup) -> RuntimeResult<Self> {
        Self::with_config(group, RuntimeConfig::default())
    }

    pub fn with_config(group: &EngineGroup, config: RuntimeConfig) -> RuntimeResult<Self> {
        let engine = group.engine().clone();
        let id = engine.create_context()?;

        let refs = Arc::new(RefcountGuard::new(
            engine.clone(),
            id,
            config.dead_ref_threshold,
        ));
        let hook_refs = refs.clone();
        let hook: MaintenanceHook = Arc::new(move || hook_refs.maintain());
        let queue = match EngineQueue::new(&config.queue_name, config.queue_capacity, Some(hook)) {
            Ok(queue) => queue,
            Err(e) => {
                let _ = engine.release_context(id);
                return Err(e);
            }
        };

        debug!(context = %id, group = group.id(), queue = %config.queue_name, "Engine context created");
        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                group: group.clone(),
                config,
                queue,
                handles: HandleTable::new(),
                refs,
                exceptions: ExceptionBridge::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn group(&self) -> &EngineGroup {
        &self.inner.group
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &Arc<dyn ScriptEngine> {
        self.inner.group.engine()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether the caller runs on this context's queue thread
    pub fn is_queue_thread(&self) -> bool {
        self.inner.queue.is_current()
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Arc::downgrade(&self.inner))
    }

    /// Whether both values refer to the same context
    pub fn ptr_eq(&self, other: &EngineContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run `op` on the queue thread and wait for it
    pub fn sync<T, F>(&self, op: F) -> RuntimeResult<T>
    where
        F: FnOnce(&EngineContext) -> RuntimeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(RuntimeError::ContextClosed);
        }
        let ctx = self.clone();
        self.inner.queue.sync(move || op(&ctx))
    }

    /// Enqueue `op` on the queue thread
    pub fn post<F>(&self, op: F) -> RuntimeResult<()>
    where
        F: FnOnce(&EngineContext) + Send + 'static,
    {
        if self.is_closed() {
            return Err(RuntimeError::ContextClosed);
        }
        let ctx = self.clone();
        self.inner.queue.post(move || op(&ctx))
    }

    /// The wrapper for `handle`, creating and pinning it if none is live
    pub fn wrap(&self, handle: ValueRef) -> RuntimeResult<JsValue> {
        self.sync(move |ctx| ctx.wrap_inline(handle))
    }

    /// Queue thread only
    pub(crate) fn wrap_inline(&self, handle: ValueRef) -> RuntimeResult<JsValue> {
        let inner = &self.inner;
        let core = inner.handles.resolve(handle, |generation| {
            let kind = self.engine().kind_of(self.id(), handle)?;
            inner.refs.pin(handle)?;
            Ok(Arc::new(WrapperCore::new(
                self.clone(),
                handle,
                generation,
                kind,
            )))
        })?;
        Ok(JsValue::from_core(core))
    }

    /// Called when the last clone of a wrapper goes away; any thread
    pub(crate) fn release_wrapper(&self, handle: ValueRef, generation: u64) {
        self.inner.handles.unregister(handle, generation);
        if !self.is_closed() {
            self.inner.refs.mark_dead(handle);
        }
    }

    /// Route an engine error through the exception bridge. Returns `Ok` when
    /// a handler consumed a script exception.
    pub(crate) fn raise(&self, error: EngineError) -> RuntimeResult<()> {
        let exception = match error {
            EngineError::Exception(thrown) => {
                ScriptException::from_thrown(self.engine().as_ref(), self.id(), thrown)
            }
            EngineError::ScriptError {
                error_type,
                message,
                stack,
            } => {
                let exception = ScriptException::new(error_type, message);
                match stack {
                    Some(stack) => exception.with_stack(stack),
                    None => exception,
                }
            }
            other => return Err(other.into()),
        };
        self.inner.exceptions.dispatch(exception)
    }

    /// Wrap a successful result; a handled exception yields `undefined`
    pub(crate) fn value_or_raise(&self, result: EngineResult<ValueRef>) -> RuntimeResult<JsValue> {
        match result {
            Ok(handle) => self.wrap_inline(handle),
            Err(e) => {
                self.raise(e)?;
                self.wrap_inline(self.engine().make_undefined(self.id())?)
            }
        }
    }

    pub(crate) fn unit_or_raise(&self, result: EngineResult<()>) -> RuntimeResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.raise(e),
        }
    }

    pub fn evaluate(&self, script: &str) -> RuntimeResult<JsValue> {
        self.evaluate_with_source(script, None)
    }

    pub fn evaluate_with_source(
        &self,
        script: &str,
        source_url: Option<&str>,
    ) -> RuntimeResult<JsValue> {
        let script = script.to_string();
        let source_url = source_url.map(str::to_string);
        self.sync(move |ctx| {
            let result = ctx
                .engine()
                .evaluate(ctx.id(), &script, source_url.as_deref());
            ctx.value_or_raise(result)
        })
    }

    pub fn global_object(&self) -> RuntimeResult<JsObject> {
        let value = self.sync(|ctx| {
            let global = ctx.engine().global_object(ctx.id())?;
            ctx.wrap_inline(global)
        })?;
        Ok(JsObject::from_value(value))
    }

    pub fn make_object(&self) -> RuntimeResult<JsObject> {
        let value = self.make_with(|engine, id| engine.make_object(id))?;
        Ok(JsObject::from_value(value))
    }

    pub fn make_error(&self, name: &str, message: &str) -> RuntimeResult<JsError> {
        let (name, message) = (name.to_string(), message.to_string());
        let value = self.make_with(move |engine, id| engine.make_error(id, &name, &message))?;
        Ok(JsError::from_value(value))
    }

    pub fn make_array_buffer(&self, bytes: Vec<u8>) -> RuntimeResult<JsArrayBuffer> {
        let value = self.make_with(move |engine, id| engine.make_array_buffer(id, bytes))?;
        Ok(JsArrayBuffer::from_value(value))
    }

    /// Zero-filled typed array of `length` elements
    pub fn make_typed_array(
        &self,
        kind: TypedArrayKind,
        length: usize,
    ) -> RuntimeResult<JsTypedArray> {
        let value = self.make_with(move |engine, id| engine.make_typed_array(id, kind, length))?;
        Ok(JsTypedArray::from_value(value))
    }

    /// Expose `callable` to scripts as a function named `name`
    pub fn make_function(&self, name: &str, callable: NativeCallable) -> RuntimeResult<JsFunction> {
        let name = name.to_string();
        let value = self.sync(move |ctx| {
            let function = callable_function(ctx, &name, &callable)?;
            ctx.wrap_inline(function)
        })?;
        Ok(JsFunction::from_value(value))
    }

    pub fn make_date(&self, millis: f64) -> RuntimeResult<JsObject> {
        let value = self.make_with(move |engine, id| engine.make_date(id, millis))?;
        Ok(JsObject::from_value(value))
    }

    pub fn make_regexp(&self, source: &str, flags: &str) -> RuntimeResult<JsObject> {
        let (source, flags) = (source.to_string(), flags.to_string());
        let value = self.make_with(move |engine, id| engine.make_regexp(id, &source, &flags))?;
        Ok(JsObject::from_value(value))
    }

    /// Build an engine value from JSON
    pub fn value_from_json(&self, json: &serde_json::Value) -> RuntimeResult<JsValue> {
        let text = serde_json::to_string(json)?;
        self.make_with(move |engine, id| engine.make_from_json(id, &text))
    }

    fn make_with<F>(&self, make: F) -> RuntimeResult<JsValue>
    where
        F: FnOnce(&dyn ScriptEngine, ContextId) -> EngineResult<ValueRef> + Send + 'static,
    {
        self.sync(move |ctx| {
            let handle = make(ctx.engine().as_ref(), ctx.id())?;
            ctx.wrap_inline(handle)
        })
    }

    pub fn marshaler(&self) -> ValueMarshaler {
        ValueMarshaler::new(self.clone())
    }

    /// Schedule a collection without waiting for it
    pub fn garbage_collect(&self) -> RuntimeResult<()> {
        self.post(|ctx| {
            if let Err(e) = ctx.engine().garbage_collect(ctx.id()) {
                warn!(context = %ctx.id(), error = %e, "Garbage collection failed");
            }
        })
    }

    /// Flush dead references, collect and return the number of values freed
    pub fn garbage_collect_sync(&self) -> RuntimeResult<usize> {
        self.sync(|ctx| {
            ctx.inner.refs.flush()?;
            Ok(ctx.engine().garbage_collect(ctx.id())?)
        })
    }

    /// Unprotect every dead handle now, regardless of the threshold
    pub fn flush_dead_references(&self) -> RuntimeResult<usize> {
        self.sync(|ctx| ctx.inner.refs.flush())
    }

    /// Route script exceptions to `handler` instead of the caller
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&ScriptException) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.inner.exceptions.set_handler(Arc::new(handler));
    }

    pub fn clear_exception_handler(&self) {
        self.inner.exceptions.clear_handler();
    }

    /// Async, thread-safe front end for this context
    pub fn handle(&self) -> ContextHandle {
        ContextHandle::new(self.clone())
    }

    pub fn queue_stats(&self) -> QueueStatsSnapshot {
        self.inner.queue.stats()
    }

    pub fn refcount_stats(&self) -> RefcountStats {
        self.inner.refs.stats()
    }

    pub fn heap_statistics(&self) -> HeapStatistics {
        self.engine().statistics()
    }

    /// Wrapper registrations currently in the identity map
    pub fn live_wrappers(&self) -> usize {
        self.inner.handles.len()
    }

    /// Flush, collect, release the engine context and stop the queue.
    ///
    /// Further operations fail with [`RuntimeError::ContextClosed`]. Closing
    /// twice is a no-op.
    pub fn close(&self) -> RuntimeResult<()> {
        self.inner.teardown()
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("id", &self.inner.id)
            .field("group", &self.inner.group.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for EngineContext {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_returns_same_instance() {
        let ctx = EngineContext::new().unwrap();
        let object = ctx.make_object().unwrap();
        let again = ctx.wrap(object.handle()).unwrap();
        assert!(again.ptr_eq(object.as_value()));
        assert_eq!(ctx.live_wrappers(), 1);
    }

    #[test]
    fn test_queue_thread_detection() {
        let ctx = EngineContext::new().unwrap();
        assert!(!ctx.is_queue_thread());
        assert!(ctx.sync(|ctx| Ok(ctx.is_queue_thread())).unwrap());
    }

    #[test]
    fn test_nested_sync_runs_inline() {
        let ctx = EngineContext::new().unwrap();
        let value = ctx
            .sync(|ctx| ctx.sync(|inner| Ok(inner.id())))
            .unwrap();
        assert_eq!(value, ctx.id());
    }

    #[test]
    fn test_weak_context_does_not_upgrade_after_close() {
        let ctx = EngineContext::new().unwrap();
        let weak = ctx.downgrade();
        assert!(weak.upgrade().is_some());
        ctx.close().unwrap();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_raise_without_handler_returns_script_error() {
        let ctx = EngineContext::new().unwrap();
        let err = ctx.evaluate("missing.value").unwrap_err();
        let exception = err.as_script_exception().unwrap();
        assert_eq!(exception.name, "ReferenceError");
    }
}
