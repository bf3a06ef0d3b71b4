//! QuickJS-backed engine.
//!
//! One `QuickJsEngine` owns one QuickJS runtime; every context created by it
//! shares that runtime and may exchange values. Values handed out to callers
//! are kept alive by a persistent reference in a generational slot arena, so
//! a [`ValueRef`] is valid until it is swept by [`ScriptEngine::garbage_collect`]
//! or its context is released.
//!
//! The runtime lock is held while script or a native callback runs. A native
//! callback may call back into the engine for its own context; it must not
//! wait on another thread that needs the same engine.

mod scope;
mod slots;

use parking_lot::Mutex;
use rquickjs::context::EvalOptions;
use rquickjs::function::{IntoArgs, Rest};
use rquickjs::{
    Array, ArrayBuffer, Context, Ctx, FromJs, Function, IntoJs, Object, Persistent, Runtime,
    Value,
};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

use crate::engine::{CallFrame, HeapStatistics, NativeFunction, ScriptEngine};
use crate::error::{EngineError, EngineResult};
use crate::types::{ContextId, TypedArrayInfo, TypedArrayKind, ValueKind, ValueRef};

use scope::Active;
use slots::{Entry, SlotArena};

/// Helpers evaluated once per context; the factory receives the console sink
const SUPPORT_SOURCE: &str = include_str!("support.js");

/// Kinds in the order `kindOf` numbers them
const KINDS: [ValueKind; 13] = [
    ValueKind::Undefined,
    ValueKind::Null,
    ValueKind::Boolean,
    ValueKind::Number,
    ValueKind::String,
    ValueKind::Object,
    ValueKind::Array,
    ValueKind::Function,
    ValueKind::TypedArray,
    ValueKind::ArrayBuffer,
    ValueKind::Date,
    ValueKind::Error,
    ValueKind::RegExp,
];

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(1);

type Stored = Persistent<Value<'static>>;

/// Persistent references dropped as one batch
struct Doomed(Vec<Stored>);

struct Handles {
    arena: SlotArena<Stored>,
}

struct ContextSlot {
    support: Stored,
    /// `WeakMap` from objects to the handle they were first registered under
    identities: Stored,
    context: Context,
}

// SAFETY: persistent references are only cloned, restored or dropped while
// the runtime lock is held by the current thread, or from `Drop` of the
// engine once no other thread can reach it. The mutexes around these types
// serialize access to the containers themselves.
unsafe impl Send for Doomed {}
unsafe impl Send for Handles {}
unsafe impl Send for ContextSlot {}

/// [`ScriptEngine`] over an embedded QuickJS runtime
pub struct QuickJsEngine {
    id: usize,
    this: Weak<QuickJsEngine>,
    handles: Mutex<Handles>,
    contexts: Mutex<FxHashMap<ContextId, ContextSlot>>,
    /// Contexts released while the runtime lock was held
    retired: Mutex<Vec<Context>>,
    next_context: AtomicU64,
    collections: AtomicU64,
    values_freed: AtomicU64,
    // Dropped last: every persistent reference above points into it
    runtime: Runtime,
}

impl fmt::Debug for QuickJsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuickJsEngine")
            .field("id", &self.id)
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl QuickJsEngine {
    pub fn new() -> EngineResult<Arc<Self>> {
        let runtime = Runtime::new().map_err(creation_error)?;
        // Contexts are driven from their queue threads, not the creating
        // thread, so the stack top QuickJS recorded here means nothing there.
        runtime.set_max_stack_size(0);
        let id = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
        debug!(engine = id, "QuickJS runtime created");
        Ok(Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            handles: Mutex::new(Handles {
                arena: SlotArena::default(),
            }),
            contexts: Mutex::new(FxHashMap::default()),
            retired: Mutex::new(Vec::new()),
            next_context: AtomicU64::new(1),
            collections: AtomicU64::new(0),
            values_freed: AtomicU64::new(0),
            runtime,
        }))
    }

    /// Current protect count, or `None` if the handle is dead
    pub fn protect_count(&self, value: ValueRef) -> Option<u32> {
        self.handles
            .lock()
            .arena
            .get(value)
            .map(|entry| entry.protect_count)
    }

    pub fn is_live(&self, value: ValueRef) -> bool {
        self.handles.lock().arena.get(value).is_some()
    }

    /// Run `f` with `id` entered, reusing the scope of a native call in
    /// progress on this thread
    fn enter<R, F>(&self, id: ContextId, f: F) -> EngineResult<R>
    where
        R: Send,
        F: for<'a, 'js> FnOnce(&Session<'a, 'js>) -> EngineResult<R> + Send,
    {
        match scope::lookup(self.id, id) {
            Active::Context(ptr) => {
                // SAFETY: the pointer was recorded by a scope guard that is
                // still alive further up this thread's stack, and the `Ctx`
                // it points to outlives that guard.
                let ctx = unsafe { &*(ptr as *const Ctx<'_>) };
                let session = Session::open(self, id, ctx)?;
                f(&session)
            }
            Active::Other(active) => Err(EngineError::internal(format!(
                "{id} entered while {active} holds the engine"
            ))),
            Active::None => {
                let context = self
                    .contexts
                    .lock()
                    .get(&id)
                    .map(|slot| slot.context.clone())
                    .ok_or(EngineError::ContextReleased(id))?;
                context.with(|ctx| {
                    let _scope = scope::push(self.id, id, &ctx);
                    let session = Session::open(self, id, &ctx)?;
                    f(&session)
                })
            }
        }
    }

    /// Drop persistent references, taking the runtime lock through `context`
    /// unless this thread already holds it
    fn dispose(&self, doomed: Doomed, context: &Context) {
        if scope::holds(self.id) {
            drop(doomed);
        } else {
            context.with(move |_| drop(doomed));
        }
    }

    /// Free contexts whose release had to wait for the runtime lock
    fn drain_retired(&self) {
        if scope::holds(self.id) {
            return;
        }
        let retired: Vec<Context> = std::mem::take(&mut *self.retired.lock());
        if !retired.is_empty() {
            trace!(count = retired.len(), "Dropping retired contexts");
        }
        drop(retired);
    }

    fn check_context(&self, ctx: ContextId) -> EngineResult<()> {
        if self.contexts.lock().contains_key(&ctx) {
            Ok(())
        } else {
            Err(EngineError::ContextReleased(ctx))
        }
    }
}

fn creation_error(e: rquickjs::Error) -> EngineError {
    EngineError::ContextCreation {
        message: e.to_string(),
    }
}

fn sloppy() -> EvalOptions {
    let mut options = EvalOptions::default();
    options.strict = false;
    options
}

fn console_sink(level: String, message: String) {
    match level.as_str() {
        "error" => error!(target: "nodekit::console", "{message}"),
        "warn" => warn!(target: "nodekit::console", "{message}"),
        "debug" => debug!(target: "nodekit::console", "{message}"),
        _ => info!(target: "nodekit::console", "{message}"),
    }
}

/// One entered context: the live `Ctx` plus its helper object
struct Session<'a, 'js> {
    engine: &'a QuickJsEngine,
    id: ContextId,
    ctx: &'a Ctx<'js>,
    support: Object<'js>,
    identities: Value<'js>,
}

impl<'a, 'js> Session<'a, 'js> {
    fn open(engine: &'a QuickJsEngine, id: ContextId, ctx: &'a Ctx<'js>) -> EngineResult<Self> {
        let (support, identities) = {
            let contexts = engine.contexts.lock();
            let slot = contexts.get(&id).ok_or(EngineError::ContextReleased(id))?;
            (slot.support.clone(), slot.identities.clone())
        };
        let support = support
            .restore(ctx)
            .ok()
            .and_then(Value::into_object)
            .ok_or_else(|| EngineError::internal(format!("{id} lost its support object")))?;
        let identities = identities
            .restore(ctx)
            .map_err(|e| EngineError::internal(e.to_string()))?;
        Ok(Self {
            engine,
            id,
            ctx,
            support,
            identities,
        })
    }

    /// Map a QuickJS result, registering a pending exception as a handle
    fn check<T>(&self, result: rquickjs::Result<T>) -> EngineResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(rquickjs::Error::Exception) => {
                let thrown = self.ctx.catch();
                Err(match self.register(thrown) {
                    Ok(handle) => EngineError::Exception(handle),
                    Err(e) => e,
                })
            }
            Err(e) => Err(EngineError::internal(e.to_string())),
        }
    }

    fn call<A, T>(&self, helper: &str, args: A) -> EngineResult<T>
    where
        A: IntoArgs<'js>,
        T: FromJs<'js>,
    {
        let function: Function<'js> = self.check(self.support.get(helper))?;
        self.check(function.call(args))
    }

    fn value(&self, handle: ValueRef) -> EngineResult<Value<'js>> {
        let stored = self
            .engine
            .handles
            .lock()
            .arena
            .get(handle)
            .map(|entry| entry.value.clone())
            .ok_or(EngineError::InvalidHandle(handle))?;
        stored
            .restore(self.ctx)
            .map_err(|e| EngineError::internal(e.to_string()))
    }

    fn values(&self, handles: &[ValueRef]) -> EngineResult<Array<'js>> {
        let array = self.check(Array::new(self.ctx.clone()))?;
        for (index, handle) in handles.iter().enumerate() {
            self.check(array.set(index, self.value(*handle)?))?;
        }
        Ok(array)
    }

    /// Hand out a handle for `value`. An object keeps the handle it was
    /// first registered under for as long as that handle is live.
    fn register(&self, value: Value<'js>) -> EngineResult<ValueRef> {
        let is_object = value.is_object();
        if is_object {
            let known: Option<Vec<u32>> =
                self.call("recall", (self.identities.clone(), value.clone()))?;
            if let Some(&[index, generation]) = known.as_deref() {
                let handle = ValueRef::new(index, generation);
                if self.engine.handles.lock().arena.get(handle).is_some() {
                    return Ok(handle);
                }
            }
        }
        let stored = Persistent::save(self.ctx, value.clone());
        let handle = self.engine.handles.lock().arena.insert(self.id, stored);
        if is_object {
            self.call::<_, ()>(
                "remember",
                (
                    self.identities.clone(),
                    value,
                    handle.index(),
                    handle.generation(),
                ),
            )?;
        }
        Ok(handle)
    }

    fn kind(&self, value: &Value<'js>) -> EngineResult<ValueKind> {
        if value.is_undefined() {
            return Ok(ValueKind::Undefined);
        }
        if value.is_null() {
            return Ok(ValueKind::Null);
        }
        if value.is_bool() {
            return Ok(ValueKind::Boolean);
        }
        if value.is_number() {
            return Ok(ValueKind::Number);
        }
        if value.is_string() {
            return Ok(ValueKind::String);
        }
        let code: u32 = self.call("kindOf", (value.clone(),))?;
        KINDS
            .get(code as usize)
            .copied()
            .ok_or_else(|| EngineError::internal(format!("unknown value kind {code}")))
    }

    fn kind_of(&self, handle: ValueRef) -> EngineResult<(Value<'js>, ValueKind)> {
        let value = self.value(handle)?;
        let kind = self.kind(&value)?;
        Ok((value, kind))
    }

    fn string(&self, value: &str) -> EngineResult<Value<'js>> {
        let string = self.check(rquickjs::String::from_str(self.ctx.clone(), value))?;
        self.check(string.into_js(self.ctx))
    }

    /// Engine function whose calls land in `function`
    fn native(&self, name: &str, function: NativeFunction) -> EngineResult<Value<'js>> {
        let engine = self.engine.this.clone();
        let id = self.id;
        let raw = self.check(Function::new(
            self.ctx.clone(),
            move |ctx: Ctx<'js>,
                  construct: bool,
                  this: Value<'js>,
                  callee: Value<'js>,
                  args: Rest<Value<'js>>|
                  -> rquickjs::Result<Value<'js>> {
                trampoline(&engine, id, &function, ctx, construct, this, callee, args.0)
            },
        ))?;
        self.call("wrapNative", (raw, name))
    }

    /// The value thrown into script for a failed native call
    fn throw(&self, error: EngineError) -> rquickjs::Error {
        if let EngineError::Exception(handle) = &error
            && let Ok(value) = self.value(*handle)
        {
            return self.ctx.throw(value);
        }
        match self.call::<_, Value>("makeError", (error.error_type(), error.to_string())) {
            Ok(value) => self.ctx.throw(value),
            Err(_) => raise(self.ctx, &error.to_string()),
        }
    }
}

fn raise<'js>(ctx: &Ctx<'js>, message: &str) -> rquickjs::Error {
    match rquickjs::String::from_str(ctx.clone(), message) {
        Ok(message) => ctx.throw(message.into_value()),
        Err(e) => e,
    }
}

#[allow(clippy::too_many_arguments)]
fn trampoline<'js>(
    engine: &Weak<QuickJsEngine>,
    id: ContextId,
    function: &NativeFunction,
    ctx: Ctx<'js>,
    construct: bool,
    this: Value<'js>,
    callee: Value<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let Some(engine) = engine.upgrade() else {
        return Err(raise(&ctx, "Engine has been dropped"));
    };
    let _scope = scope::push(engine.id, id, &ctx);
    let session = match Session::open(&engine, id, &ctx) {
        Ok(session) => session,
        Err(e) => return Err(raise(&ctx, &e.to_string())),
    };

    let frame = (|| -> EngineResult<CallFrame> {
        let mut arguments = Vec::with_capacity(args.len());
        for arg in args {
            arguments.push(session.register(arg)?);
        }
        Ok(CallFrame {
            context: id,
            function: session.register(callee)?,
            this: session.register(this)?,
            arguments,
            is_construct: construct,
        })
    })();
    let frame = match frame {
        Ok(frame) => frame,
        Err(e) => return Err(session.throw(e)),
    };

    engine.handles.lock().arena.root(&frame);
    let frame = scopeguard::guard(frame, |frame| engine.handles.lock().arena.unroot(&frame));
    let (handle, thrown) = match function(&*engine as &dyn ScriptEngine, &*frame) {
        Ok(handle) => (handle, false),
        Err(handle) => (handle, true),
    };
    match session.value(handle) {
        Ok(value) if thrown => Err(ctx.throw(value)),
        Ok(value) => Ok(value),
        Err(e) => Err(session.throw(e)),
    }
}

impl ScriptEngine for QuickJsEngine {
    fn create_context(&self) -> EngineResult<ContextId> {
        if scope::holds(self.id) {
            return Err(EngineError::ContextCreation {
                message: "contexts cannot be created from inside a native call".into(),
            });
        }
        let context = Context::full(&self.runtime).map_err(creation_error)?;
        let id = ContextId::new(self.next_context.fetch_add(1, Ordering::Relaxed));

        let owner = context.clone();
        let slot = context.with(move |ctx| -> EngineResult<ContextSlot> {
            let factory: Function = ctx
                .eval_with_options(SUPPORT_SOURCE, sloppy())
                .map_err(creation_error)?;
            let sink = Function::new(ctx.clone(), console_sink).map_err(creation_error)?;
            let support: Object = factory.call((sink,)).map_err(creation_error)?;
            let identities: Value = support
                .get::<_, Function>("identities")
                .and_then(|make| make.call(()))
                .map_err(creation_error)?;
            Ok(ContextSlot {
                support: Persistent::save(&ctx, support.into_value()),
                identities: Persistent::save(&ctx, identities),
                context: owner,
            })
        })?;
        self.contexts.lock().insert(id, slot);

        // Pin the global object so its handle never moves
        self.global_object(id)?;
        debug!(context = %id, "Context created");
        Ok(id)
    }

    fn release_context(&self, ctx: ContextId) -> EngineResult<()> {
        let slot = self
            .contexts
            .lock()
            .remove(&ctx)
            .ok_or(EngineError::ContextReleased(ctx))?;
        let entries: Vec<Entry<Stored>> = self.handles.lock().arena.drain_context(ctx);
        let freed = entries.len();

        let ContextSlot {
            support,
            identities,
            context,
        } = slot;
        let mut doomed: Vec<Stored> = entries.into_iter().map(|entry| entry.value).collect();
        doomed.push(support);
        doomed.push(identities);
        self.dispose(Doomed(doomed), &context);

        if scope::holds(self.id) {
            self.retired.lock().push(context);
        } else {
            drop(context);
            self.drain_retired();
            self.runtime.run_gc();
        }
        debug!(context = %ctx, freed, "Context released");
        Ok(())
    }

    fn global_object(&self, ctx: ContextId) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| {
            let handle = s.register(s.ctx.globals().into_value())?;
            if let Some(entry) = s.engine.handles.lock().arena.get_mut(handle) {
                entry.pinned = true;
            }
            Ok(handle)
        })
    }

    fn evaluate(
        &self,
        ctx: ContextId,
        script: &str,
        source_url: Option<&str>,
    ) -> EngineResult<ValueRef> {
        trace!(context = %ctx, source_url, len = script.len(), "Evaluating script");
        self.enter(ctx, |s| {
            let value: Value = s.check(s.ctx.eval_with_options(script, sloppy()))?;
            s.register(value)
        })
    }

    fn make_undefined(&self, ctx: ContextId) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(Value::new_undefined(s.ctx.clone())))
    }

    fn make_null(&self, ctx: ContextId) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(Value::new_null(s.ctx.clone())))
    }

    fn make_boolean(&self, ctx: ContextId, value: bool) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(Value::new_bool(s.ctx.clone(), value)))
    }

    fn make_number(&self, ctx: ContextId, value: f64) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(Value::new_number(s.ctx.clone(), value)))
    }

    fn make_string(&self, ctx: ContextId, value: &str) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(s.string(value)?))
    }

    fn make_object(&self, ctx: ContextId) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| {
            let object = s.check(Object::new(s.ctx.clone()))?;
            s.register(object.into_value())
        })
    }

    fn make_array(&self, ctx: ContextId, elements: &[ValueRef]) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(s.values(elements)?.into_value()))
    }

    fn make_function(
        &self,
        ctx: ContextId,
        name: &str,
        function: NativeFunction,
    ) -> EngineResult<ValueRef> {
        self.enter(ctx, move |s| s.register(s.native(name, function)?))
    }

    fn make_error(&self, ctx: ContextId, name: &str, message: &str) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(s.call("makeError", (name, message))?))
    }

    fn make_date(&self, ctx: ContextId, millis: f64) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(s.call("makeDate", (millis,))?))
    }

    fn make_regexp(&self, ctx: ContextId, source: &str, flags: &str) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(s.call("makeRegExp", (source, flags))?))
    }

    fn make_array_buffer(&self, ctx: ContextId, bytes: Vec<u8>) -> EngineResult<ValueRef> {
        self.enter(ctx, move |s| {
            let buffer = s.check(ArrayBuffer::new(s.ctx.clone(), bytes))?;
            s.register(s.check(buffer.into_js(s.ctx))?)
        })
    }

    fn make_typed_array(
        &self,
        ctx: ContextId,
        kind: TypedArrayKind,
        length: usize,
    ) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| {
            let array = s.call("makeTypedArray", (kind.constructor_name(), length as f64))?;
            s.register(array)
        })
    }

    fn make_typed_array_view(
        &self,
        ctx: ContextId,
        kind: TypedArrayKind,
        buffer: ValueRef,
        byte_offset: usize,
        length: usize,
    ) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| {
            let (buffer, buffer_kind) = s.kind_of(buffer)?;
            if buffer_kind != ValueKind::ArrayBuffer {
                return Err(EngineError::type_error(
                    ValueKind::ArrayBuffer.name(),
                    buffer_kind.name(),
                ));
            }
            let view = s.call(
                "makeView",
                (
                    kind.constructor_name(),
                    buffer,
                    byte_offset as f64,
                    length as f64,
                ),
            )?;
            s.register(view)
        })
    }

    fn make_from_json(&self, ctx: ContextId, json: &str) -> EngineResult<ValueRef> {
        serde_json::from_str::<serde::de::IgnoredAny>(json)?;
        self.enter(ctx, |s| s.register(s.call("parse", (json,))?))
    }

    fn kind_of(&self, ctx: ContextId, value: ValueRef) -> EngineResult<ValueKind> {
        self.enter(ctx, |s| s.kind_of(value).map(|(_, kind)| kind))
    }

    fn to_number(&self, ctx: ContextId, value: ValueRef) -> EngineResult<f64> {
        self.enter(ctx, |s| {
            let value = s.value(value)?;
            match value.as_number() {
                Some(n) => Ok(n),
                None => s.call("toNumber", (value,)),
            }
        })
    }

    fn to_boolean(&self, ctx: ContextId, value: ValueRef) -> EngineResult<bool> {
        self.enter(ctx, |s| {
            let value = s.value(value)?;
            match value.as_bool() {
                Some(b) => Ok(b),
                None => s.call("toBoolean", (value,)),
            }
        })
    }

    fn to_js_string(&self, ctx: ContextId, value: ValueRef) -> EngineResult<String> {
        self.enter(ctx, |s| s.call("toString", (s.value(value)?,)))
    }

    fn to_json(&self, ctx: ContextId, value: ValueRef) -> EngineResult<Option<String>> {
        self.enter(ctx, |s| s.call("stringify", (s.value(value)?,)))
    }

    fn typed_array_info(&self, ctx: ContextId, value: ValueRef) -> EngineResult<TypedArrayInfo> {
        self.enter(ctx, |s| {
            let (value, kind) = s.kind_of(value)?;
            if kind != ValueKind::TypedArray {
                return Err(EngineError::type_error(
                    ValueKind::TypedArray.name(),
                    kind.name(),
                ));
            }
            let info: Array = s.call("typedInfo", (value,))?;
            let tag: String = s.check(info.get(0))?;
            let buffer: Value = s.check(info.get(1))?;
            let byte_offset: f64 = s.check(info.get(2))?;
            let length: f64 = s.check(info.get(3))?;
            let kind = TypedArrayKind::from_constructor_name(&tag)
                .ok_or_else(|| EngineError::type_error("typed array", tag))?;
            Ok(TypedArrayInfo {
                kind,
                buffer: s.register(buffer)?,
                byte_offset: byte_offset as usize,
                length: length as usize,
            })
        })
    }

    fn array_buffer_bytes(&self, ctx: ContextId, buffer: ValueRef) -> EngineResult<Vec<u8>> {
        self.enter(ctx, |s| {
            let (value, kind) = s.kind_of(buffer)?;
            if kind != ValueKind::ArrayBuffer {
                return Err(EngineError::type_error(
                    ValueKind::ArrayBuffer.name(),
                    kind.name(),
                ));
            }
            let buffer = s.check(ArrayBuffer::from_js(s.ctx, value))?;
            buffer
                .as_bytes()
                .map(<[u8]>::to_vec)
                .ok_or_else(|| EngineError::type_error("ArrayBuffer", "detached buffer"))
        })
    }

    fn get_property(
        &self,
        ctx: ContextId,
        object: ValueRef,
        name: &str,
    ) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(s.call("get", (s.value(object)?, name))?))
    }

    fn set_property(
        &self,
        ctx: ContextId,
        object: ValueRef,
        name: &str,
        value: ValueRef,
    ) -> EngineResult<()> {
        self.enter(ctx, |s| {
            s.call("set", (s.value(object)?, name, s.value(value)?))
        })
    }

    fn has_property(&self, ctx: ContextId, object: ValueRef, name: &str) -> EngineResult<bool> {
        self.enter(ctx, |s| s.call("has", (s.value(object)?, name)))
    }

    fn delete_property(
        &self,
        ctx: ContextId,
        object: ValueRef,
        name: &str,
    ) -> EngineResult<bool> {
        self.enter(ctx, |s| s.call("remove", (s.value(object)?, name)))
    }

    fn get_index(&self, ctx: ContextId, object: ValueRef, index: u32) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| s.register(s.call("get", (s.value(object)?, index))?))
    }

    fn set_index(
        &self,
        ctx: ContextId,
        object: ValueRef,
        index: u32,
        value: ValueRef,
    ) -> EngineResult<()> {
        self.enter(ctx, |s| {
            s.call("set", (s.value(object)?, index, s.value(value)?))
        })
    }

    fn property_names(&self, ctx: ContextId, object: ValueRef) -> EngineResult<Vec<String>> {
        self.enter(ctx, |s| s.call("keys", (s.value(object)?,)))
    }

    fn call(
        &self,
        ctx: ContextId,
        function: ValueRef,
        this: Option<ValueRef>,
        arguments: &[ValueRef],
    ) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| {
            let this = match this {
                Some(this) => s.value(this)?,
                None => Value::new_undefined(s.ctx.clone()),
            };
            let result = s.call("apply", (s.value(function)?, this, s.values(arguments)?))?;
            s.register(result)
        })
    }

    fn construct(
        &self,
        ctx: ContextId,
        constructor: ValueRef,
        arguments: &[ValueRef],
    ) -> EngineResult<ValueRef> {
        self.enter(ctx, |s| {
            let result = s.call("construct", (s.value(constructor)?, s.values(arguments)?))?;
            s.register(result)
        })
    }

    fn protect(&self, ctx: ContextId, value: ValueRef) -> EngineResult<()> {
        self.check_context(ctx)?;
        let mut handles = self.handles.lock();
        let entry = handles
            .arena
            .get_mut(value)
            .ok_or(EngineError::InvalidHandle(value))?;
        entry.protect_count += 1;
        Ok(())
    }

    fn unprotect(&self, ctx: ContextId, value: ValueRef) -> EngineResult<()> {
        self.check_context(ctx)?;
        let mut handles = self.handles.lock();
        let entry = handles
            .arena
            .get_mut(value)
            .ok_or(EngineError::InvalidHandle(value))?;
        if entry.protect_count == 0 {
            warn!(value = %value, "Unprotect on a value that is not protected");
        }
        entry.protect_count = entry.protect_count.saturating_sub(1);
        Ok(())
    }

    fn garbage_collect(&self, ctx: ContextId) -> EngineResult<usize> {
        let freed = self.enter(ctx, |s| {
            let doomed = s.engine.handles.lock().arena.sweep(ctx);
            Ok(doomed.len())
        })?;
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.values_freed.fetch_add(freed as u64, Ordering::Relaxed);
        if !scope::holds(self.id) {
            self.drain_retired();
            self.runtime.run_gc();
        }
        trace!(context = %ctx, freed, "Handles collected");
        Ok(freed)
    }

    fn statistics(&self) -> HeapStatistics {
        let handles = self.handles.lock();
        HeapStatistics {
            live_values: handles.arena.live(),
            protected_values: handles.arena.protected(),
            collections: self.collections.load(Ordering::Relaxed),
            values_freed: self.values_freed.load(Ordering::Relaxed),
        }
    }
}
