//! Native wrappers around engine values
//!
//! A [`JsValue`] owns one pin on one handle in one context. At most one
//! wrapper exists per live handle: wrapping the same handle twice returns
//! clones of the same wrapper. Dropping the last clone unregisters it and
//! queues its pin for release.
//!
//! Wrappers are `Send + Sync`; every operation hops onto the context's
//! queue thread, or runs inline when already there.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use nodekit_engine::{TypedArrayKind, ValueKind, ValueRef};

use crate::context::EngineContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::exception::ScriptException;
use crate::marshal::{NativeBinary, NativeType, NativeValue, PinScope, to_engine, to_native};

pub(crate) struct WrapperCore {
    ctx: EngineContext,
    handle: ValueRef,
    generation: u64,
    kind: ValueKind,
}

impl WrapperCore {
    pub(crate) fn new(ctx: EngineContext, handle: ValueRef, generation: u64, kind: ValueKind) -> Self {
        Self {
            ctx,
            handle,
            generation,
            kind,
        }
    }
}

impl Drop for WrapperCore {
    fn drop(&mut self) {
        self.ctx.release_wrapper(self.handle, self.generation);
    }
}

/// A pinned engine value
#[derive(Clone)]
pub struct JsValue {
    core: Arc<WrapperCore>,
}

impl JsValue {
    pub(crate) fn from_core(core: Arc<WrapperCore>) -> Self {
        Self { core }
    }

    pub fn context(&self) -> &EngineContext {
        &self.core.ctx
    }

    pub fn handle(&self) -> ValueRef {
        self.core.handle
    }

    pub fn kind(&self) -> ValueKind {
        self.core.kind
    }

    /// Whether both wrappers are the same instance
    pub fn ptr_eq(&self, other: &JsValue) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub fn is_undefined(&self) -> bool {
        self.kind() == ValueKind::Undefined
    }

    pub fn is_null(&self) -> bool {
        self.kind() == ValueKind::Null
    }

    pub fn is_boolean(&self) -> bool {
        self.kind() == ValueKind::Boolean
    }

    pub fn is_number(&self) -> bool {
        self.kind() == ValueKind::Number
    }

    pub fn is_string(&self) -> bool {
        self.kind() == ValueKind::String
    }

    pub fn is_object(&self) -> bool {
        self.kind().is_object()
    }

    pub fn is_array(&self) -> bool {
        self.kind() == ValueKind::Array
    }

    pub fn is_function(&self) -> bool {
        self.kind() == ValueKind::Function
    }

    pub fn is_typed_array(&self) -> bool {
        self.kind() == ValueKind::TypedArray
    }

    pub fn is_array_buffer(&self) -> bool {
        self.kind() == ValueKind::ArrayBuffer
    }

    pub fn is_date(&self) -> bool {
        self.kind() == ValueKind::Date
    }

    pub fn is_error(&self) -> bool {
        self.kind() == ValueKind::Error
    }

    pub fn is_regexp(&self) -> bool {
        self.kind() == ValueKind::RegExp
    }

    /// Run `op` on the queue thread with this value kept alive
    pub(crate) fn with_engine<T, F>(&self, op: F) -> RuntimeResult<T>
    where
        F: FnOnce(&EngineContext, ValueRef) -> RuntimeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        self.context().sync(move |ctx| op(ctx, this.handle()))
    }

    pub fn to_number(&self) -> RuntimeResult<f64> {
        self.with_engine(|ctx, handle| Ok(ctx.engine().to_number(ctx.id(), handle)?))
    }

    pub fn to_boolean(&self) -> RuntimeResult<bool> {
        self.with_engine(|ctx, handle| Ok(ctx.engine().to_boolean(ctx.id(), handle)?))
    }

    pub fn to_js_string(&self) -> RuntimeResult<String> {
        self.with_engine(|ctx, handle| Ok(ctx.engine().to_js_string(ctx.id(), handle)?))
    }

    /// `JSON.stringify` of the value; `None` for undefined and functions
    pub fn to_json(&self) -> RuntimeResult<Option<String>> {
        self.with_engine(|ctx, handle| match ctx.engine().to_json(ctx.id(), handle) {
            Ok(json) => Ok(json),
            Err(e) => ctx.raise(e).map(|_| None),
        })
    }

    pub fn to_json_value(&self) -> RuntimeResult<serde_json::Value> {
        match self.to_json()? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(serde_json::Value::Null),
        }
    }

    /// Convert to a native value of the given shape
    pub fn to_native(&self, target: &NativeType) -> RuntimeResult<NativeValue> {
        let target = target.clone();
        self.with_engine(move |ctx, handle| to_native(ctx, handle, &target))
    }

    pub fn as_object(&self) -> Option<JsObject> {
        self.is_object().then(|| JsObject(self.clone()))
    }

    pub fn as_function(&self) -> Option<JsFunction> {
        self.is_function().then(|| JsFunction(JsObject(self.clone())))
    }

    pub fn as_array(&self) -> Option<JsArray> {
        self.is_array().then(|| JsArray(JsObject(self.clone())))
    }

    pub fn as_typed_array(&self) -> Option<JsTypedArray> {
        self.is_typed_array()
            .then(|| JsTypedArray(JsObject(self.clone())))
    }

    pub fn as_array_buffer(&self) -> Option<JsArrayBuffer> {
        self.is_array_buffer()
            .then(|| JsArrayBuffer(JsObject(self.clone())))
    }

    pub fn as_error(&self) -> Option<JsError> {
        self.is_error().then(|| JsError(JsObject(self.clone())))
    }
}

impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsValue")
            .field("kind", &self.kind())
            .field("handle", &self.handle())
            .field("context", &self.context().id())
            .finish()
    }
}

macro_rules! object_view {
    ($(#[$meta:meta])* $name:ident, $target:ty) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name($target);

        impl Deref for $name {
            type Target = $target;

            fn deref(&self) -> &$target {
                &self.0
            }
        }

        impl From<$name> for JsValue {
            fn from(view: $name) -> JsValue {
                view.as_value().clone()
            }
        }
    };
}

object_view!(
    /// An engine value of any object category
    JsObject,
    JsValue
);
object_view!(JsFunction, JsObject);
object_view!(JsArray, JsObject);
object_view!(
    /// A typed array view over an array buffer
    JsTypedArray,
    JsObject
);
object_view!(JsArrayBuffer, JsObject);
object_view!(JsError, JsObject);

impl JsObject {
    pub(crate) fn from_value(value: JsValue) -> Self {
        Self(value)
    }
}

macro_rules! view_from_value {
    ($($name:ident),*) => {
        $(
            impl $name {
                pub(crate) fn from_value(value: JsValue) -> Self {
                    Self(JsObject(value))
                }
            }
        )*
    };
}

view_from_value!(JsFunction, JsArray, JsTypedArray, JsArrayBuffer, JsError);

impl JsObject {
    pub fn as_value(&self) -> &JsValue {
        &self.0
    }

    pub fn get(&self, name: &str) -> RuntimeResult<JsValue> {
        let name = name.to_string();
        self.with_engine(move |ctx, handle| {
            let result = ctx.engine().get_property(ctx.id(), handle, &name);
            ctx.value_or_raise(result)
        })
    }

    pub fn set(&self, name: &str, value: impl Into<NativeValue>) -> RuntimeResult<()> {
        let name = name.to_string();
        let value = value.into();
        self.with_engine(move |ctx, handle| {
            let mut scope = PinScope::new(ctx);
            let value = to_engine(ctx, &value, &mut scope)?;
            ctx.unit_or_raise(ctx.engine().set_property(ctx.id(), handle, &name, value))
        })
    }

    pub fn has(&self, name: &str) -> RuntimeResult<bool> {
        let name = name.to_string();
        self.with_engine(move |ctx, handle| {
            Ok(ctx.engine().has_property(ctx.id(), handle, &name)?)
        })
    }

    pub fn delete(&self, name: &str) -> RuntimeResult<bool> {
        let name = name.to_string();
        self.with_engine(move |ctx, handle| {
            match ctx.engine().delete_property(ctx.id(), handle, &name) {
                Ok(deleted) => Ok(deleted),
                Err(e) => ctx.raise(e).map(|_| false),
            }
        })
    }

    pub fn property_names(&self) -> RuntimeResult<Vec<String>> {
        self.with_engine(|ctx, handle| Ok(ctx.engine().property_names(ctx.id(), handle)?))
    }

    pub fn get_index(&self, index: u32) -> RuntimeResult<JsValue> {
        self.with_engine(move |ctx, handle| {
            let result = ctx.engine().get_index(ctx.id(), handle, index);
            ctx.value_or_raise(result)
        })
    }

    pub fn set_index(&self, index: u32, value: impl Into<NativeValue>) -> RuntimeResult<()> {
        let value = value.into();
        self.with_engine(move |ctx, handle| {
            let mut scope = PinScope::new(ctx);
            let value = to_engine(ctx, &value, &mut scope)?;
            ctx.unit_or_raise(ctx.engine().set_index(ctx.id(), handle, index, value))
        })
    }

    /// Call the function stored under `name` with this object as receiver
    pub fn call_method(&self, name: &str, args: Vec<NativeValue>) -> RuntimeResult<JsValue> {
        let method = self.get(name)?;
        match method.as_function() {
            Some(function) => function.call(Some(self), args),
            None => Err(RuntimeError::type_error(
                "function",
                method.kind().name(),
            )),
        }
    }
}

impl JsFunction {
    pub fn call(&self, this: Option<&JsObject>, args: Vec<NativeValue>) -> RuntimeResult<JsValue> {
        let this = this.cloned();
        self.with_engine(move |ctx, handle| {
            let mut scope = PinScope::new(ctx);
            let this = match &this {
                Some(this) => Some(to_engine(
                    ctx,
                    &NativeValue::Value(this.as_value().clone()),
                    &mut scope,
                )?),
                None => None,
            };
            let args = args
                .iter()
                .map(|arg| to_engine(ctx, arg, &mut scope))
                .collect::<RuntimeResult<Vec<_>>>()?;
            let result = ctx.engine().call(ctx.id(), handle, this, &args);
            ctx.value_or_raise(result)
        })
    }

    /// Invoke as a constructor (`new f(...)`)
    pub fn construct(&self, args: Vec<NativeValue>) -> RuntimeResult<JsValue> {
        self.with_engine(move |ctx, handle| {
            let mut scope = PinScope::new(ctx);
            let args = args
                .iter()
                .map(|arg| to_engine(ctx, arg, &mut scope))
                .collect::<RuntimeResult<Vec<_>>>()?;
            let result = ctx.engine().construct(ctx.id(), handle, &args);
            ctx.value_or_raise(result)
        })
    }

    pub fn name(&self) -> RuntimeResult<String> {
        self.get("name")?.to_js_string()
    }
}

impl JsArray {
    pub fn len(&self) -> RuntimeResult<usize> {
        Ok(self.0.get("length")?.to_number()? as usize)
    }

    pub fn is_empty(&self) -> RuntimeResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: u32) -> RuntimeResult<JsValue> {
        self.get_index(index)
    }

    pub fn set(&self, index: u32, value: impl Into<NativeValue>) -> RuntimeResult<()> {
        self.set_index(index, value)
    }

    pub fn push(&self, value: impl Into<NativeValue>) -> RuntimeResult<()> {
        let length = self.len()?;
        self.set_index(length as u32, value)
    }

    pub fn to_vec(&self) -> RuntimeResult<Vec<JsValue>> {
        (0..self.len()? as u32).map(|i| self.get_index(i)).collect()
    }
}

impl JsTypedArray {
    fn info(&self) -> RuntimeResult<nodekit_engine::TypedArrayInfo> {
        self.with_engine(|ctx, handle| Ok(ctx.engine().typed_array_info(ctx.id(), handle)?))
    }

    pub fn element_kind(&self) -> RuntimeResult<TypedArrayKind> {
        Ok(self.info()?.kind)
    }

    pub fn len(&self) -> RuntimeResult<usize> {
        Ok(self.info()?.length)
    }

    pub fn is_empty(&self) -> RuntimeResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn byte_offset(&self) -> RuntimeResult<usize> {
        Ok(self.info()?.byte_offset)
    }

    pub fn byte_length(&self) -> RuntimeResult<usize> {
        Ok(self.info()?.byte_length())
    }

    /// Element at `index`, `None` past the end
    pub fn get(&self, index: usize) -> RuntimeResult<Option<f64>> {
        if index >= self.len()? {
            return Ok(None);
        }
        self.get_index(index as u32)?.to_number().map(Some)
    }

    pub fn set(&self, index: usize, value: f64) -> RuntimeResult<()> {
        self.set_index(index as u32, value)
    }

    pub fn to_vec(&self) -> RuntimeResult<Vec<f64>> {
        Ok(self.to_binary()?.values())
    }

    /// Copy of the viewed bytes
    pub fn to_binary(&self) -> RuntimeResult<NativeBinary> {
        self.with_engine(|ctx, handle| {
            let engine = ctx.engine();
            let info = engine.typed_array_info(ctx.id(), handle)?;
            let bytes = engine.array_buffer_bytes(ctx.id(), info.buffer)?;
            let end = (info.byte_offset + info.byte_length()).min(bytes.len());
            let start = info.byte_offset.min(end);
            Ok(NativeBinary::new(info.kind, bytes[start..end].to_vec()))
        })
    }

    pub fn buffer(&self) -> RuntimeResult<JsArrayBuffer> {
        self.with_engine(|ctx, handle| {
            let info = ctx.engine().typed_array_info(ctx.id(), handle)?;
            let buffer = ctx.wrap_inline(info.buffer)?;
            Ok(JsArrayBuffer(JsObject(buffer)))
        })
    }

    /// A view over elements `begin..end` sharing this array's buffer
    pub fn subarray(&self, begin: usize, end: Option<usize>) -> RuntimeResult<JsTypedArray> {
        self.with_engine(move |ctx, handle| {
            let info = ctx.engine().typed_array_info(ctx.id(), handle)?;
            let end = end.unwrap_or(info.length).min(info.length);
            let begin = begin.min(end);
            let offset = info.byte_offset + begin * info.kind.bytes_per_element();
            let result = ctx.engine().make_typed_array_view(
                ctx.id(),
                info.kind,
                info.buffer,
                offset,
                end - begin,
            );
            Ok(JsTypedArray(JsObject(ctx.value_or_raise(result)?)))
        })
    }
}

impl JsArrayBuffer {
    pub fn byte_length(&self) -> RuntimeResult<usize> {
        Ok(self.to_bytes()?.len())
    }

    pub fn to_bytes(&self) -> RuntimeResult<Vec<u8>> {
        self.with_engine(|ctx, handle| Ok(ctx.engine().array_buffer_bytes(ctx.id(), handle)?))
    }

    /// A typed array view over this buffer. Without `length` the view runs
    /// to the end of the buffer, which must then be a whole number of
    /// elements.
    pub fn view(
        &self,
        kind: TypedArrayKind,
        byte_offset: usize,
        length: Option<usize>,
    ) -> RuntimeResult<JsTypedArray> {
        self.with_engine(move |ctx, handle| {
            let engine = ctx.engine();
            let length = match length {
                Some(length) => length,
                None => {
                    let total = engine.array_buffer_bytes(ctx.id(), handle)?.len();
                    let width = kind.bytes_per_element();
                    let remaining = total.saturating_sub(byte_offset);
                    if remaining % width != 0 {
                        return Err(RuntimeError::Script(ScriptException::new(
                            "RangeError",
                            format!("byte length of {kind} should be a multiple of {width}"),
                        )));
                    }
                    remaining / width
                }
            };
            let result = engine.make_typed_array_view(ctx.id(), kind, handle, byte_offset, length);
            Ok(JsTypedArray(JsObject(ctx.value_or_raise(result)?)))
        })
    }
}

impl JsError {
    fn text(&self, name: &str) -> RuntimeResult<Option<String>> {
        let value = self.get(name)?;
        if value.is_undefined() || value.is_null() {
            return Ok(None);
        }
        value.to_js_string().map(Some)
    }

    pub fn name(&self) -> RuntimeResult<String> {
        Ok(self.text("name")?.unwrap_or_else(|| "Error".to_string()))
    }

    pub fn message(&self) -> RuntimeResult<String> {
        Ok(self.text("message")?.unwrap_or_default())
    }

    pub fn stack(&self) -> RuntimeResult<Option<String>> {
        self.text("stack")
    }

    pub fn to_exception(&self) -> RuntimeResult<ScriptException> {
        self.with_engine(|ctx, handle| {
            Ok(ScriptException::from_thrown(
                ctx.engine().as_ref(),
                ctx.id(),
                handle,
            ))
        })
    }
}
