//! Conversion between native values and engine values
//!
//! Native data is described by [`NativeValue`]; the shape native code expects
//! back is described by [`NativeType`]. Conversion in either direction runs
//! on the queue thread.
//!
//! Mismatches fail fast with a type error for primitive targets (`Bool`,
//! `Int`, `Float`). Reference targets accept `null`/`undefined` as
//! [`NativeValue::Null`], and `Optional` targets turn any mismatch into
//! `Null`.

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use nodekit_engine::{
    CallFrame, ContextId, ScriptEngine, TypedArrayKind, ValueKind, ValueRef, native_function,
};

use crate::context::{EngineContext, WeakContext};
use crate::error::{RuntimeError, RuntimeResult};
use crate::exception::error_value;
use crate::value::JsValue;

/// Largest integer a double represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A native value crossing into or out of the engine
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NativeValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<NativeValue>),
    Map(IndexMap<String, NativeValue>),
    Binary(NativeBinary),
    /// An engine value passed through by handle
    Value(JsValue),
    Callable(NativeCallable),
}

impl NativeValue {
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[NativeValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, NativeValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&JsValue> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Short category name used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Binary(_) => "binary",
            Self::Value(value) => value.kind().name(),
            Self::Callable(_) => "callable",
        }
    }

    /// JSON form; engine values are serialized through the engine and
    /// callables become `null`
    pub fn to_json(&self) -> RuntimeResult<serde_json::Value> {
        use serde_json::Value;
        Ok(match self {
            Self::Undefined | Self::Null | Self::Callable(_) => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::from(*n),
            Self::Float(n) => float_to_json(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(
                items
                    .iter()
                    .map(NativeValue::to_json)
                    .collect::<RuntimeResult<_>>()?,
            ),
            Self::Map(map) => {
                let mut object = serde_json::Map::new();
                for (key, value) in map {
                    object.insert(key.clone(), value.to_json()?);
                }
                Value::Object(object)
            }
            Self::Binary(binary) => {
                Value::Array(binary.values().into_iter().map(float_to_json).collect())
            }
            Self::Value(value) => value.to_json_value()?,
        })
    }
}

fn float_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl From<serde_json::Value> for NativeValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for NativeValue {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<u32> for NativeValue {
    fn from(n: u32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<i64> for NativeValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for NativeValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<T: Into<NativeValue>> From<Vec<T>> for NativeValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<NativeValue>> From<Option<T>> for NativeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

impl From<IndexMap<String, NativeValue>> for NativeValue {
    fn from(map: IndexMap<String, NativeValue>) -> Self {
        Self::Map(map)
    }
}

impl From<NativeBinary> for NativeValue {
    fn from(binary: NativeBinary) -> Self {
        Self::Binary(binary)
    }
}

impl From<NativeCallable> for NativeValue {
    fn from(callable: NativeCallable) -> Self {
        Self::Callable(callable)
    }
}

impl From<JsValue> for NativeValue {
    fn from(value: JsValue) -> Self {
        Self::Value(value)
    }
}

impl From<&JsValue> for NativeValue {
    fn from(value: &JsValue) -> Self {
        Self::Value(value.clone())
    }
}

macro_rules! native_from_view {
    ($($view:ty),*) => {
        $(
            impl From<$view> for NativeValue {
                fn from(view: $view) -> Self {
                    Self::Value(view.into())
                }
            }
        )*
    };
}

native_from_view!(
    crate::value::JsObject,
    crate::value::JsFunction,
    crate::value::JsArray,
    crate::value::JsTypedArray,
    crate::value::JsArrayBuffer,
    crate::value::JsError
);

/// Raw elements of a typed array, little-endian
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBinary {
    pub kind: TypedArrayKind,
    pub bytes: Vec<u8>,
}

impl NativeBinary {
    pub fn new(kind: TypedArrayKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    /// Encode `values` with the element conversion of `kind`
    pub fn from_values(kind: TypedArrayKind, values: &[f64]) -> Self {
        let width = kind.bytes_per_element();
        let mut bytes = vec![0u8; values.len() * width];
        for (value, chunk) in values.iter().zip(bytes.chunks_exact_mut(width)) {
            kind.write(*value, chunk);
        }
        Self { kind, bytes }
    }

    /// Number of whole elements
    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.bytes_per_element()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<f64> {
        self.bytes
            .chunks_exact(self.kind.bytes_per_element())
            .map(|chunk| self.kind.read(chunk))
            .collect()
    }
}

type CallableFn = dyn Fn(Vec<NativeValue>) -> RuntimeResult<NativeValue> + Send + Sync;

/// A native function exposed to script code.
///
/// Arguments are converted to `params` before the call; missing ones arrive
/// as `Null`.
#[derive(Clone)]
pub struct NativeCallable {
    params: Vec<NativeType>,
    function: Arc<CallableFn>,
}

impl NativeCallable {
    pub fn new<F>(params: Vec<NativeType>, function: F) -> Self
    where
        F: Fn(Vec<NativeValue>) -> RuntimeResult<NativeValue> + Send + Sync + 'static,
    {
        Self {
            params,
            function: Arc::new(function),
        }
    }

    pub fn params(&self) -> &[NativeType] {
        &self.params
    }

    pub fn invoke(&self, args: Vec<NativeValue>) -> RuntimeResult<NativeValue> {
        (self.function)(args)
    }
}

impl PartialEq for NativeCallable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.function, &other.function)
    }
}

impl fmt::Debug for NativeCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCallable")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Shape a native parameter or result expects
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeType {
    /// Classify by the engine value's category
    Any,
    /// Key/value reconstruction of any object
    Object,
    Map,
    /// An array or typed array, element-wise
    List(Box<NativeType>),
    Bool,
    Int,
    Float,
    String,
    /// A typed array, optionally of one element kind
    Binary(Option<TypedArrayKind>),
    /// The engine value itself
    Value,
    Function,
    /// A completion callback supplied by the script
    Callback,
    Optional(Box<NativeType>),
}

impl NativeType {
    pub fn list(element: NativeType) -> Self {
        Self::List(Box::new(element))
    }

    pub fn optional(inner: NativeType) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Whether `null`/`undefined` is an acceptable value
    pub fn is_nullable(&self) -> bool {
        !matches!(self, Self::Bool | Self::Int | Self::Float)
    }

    pub fn name(&self) -> String {
        match self {
            Self::Any => "any".into(),
            Self::Object => "object".into(),
            Self::Map => "map".into(),
            Self::List(element) => format!("list<{}>", element.name()),
            Self::Bool => "bool".into(),
            Self::Int => "int".into(),
            Self::Float => "float".into(),
            Self::String => "string".into(),
            Self::Binary(Some(kind)) => kind.constructor_name().into(),
            Self::Binary(None) => "typed-array".into(),
            Self::Value => "value".into(),
            Self::Function => "function".into(),
            Self::Callback => "callback".into(),
            Self::Optional(inner) => format!("{}?", inner.name()),
        }
    }
}

/// Values protected for the length of one conversion
pub(crate) struct PinScope {
    engine: Arc<dyn ScriptEngine>,
    context: ContextId,
    pinned: Vec<ValueRef>,
}

impl PinScope {
    pub(crate) fn new(ctx: &EngineContext) -> Self {
        Self {
            engine: ctx.engine().clone(),
            context: ctx.id(),
            pinned: Vec::new(),
        }
    }

    fn pin(&mut self, handle: ValueRef) -> RuntimeResult<()> {
        self.engine.protect(self.context, handle)?;
        self.pinned.push(handle);
        Ok(())
    }
}

impl Drop for PinScope {
    fn drop(&mut self) {
        for handle in self.pinned.drain(..) {
            let _ = self.engine.unprotect(self.context, handle);
        }
    }
}

/// Build the engine value for `value`. Queue thread only.
pub(crate) fn to_engine(
    ctx: &EngineContext,
    value: &NativeValue,
    scope: &mut PinScope,
) -> RuntimeResult<ValueRef> {
    let engine = ctx.engine();
    let id = ctx.id();
    Ok(match value {
        NativeValue::Undefined => engine.make_undefined(id)?,
        NativeValue::Null => engine.make_null(id)?,
        NativeValue::Bool(b) => engine.make_boolean(id, *b)?,
        NativeValue::Int(n) => engine.make_number(id, *n as f64)?,
        NativeValue::Float(n) => engine.make_number(id, *n)?,
        NativeValue::String(s) => engine.make_string(id, s)?,
        NativeValue::List(items) => {
            let elements = items
                .iter()
                .map(|item| to_engine(ctx, item, scope))
                .collect::<RuntimeResult<Vec<_>>>()?;
            engine.make_array(id, &elements)?
        }
        NativeValue::Map(map) => {
            let object = engine.make_object(id)?;
            for (key, item) in map {
                let item = to_engine(ctx, item, scope)?;
                engine.set_property(id, object, key, item)?;
            }
            object
        }
        NativeValue::Binary(binary) => {
            let length = binary.len();
            let mut bytes = binary.bytes.clone();
            bytes.truncate(length * binary.kind.bytes_per_element());
            let buffer = engine.make_array_buffer(id, bytes)?;
            engine.make_typed_array_view(id, binary.kind, buffer, 0, length)?
        }
        NativeValue::Value(js) => {
            let source = js.context();
            if source.group() != ctx.group() {
                return Err(RuntimeError::CrossGroupViolation {
                    expected: ctx.group().id(),
                    actual: source.group().id(),
                });
            }
            if source.is_closed() {
                return Err(RuntimeError::ContextClosed);
            }
            scope.pin(js.handle())?;
            js.handle()
        }
        NativeValue::Callable(callable) => callable_function(ctx, "", callable)?,
    })
}

/// Engine function named `name` that forwards to `callable`
pub(crate) fn callable_function(
    ctx: &EngineContext,
    name: &str,
    callable: &NativeCallable,
) -> RuntimeResult<ValueRef> {
    let weak = ctx.downgrade();
    let callable = callable.clone();
    let function = native_function(move |engine, frame| {
        let Some(ctx) = weak.upgrade() else {
            return Err(engine
                .make_error(frame.context, "Error", "Engine context is closed")
                .unwrap_or(frame.this));
        };
        invoke_callable(&ctx, &callable, frame).map_err(|e| {
            debug!(error = %e, "Native callable failed");
            error_value(engine, frame.context, &e).unwrap_or(frame.this)
        })
    });
    Ok(ctx.engine().make_function(ctx.id(), name, function)?)
}

fn invoke_callable(
    ctx: &EngineContext,
    callable: &NativeCallable,
    frame: &CallFrame,
) -> RuntimeResult<ValueRef> {
    let mut args = Vec::with_capacity(callable.params().len());
    for (index, param) in callable.params().iter().enumerate() {
        let arg = match frame.argument(index) {
            Some(handle) => to_native(ctx, handle, param)?,
            // A missing argument reads as undefined
            None if param.is_nullable() => NativeValue::Null,
            None => return Err(mismatch(param, ValueKind::Undefined)),
        };
        args.push(arg);
    }
    let result = callable.invoke(args)?;
    let mut scope = PinScope::new(ctx);
    to_engine(ctx, &result, &mut scope)
}

/// Read `handle` as `target`. Queue thread only.
pub(crate) fn to_native(
    ctx: &EngineContext,
    handle: ValueRef,
    target: &NativeType,
) -> RuntimeResult<NativeValue> {
    let engine = ctx.engine();
    let id = ctx.id();
    let kind = engine.kind_of(id, handle)?;

    if let NativeType::Optional(inner) = target {
        if kind.is_nullish() {
            return Ok(NativeValue::Null);
        }
        return match to_native(ctx, handle, inner) {
            Err(e) if e.is_type_error() => {
                debug!(expected = %inner.name(), actual = %kind, "Optional value replaced by null");
                Ok(NativeValue::Null)
            }
            other => other,
        };
    }

    if kind.is_nullish() && *target != NativeType::Any && *target != NativeType::Value {
        if target.is_nullable() {
            return Ok(NativeValue::Null);
        }
        return Err(mismatch(target, kind));
    }

    Ok(match target {
        NativeType::Any => return classify(ctx, handle, kind),
        NativeType::Value => NativeValue::Value(ctx.wrap_inline(handle)?),
        NativeType::Bool => match kind {
            ValueKind::Boolean => NativeValue::Bool(engine.to_boolean(id, handle)?),
            _ => return Err(mismatch(target, kind)),
        },
        NativeType::Int => match kind {
            ValueKind::Number => {
                let n = engine.to_number(id, handle)?;
                if !n.is_finite() {
                    return Err(RuntimeError::type_error("int", "non-finite number"));
                }
                NativeValue::Int(n.trunc() as i64)
            }
            _ => return Err(mismatch(target, kind)),
        },
        NativeType::Float => match kind {
            ValueKind::Number => NativeValue::Float(engine.to_number(id, handle)?),
            _ => return Err(mismatch(target, kind)),
        },
        NativeType::String => match kind {
            ValueKind::String => NativeValue::String(engine.to_js_string(id, handle)?),
            _ => return Err(mismatch(target, kind)),
        },
        NativeType::Object | NativeType::Map => {
            if !kind.is_object() {
                return Err(mismatch(target, kind));
            }
            object_to_map(ctx, handle, &NativeType::Any)?
        }
        NativeType::List(element) => match kind {
            ValueKind::Array => {
                let length = engine.to_number(id, engine.get_property(id, handle, "length")?)?;
                let mut items = Vec::with_capacity(length as usize);
                for index in 0..length as u32 {
                    let item = engine.get_index(id, handle, index)?;
                    items.push(to_native(ctx, item, element)?);
                }
                NativeValue::List(items)
            }
            ValueKind::TypedArray => {
                let binary = typed_array_binary(ctx, handle)?;
                let items = binary
                    .values()
                    .into_iter()
                    .map(|n| number_as(element, n))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                NativeValue::List(items)
            }
            _ => return Err(mismatch(target, kind)),
        },
        NativeType::Binary(expected) => match kind {
            ValueKind::TypedArray => {
                let binary = typed_array_binary(ctx, handle)?;
                if let Some(expected) = expected
                    && *expected != binary.kind
                {
                    return Err(RuntimeError::type_error(
                        expected.constructor_name(),
                        binary.kind.constructor_name(),
                    ));
                }
                NativeValue::Binary(binary)
            }
            ValueKind::ArrayBuffer if expected.is_none_or(|k| k == TypedArrayKind::Uint8) => {
                NativeValue::Binary(NativeBinary::new(
                    TypedArrayKind::Uint8,
                    engine.array_buffer_bytes(id, handle)?,
                ))
            }
            _ => return Err(mismatch(target, kind)),
        },
        NativeType::Function | NativeType::Callback => match kind {
            ValueKind::Function => NativeValue::Value(ctx.wrap_inline(handle)?),
            _ => return Err(mismatch(target, kind)),
        },
        NativeType::Optional(_) => unreachable!("optional targets are unwrapped above"),
    })
}

fn mismatch(target: &NativeType, kind: ValueKind) -> RuntimeError {
    RuntimeError::type_error(target.name(), kind.name())
}

fn number_as(target: &NativeType, n: f64) -> RuntimeResult<NativeValue> {
    match target {
        NativeType::Int => Ok(NativeValue::Int(n.trunc() as i64)),
        NativeType::Float => Ok(NativeValue::Float(n)),
        NativeType::Any | NativeType::Value => Ok(number_value(n)),
        NativeType::Optional(inner) => number_as(inner, n),
        other => Err(RuntimeError::type_error(other.name(), "number")),
    }
}

fn number_value(n: f64) -> NativeValue {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        NativeValue::Int(n as i64)
    } else {
        NativeValue::Float(n)
    }
}

fn classify(ctx: &EngineContext, handle: ValueRef, kind: ValueKind) -> RuntimeResult<NativeValue> {
    let engine = ctx.engine();
    let id = ctx.id();
    Ok(match kind {
        ValueKind::Undefined => NativeValue::Undefined,
        ValueKind::Null => NativeValue::Null,
        ValueKind::Boolean => NativeValue::Bool(engine.to_boolean(id, handle)?),
        ValueKind::Number => number_value(engine.to_number(id, handle)?),
        ValueKind::String => NativeValue::String(engine.to_js_string(id, handle)?),
        ValueKind::Array => to_native(ctx, handle, &NativeType::list(NativeType::Any))?,
        ValueKind::TypedArray => NativeValue::Binary(typed_array_binary(ctx, handle)?),
        ValueKind::ArrayBuffer => NativeValue::Binary(NativeBinary::new(
            TypedArrayKind::Uint8,
            engine.array_buffer_bytes(id, handle)?,
        )),
        ValueKind::Object => object_to_map(ctx, handle, &NativeType::Any)?,
        ValueKind::Function | ValueKind::Error | ValueKind::Date | ValueKind::RegExp => {
            NativeValue::Value(ctx.wrap_inline(handle)?)
        }
    })
}

fn object_to_map(
    ctx: &EngineContext,
    handle: ValueRef,
    element: &NativeType,
) -> RuntimeResult<NativeValue> {
    let engine = ctx.engine();
    let id = ctx.id();
    let mut map = IndexMap::new();
    for name in engine.property_names(id, handle)? {
        let value = engine.get_property(id, handle, &name)?;
        map.insert(name, to_native(ctx, value, element)?);
    }
    Ok(NativeValue::Map(map))
}

fn typed_array_binary(ctx: &EngineContext, handle: ValueRef) -> RuntimeResult<NativeBinary> {
    let engine = ctx.engine();
    let info = engine.typed_array_info(ctx.id(), handle)?;
    let bytes = engine.array_buffer_bytes(ctx.id(), info.buffer)?;
    let end = (info.byte_offset + info.byte_length()).min(bytes.len());
    let start = info.byte_offset.min(end);
    Ok(NativeBinary::new(info.kind, bytes[start..end].to_vec()))
}

/// Marshaling entry point bound to one context
#[derive(Clone)]
pub struct ValueMarshaler {
    ctx: EngineContext,
}

impl ValueMarshaler {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Convert a native value into a pinned engine value
    pub fn to_engine(&self, value: impl Into<NativeValue>) -> RuntimeResult<JsValue> {
        let value = value.into();
        self.ctx.sync(move |ctx| {
            let mut scope = PinScope::new(ctx);
            let handle = to_engine(ctx, &value, &mut scope)?;
            ctx.wrap_inline(handle)
        })
    }

    /// Convert an engine value into the native shape `target`
    pub fn to_native(&self, value: &JsValue, target: &NativeType) -> RuntimeResult<NativeValue> {
        if value.context().group() != self.ctx.group() {
            return Err(RuntimeError::CrossGroupViolation {
                expected: self.ctx.group().id(),
                actual: value.context().group().id(),
            });
        }
        let value = value.clone();
        let target = target.clone();
        self.ctx.sync(move |ctx| to_native(ctx, value.handle(), &target))
    }

    /// Build an engine value from JSON
    pub fn from_json(&self, json: &serde_json::Value) -> RuntimeResult<JsValue> {
        self.to_engine(NativeValue::from(json.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_values_roundtrip() {
        let binary = NativeBinary::from_values(TypedArrayKind::Int16, &[1.0, -2.0, 300.0]);
        assert_eq!(binary.len(), 3);
        assert_eq!(binary.bytes.len(), 6);
        assert_eq!(binary.values(), vec![1.0, -2.0, 300.0]);
    }

    #[test]
    fn test_from_json() {
        let value = NativeValue::from(serde_json::json!({"a": 1, "b": [true, null, 1.5]}));
        let map = value.as_map().unwrap();
        assert_eq!(map["a"], NativeValue::Int(1));
        assert_eq!(
            map["b"],
            NativeValue::List(vec![
                NativeValue::Bool(true),
                NativeValue::Null,
                NativeValue::Float(1.5)
            ])
        );
    }

    #[test]
    fn test_to_json() {
        let value = NativeValue::from(vec![NativeValue::Float(2.0), NativeValue::Undefined]);
        assert_eq!(value.to_json().unwrap(), serde_json::json!([2, null]));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(NativeType::list(NativeType::Int).name(), "list<int>");
        assert_eq!(NativeType::optional(NativeType::String).name(), "string?");
        assert!(!NativeType::Bool.is_nullable());
        assert!(NativeType::Map.is_nullable());
    }

    #[test]
    fn test_as_i64_accepts_integral_floats() {
        assert_eq!(NativeValue::Float(3.0).as_i64(), Some(3));
        assert_eq!(NativeValue::Float(3.5).as_i64(), None);
        assert_eq!(NativeValue::from("x").as_i64(), None);
    }
}
