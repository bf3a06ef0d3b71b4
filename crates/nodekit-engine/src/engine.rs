//! The engine seam.
//!
//! `ScriptEngine` mirrors the JavaScriptCore C API one call per operation.
//! Implementations are `Send + Sync` and take `&self`, but callers are
//! expected to serialize all access to one context through a single thread.
//! Native callbacks may re-enter the engine while they run.

use std::fmt;
use std::sync::Arc;

use crate::error::EngineResult;
use crate::types::{ContextId, TypedArrayInfo, TypedArrayKind, ValueKind, ValueRef};

/// Arguments of a native function invocation
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub context: ContextId,
    pub function: ValueRef,
    pub this: ValueRef,
    pub arguments: Vec<ValueRef>,
    /// Set when the function was invoked with `new`
    pub is_construct: bool,
}

impl CallFrame {
    /// Argument at `index`, if the caller supplied it
    pub fn argument(&self, index: usize) -> Option<ValueRef> {
        self.arguments.get(index).copied()
    }
}

/// Host implementation of a script function.
///
/// `Ok` is the return value; `Err` is a value to throw into the script.
pub type NativeFunction =
    Arc<dyn Fn(&dyn ScriptEngine, &CallFrame) -> Result<ValueRef, ValueRef> + Send + Sync>;

/// Wrap a closure as a [`NativeFunction`]
pub fn native_function<F>(f: F) -> NativeFunction
where
    F: Fn(&dyn ScriptEngine, &CallFrame) -> Result<ValueRef, ValueRef> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Counters exposed by an engine implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStatistics {
    pub live_values: usize,
    pub protected_values: usize,
    pub collections: u64,
    pub values_freed: u64,
}

pub trait ScriptEngine: Send + Sync {
    // Contexts
    fn create_context(&self) -> EngineResult<ContextId>;
    fn release_context(&self, ctx: ContextId) -> EngineResult<()>;
    fn global_object(&self, ctx: ContextId) -> EngineResult<ValueRef>;

    fn evaluate(
        &self,
        ctx: ContextId,
        script: &str,
        source_url: Option<&str>,
    ) -> EngineResult<ValueRef>;

    // Construction
    fn make_undefined(&self, ctx: ContextId) -> EngineResult<ValueRef>;
    fn make_null(&self, ctx: ContextId) -> EngineResult<ValueRef>;
    fn make_boolean(&self, ctx: ContextId, value: bool) -> EngineResult<ValueRef>;
    fn make_number(&self, ctx: ContextId, value: f64) -> EngineResult<ValueRef>;
    fn make_string(&self, ctx: ContextId, value: &str) -> EngineResult<ValueRef>;
    fn make_object(&self, ctx: ContextId) -> EngineResult<ValueRef>;
    fn make_array(&self, ctx: ContextId, elements: &[ValueRef]) -> EngineResult<ValueRef>;
    fn make_function(
        &self,
        ctx: ContextId,
        name: &str,
        function: NativeFunction,
    ) -> EngineResult<ValueRef>;
    /// Create an `Error`-shaped object with `name`, `message` and `stack`
    fn make_error(&self, ctx: ContextId, name: &str, message: &str) -> EngineResult<ValueRef>;
    fn make_date(&self, ctx: ContextId, millis: f64) -> EngineResult<ValueRef>;
    fn make_regexp(&self, ctx: ContextId, source: &str, flags: &str) -> EngineResult<ValueRef>;
    fn make_array_buffer(&self, ctx: ContextId, bytes: Vec<u8>) -> EngineResult<ValueRef>;
    /// Zero-filled typed array with its own buffer
    fn make_typed_array(
        &self,
        ctx: ContextId,
        kind: TypedArrayKind,
        length: usize,
    ) -> EngineResult<ValueRef>;
    /// Typed array sharing `buffer`, starting at `byte_offset`
    fn make_typed_array_view(
        &self,
        ctx: ContextId,
        kind: TypedArrayKind,
        buffer: ValueRef,
        byte_offset: usize,
        length: usize,
    ) -> EngineResult<ValueRef>;
    fn make_from_json(&self, ctx: ContextId, json: &str) -> EngineResult<ValueRef>;

    // Inspection
    fn kind_of(&self, ctx: ContextId, value: ValueRef) -> EngineResult<ValueKind>;
    fn to_number(&self, ctx: ContextId, value: ValueRef) -> EngineResult<f64>;
    fn to_boolean(&self, ctx: ContextId, value: ValueRef) -> EngineResult<bool>;
    fn to_js_string(&self, ctx: ContextId, value: ValueRef) -> EngineResult<String>;
    /// `JSON.stringify`; `None` for values JSON cannot represent
    fn to_json(&self, ctx: ContextId, value: ValueRef) -> EngineResult<Option<String>>;
    fn typed_array_info(&self, ctx: ContextId, value: ValueRef) -> EngineResult<TypedArrayInfo>;
    fn array_buffer_bytes(&self, ctx: ContextId, buffer: ValueRef) -> EngineResult<Vec<u8>>;

    // Properties
    fn get_property(&self, ctx: ContextId, object: ValueRef, name: &str)
    -> EngineResult<ValueRef>;
    fn set_property(
        &self,
        ctx: ContextId,
        object: ValueRef,
        name: &str,
        value: ValueRef,
    ) -> EngineResult<()>;
    fn has_property(&self, ctx: ContextId, object: ValueRef, name: &str) -> EngineResult<bool>;
    fn delete_property(&self, ctx: ContextId, object: ValueRef, name: &str)
    -> EngineResult<bool>;
    fn get_index(&self, ctx: ContextId, object: ValueRef, index: u32) -> EngineResult<ValueRef>;
    fn set_index(
        &self,
        ctx: ContextId,
        object: ValueRef,
        index: u32,
        value: ValueRef,
    ) -> EngineResult<()>;
    /// Own enumerable property names in insertion order
    fn property_names(&self, ctx: ContextId, object: ValueRef) -> EngineResult<Vec<String>>;

    // Invocation
    fn call(
        &self,
        ctx: ContextId,
        function: ValueRef,
        this: Option<ValueRef>,
        arguments: &[ValueRef],
    ) -> EngineResult<ValueRef>;
    fn construct(
        &self,
        ctx: ContextId,
        constructor: ValueRef,
        arguments: &[ValueRef],
    ) -> EngineResult<ValueRef>;

    // Memory
    fn protect(&self, ctx: ContextId, value: ValueRef) -> EngineResult<()>;
    fn unprotect(&self, ctx: ContextId, value: ValueRef) -> EngineResult<()>;
    /// Collect unreachable values; returns how many were freed
    fn garbage_collect(&self, ctx: ContextId) -> EngineResult<usize>;
    fn statistics(&self) -> HeapStatistics;
}

impl fmt::Debug for dyn ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("statistics", &self.statistics())
            .finish()
    }
}
