//! Plugin classes: the members a native type exposes, with typed invokers.
//!
//! ```
//! use nodekit_scripting::PluginClass;
//! use std::sync::atomic::{AtomicI64, Ordering};
//!
//! struct Counter(AtomicI64);
//!
//! let class = PluginClass::<Counter>::new("Counter")
//!     .constructor(1, |call| Ok(Counter(AtomicI64::new(call.arg(0)?))))
//!     .method("value", 0, |counter, _| Ok(counter.0.load(Ordering::SeqCst)))
//!     .action("add", 1, |counter, call| {
//!         counter.0.fetch_add(call.arg(0)?, Ordering::SeqCst);
//!         Ok(())
//!     })
//!     .build();
//! assert!(class.is_factory());
//! ```

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::completion::Completion;
use crate::error::{BridgeError, BridgeResult};
use crate::invocation::Invocation;
use crate::message::ScriptMessage;
use crate::typeinfo::{MemberInfo, TypeInfo};

/// A native object bound to a channel
pub type PluginObject = Arc<dyn Any + Send + Sync>;

type MethodFn = dyn Fn(&PluginObject, &Invocation) -> BridgeResult<Value> + Send + Sync;
type AsyncMethodFn = dyn Fn(&PluginObject, &Invocation, Completion) -> BridgeResult<()> + Send + Sync;
type ConstructorFn = dyn Fn(&Invocation) -> BridgeResult<PluginObject> + Send + Sync;
type MessageFn = dyn Fn(&PluginObject, &ScriptMessage) -> BridgeResult<Value> + Send + Sync;
type RewriteFn = dyn Fn(&str, &str) -> String + Send + Sync;

#[derive(Clone)]
pub(crate) enum Invoker {
    Sync(Arc<MethodFn>),
    Async(Arc<AsyncMethodFn>),
}

fn downcast<'a, T: Any + Send + Sync>(object: &'a PluginObject, method: &str) -> BridgeResult<&'a T> {
    object
        .downcast_ref::<T>()
        .ok_or_else(|| BridgeError::invocation(method, format!("receiver is not a {}", type_name::<T>())))
}

/// Builder for the plugin type of `T`
pub struct PluginClass<T> {
    type_info: TypeInfo,
    invokers: FxHashMap<String, Invoker>,
    constructor: Option<Arc<ConstructorFn>>,
    message_handler: Option<Arc<MessageFn>>,
    rewrite: Option<Arc<RewriteFn>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> PluginClass<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            type_info: TypeInfo::new(name),
            invokers: FxHashMap::default(),
            constructor: None,
            message_handler: None,
            rewrite: None,
            _marker: PhantomData,
        }
    }

    /// A method returning a value to the caller
    pub fn method<R, F>(self, name: &str, arity: usize, method: F) -> Self
    where
        R: Serialize,
        F: Fn(&T, &Invocation) -> BridgeResult<R> + Send + Sync + 'static,
    {
        let invoker: Arc<MethodFn> = Arc::new(move |object, call| {
            let result = method(downcast::<T>(object, call.method())?, call)?;
            Ok(serde_json::to_value(result)?)
        });
        self.member(MemberInfo::method(name, arity, false), Invoker::Sync(invoker))
    }

    /// A method without a result
    pub fn action<F>(self, name: &str, arity: usize, action: F) -> Self
    where
        F: Fn(&T, &Invocation) -> BridgeResult<()> + Send + Sync + 'static,
    {
        let invoker: Arc<MethodFn> = Arc::new(move |object, call| {
            action(downcast::<T>(object, call.method())?, call)?;
            Ok(Value::Null)
        });
        self.member(MemberInfo::method(name, arity, true), Invoker::Sync(invoker))
    }

    /// A method whose last of `arity` parameters is a completion. Script code
    /// sees it as `<name>Sync` and `<name>Async`.
    pub fn async_method<F>(self, name: &str, arity: usize, method: F) -> Self
    where
        F: Fn(&T, &Invocation, Completion) -> BridgeResult<()> + Send + Sync + 'static,
    {
        let invoker: Arc<AsyncMethodFn> = Arc::new(move |object, call, completion| {
            method(downcast::<T>(object, call.method())?, call, completion)
        });
        self.member(MemberInfo::async_callback(name, arity), Invoker::Async(invoker))
    }

    /// Makes the plugin a factory: script code creates instances with `new`
    pub fn constructor<F>(mut self, arity: usize, constructor: F) -> Self
    where
        F: Fn(&Invocation) -> BridgeResult<T> + Send + Sync + 'static,
    {
        self.type_info.insert(MemberInfo::constructor(arity));
        self.constructor = Some(Arc::new(move |call| {
            Ok(Arc::new(constructor(call)?) as PluginObject)
        }));
        self
    }

    /// Receives messages that no instance resolves, when bound as principal
    pub fn message_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&T, &ScriptMessage) -> BridgeResult<Value> + Send + Sync + 'static,
    {
        self.message_handler = Some(Arc::new(move |object, message| {
            handler(downcast::<T>(object, message.opcode.as_str())?, message)
        }));
        self
    }

    /// Post-process generated stub code. Called with each method line and
    /// the exported name, then with the constructor shape (`.base`), the
    /// joined method lines (`.local`) and the whole script (`.global`).
    pub fn rewrite_stub<F>(mut self, rewrite: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.rewrite = Some(Arc::new(rewrite));
        self
    }

    fn member(mut self, info: MemberInfo, invoker: Invoker) -> Self {
        let key = self.type_info.insert(info);
        self.invokers.insert(key, invoker);
        self
    }

    pub fn build(self) -> Arc<PluginType> {
        Arc::new(PluginType {
            object_type: TypeId::of::<T>(),
            type_info: self.type_info,
            invokers: self.invokers,
            constructor: self.constructor,
            message_handler: self.message_handler,
            rewrite: self.rewrite,
        })
    }
}

/// A built plugin class with its native type erased
pub struct PluginType {
    object_type: TypeId,
    type_info: TypeInfo,
    invokers: FxHashMap<String, Invoker>,
    constructor: Option<Arc<ConstructorFn>>,
    message_handler: Option<Arc<MessageFn>>,
    rewrite: Option<Arc<RewriteFn>>,
}

impl PluginType {
    pub fn name(&self) -> &str {
        self.type_info.type_name()
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// Whether script code constructs instances
    pub fn is_factory(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn accepts(&self, object: &PluginObject) -> bool {
        (**object).type_id() == self.object_type
    }

    pub(crate) fn is_object_type<T: Any>(&self) -> bool {
        self.object_type == TypeId::of::<T>()
    }

    pub fn rewrite_stub(&self, stub: &str, key: &str) -> String {
        match &self.rewrite {
            Some(rewrite) => rewrite(stub, key),
            None => stub.to_string(),
        }
    }

    pub(crate) fn invoker(&self, key: &str) -> Option<Invoker> {
        self.invokers.get(key).cloned()
    }

    pub(crate) fn construct(&self, call: &Invocation) -> Option<BridgeResult<PluginObject>> {
        self.constructor.as_ref().map(|constructor| constructor(call))
    }

    pub(crate) fn handle_message(
        &self,
        principal: &PluginObject,
        message: &ScriptMessage,
    ) -> Option<BridgeResult<Value>> {
        self.message_handler
            .as_ref()
            .map(|handler| handler(principal, message))
    }
}

impl fmt::Debug for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginType")
            .field("name", &self.name())
            .field("members", &self.type_info.len())
            .field("factory", &self.is_factory())
            .finish()
    }
}
