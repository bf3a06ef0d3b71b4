//! Engine seam for NodeKit scripting.
//!
//! This crate defines [`ScriptEngine`], the narrow interface the runtime
//! drives, and [`QuickJsEngine`], its implementation over an embedded QuickJS
//! runtime.
//!
//! Values are addressed by [`ValueRef`] handles. A handle stays valid while
//! it is protected, pinned as a context's global object, or held by a native
//! call in progress; anything else is dropped by the next collection of its
//! context, after which every operation on the handle fails with
//! [`EngineError::InvalidHandle`]. The script value itself lives on as long
//! as script can still reach it.
//!
//! # Example
//!
//! ```
//! use nodekit_engine::{QuickJsEngine, ScriptEngine};
//!
//! let engine = QuickJsEngine::new().unwrap();
//! let ctx = engine.create_context().unwrap();
//! let value = engine.evaluate(ctx, "[1, 2, 3].map(n => n * 2)", None).unwrap();
//! assert_eq!(engine.to_json(ctx, value).unwrap().as_deref(), Some("[2,4,6]"));
//! ```
//!
//! # Thread Safety
//!
//! `QuickJsEngine` is `Send + Sync`; every call takes the runtime lock, and a
//! context is meant to be driven from a single thread at a time.
//! `nodekit-runtime` enforces that by funnelling every operation on a context
//! through its engine queue.

pub mod engine;
pub mod error;
pub mod quickjs;
pub mod types;

pub use engine::{CallFrame, HeapStatistics, NativeFunction, ScriptEngine, native_function};
pub use error::{EngineError, EngineResult};
pub use quickjs::QuickJsEngine;
pub use types::{ContextId, TypedArrayInfo, TypedArrayKind, ValueKind, ValueRef};
