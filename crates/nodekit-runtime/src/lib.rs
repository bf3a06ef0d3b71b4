//! nodekit-runtime - value lifetime and marshaling over a script engine.
//!
//! This crate turns the raw handle API of a [`ScriptEngine`](nodekit_engine::ScriptEngine)
//! into native wrappers whose lifetime is tied to the engine's root set.
//!
//! # Features
//!
//! - **Single queue thread per context**: every engine call is serialized;
//!   nested calls from the queue thread run inline
//! - **Identity stability**: one live wrapper per engine handle
//! - **Deferred unpinning**: dead wrappers are released in batches
//! - **Marshaling**: native values, typed arrays and callables in both directions
//! - **Exception bridge**: script exceptions as native errors, with an
//!   optional handler
//!
//! # Example
//!
//! ```no_run
//! use nodekit_runtime::{EngineContext, NativeType, NativeValue};
//!
//! let ctx = EngineContext::new().unwrap();
//! let marshaler = ctx.marshaler();
//!
//! let value = marshaler.to_engine(vec![1, 2, 3]).unwrap();
//! let back = marshaler.to_native(&value, &NativeType::Any).unwrap();
//! assert_eq!(back, NativeValue::from(vec![1, 2, 3]));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    EngineContext                             │
//! │  ┌─────────────┐ ┌─────────────┐ ┌──────────────────┐       │
//! │  │ EngineQueue │ │ HandleTable │ │  RefcountGuard   │       │
//! │  │ (thread)    │ │ (identity)  │ │ (pins, dead list)│       │
//! │  └─────────────┘ └─────────────┘ └──────────────────┘       │
//! │                 ExceptionBridge                              │
//! └─────────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    JsValue / typed views                     │
//! │  - one pin per wrapper                                       │
//! │  - conversions through ValueMarshaler                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod exception;
pub mod group;
pub mod handle;
pub mod handles;
pub mod marshal;
pub mod queue;
pub mod refs;
pub mod value;

pub use config::RuntimeConfig;
pub use context::EngineContext;
pub use error::{CoreError, CoreResult, RuntimeError, RuntimeResult};
pub use exception::{ExceptionBridge, ExceptionHandler, ScriptException, error_value};
pub use group::EngineGroup;
pub use handle::{ContextHandle, HandleStats};
pub use handles::HandleTable;
pub use marshal::{NativeBinary, NativeCallable, NativeType, NativeValue, ValueMarshaler};
pub use queue::{EngineQueue, MaintenanceHook, QueueStats, QueueStatsSnapshot};
pub use refs::{RefcountGuard, RefcountStats};
pub use value::{JsArray, JsArrayBuffer, JsError, JsFunction, JsObject, JsTypedArray, JsValue};

pub use nodekit_engine::{TypedArrayKind, ValueKind, ValueRef};
