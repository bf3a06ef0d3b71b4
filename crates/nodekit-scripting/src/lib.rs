//! nodekit-scripting - plugin channels between native code and script contexts.
//!
//! A plugin is a native type described by a [`PluginClass`]. Binding it into
//! a [`ChannelRegistry`] injects a stub script that exposes its methods under
//! a namespace; calls from script code come back as wire messages that the
//! [`InvocationDispatcher`] resolves to the native methods.
//!
//! # Example
//!
//! ```
//! use nodekit_scripting::{ChannelRegistry, PluginClass, RecordingContext, ScriptMessage};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Math;
//!
//! let context = Arc::new(RecordingContext::new());
//! let registry = ChannelRegistry::new(context.clone());
//! let plugin = PluginClass::<Math>::new("Math")
//!     .method("add", 2, |_, call| Ok(call.arg::<i64>(0)? + call.arg::<i64>(1)?))
//!     .build();
//!
//! let channel = registry.bind_object(&plugin, Arc::new(Math), "io.math").unwrap().unwrap();
//! let message = ScriptMessage::invoke("add#2s", 0, vec![json!(2), json!(40)]);
//! let result = context.post_message_sync(&channel.handler_name(), message.to_json()).unwrap();
//! assert_eq!(result, json!(42));
//! ```
//!
//! # Architecture
//!
//! ```text
//! script stub ──message──▶ ScriptContext ──▶ ScriptChannel
//!                                                │
//!                                   InvocationDispatcher
//!                                  ┌─────────────┼──────────────┐
//!                                  ▼             ▼              ▼
//!                              construct      invoke         dispose
//!                                  │             │
//!                              PluginType   Completion ──▶ CompletionQueue ──▶ script callback
//! ```

pub mod channel;
pub mod completion;
pub mod context;
pub mod dispatch;
pub mod engine_context;
pub mod error;
pub mod invocation;
pub mod message;
pub mod plugin;
pub mod recording;
pub mod registry;
pub mod script_value;
pub mod stub;
pub mod typeinfo;

pub use channel::ScriptChannel;
pub use completion::{Completion, CompletionQueue};
pub use context::{MessageHandler, ScriptContext, ScriptSource};
pub use dispatch::InvocationDispatcher;
pub use engine_context::{BOOTSTRAP_SOURCE, EngineScriptContext, POST_MESSAGE, POST_MESSAGE_SYNC};
pub use error::{BridgeError, BridgeResult};
pub use invocation::{Argument, Invocation};
pub use message::{Opcode, REFERENCE_SIGNATURE, Reference, ScriptMessage};
pub use plugin::{PluginClass, PluginObject, PluginType};
pub use recording::RecordingContext;
pub use registry::ChannelRegistry;
pub use script_value::{ScriptValue, serialize, serialize_args};
pub use stub::generate_stubs;
pub use typeinfo::{MemberInfo, MemberKind, TypeInfo};
