//! Resolution of script messages to native calls.
//!
//! | target  | opcode          | action                                    |
//! |---------|-----------------|-------------------------------------------|
//! | known/0 | `-`             | dispose the instance (0: the channel)     |
//! | known   | method key      | invoke the method                         |
//! | known   | other           | invalid member                            |
//! | unknown | `+`             | construct an instance                     |
//! | unknown | other           | principal message handler, else unknown   |
//!
//! Unresolvable messages are reported as protocol errors; the channel logs
//! and discards them.

use serde_json::Value;
use tracing::{debug, trace};

use crate::channel::{PRINCIPAL, ScriptChannel};
use crate::error::{BridgeError, BridgeResult};
use crate::invocation::{Argument, Invocation};
use crate::message::{Opcode, ScriptMessage};
use crate::plugin::{Invoker, PluginObject, PluginType};
use crate::script_value::ScriptValue;

/// Routes messages and calls to the instances of one channel
#[derive(Debug, Clone)]
pub struct InvocationDispatcher {
    channel: ScriptChannel,
}

impl InvocationDispatcher {
    pub fn new(channel: ScriptChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &ScriptChannel {
        &self.channel
    }

    fn plugin(&self) -> BridgeResult<std::sync::Arc<PluginType>> {
        self.channel
            .plugin()
            .ok_or_else(|| BridgeError::Unbound(self.channel.namespace().to_string()))
    }

    /// Route `message`. Returns the method result, `true` for a
    /// construction and `null` for a disposal.
    pub fn dispatch(&self, message: &ScriptMessage) -> BridgeResult<Value> {
        trace!(
            namespace = self.channel.namespace(),
            opcode = %message.opcode,
            target = message.target,
            "Dispatching message"
        );
        let exists = self.channel.entry(message.target).is_some();
        match &message.opcode {
            Opcode::Construct if !exists => self
                .construct(message.target, message.operand.clone())
                .map(|_| Value::Bool(true)),
            Opcode::Dispose if exists || message.target == PRINCIPAL => {
                self.dispose(message.target);
                Ok(Value::Null)
            }
            Opcode::Invoke(key) if exists => {
                self.invoke(message.target, key, message.operand.clone())
            }
            opcode if exists => Err(BridgeError::protocol(format!(
                "Invalid member name: {opcode}"
            ))),
            _ => self.delegate(message),
        }
    }

    /// Call the method `key` on instance `target`
    pub fn invoke(&self, target: i64, key: &str, operand: Vec<Value>) -> BridgeResult<Value> {
        let plugin = self.plugin()?;
        let (object, receiver) = self.channel.entry(target).ok_or_else(|| {
            BridgeError::protocol(format!("Unknown instance {target} of {}", self.channel.namespace()))
        })?;
        let member = plugin
            .type_info()
            .item(key)
            .filter(|member| member.is_method())
            .ok_or_else(|| BridgeError::protocol(format!("Invalid member name: {key}")))?;
        let invoker = plugin
            .invoker(key)
            .ok_or_else(|| BridgeError::protocol(format!("Invalid member name: {key}")))?;

        let mut call = Invocation::new(key, target, receiver.clone(), operand, member.arity);
        match invoker {
            Invoker::Sync(method) => method(&object, &call),
            Invoker::Async(method) => {
                let callback = completion_target(&mut call, &receiver, member.arity)?;
                let completion = self.channel.completions().completion(key, callback);
                method(&object, &call, completion)?;
                Ok(Value::Null)
            }
        }
    }

    /// Create an instance, at `proposed` when that id is positive and free.
    /// Returns the instance id.
    pub fn construct(&self, proposed: i64, operand: Vec<Value>) -> BridgeResult<i64> {
        let plugin = self.plugin()?;
        let constructor = plugin.type_info().default_constructor().ok_or_else(|| {
            BridgeError::protocol(format!("{} has no constructor", self.channel.namespace()))
        })?;

        let id = self.channel.allocate_instance_id(proposed);
        let receiver = ScriptValue::new(
            self.channel.instance_namespace(id),
            self.channel.context().clone(),
        );
        let call = Invocation::new("+", id, receiver, operand, constructor.arity);
        let object: PluginObject = match plugin.construct(&call) {
            Some(result) => result?,
            None => {
                return Err(BridgeError::protocol(format!(
                    "{} has no constructor",
                    self.channel.namespace()
                )));
            }
        };
        self.channel.insert_instance(id, object)?;
        debug!(namespace = self.channel.namespace(), instance = id, "Instance created");
        Ok(id)
    }

    /// Dispose instance `target`; disposing the principal unbinds the
    /// channel
    pub fn dispose(&self, target: i64) -> bool {
        if target == PRINCIPAL {
            self.channel.unbind()
        } else {
            self.channel.remove_instance(target)
        }
    }

    fn delegate(&self, message: &ScriptMessage) -> BridgeResult<Value> {
        let plugin = self.plugin()?;
        if let Some(principal) = self.channel.principal() {
            if let Some(result) = plugin.handle_message(&principal, message) {
                return result;
            }
        }
        Err(BridgeError::protocol(format!(
            "Unknown message: {}",
            message.to_json()
        )))
    }
}

/// The script object an async call completes to: the trailing reference
/// argument, or the receiver when the script left the slot empty
fn completion_target(
    call: &mut Invocation,
    receiver: &ScriptValue,
    arity: usize,
) -> BridgeResult<ScriptValue> {
    if call.len() < arity {
        return Ok(receiver.clone());
    }
    match call.pop() {
        Some(Argument::Script(target)) => Ok(target),
        Some(Argument::Value(value)) => Err(BridgeError::Argument {
            method: call.method().to_string(),
            index: arity.saturating_sub(1),
            message: format!("expected a callback, got {value}"),
        }),
        None => Ok(receiver.clone()),
    }
}
