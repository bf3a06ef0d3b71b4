//! Arguments of one native call, converted from the wire operand.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::message::Reference;
use crate::script_value::ScriptValue;

/// One argument as received from script code
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Value(Value),
    /// A script object passed by reference
    Script(ScriptValue),
}

impl Argument {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Script(_) => None,
        }
    }

    pub fn as_script_value(&self) -> Option<&ScriptValue> {
        match self {
            Self::Script(value) => Some(value),
            Self::Value(_) => None,
        }
    }
}

/// A call on a plugin instance
#[derive(Debug, Clone)]
pub struct Invocation {
    method: String,
    instance_id: i64,
    receiver: ScriptValue,
    args: Vec<Argument>,
}

impl Invocation {
    /// Convert `operand` for a member of `arity` parameters called on
    /// `receiver`.
    ///
    /// Reference arguments become [`ScriptValue`]s resolved against the
    /// receiver. When exactly one argument is missing the receiver itself
    /// fills the last slot.
    pub fn new(
        method: impl Into<String>,
        instance_id: i64,
        receiver: ScriptValue,
        operand: Vec<Value>,
        arity: usize,
    ) -> Self {
        let mut args: Vec<Argument> = operand
            .into_iter()
            .map(|value| match Reference::parse(&value) {
                Some(reference) => Argument::Script(ScriptValue::for_reference(&reference, &receiver)),
                None => Argument::Value(value),
            })
            .collect();
        if arity > 0 && args.len() == arity - 1 {
            args.push(Argument::Script(receiver.clone()));
        }
        Self {
            method: method.into(),
            instance_id,
            receiver,
            args,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    /// The script object the call was made on
    pub fn receiver(&self) -> &ScriptValue {
        &self.receiver
    }

    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Argument `index` converted to `T`. A missing argument reads as
    /// `null`, so `Option<T>` parameters accept it and others fail.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> BridgeResult<T> {
        let value = match self.args.get(index) {
            None => Value::Null,
            Some(Argument::Value(value)) => value.clone(),
            Some(Argument::Script(script)) => {
                return Err(self.argument_error(
                    index,
                    format!("expected a value, got script object {}", script.namespace()),
                ));
            }
        };
        serde_json::from_value(value).map_err(|e| self.argument_error(index, e.to_string()))
    }

    /// Argument `index` as a script object reference
    pub fn script_value(&self, index: usize) -> BridgeResult<ScriptValue> {
        match self.args.get(index) {
            Some(Argument::Script(script)) => Ok(script.clone()),
            Some(Argument::Value(value)) => Err(self.argument_error(
                index,
                format!("expected a script object, got {value}"),
            )),
            None => Err(self.argument_error(index, "missing script object".to_string())),
        }
    }

    /// Remove and return the last argument
    pub(crate) fn pop(&mut self) -> Option<Argument> {
        self.args.pop()
    }

    fn argument_error(&self, index: usize, message: String) -> BridgeError {
        BridgeError::Argument {
            method: self.method.clone(),
            index,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::REFERENCE_SIGNATURE;
    use crate::recording::RecordingContext;
    use serde_json::json;
    use std::sync::Arc;

    fn receiver() -> ScriptValue {
        ScriptValue::new("io.calc[1]", Arc::new(RecordingContext::new()))
    }

    #[test]
    fn test_typed_arguments() {
        let call = Invocation::new("add#2s", 1, receiver(), vec![json!(2), json!("x")], 2);
        assert_eq!(call.arg::<i64>(0).unwrap(), 2);
        assert!(matches!(
            call.arg::<i64>(1),
            Err(BridgeError::Argument { index: 1, .. })
        ));
        assert_eq!(call.arg::<Option<String>>(5).unwrap(), None);
        assert!(call.arg::<bool>(5).is_err());
    }

    #[test]
    fn test_references_resolve_against_receiver() {
        let operand = vec![json!({"$sig": REFERENCE_SIGNATURE, "$ref": 0}), json!({"$ns": "window.log"})];
        let call = Invocation::new("on#2a", 1, receiver(), operand, 2);
        assert_eq!(call.script_value(0).unwrap().namespace(), "io.calc[1].$references[0]");
        assert_eq!(call.script_value(1).unwrap().namespace(), "window.log");
        assert!(call.arg::<Value>(0).is_err());
    }

    #[test]
    fn test_receiver_fills_last_slot() {
        let call = Invocation::new("fetch#2a", 1, receiver(), vec![json!("url")], 2);
        assert_eq!(call.len(), 2);
        assert_eq!(&call.script_value(1).unwrap(), call.receiver());

        let full = Invocation::new("fetch#2a", 1, receiver(), vec![json!("url"), json!(1)], 2);
        assert!(full.script_value(1).is_err());

        let none = Invocation::new("value#0s", 1, receiver(), vec![], 0);
        assert!(none.is_empty());
    }
}
