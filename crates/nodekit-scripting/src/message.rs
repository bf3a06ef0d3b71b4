//! Wire format of messages posted by generated stubs.
//!
//! ```json
//! {"$opcode": "+" | "-" | "<method key>", "$target": 0, "$operand": [..]}
//! ```
//!
//! Arguments that refer to script objects are embedded as
//! `{"$ns": "<namespace>"}` or `{"$sig": 0x5857574F, "$ref": <n>}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{BridgeError, BridgeResult};

/// Marker carried by retained-reference arguments
pub const REFERENCE_SIGNATURE: i64 = 0x5857574F;

/// What a message asks the channel to do
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Opcode {
    /// `+`: create an instance
    Construct,
    /// `-`: dispose an instance, or the whole channel for target 0
    Dispose,
    /// Invoke the method with this key
    Invoke(String),
}

impl Opcode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Construct => "+",
            Self::Dispose => "-",
            Self::Invoke(key) => key,
        }
    }
}

impl From<String> for Opcode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "+" => Self::Construct,
            "-" => Self::Dispose,
            _ => Self::Invoke(value),
        }
    }
}

impl From<&str> for Opcode {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Opcode> for String {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Invoke(key) => key,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message posted by script code to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptMessage {
    #[serde(rename = "$opcode")]
    pub opcode: Opcode,
    #[serde(rename = "$target", default)]
    pub target: i64,
    #[serde(rename = "$operand", default, deserialize_with = "nullable_operand")]
    pub operand: Vec<Value>,
}

fn nullable_operand<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ScriptMessage {
    pub fn new(opcode: impl Into<Opcode>, target: i64, operand: Vec<Value>) -> Self {
        Self {
            opcode: opcode.into(),
            target,
            operand,
        }
    }

    pub fn construct(target: i64, operand: Vec<Value>) -> Self {
        Self::new(Opcode::Construct, target, operand)
    }

    pub fn dispose(target: i64) -> Self {
        Self::new(Opcode::Dispose, target, Vec::new())
    }

    pub fn invoke(key: impl Into<String>, target: i64, operand: Vec<Value>) -> Self {
        Self::new(Opcode::Invoke(key.into()), target, operand)
    }

    /// Parse a posted message body. A `null` body carries nothing and yields
    /// `None`.
    pub fn from_body(body: &Value) -> BridgeResult<Option<Self>> {
        match body {
            Value::Null => Ok(None),
            Value::Object(_) => serde_json::from_value(body.clone())
                .map(Some)
                .map_err(|e| BridgeError::protocol(format!("malformed message: {e}"))),
            other => Err(BridgeError::protocol(format!(
                "message body must be an object, got {other}"
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "$opcode": self.opcode.as_str(),
            "$target": self.target,
            "$operand": self.operand,
        })
    }
}

/// A script object embedded in an argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Object reachable at a namespace expression
    Namespace(String),
    /// Object retained by the receiver's `$references` table
    Retained(i64),
}

impl Reference {
    /// Recognise a reference argument; any other value yields `None`
    pub fn parse(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.get("$sig").and_then(Value::as_i64) == Some(REFERENCE_SIGNATURE) {
            return map.get("$ref").and_then(Value::as_i64).map(Self::Retained);
        }
        map.get("$ns")
            .and_then(Value::as_str)
            .map(|ns| Self::Namespace(ns.to_string()))
    }

    /// Namespace expression of the referenced object as seen from `receiver`
    pub fn namespace(&self, receiver: &str) -> String {
        match self {
            Self::Namespace(ns) => ns.clone(),
            Self::Retained(index) => format!("{receiver}.$references[{index}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_invoke() {
        let body = json!({"$opcode": "add#2s", "$target": 3, "$operand": [1, 2]});
        let message = ScriptMessage::from_body(&body).unwrap().unwrap();
        assert_eq!(message.opcode, Opcode::Invoke("add#2s".into()));
        assert_eq!(message.target, 3);
        assert_eq!(message.operand, vec![json!(1), json!(2)]);
        assert_eq!(message.to_json(), body);
    }

    #[test]
    fn test_parse_lifecycle_opcodes() {
        let body = json!({"$opcode": "+", "$target": 1, "$operand": null});
        let message = ScriptMessage::from_body(&body).unwrap().unwrap();
        assert_eq!(message.opcode, Opcode::Construct);
        assert!(message.operand.is_empty());

        let body = json!({"$opcode": "-"});
        let message = ScriptMessage::from_body(&body).unwrap().unwrap();
        assert_eq!(message, ScriptMessage::dispose(0));
    }

    #[test]
    fn test_null_body_is_ignored() {
        assert_eq!(ScriptMessage::from_body(&Value::Null).unwrap(), None);
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(ScriptMessage::from_body(&json!("text")).unwrap_err().is_protocol());
        assert!(
            ScriptMessage::from_body(&json!({"$target": 1}))
                .unwrap_err()
                .is_protocol()
        );
        assert!(
            ScriptMessage::from_body(&json!({"$opcode": "x", "$operand": 5}))
                .unwrap_err()
                .is_protocol()
        );
    }

    #[test]
    fn test_references() {
        let retained = json!({"$sig": REFERENCE_SIGNATURE, "$ref": 4});
        let reference = Reference::parse(&retained).unwrap();
        assert_eq!(reference, Reference::Retained(4));
        assert_eq!(reference.namespace("io.plugin[1]"), "io.plugin[1].$references[4]");

        let named = Reference::parse(&json!({"$ns": "window.callback"})).unwrap();
        assert_eq!(named.namespace("ignored"), "window.callback");

        assert_eq!(Reference::parse(&json!({"$sig": 1, "$ref": 4})), None);
        assert_eq!(Reference::parse(&json!({"a": 1})), None);
        assert_eq!(Reference::parse(&json!(1)), None);
    }
}
