//! Script objects addressed by namespace expression.
//!
//! A [`ScriptValue`] does not hold an engine handle. Every operation is
//! compiled to an expression over its namespace and evaluated on its
//! [`ScriptContext`], so it stays valid across contexts that cannot share
//! handles with native code.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::context::ScriptContext;
use crate::error::BridgeResult;
use crate::message::Reference;

/// Script literal for `value`; an absent value is `undefined`
pub fn serialize(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return "undefined".to_string();
    };
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(|item| serialize(Some(item))).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(key, item)| format!("{}: {}", quote(key), serialize(Some(item))))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
    }
}

/// Comma separated literals for an argument list
pub fn serialize_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| serialize(Some(arg)))
        .collect::<Vec<_>>()
        .join(",")
}

fn quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn is_integer(name: &str) -> bool {
    let digits = name.strip_prefix('-').unwrap_or(name);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A script object known by the expression that reaches it
#[derive(Clone)]
pub struct ScriptValue {
    namespace: String,
    context: Arc<dyn ScriptContext>,
}

impl ScriptValue {
    pub fn new(namespace: impl Into<String>, context: Arc<dyn ScriptContext>) -> Self {
        Self {
            namespace: namespace.into(),
            context,
        }
    }

    /// The object an argument reference points at, resolved against the
    /// receiving object
    pub fn for_reference(reference: &Reference, receiver: &ScriptValue) -> Self {
        Self::new(reference.namespace(&receiver.namespace), receiver.context.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn context(&self) -> &Arc<dyn ScriptContext> {
        &self.context
    }

    /// Wire form of this object as a message argument
    pub fn to_reference(&self) -> Value {
        serde_json::json!({ "$ns": self.namespace })
    }

    pub fn fetch_expression(&self, property: Option<&str>) -> String {
        match property {
            None => self.namespace.clone(),
            Some("") => format!("{}['']", self.namespace),
            Some(name) if is_integer(name) => format!("{}[{}]", self.namespace, name),
            Some(name) => format!("{}.{}", self.namespace, name),
        }
    }

    /// Call expression guarded so that a throw is logged and returned
    pub fn call_expression(&self, method: Option<&str>, args: &[Value]) -> String {
        let script = format!("{}({})", self.fetch_expression(method), serialize_args(args));
        format!(
            "(function line_eval(){{ try {{ return {script}}} catch(ex) {{ console.log(ex.toString()); return ex}} }})()"
        )
    }

    pub fn update_expression(&self, property: &str, value: &Value) -> String {
        format!("{} = {}", self.fetch_expression(Some(property)), serialize(Some(value)))
    }

    pub fn delete_expression(&self, property: &str) -> String {
        format!("delete {}", self.fetch_expression(Some(property)))
    }

    pub fn index_expression(&self, index: usize) -> String {
        format!("{}[{}]", self.namespace, index)
    }

    pub fn call_with_arguments(&self, args: &[Value]) -> BridgeResult<Value> {
        self.context.evaluate(&self.call_expression(None, args))
    }

    pub fn call_with_arguments_async(&self, args: &[Value]) -> BridgeResult<()> {
        self.context.evaluate_async(&self.call_expression(None, args))
    }

    pub fn invoke_method(&self, method: &str, args: &[Value]) -> BridgeResult<Value> {
        self.context.evaluate(&self.call_expression(Some(method), args))
    }

    pub fn invoke_method_async(&self, method: &str, args: &[Value]) -> BridgeResult<()> {
        self.context
            .evaluate_async(&self.call_expression(Some(method), args))
    }

    pub fn value_for_property(&self, property: &str) -> BridgeResult<Value> {
        self.context.evaluate(&self.fetch_expression(Some(property)))
    }

    pub fn set_value(&self, property: &str, value: &Value) -> BridgeResult<()> {
        self.context
            .evaluate(&self.update_expression(property, value))
            .map(drop)
    }

    pub fn has_property(&self, property: &str) -> BridgeResult<bool> {
        let script = format!("{} != undefined", self.fetch_expression(Some(property)));
        Ok(self.context.evaluate(&script)?.as_bool().unwrap_or(false))
    }

    pub fn delete_property(&self, property: &str) -> BridgeResult<bool> {
        let result = self.context.evaluate(&self.delete_expression(property))?;
        Ok(result.as_bool().unwrap_or(false))
    }

    pub fn define_property(&self, property: &str, descriptor: &Value) -> BridgeResult<()> {
        let script = format!(
            "Object.defineProperty({}, {}, {})",
            self.namespace,
            quote(property),
            serialize(Some(descriptor))
        );
        self.context.evaluate(&script).map(drop)
    }

    pub fn value_at_index(&self, index: usize) -> BridgeResult<Value> {
        self.context.evaluate(&self.index_expression(index))
    }

    pub fn set_value_at_index(&self, index: usize, value: &Value) -> BridgeResult<()> {
        let script = format!("{} = {}", self.index_expression(index), serialize(Some(value)));
        self.context.evaluate(&script).map(drop)
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptValue")
            .field("namespace", &self.namespace)
            .field("context", &self.context.id())
            .finish()
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && std::ptr::addr_eq(Arc::as_ptr(&self.context), Arc::as_ptr(&other.context))
    }
}
