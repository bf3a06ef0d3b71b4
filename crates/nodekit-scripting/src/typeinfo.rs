//! Descriptors of the members a plugin exposes to script code.
//!
//! A member is addressed on the wire by its key: the member name followed by
//! its shape, `#<arity>a` for members without a result and `#<arity>s` for
//! members returning one. Constructors have an empty name, so their key is
//! the bare shape.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Constructor,
    Method,
}

/// Immutable description of one exposed member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub kind: MemberKind,
    /// Declared parameter count, completion included
    pub arity: usize,
    pub is_void: bool,
    /// Last parameter is a completion delivering the result later
    pub is_async_callback: bool,
}

impl MemberInfo {
    pub fn method(name: impl Into<String>, arity: usize, is_void: bool) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Method,
            arity,
            is_void,
            is_async_callback: false,
        }
    }

    /// Method whose result arrives through a trailing completion parameter
    pub fn async_callback(name: impl Into<String>, arity: usize) -> Self {
        Self {
            is_async_callback: true,
            ..Self::method(name, arity, true)
        }
    }

    pub fn constructor(arity: usize) -> Self {
        Self {
            name: String::new(),
            kind: MemberKind::Constructor,
            arity,
            is_void: true,
            is_async_callback: false,
        }
    }

    pub fn is_method(&self) -> bool {
        self.kind == MemberKind::Method
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == MemberKind::Constructor
    }

    /// Shape suffix, e.g. `#2s`
    pub fn js_type(&self) -> String {
        format!("#{}{}", self.arity, if self.is_void { "a" } else { "s" })
    }

    /// Wire key, e.g. `add#2s`
    pub fn key(&self) -> String {
        format!("{}{}", self.name, self.js_type())
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// The member table of a plugin type, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeInfo {
    type_name: String,
    members: BTreeMap<String, MemberInfo>,
    constructor: Option<MemberInfo>,
}

impl TypeInfo {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            members: BTreeMap::new(),
            constructor: None,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Add `member`, replacing one with the same key. Returns the key.
    pub fn insert(&mut self, member: MemberInfo) -> String {
        let key = member.key();
        if member.is_constructor() {
            self.constructor = Some(member.clone());
        }
        self.members.insert(key.clone(), member);
        key
    }

    pub fn item(&self, key: &str) -> Option<&MemberInfo> {
        self.members.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains_key(key)
    }

    pub fn default_constructor(&self) -> Option<&MemberInfo> {
        self.constructor.as_ref()
    }

    /// Methods in key order
    pub fn methods(&self) -> impl Iterator<Item = &MemberInfo> {
        self.members.values().filter(|member| member.is_method())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(MemberInfo::method("add", 2, false).key(), "add#2s");
        assert_eq!(MemberInfo::method("log", 1, true).key(), "log#1a");
        assert_eq!(MemberInfo::async_callback("fetch", 2).key(), "fetch#2a");
        assert_eq!(MemberInfo::constructor(1).key(), "#1a");
        assert_eq!(MemberInfo::constructor(0).js_type(), "#0a");
    }

    #[test]
    fn test_methods_are_ordered() {
        let mut info = TypeInfo::new("Calculator");
        info.insert(MemberInfo::method("value", 0, false));
        info.insert(MemberInfo::constructor(1));
        info.insert(MemberInfo::method("add", 1, true));
        info.insert(MemberInfo::method("addAll", 1, true));

        let keys: Vec<String> = info.methods().map(MemberInfo::key).collect();
        assert_eq!(keys, vec!["add#1a", "addAll#1a", "value#0s"]);
        assert_eq!(info.len(), 4);
        assert_eq!(info.default_constructor().map(MemberInfo::key), Some("#1a".into()));
        assert!(info.contains("#1a"));
        assert!(info.item("value#0s").is_some_and(|m| !m.is_void));
    }
}
