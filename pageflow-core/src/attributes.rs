//! Attribute scopes
//!
//! `AttributeMap` is the mutable, insertion-ordered, string-keyed container
//! behind every scope (request, flash, view, flow, conversation). Multiple
//! instances are independent; a map is only ever touched by the single
//! logical thread processing one request for one execution, so there is no
//! internal synchronization.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::{FlowExecutionError, FlowResult};

/// The five scope lifetimes an executing flow can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    /// Reset on every request.
    Request,
    /// Survives one render; cleared after the view is rendered.
    Flash,
    /// Created on view-state entry, destroyed on exit or session end.
    View,
    /// Lives for one flow session.
    Flow,
    /// Lives for the whole execution, visible to every session in the stack.
    Conversation,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Flash => write!(f, "flash"),
            Self::View => write!(f, "view"),
            Self::Flow => write!(f, "flow"),
            Self::Conversation => write!(f, "conversation"),
        }
    }
}

/// An ordered, string-keyed attribute container with typed getters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeMap {
    entries: IndexMap<String, Value>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an attribute value, or `None` when absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Get an attribute value, failing when absent.
    pub fn get_required(&self, key: &str) -> FlowResult<&Value> {
        self.entries
            .get(key)
            .ok_or_else(|| FlowExecutionError::MissingAttribute(key.to_string()))
    }

    /// Get an attribute as a string slice; `None` when absent or not a string.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Get an attribute as a boolean; `None` when absent or not a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.entries.get(key).and_then(Value::as_bool)
    }

    /// Put an attribute, returning the previous value if any.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove an attribute, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Merge this map over `parent`, producing a read-only composite view:
    /// keys present here shadow the parent's. Used to compose the scope
    /// chain into a single rendering model.
    pub fn union(&self, parent: &AttributeMap) -> AttributeMap {
        let mut merged = parent.clone();
        for (k, v) in &self.entries {
            merged.entries.insert(k.clone(), v.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = AttributeMap::new();
        for (k, v) in iter {
            map.put(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_remove_round_trip() {
        let mut map = AttributeMap::new();
        assert!(map.is_empty());

        map.put("name", "alice");
        map.put("count", 3);
        assert_eq!(map.get_string("name"), Some("alice"));
        assert_eq!(map.get("count"), Some(&json!(3)));
        assert!(map.contains("name"));

        assert_eq!(map.remove("name"), Some(json!("alice")));
        assert!(!map.contains("name"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn get_required_fails_when_absent() {
        let map = AttributeMap::new();
        let err = map.get_required("missing").unwrap_err();
        assert!(matches!(
            err,
            FlowExecutionError::MissingAttribute(k) if k == "missing"
        ));
    }

    #[test]
    fn typed_getters_reject_wrong_types() {
        let mut map = AttributeMap::new();
        map.put("flag", true);
        map.put("name", "bob");
        assert_eq!(map.get_bool("flag"), Some(true));
        assert_eq!(map.get_bool("name"), None);
        assert_eq!(map.get_string("flag"), None);
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut map = AttributeMap::new();
        map.put("z", 1);
        map.put("a", 2);
        map.put("m", 3);
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn union_child_shadows_parent() {
        let mut parent = AttributeMap::new();
        parent.put("shared", "parent");
        parent.put("only_parent", 1);

        let mut child = AttributeMap::new();
        child.put("shared", "child");
        child.put("only_child", 2);

        let merged = child.union(&parent);
        assert_eq!(merged.get_string("shared"), Some("child"));
        assert_eq!(merged.get("only_parent"), Some(&json!(1)));
        assert_eq!(merged.get("only_child"), Some(&json!(2)));

        // Inputs are untouched.
        assert_eq!(parent.get_string("shared"), Some("parent"));
    }

    #[test]
    fn serde_round_trip() {
        let mut map = AttributeMap::new();
        map.put("k", "v");
        map.put("n", 42);
        let json = serde_json::to_string(&map).unwrap();
        let back: AttributeMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
