//! Free-form extracted metadata attached to entities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute key lifted into `entity_key` during staging.
pub const KEY_ATTRIBUTE: &str = "key";

/// Attribute key lifted into `parent_key` during staging.
pub const PARENT_ATTRIBUTE: &str = "parent";

/// Attribute used to narrow candidate retrieval within an entity type.
pub const SUBTYPE_ATTRIBUTE: &str = "subtype";

/// A single attribute value: either one string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    /// The value as a single string. Lists yield their first element.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::List(items) => items.first().map(String::as_str),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// Ordered attribute map.
///
/// Merging is a key-level union where the incoming (child) value replaces
/// the existing one on conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    /// Union `child` into `self`; the child's value wins on key conflict.
    pub fn merge_from(&mut self, child: &Attributes) {
        for (key, value) in &child.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Return the union of `self` and `child` without modifying either.
    pub fn merged(&self, child: &Attributes) -> Attributes {
        let mut merged = self.clone();
        merged.merge_from(child);
        merged
    }

    /// Serialize to the JSON object stored in the database.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse from a stored JSON object; malformed input yields an empty map.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

impl FromIterator<(String, AttributeValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_wins_on_conflict() {
        let parent = Attributes::new().with("status", "open").with("team", "core");
        let child = Attributes::new()
            .with("status", "closed")
            .with("labels", vec!["a".to_string(), "b".to_string()]);

        let merged = parent.merged(&child);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("status").and_then(|v| v.as_text()), Some("closed"));
        assert_eq!(merged.get("team").and_then(|v| v.as_text()), Some("core"));
        // the inputs are untouched
        assert_eq!(parent.get("status").and_then(|v| v.as_text()), Some("open"));
    }

    #[test]
    fn test_json_shape() {
        let attrs = Attributes::new()
            .with("assignee", "dane")
            .with("labels", vec!["x".to_string()]);
        let json = attrs.to_json().unwrap();
        assert_eq!(json, r#"{"assignee":"dane","labels":["x"]}"#);
        assert_eq!(Attributes::from_json(&json), attrs);
        assert!(Attributes::from_json("not json").is_empty());
    }
}
