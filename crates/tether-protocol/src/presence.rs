//! Presence wire types.
//!
//! A presence map is keyed by identity id. Each identity carries one
//! [`Meta`] per live connection, so a user with two open tabs shows up once
//! with two metas.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Presence of every identity on a topic, ordered by identity id.
pub type PresenceMap = BTreeMap<String, PresenceEntry>;

/// One presence entry, representing a single connection of an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Unique reference of the connection that produced this entry.
    #[serde(rename = "ref")]
    pub conn_ref: String,
    /// Server-supplied metadata (user id, email, online since, ...).
    #[serde(default)]
    pub data: Value,
}

impl Meta {
    #[must_use]
    pub fn new(conn_ref: impl Into<String>, data: Value) -> Self {
        Self {
            conn_ref: conn_ref.into(),
            data,
        }
    }

    /// Look up a metadata field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Look up a string metadata field.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// All metas of one identity, in join order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub metas: Vec<Meta>,
}

impl PresenceEntry {
    #[must_use]
    pub fn new(metas: Vec<Meta>) -> Self {
        Self { metas }
    }

    /// Number of live connections of this identity.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.metas.len()
    }

    /// The oldest meta, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Meta> {
        self.metas.first()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    /// Whether a meta with the given connection reference is present.
    #[must_use]
    pub fn contains_ref(&self, conn_ref: &str) -> bool {
        self.metas.iter().any(|m| m.conn_ref == conn_ref)
    }
}

/// Incremental presence change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceDiff {
    #[serde(default)]
    pub joins: PresenceMap,
    #[serde(default)]
    pub leaves: PresenceMap,
}

impl PresenceDiff {
    /// Add a joined meta for an identity.
    #[must_use]
    pub fn join(mut self, id: impl Into<String>, meta: Meta) -> Self {
        self.joins.entry(id.into()).or_default().metas.push(meta);
        self
    }

    /// Add a departed meta for an identity.
    #[must_use]
    pub fn leave(mut self, id: impl Into<String>, meta: Meta) -> Self {
        self.leaves.entry(id.into()).or_default().metas.push(meta);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_fields() {
        let meta = Meta::new("a", json!({"email": "ann@example.com", "online_at": 1700000000}));
        assert_eq!(meta.get_str("email"), Some("ann@example.com"));
        assert_eq!(meta.get("online_at").and_then(Value::as_i64), Some(1_700_000_000));
        assert_eq!(meta.get_str("missing"), None);
    }

    #[test]
    fn test_meta_ref_wire_name() {
        let encoded = serde_json::to_value(Meta::new("phx-1", Value::Null)).unwrap();
        assert_eq!(encoded["ref"], "phx-1");
    }

    #[test]
    fn test_diff_builder() {
        let diff = PresenceDiff::default()
            .join("42", Meta::new("a", Value::Null))
            .join("42", Meta::new("b", Value::Null))
            .leave("7", Meta::new("c", Value::Null));

        assert_eq!(diff.joins["42"].connection_count(), 2);
        assert!(diff.leaves["7"].contains_ref("c"));
        assert!(!diff.is_empty());
        assert!(PresenceDiff::default().is_empty());
    }
}
