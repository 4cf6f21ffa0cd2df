//! Application messages and request references.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A request reference. `0` is reserved for connection-level frames.
pub type Ref = u64;

/// Monotonic source of request references for one socket.
#[derive(Debug)]
pub struct RefGenerator {
    next: Ref,
}

impl RefGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Hand out the next reference.
    pub fn next_ref(&mut self) -> Ref {
        let r = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        r
    }
}

impl Default for RefGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// An inbound application message delivered to event subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Topic the message arrived on.
    pub topic: String,
    /// Event name, e.g. `new_msg`.
    pub event: String,
    /// Structured payload.
    pub payload: Value,
    /// Local receive time in milliseconds since the Unix epoch.
    pub received_at: u64,
}

impl Message {
    #[must_use]
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            received_at: now_millis(),
        }
    }

    /// Read a string field from an object payload.
    #[must_use]
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("room:lobby", "new_msg", json!({"body": "hi"}));
        assert_eq!(msg.topic, "room:lobby");
        assert_eq!(msg.event, "new_msg");
        assert_eq!(msg.field_str("body"), Some("hi"));
        assert_eq!(msg.field_str("user_email"), None);
        assert!(msg.received_at > 0);
    }

    #[test]
    fn test_refs_are_monotonic_and_nonzero() {
        let mut refs = RefGenerator::new();
        assert_eq!(refs.next_ref(), 1);
        assert_eq!(refs.next_ref(), 2);

        let mut wrapping = RefGenerator { next: u64::MAX };
        assert_eq!(wrapping.next_ref(), u64::MAX);
        assert_eq!(wrapping.next_ref(), 1);
    }
}
