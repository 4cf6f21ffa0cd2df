//! Plain-text rendering of the roster and chat messages.

use chrono::{DateTime, Local, TimeZone};
use serde_json::Value;
use std::fmt::{Display, Write};
use tether_client::{Message, PresenceSnapshot};

/// Render the roster, one block per identity, with times in local time.
#[must_use]
pub fn roster(snapshot: &PresenceSnapshot) -> String {
    roster_in(snapshot, &Local)
}

/// Render the roster with join times in `tz`.
pub fn roster_in<Tz>(snapshot: &PresenceSnapshot, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = format!("-- online ({}) --\n", snapshot.len());
    for entry in snapshot.values() {
        let Some(first) = entry.first() else {
            continue;
        };
        let joined = first
            .get("online_at")
            .and_then(unix_seconds)
            .and_then(|secs| tz.timestamp_opt(secs, 0).single())
            .map_or_else(|| "-".to_string(), |at| time_of_day(&at));

        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "* user {} <{}>  joined {}  connections {}",
            field(first.get("user_id")),
            first.get_str("email").unwrap_or("-"),
            joined,
            entry.connection_count(),
        );
    }
    out
}

/// Render a `new_msg` payload as `email: body`, or just `body` when the
/// sender is anonymous.
#[must_use]
pub fn message(msg: &Message) -> String {
    let body = field(msg.payload.get("body"));
    match msg.payload.get("user_email").and_then(Value::as_str) {
        Some(email) if !email.is_empty() => format!("{email}: {body}"),
        _ => body,
    }
}

fn time_of_day<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%H:%M:%S").to_string()
}

/// Seconds since the epoch, given as a number or a numeric string.
fn unix_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tether_client::{Meta, PresenceEntry};

    fn entry(metas: Vec<Meta>) -> PresenceEntry {
        PresenceEntry::new(metas)
    }

    #[test]
    fn test_roster_uses_first_meta_and_counts_connections() {
        let mut snapshot = PresenceSnapshot::new();
        snapshot.insert(
            "42".to_string(),
            entry(vec![
                Meta::new(
                    "a",
                    json!({"user_id": 42, "email": "ada@example.com", "online_at": "1700000000"}),
                ),
                Meta::new("b", json!({"user_id": 42, "email": "other@example.com"})),
            ]),
        );

        let out = roster_in(&snapshot, &Utc);
        assert!(out.starts_with("-- online (1) --\n"));
        assert!(out.contains("user 42 <ada@example.com>"));
        assert!(out.contains("joined 22:13:20"));
        assert!(out.contains("connections 2"));
        assert!(!out.contains("other@example.com"));
    }

    #[test]
    fn test_roster_missing_fields() {
        let mut snapshot = PresenceSnapshot::new();
        snapshot.insert("7".to_string(), entry(vec![Meta::new("a", json!({}))]));
        snapshot.insert("8".to_string(), entry(Vec::new()));

        let out = roster_in(&snapshot, &Utc);
        assert!(out.contains("user - <->  joined -  connections 1"));
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_message_with_and_without_sender() {
        let signed = Message::new(
            "room:lobby",
            "new_msg",
            json!({"body": "hi", "user_email": "ada@example.com"}),
        );
        assert_eq!(message(&signed), "ada@example.com: hi");

        let anonymous = Message::new("room:lobby", "new_msg", json!({"body": "hi"}));
        assert_eq!(message(&anonymous), "hi");
    }

    #[test]
    fn test_unix_seconds() {
        assert_eq!(unix_seconds(&json!(12)), Some(12));
        assert_eq!(unix_seconds(&json!(" 12 ")), Some(12));
        assert_eq!(unix_seconds(&json!("soon")), None);
    }
}
