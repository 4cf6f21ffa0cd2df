//! Presence tracking for a channel.
//!
//! The server describes presence in two ways: a full `presence_state`
//! snapshot, sent after every join, and `presence_diff` frames carrying the
//! joins and leaves since. The tracker replaces its snapshot on every full
//! state and merges diffs in between. Diffs that arrive before the first
//! state of a join are held back and applied right after it, so
//! subscribers only ever see fully merged snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tether_protocol::{PresenceDiff, PresenceEntry, PresenceMap};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Presence of every identity on a topic, ordered by identity id.
pub type PresenceSnapshot = PresenceMap;

/// A change to one identity's presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceEvent {
    /// Metas were added for `id`. `current` is the entry before the join.
    Join {
        id: String,
        current: Option<PresenceEntry>,
        joined: PresenceEntry,
    },
    /// Metas were removed for `id`. `current` is what remains, `None` once
    /// the identity is gone.
    Leave {
        id: String,
        current: Option<PresenceEntry>,
        left: PresenceEntry,
    },
}

impl PresenceEvent {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            PresenceEvent::Join { id, .. } | PresenceEvent::Leave { id, .. } => id,
        }
    }
}

/// Merge a diff into `state`, returning the resulting events.
///
/// Joins keep the identity's existing metas (minus any the join re-sends)
/// followed by the joined metas. Leaves remove metas by connection ref and
/// drop the identity once no meta is left.
pub fn merge_diff(state: &mut PresenceMap, diff: PresenceDiff) -> Vec<PresenceEvent> {
    let mut events = Vec::with_capacity(diff.joins.len() + diff.leaves.len());

    for (id, joined) in diff.joins {
        if joined.is_empty() {
            continue;
        }
        let current = state.get(&id).cloned();
        let mut metas: Vec<_> = current
            .iter()
            .flat_map(|entry| entry.metas.iter())
            .filter(|meta| !joined.contains_ref(&meta.conn_ref))
            .cloned()
            .collect();
        metas.extend(joined.metas.iter().cloned());
        state.insert(id.clone(), PresenceEntry::new(metas));

        events.push(PresenceEvent::Join {
            id,
            current,
            joined,
        });
    }

    for (id, left) in diff.leaves {
        let Some(entry) = state.get_mut(&id) else {
            trace!(id = %id, "Leave for unknown identity");
            continue;
        };
        entry.metas.retain(|meta| !left.contains_ref(&meta.conn_ref));

        let current = if entry.is_empty() {
            state.remove(&id);
            None
        } else {
            Some(entry.clone())
        };

        events.push(PresenceEvent::Leave { id, current, left });
    }

    events
}

/// Compute the diff that turns `old` into `new`.
#[must_use]
pub fn diff_states(old: &PresenceMap, new: &PresenceMap) -> PresenceDiff {
    let mut diff = PresenceDiff::default();

    for (id, entry) in old {
        if !new.contains_key(id) {
            diff.leaves.insert(id.clone(), entry.clone());
        }
    }

    for (id, entry) in new {
        let Some(current) = old.get(id) else {
            diff.joins.insert(id.clone(), entry.clone());
            continue;
        };

        let new_refs: HashSet<&str> = entry.metas.iter().map(|m| m.conn_ref.as_str()).collect();
        let cur_refs: HashSet<&str> = current.metas.iter().map(|m| m.conn_ref.as_str()).collect();

        let joined: Vec<_> = entry
            .metas
            .iter()
            .filter(|m| !cur_refs.contains(m.conn_ref.as_str()))
            .cloned()
            .collect();
        let left: Vec<_> = current
            .metas
            .iter()
            .filter(|m| !new_refs.contains(m.conn_ref.as_str()))
            .cloned()
            .collect();

        if !joined.is_empty() {
            diff.joins.insert(id.clone(), PresenceEntry::new(joined));
        }
        if !left.is_empty() {
            diff.leaves.insert(id.clone(), PresenceEntry::new(left));
        }
    }

    diff
}

/// Presence tracker for one channel.
#[derive(Debug, Default)]
pub struct Presence {
    state: PresenceMap,
    /// Diffs received before the first state of the current join.
    pending_diffs: Vec<PresenceDiff>,
    synced: bool,
    sync_subscribers: Vec<mpsc::UnboundedSender<Arc<PresenceSnapshot>>>,
    event_subscribers: Vec<mpsc::UnboundedSender<PresenceEvent>>,
}

impl Presence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with a full state from the server.
    ///
    /// Buffered diffs are applied afterwards, then subscribers are notified
    /// once.
    pub fn sync_state(&mut self, new_state: PresenceMap) -> Vec<PresenceEvent> {
        let new_state: PresenceMap = new_state
            .into_iter()
            .filter(|(_, entry)| !entry.is_empty())
            .collect();

        // Events are computed against the old roster; the snapshot itself is
        // taken verbatim from the server.
        let mut scratch = self.state.clone();
        let mut events = merge_diff(&mut scratch, diff_states(&self.state, &new_state));
        self.state = new_state;

        if !self.synced {
            self.synced = true;
            for diff in std::mem::take(&mut self.pending_diffs) {
                events.extend(merge_diff(&mut self.state, diff));
            }
        }

        debug!(identities = self.state.len(), changes = events.len(), "Presence state synced");
        self.publish(&events);
        events
    }

    /// Merge an incremental diff, or hold it back until the first state.
    pub fn sync_diff(&mut self, diff: PresenceDiff) -> Vec<PresenceEvent> {
        if !self.synced {
            trace!("Buffering presence diff until first state");
            self.pending_diffs.push(diff);
            return Vec::new();
        }

        let events = merge_diff(&mut self.state, diff);
        debug!(identities = self.state.len(), changes = events.len(), "Presence diff merged");
        self.publish(&events);
        events
    }

    /// Wait for a fresh state again, e.g. after a rejoin. The current roster
    /// stays visible until the new state replaces it.
    pub fn reset(&mut self) {
        self.synced = false;
        self.pending_diffs.clear();
    }

    /// Current roster.
    #[must_use]
    pub fn snapshot(&self) -> &PresenceSnapshot {
        &self.state
    }

    /// Iterate identities in id order.
    pub fn list(&self) -> impl Iterator<Item = (&str, &PresenceEntry)> {
        self.state.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Number of live connections of an identity.
    #[must_use]
    pub fn connection_count(&self, id: &str) -> usize {
        self.state.get(id).map_or(0, PresenceEntry::connection_count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Receive the merged snapshot after every sync.
    pub fn subscribe_sync(&mut self) -> mpsc::UnboundedReceiver<Arc<PresenceSnapshot>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sync_subscribers.push(tx);
        rx
    }

    /// Receive every join and leave.
    pub fn subscribe_events(&mut self) -> mpsc::UnboundedReceiver<PresenceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_subscribers.push(tx);
        rx
    }

    fn publish(&mut self, events: &[PresenceEvent]) {
        if !self.event_subscribers.is_empty() {
            for event in events {
                self.event_subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            }
        }
        if !self.sync_subscribers.is_empty() {
            let snapshot = Arc::new(self.state.clone());
            self.sync_subscribers
                .retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, BTreeSet};
    use tether_protocol::Meta;

    fn meta(conn_ref: &str) -> Meta {
        Meta::new(conn_ref, json!({"email": format!("{conn_ref}@example.com")}))
    }

    fn refs(presence: &Presence, id: &str) -> Vec<String> {
        presence
            .snapshot()
            .get(id)
            .map(|e| e.metas.iter().map(|m| m.conn_ref.clone()).collect())
            .unwrap_or_default()
    }

    fn state(entries: &[(&str, &[&str])]) -> PresenceMap {
        entries
            .iter()
            .map(|(id, metas)| {
                (
                    id.to_string(),
                    PresenceEntry::new(metas.iter().map(|r| meta(r)).collect()),
                )
            })
            .collect()
    }

    #[test]
    fn test_same_identity_multiple_connections() {
        let mut presence = Presence::new();
        presence.sync_state(PresenceMap::new());

        presence.sync_diff(PresenceDiff::default().join("42", meta("A")));
        assert_eq!(refs(&presence, "42"), ["A"]);

        presence.sync_diff(PresenceDiff::default().join("42", meta("B")));
        assert_eq!(refs(&presence, "42"), ["A", "B"]);
        assert_eq!(presence.connection_count("42"), 2);

        presence.sync_diff(PresenceDiff::default().leave("42", meta("A")));
        assert_eq!(refs(&presence, "42"), ["B"]);

        presence.sync_diff(PresenceDiff::default().leave("42", meta("B")));
        assert!(presence.snapshot().get("42").is_none());
        assert!(presence.is_empty());
    }

    #[test]
    fn test_sync_state_replaces_snapshot() {
        let mut presence = Presence::new();
        presence.sync_state(state(&[("1", &["a"]), ("2", &["b", "c"])]));

        let events = presence.sync_state(state(&[("2", &["c", "d"]), ("3", &["e"]), ("4", &[])]));

        assert_eq!(
            presence.list().map(|(id, _)| id).collect::<Vec<_>>(),
            ["2", "3"]
        );
        assert_eq!(refs(&presence, "2"), ["c", "d"]);

        let joins: BTreeSet<_> = events
            .iter()
            .filter(|e| matches!(e, PresenceEvent::Join { .. }))
            .map(PresenceEvent::id)
            .collect();
        let leaves: BTreeSet<_> = events
            .iter()
            .filter(|e| matches!(e, PresenceEvent::Leave { .. }))
            .map(PresenceEvent::id)
            .collect();
        assert_eq!(joins, BTreeSet::from(["2", "3"]));
        assert_eq!(leaves, BTreeSet::from(["1", "2"]));
    }

    #[test]
    fn test_replaying_state_is_idempotent() {
        let full = state(&[("1", &["a"]), ("2", &["b", "c"])]);
        let mut presence = Presence::new();

        presence.sync_state(full.clone());
        let before = presence.snapshot().clone();
        let events = presence.sync_state(full);

        assert_eq!(presence.snapshot(), &before);
        assert!(events.is_empty());
    }

    #[test]
    fn test_diffs_before_state_are_buffered() {
        let mut presence = Presence::new();
        let mut syncs = presence.subscribe_sync();

        assert!(presence
            .sync_diff(PresenceDiff::default().join("7", meta("x")))
            .is_empty());
        assert!(presence.is_empty());
        assert!(syncs.try_recv().is_err());

        presence.sync_state(state(&[("1", &["a"])]));
        assert_eq!(refs(&presence, "7"), ["x"]);
        assert_eq!(refs(&presence, "1"), ["a"]);

        // Exactly one notification, carrying the fully merged roster.
        let snapshot = syncs.try_recv().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(syncs.try_recv().is_err());
    }

    #[test]
    fn test_reset_waits_for_next_state() {
        let mut presence = Presence::new();
        presence.sync_state(state(&[("1", &["a"])]));

        presence.reset();
        presence.sync_diff(PresenceDiff::default().join("2", meta("b")));
        assert_eq!(presence.len(), 1);

        presence.sync_state(state(&[("3", &["c"])]));
        assert_eq!(
            presence.list().map(|(id, _)| id).collect::<Vec<_>>(),
            ["2", "3"]
        );
    }

    #[test]
    fn test_join_resending_known_ref_does_not_duplicate() {
        let mut presence = Presence::new();
        presence.sync_state(state(&[("1", &["a", "b"])]));

        let updated = Meta::new("a", json!({"status": "away"}));
        presence.sync_diff(PresenceDiff::default().join("1", updated));

        assert_eq!(refs(&presence, "1"), ["b", "a"]);
        let last = presence.snapshot()["1"].metas.last().cloned().unwrap();
        assert_eq!(last.get("status"), Some(&Value::from("away")));
    }

    #[test]
    fn test_event_subscribers() {
        let mut presence = Presence::new();
        let mut events = presence.subscribe_events();
        presence.sync_state(PresenceMap::new());

        presence.sync_diff(
            PresenceDiff::default()
                .join("1", meta("a"))
                .leave("9", meta("z")),
        );

        match events.try_recv().unwrap() {
            PresenceEvent::Join { id, current, joined } => {
                assert_eq!(id, "1");
                assert!(current.is_none());
                assert_eq!(joined.connection_count(), 1);
            }
            other => panic!("Expected join, got {:?}", other),
        }
        // Leaves for identities that were never present produce nothing.
        assert!(events.try_recv().is_err());
    }

    /// Drive a long pseudo-random sequence of diffs and check the roster
    /// against a simple model after every step.
    #[test]
    fn test_identity_set_matches_live_metas() {
        let mut presence = Presence::new();
        presence.sync_state(state(&[("u0", &["r0"])]));

        let mut model: BTreeMap<String, Vec<String>> = BTreeMap::new();
        model.insert("u0".into(), vec!["r0".into()]);

        let mut seed: u64 = 0x5eed;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        for step in 0..500 {
            let id = format!("u{}", next(6));
            let diff = if next(2) == 0 {
                let conn_ref = format!("r{step}");
                model.entry(id.clone()).or_default().push(conn_ref.clone());
                PresenceDiff::default().join(id, meta(&conn_ref))
            } else {
                let live = model.get(&id).cloned().unwrap_or_default();
                let victim = if live.is_empty() {
                    "gone".to_string()
                } else {
                    live[next(live.len() as u64) as usize].clone()
                };
                if let Some(metas) = model.get_mut(&id) {
                    metas.retain(|r| r != &victim);
                    if metas.is_empty() {
                        model.remove(&id);
                    }
                }
                PresenceDiff::default().leave(id, meta(&victim))
            };

            presence.sync_diff(diff);

            let ids: Vec<_> = presence.list().map(|(id, _)| id.to_string()).collect();
            assert_eq!(ids, model.keys().cloned().collect::<Vec<_>>(), "step {step}");
            for (id, entry) in presence.list() {
                assert!(!entry.is_empty());
                assert_eq!(refs(&presence, id), model[id], "step {step}");
            }
        }
    }
}
