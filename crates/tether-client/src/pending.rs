//! Requests waiting for a server reply.
//!
//! Every join, leave and push gets a reference and a deadline. Pushes made
//! before their channel is joined are stored together with their frame and
//! sent once the join completes; they expire from the moment they were made.

use serde_json::Value;
use std::collections::BTreeMap;
use tether_core::Ref;
use tether_protocol::Frame;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ClientError;

pub(crate) type Waiter = oneshot::Sender<Result<Value, ClientError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Join,
    Leave,
    Push,
}

#[derive(Debug)]
pub(crate) struct Request {
    pub topic: String,
    pub kind: RequestKind,
    pub deadline: Instant,
    /// Rejoins issued by the socket itself have nobody waiting.
    waiter: Option<Waiter>,
    /// Frame still to be sent.
    outbound: Option<Frame>,
}

impl Request {
    pub fn resolve(mut self, result: Result<Value, ClientError>) {
        if let Some(waiter) = self.waiter.take() {
            // Nobody listening
            let _ = waiter.send(result);
        }
    }
}

/// Pending requests keyed by reference.
#[derive(Debug, Default)]
pub(crate) struct PendingReplies {
    requests: BTreeMap<Ref, Request>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request whose frame is already on the wire.
    pub fn insert(
        &mut self,
        id: Ref,
        topic: &str,
        kind: RequestKind,
        deadline: Instant,
        waiter: Option<Waiter>,
    ) {
        self.requests.insert(
            id,
            Request {
                topic: topic.to_string(),
                kind,
                deadline,
                waiter,
                outbound: None,
            },
        );
    }

    /// Track a request whose frame is held back.
    pub fn insert_unsent(
        &mut self,
        id: Ref,
        topic: &str,
        kind: RequestKind,
        deadline: Instant,
        waiter: Option<Waiter>,
        frame: Frame,
    ) {
        self.requests.insert(
            id,
            Request {
                topic: topic.to_string(),
                kind,
                deadline,
                waiter,
                outbound: Some(frame),
            },
        );
    }

    pub fn take(&mut self, id: Ref) -> Option<Request> {
        self.requests.remove(&id)
    }

    /// Release held-back frames of `kind`, optionally for one topic, in
    /// reference order. The requests stay pending.
    pub fn release(&mut self, kind: RequestKind, topic: Option<&str>) -> Vec<Frame> {
        self.requests
            .values_mut()
            .filter(|r| r.kind == kind && topic.map_or(true, |t| r.topic == t))
            .filter_map(|r| r.outbound.take())
            .collect()
    }

    /// Earliest deadline of any request.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.requests.values().map(|r| r.deadline).min()
    }

    /// Remove and return every request whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<(Ref, Request)> {
        let expired: Vec<Ref> = self
            .requests
            .iter()
            .filter(|(_, r)| r.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.requests.remove(&id).map(|r| (id, r)))
            .collect()
    }

    /// Fail every request for `topic`.
    pub fn fail_topic(&mut self, topic: &str, err: impl Fn() -> ClientError) -> usize {
        let ids: Vec<Ref> = self
            .requests
            .iter()
            .filter(|(_, r)| r.topic == topic)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(request) = self.requests.remove(id) {
                request.resolve(Err(err()));
            }
        }
        ids.len()
    }

    /// Fail every request.
    pub fn fail_all(&mut self, err: impl Fn() -> ClientError) -> usize {
        let requests = std::mem::take(&mut self.requests);
        let count = requests.len();
        for (_, request) in requests {
            request.resolve(Err(err()));
        }
        count
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn waiter() -> (Waiter, oneshot::Receiver<Result<Value, ClientError>>) {
        oneshot::channel()
    }

    #[tokio::test]
    async fn test_take_and_resolve() {
        let mut pending = PendingReplies::new();
        let (tx, rx) = waiter();
        let deadline = Instant::now() + Duration::from_secs(10);
        pending.insert(1, "room:lobby", RequestKind::Push, deadline, Some(tx));

        let request = pending.take(1).unwrap();
        assert_eq!(request.kind, RequestKind::Push);
        request.resolve(Ok(json!({"ok": true})));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));
        assert!(pending.take(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_in_deadline_order() {
        let mut pending = PendingReplies::new();
        let now = Instant::now();
        pending.insert(1, "a", RequestKind::Push, now + Duration::from_secs(5), None);
        pending.insert(2, "a", RequestKind::Push, now + Duration::from_secs(1), None);
        assert_eq!(pending.next_deadline(), Some(now + Duration::from_secs(1)));

        let expired = pending.expire(now + Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, 2);
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_release_held_frames_in_order() {
        let mut pending = PendingReplies::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        for id in [3, 1, 2] {
            pending.insert_unsent(
                id,
                "room:lobby",
                RequestKind::Push,
                deadline,
                None,
                Frame::push(id, "room:lobby", "new_msg", json!({})),
            );
        }
        pending.insert_unsent(
            4,
            "room:other",
            RequestKind::Push,
            deadline,
            None,
            Frame::push(4, "room:other", "new_msg", json!({})),
        );

        let frames = pending.release(RequestKind::Push, Some("room:lobby"));
        let ids: Vec<_> = frames
            .iter()
            .map(|f| match f {
                Frame::Push { id, .. } => id.unwrap_or_default(),
                _ => 0,
            })
            .collect();
        assert_eq!(ids, [1, 2, 3]);
        // Released requests still wait for their replies.
        assert_eq!(pending.len(), 4);
        assert!(pending.release(RequestKind::Push, Some("room:lobby")).is_empty());
    }

    #[tokio::test]
    async fn test_fail_topic_and_all() {
        let mut pending = PendingReplies::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        let (a, rx_a) = waiter();
        let (b, rx_b) = waiter();
        pending.insert(1, "a", RequestKind::Push, deadline, Some(a));
        pending.insert(2, "b", RequestKind::Join, deadline, Some(b));

        assert_eq!(pending.fail_topic("a", || ClientError::ChannelClosed), 1);
        assert!(matches!(rx_a.await.unwrap(), Err(ClientError::ChannelClosed)));

        assert_eq!(pending.fail_all(|| ClientError::Timeout), 1);
        assert!(matches!(rx_b.await.unwrap(), Err(ClientError::Timeout)));
        assert_eq!(pending.len(), 0);
    }
}
