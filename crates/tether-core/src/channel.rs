//! Channel state for one topic.
//!
//! A channel tracks its join lifecycle and fans inbound messages out to the
//! subscribers registered for each event name.

use crate::message::{Message, Ref};
use crate::router::RouterError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Maximum topic length.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Validate a topic name.
///
/// # Errors
///
/// Returns an error message if the topic is invalid.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("Topic cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err("Topic too long");
    }
    if topic.starts_with('$') {
        return Err("Topics starting with '$' are reserved");
    }
    if !topic.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Topic contains invalid characters");
    }
    Ok(())
}

/// Join lifecycle of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChannelState {
    #[default]
    Unjoined,
    Joining,
    Joined,
    Errored,
}

impl ChannelState {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Unjoined, Joining)
                | (Joining, Joined)
                | (Joining, Errored)
                | (Joining, Unjoined)
                | (Joined, Unjoined)
                | (Joined, Errored)
                | (Errored, Joining)
                | (Errored, Unjoined)
        )
    }

    /// Whether inbound messages for the topic should be delivered.
    #[must_use]
    pub fn is_member(self) -> bool {
        matches!(self, ChannelState::Joining | ChannelState::Joined)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Unjoined => "unjoined",
            ChannelState::Joining => "joining",
            ChannelState::Joined => "joined",
            ChannelState::Errored => "errored",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a push made before the channel is joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushPolicy {
    /// Queue the push and send it once the join succeeds.
    #[default]
    Buffer,
    /// Fail the push immediately.
    Reject,
}

/// Decision for a single push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAdmission {
    Send,
    Buffer,
    Reject,
}

/// A channel subscription on the client side.
#[derive(Debug)]
pub struct Channel {
    topic: String,
    /// Parameters sent with every join.
    params: Value,
    state: ChannelState,
    /// Publishes every state change; dropped with the channel.
    state_tx: watch::Sender<ChannelState>,
    /// Reference of the join currently in flight or in effect.
    join_ref: Option<Ref>,
    /// Rejoin once the transport is back.
    rejoin: bool,
    /// Event name -> subscribers.
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Message>>>,
}

impl Channel {
    #[must_use]
    pub fn new(topic: impl Into<String>, params: Value) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Unjoined);
        Self {
            topic: topic.into(),
            params,
            state: ChannelState::Unjoined,
            state_tx,
            join_ref: None,
            rejoin: false,
            subscribers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn set_params(&mut self, params: Value) {
        self.params = params;
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Follow the state of this channel. The receiver sees the channel
    /// closed once it is dropped.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn join_ref(&self) -> Option<Ref> {
        self.join_ref
    }

    #[must_use]
    pub fn wants_rejoin(&self) -> bool {
        self.rejoin
    }

    fn transition(&mut self, next: ChannelState) -> Result<ChannelState, RouterError> {
        let prev = self.state;
        if !prev.can_transition_to(next) {
            return Err(RouterError::InvalidTransition {
                topic: self.topic.clone(),
                from: prev,
                to: next,
            });
        }
        self.state = next;
        self.state_tx.send_replace(next);
        debug!(topic = %self.topic, from = %prev, to = %next, "Channel state changed");
        Ok(prev)
    }

    /// Start joining with the given request reference.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyJoined` if a join is in flight or in effect.
    pub fn begin_join(&mut self, join_ref: Ref) -> Result<(), RouterError> {
        if self.state.is_member() {
            return Err(RouterError::AlreadyJoined(self.topic.clone()));
        }
        self.transition(ChannelState::Joining)?;
        self.join_ref = Some(join_ref);
        self.rejoin = false;
        Ok(())
    }

    /// Complete the join identified by `join_ref`.
    ///
    /// Returns `false` for replies to a join that is no longer current.
    pub fn mark_joined(&mut self, join_ref: Ref) -> bool {
        if self.join_ref != Some(join_ref) || self.state != ChannelState::Joining {
            trace!(topic = %self.topic, join_ref, "Ignoring stale join reply");
            return false;
        }
        self.transition(ChannelState::Joined).is_ok()
    }

    /// The join was refused or timed out, or the server closed the topic.
    pub fn mark_errored(&mut self) -> bool {
        self.transition(ChannelState::Errored).is_ok()
    }

    /// The channel was left by the user.
    pub fn mark_left(&mut self) {
        if self.state != ChannelState::Unjoined {
            let _ = self.transition(ChannelState::Unjoined);
        }
        self.join_ref = None;
        self.rejoin = false;
    }

    /// The transport went away. Members are remembered for rejoin when
    /// `rejoin` is set.
    pub fn transport_lost(&mut self, rejoin: bool) {
        let was_member = self.state.is_member() || (self.state == ChannelState::Unjoined && self.rejoin);
        if self.state != ChannelState::Unjoined {
            let _ = self.transition(ChannelState::Unjoined);
        }
        self.join_ref = None;
        self.rejoin = rejoin && was_member;
    }

    /// Decide how a push made right now should be handled.
    #[must_use]
    pub fn admit_push(&self, policy: PushPolicy) -> PushAdmission {
        let waiting = match self.state {
            ChannelState::Joined => return PushAdmission::Send,
            ChannelState::Joining | ChannelState::Errored => true,
            ChannelState::Unjoined => self.rejoin,
        };
        match (waiting, policy) {
            (true, PushPolicy::Buffer) => PushAdmission::Buffer,
            _ => PushAdmission::Reject,
        }
    }

    /// Subscribe to inbound messages with the given event name.
    pub fn subscribe(&mut self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let event = event.into();
        debug!(topic = %self.topic, event = %event, "Event subscriber added");
        self.subscribers.entry(event).or_default().push(tx);
        rx
    }

    /// Deliver a message to the subscribers of its event, in registration
    /// order. Subscribers whose receiver is gone are dropped.
    ///
    /// Returns the number of subscribers that received the message.
    pub fn dispatch(&mut self, message: &Message) -> usize {
        let Some(subs) = self.subscribers.get_mut(&message.event) else {
            trace!(topic = %self.topic, event = %message.event, "No subscribers for event");
            return 0;
        };
        subs.retain(|tx| tx.send(message.clone()).is_ok());
        let delivered = subs.len();
        if subs.is_empty() {
            self.subscribers.remove(&message.event);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("room:lobby").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("$system").is_err());
        assert!(validate_topic("room:\u{7}").is_err());
        assert!(validate_topic(&"a".repeat(MAX_TOPIC_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_join_lifecycle() {
        let mut channel = Channel::new("room:lobby", json!({}));
        assert_eq!(channel.state(), ChannelState::Unjoined);

        channel.begin_join(1).unwrap();
        assert_eq!(channel.state(), ChannelState::Joining);
        assert!(matches!(channel.begin_join(2), Err(RouterError::AlreadyJoined(_))));

        // A reply for some other join is ignored.
        assert!(!channel.mark_joined(9));
        assert!(channel.mark_joined(1));
        assert_eq!(channel.state(), ChannelState::Joined);

        channel.mark_left();
        assert_eq!(channel.state(), ChannelState::Unjoined);
        assert_eq!(channel.join_ref(), None);
    }

    #[test]
    fn test_errored_channel_can_retry() {
        let mut channel = Channel::new("room:lobby", json!({}));
        channel.begin_join(1).unwrap();
        assert!(channel.mark_errored());
        assert_eq!(channel.state(), ChannelState::Errored);

        channel.begin_join(2).unwrap();
        assert!(channel.mark_joined(2));
    }

    #[test]
    fn test_watch_state() {
        let mut channel = Channel::new("room:lobby", json!({}));
        let mut rx = channel.watch_state();
        assert_eq!(*rx.borrow(), ChannelState::Unjoined);

        channel.begin_join(1).unwrap();
        channel.mark_errored();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ChannelState::Errored);

        drop(channel);
        assert!(rx.has_changed().is_err());
    }

    #[test]
    fn test_transitions() {
        use ChannelState::*;
        assert!(Unjoined.can_transition_to(Joining));
        assert!(!Unjoined.can_transition_to(Joined));
        assert!(!Joined.can_transition_to(Joining));
        assert!(!Errored.can_transition_to(Joined));
        assert!(Joined.can_transition_to(Unjoined));
    }

    #[test]
    fn test_transport_loss_remembers_members() {
        let mut joined = Channel::new("a", json!({}));
        joined.begin_join(1).unwrap();
        joined.mark_joined(1);
        joined.transport_lost(true);
        assert_eq!(joined.state(), ChannelState::Unjoined);
        assert!(joined.wants_rejoin());

        // A second loss before the rejoin happened keeps the intent.
        joined.transport_lost(true);
        assert!(joined.wants_rejoin());

        let mut errored = Channel::new("b", json!({}));
        errored.begin_join(1).unwrap();
        errored.mark_errored();
        errored.transport_lost(true);
        assert!(!errored.wants_rejoin());

        let mut no_reconnect = Channel::new("c", json!({}));
        no_reconnect.begin_join(1).unwrap();
        no_reconnect.transport_lost(false);
        assert!(!no_reconnect.wants_rejoin());
    }

    #[test]
    fn test_push_admission() {
        let mut channel = Channel::new("room:lobby", json!({}));
        assert_eq!(channel.admit_push(PushPolicy::Buffer), PushAdmission::Reject);

        channel.begin_join(1).unwrap();
        assert_eq!(channel.admit_push(PushPolicy::Buffer), PushAdmission::Buffer);
        assert_eq!(channel.admit_push(PushPolicy::Reject), PushAdmission::Reject);

        channel.mark_joined(1);
        assert_eq!(channel.admit_push(PushPolicy::Reject), PushAdmission::Send);

        channel.transport_lost(true);
        assert_eq!(channel.admit_push(PushPolicy::Buffer), PushAdmission::Buffer);

        channel.mark_left();
        assert_eq!(channel.admit_push(PushPolicy::Buffer), PushAdmission::Reject);
    }

    #[test]
    fn test_dispatch_by_event() {
        let mut channel = Channel::new("room:lobby", json!({}));
        let mut chat = channel.subscribe("new_msg");
        let mut typing = channel.subscribe("typing");

        let msg = Message::new("room:lobby", "new_msg", json!({"body": "hi"}));
        assert_eq!(channel.dispatch(&msg), 1);
        assert_eq!(chat.try_recv().unwrap().payload["body"], "hi");
        assert!(typing.try_recv().is_err());

        drop(chat);
        assert_eq!(channel.dispatch(&msg), 0);
        let typed = Message::new("room:lobby", "typing", json!({}));
        assert_eq!(channel.dispatch(&typed), 1);
    }
}
