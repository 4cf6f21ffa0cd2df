//! Inbound routing for a client socket.
//!
//! The router owns every channel of one socket together with its presence
//! tracker, and routes inbound broadcasts and presence frames to them.

use crate::channel::{validate_topic, Channel, ChannelState};
use crate::message::Message;
use crate::presence::{Presence, PresenceEvent};
use serde_json::Value;
use std::collections::HashMap;
use tether_protocol::{PresenceDiff, PresenceMap};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(&'static str),

    /// A join is already in flight or in effect.
    #[error("Already joined topic: {0}")]
    AlreadyJoined(String),

    #[error("Invalid channel transition on {topic}: {from} -> {to}")]
    InvalidTransition {
        topic: String,
        from: ChannelState,
        to: ChannelState,
    },

    #[error("Maximum channels reached")]
    MaxChannelsReached,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of channels on one socket.
    pub max_channels: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { max_channels: 1_000 }
    }
}

/// Channel entry with presence tracking.
#[derive(Debug)]
pub struct ChannelEntry {
    pub channel: Channel,
    pub presence: Presence,
}

impl ChannelEntry {
    fn new(topic: &str, params: Value) -> Self {
        Self {
            channel: Channel::new(topic, params),
            presence: Presence::new(),
        }
    }
}

/// The channel table of one socket.
#[derive(Debug, Default)]
pub struct Router {
    channels: HashMap<String, ChannelEntry>,
    config: RouterConfig,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            channels: HashMap::new(),
            config,
        }
    }

    /// Get or create the channel for `topic`.
    ///
    /// Params of an existing channel are replaced so the next join uses them.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid or the channel limit is hit.
    pub fn register(&mut self, topic: &str, params: Value) -> Result<&mut ChannelEntry, RouterError> {
        validate_topic(topic).map_err(RouterError::InvalidTopic)?;

        if !self.channels.contains_key(topic) && self.channels.len() >= self.config.max_channels {
            return Err(RouterError::MaxChannelsReached);
        }

        let entry = self.channels.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic = %topic, "Creating channel");
            ChannelEntry::new(topic, Value::Null)
        });
        entry.channel.set_params(params);
        Ok(entry)
    }

    /// Drop the channel for `topic`, ending its subscriptions.
    pub fn remove(&mut self, topic: &str) -> Option<ChannelEntry> {
        let entry = self.channels.remove(topic);
        if entry.is_some() {
            debug!(topic = %topic, "Removed channel");
        }
        entry
    }

    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&ChannelEntry> {
        self.channels.get(topic)
    }

    pub fn get_mut(&mut self, topic: &str) -> Option<&mut ChannelEntry> {
        self.channels.get_mut(topic)
    }

    /// State of a channel; unknown topics are unjoined.
    #[must_use]
    pub fn state(&self, topic: &str) -> ChannelState {
        self.channels
            .get(topic)
            .map_or(ChannelState::Unjoined, |e| e.channel.state())
    }

    /// Deliver an inbound message to its channel's subscribers.
    ///
    /// Returns the number of subscribers that received it.
    pub fn dispatch(&mut self, message: &Message) -> usize {
        match self.channels.get_mut(&message.topic) {
            Some(entry) if entry.channel.state().is_member() => {
                let count = entry.channel.dispatch(message);
                trace!(topic = %message.topic, event = %message.event, recipients = count, "Dispatched message");
                count
            }
            Some(entry) => {
                debug!(topic = %message.topic, state = %entry.channel.state(), "Dropping message for non-member channel");
                0
            }
            None => {
                warn!(topic = %message.topic, "Message for unknown topic");
                0
            }
        }
    }

    /// Apply a full presence state to a member channel.
    pub fn presence_state(&mut self, topic: &str, state: PresenceMap) -> Option<Vec<PresenceEvent>> {
        let entry = self.member_mut(topic)?;
        Some(entry.presence.sync_state(state))
    }

    /// Apply a presence diff to a member channel.
    pub fn presence_diff(&mut self, topic: &str, diff: PresenceDiff) -> Option<Vec<PresenceEvent>> {
        let entry = self.member_mut(topic)?;
        Some(entry.presence.sync_diff(diff))
    }

    fn member_mut(&mut self, topic: &str) -> Option<&mut ChannelEntry> {
        match self.channels.get_mut(topic) {
            Some(entry) if entry.channel.state().is_member() => Some(entry),
            _ => {
                debug!(topic = %topic, "Ignoring presence for non-member channel");
                None
            }
        }
    }

    /// Mark every channel unjoined after the transport went away.
    ///
    /// Returns the topics that will be rejoined.
    pub fn transport_lost(&mut self, rejoin: bool) -> Vec<String> {
        let mut rejoining = Vec::new();
        for (topic, entry) in &mut self.channels {
            entry.channel.transport_lost(rejoin);
            entry.presence.reset();
            if entry.channel.wants_rejoin() {
                rejoining.push(topic.clone());
            }
        }
        rejoining.sort();
        rejoining
    }

    /// Topics waiting to be rejoined, with their join params.
    #[must_use]
    pub fn rejoin_candidates(&self) -> Vec<(String, Value)> {
        let mut topics: Vec<_> = self
            .channels
            .iter()
            .filter(|(_, e)| e.channel.wants_rejoin())
            .map(|(topic, e)| (topic.clone(), e.channel.params().clone()))
            .collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        topics
    }

    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            channel_count: self.channels.len(),
            joined_count: self
                .channels
                .values()
                .filter(|e| e.channel.state() == ChannelState::Joined)
                .count(),
            identity_count: self.channels.values().map(|e| e.presence.len()).sum(),
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of channels, joined or not.
    pub channel_count: usize,
    /// Number of joined channels.
    pub joined_count: usize,
    /// Sum of roster sizes across channels.
    pub identity_count: usize,
}
