//! Channel handles.

use serde_json::Value;
use std::future::Future;
use tether_core::{ChannelState, Message};
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};

use crate::error::ClientError;
use crate::presence::Presence;
use crate::socket::{settle, Command, Commands};

/// Inbound messages of one event on one channel, in arrival order.
pub type EventStream = UnboundedReceiverStream<Message>;

/// Join state of one channel: the current state, then every change.
pub type ChannelStateStream = WatchStream<ChannelState>;

/// Handle to a topic on a socket.
///
/// Join, push and leave requests are queued as soon as the method is
/// called, so requests made one after another reach the server in that
/// order; the returned futures only wait for the outcome.
#[derive(Debug, Clone)]
pub struct Channel {
    topic: String,
    params: Value,
    commands: Commands,
}

impl Channel {
    pub(crate) fn new(topic: String, params: Value, commands: Commands) -> Self {
        Self {
            topic,
            params,
            commands,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Parameters sent with every join.
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    pub(crate) fn commands(&self) -> &Commands {
        &self.commands
    }

    /// Join the topic. Resolves with the server's join response.
    ///
    /// A channel that errored or was left can be joined again.
    ///
    /// # Errors
    ///
    /// `Join` with the server's reason, `AlreadyJoined`, `InvalidTopic`,
    /// `Timeout`, or `Transport` if the connection drops first.
    pub fn join(&self) -> impl Future<Output = Result<Value, ClientError>> + Send + 'static {
        let rx = self.commands.send(|reply| Command::Join {
            topic: self.topic.clone(),
            params: self.params.clone(),
            reply,
        });
        settle(rx)
    }

    /// Push an event. Resolves with the response of the server's reply.
    ///
    /// # Errors
    ///
    /// `Timeout` without a reply in time, `Rejected` on an error reply,
    /// `ChannelClosed` if the channel is not joined and the push policy
    /// does not hold it back, `Transport` if the connection drops first.
    pub fn push(
        &self,
        event: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send + 'static {
        let rx = self.commands.send(|reply| Command::Push {
            topic: self.topic.clone(),
            event: event.to_string(),
            payload,
            reply,
        });
        settle(rx)
    }

    /// Stream every inbound message with the given event name.
    ///
    /// Subscribing before [`Channel::join`] sees every message of the join.
    /// The stream ends when the channel is left or the socket closes.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn on(&self, event: impl Into<String>) -> Result<EventStream, ClientError> {
        let rx = self
            .commands
            .call(|reply| Command::Subscribe {
                topic: self.topic.clone(),
                params: self.params.clone(),
                event: event.into(),
                reply,
            })
            .await??;
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Leave the topic.
    ///
    /// The channel is unjoined immediately: its streams end and its pending
    /// pushes fail with `ChannelClosed`. The future resolves once the server
    /// acknowledged the leave.
    ///
    /// # Errors
    ///
    /// `Timeout` without an acknowledgement in time, `Transport` if the
    /// connection drops first.
    pub fn leave(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let rx = self.commands.send(|reply| Command::Leave {
            topic: self.topic.clone(),
            reply,
        });
        async move { settle(rx).await.map(|_| ()) }
    }

    /// Stream the join state, starting with the current one.
    ///
    /// Intermediate states may be skipped when several changes happen at
    /// once. The stream ends when the channel is left or the socket closes.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn state_changes(&self) -> Result<ChannelStateStream, ClientError> {
        let rx = self
            .commands
            .call(|reply| Command::WatchState {
                topic: self.topic.clone(),
                params: self.params.clone(),
                reply,
            })
            .await??;
        Ok(WatchStream::new(rx))
    }

    /// Presence tracker of this channel.
    #[must_use]
    pub fn presence(&self) -> Presence {
        Presence::new(self.clone())
    }

    /// Current join state; `Unjoined` once the socket is closed.
    pub async fn state(&self) -> ChannelState {
        self.commands
            .call(|reply| Command::State {
                topic: self.topic.clone(),
                reply,
            })
            .await
            .unwrap_or_default()
    }
}
