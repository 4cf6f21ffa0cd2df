//! Presence handles.

use std::sync::Arc;
use tether_core::{PresenceEvent, PresenceSnapshot};
use tether_protocol::PresenceEntry;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channel::Channel;
use crate::error::ClientError;
use crate::socket::Command;

/// Merged roster after every presence state or diff.
pub type SyncStream = UnboundedReceiverStream<Arc<PresenceSnapshot>>;

/// Every identity join and leave.
pub type PresenceEventStream = UnboundedReceiverStream<PresenceEvent>;

/// Presence tracker of one channel.
///
/// The roster is replaced by every full state from the server and merged
/// with the diffs in between. Diffs received before the first state after a
/// join are applied right after it.
#[derive(Debug, Clone)]
pub struct Presence {
    channel: Channel,
}

impl Presence {
    pub(crate) fn new(channel: Channel) -> Self {
        Self { channel }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.channel.topic()
    }

    /// Stream the roster every time it changes.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn on_sync(&self) -> Result<SyncStream, ClientError> {
        let rx = self
            .channel
            .commands()
            .call(|reply| Command::SubscribeSync {
                topic: self.channel.topic().to_string(),
                params: self.channel.params().clone(),
                reply,
            })
            .await??;
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Stream individual joins and leaves.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn events(&self) -> Result<PresenceEventStream, ClientError> {
        let rx = self
            .channel
            .commands()
            .call(|reply| Command::SubscribePresence {
                topic: self.channel.topic().to_string(),
                params: self.channel.params().clone(),
                reply,
            })
            .await??;
        Ok(UnboundedReceiverStream::new(rx))
    }

    /// Current roster, ordered by identity id.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn snapshot(&self) -> Result<PresenceSnapshot, ClientError> {
        self.channel
            .commands()
            .call(|reply| Command::Snapshot {
                topic: self.channel.topic().to_string(),
                reply,
            })
            .await
    }

    /// Current roster as a list.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn list(&self) -> Result<Vec<(String, PresenceEntry)>, ClientError> {
        Ok(self.snapshot().await?.into_iter().collect())
    }

    /// Live connections of an identity; zero if it is not present.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn connection_count(&self, id: &str) -> Result<usize, ClientError> {
        Ok(self
            .snapshot()
            .await?
            .get(id)
            .map_or(0, PresenceEntry::connection_count))
    }
}
