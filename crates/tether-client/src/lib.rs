//! # tether-client
//!
//! Realtime channel client: one authenticated socket, topic channels with
//! acknowledged pushes and per-event streams, and a presence roster per
//! channel.
//!
//! ```rust,ignore
//! use tether_client::{Socket, SocketConfig};
//! use tokio_stream::StreamExt;
//!
//! let socket = Socket::connect_websocket(
//!     SocketConfig::new("ws://localhost:4000/socket").with_token(token),
//! )
//! .await?;
//!
//! let lobby = socket.channel("room:lobby", serde_json::json!({}));
//! let mut messages = lobby.on("new_msg").await?;
//! let mut roster = lobby.presence().on_sync().await?;
//! lobby.join().await?;
//!
//! lobby.push("new_msg", serde_json::json!({"body": "hello"})).await?;
//! while let Some(msg) = messages.next().await {
//!     println!("{}", msg.payload);
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod metrics;
mod pending;
pub mod presence;
pub mod reconnect;
pub mod socket;

pub use channel::{Channel, ChannelStateStream, EventStream};
pub use config::SocketConfig;
pub use error::ClientError;
pub use presence::{Presence, PresenceEventStream, SyncStream};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use socket::{ConnectionState, Socket};

pub use tether_core::{ChannelState, Message, PresenceEvent, PresenceSnapshot, PushPolicy, RouterStats};
pub use tether_protocol::{Meta, PresenceEntry};
pub use tether_transport::{Endpoint, Transport, TransportError};
