//! # tether-transport
//!
//! Client transports for Tether sockets.
//!
//! - **WebSocket** - Binary frames over `ws://` or `wss://`
//! - **Memory** - In-process pair, used by tests and embedded servers
//!
//! ## Transport Abstraction
//!
//! Every transport implements [`Transport`] and hands out boxed
//! [`Connection`]s, so the socket driver is protocol-agnostic.
//!
//! ```rust,ignore
//! use tether_transport::{Connection, Endpoint, Transport};
//!
//! async fn pump(transport: &dyn Transport) -> Result<(), TransportError> {
//!     let endpoint = Endpoint::parse("ws://localhost:4000/socket")?.with_token("t");
//!     let mut conn = transport.connect(&endpoint).await?;
//!     while let Some(frame) = conn.recv().await? {
//!         // Process frame
//!     }
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{memory_transport, MemoryListener, MemoryPeer, MemoryTransport};
pub use traits::{Connection, ConnectionId, Endpoint, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
