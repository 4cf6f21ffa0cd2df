//! # tether-protocol
//!
//! Wire protocol for Tether realtime channels.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Token handshake and version negotiation
//! - `Join` / `Leave` / `Reply` - Topic membership with acknowledgements
//! - `Push` / `Broadcast` - Application events in both directions
//! - `PresenceState` / `PresenceDiff` - Presence roster sync
//! - `Close` / `Error` / `Ping` / `Pong` - Control
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tether_protocol::{codec, Frame};
//!
//! let frame = Frame::push(1, "room:lobby", "new_msg", json!({"body": "hi"}));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod presence;
pub mod version;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{codes, Frame, FrameType, ReplyStatus};
pub use presence::{Meta, PresenceDiff, PresenceEntry, PresenceMap};
pub use version::{Version, PROTOCOL_VERSION};
