//! # tether-core
//!
//! Client-side state for Tether realtime channels.
//!
//! This crate holds everything that does not touch the network:
//!
//! - **Channel** - Join state machine and per-event message fan-out
//! - **Presence** - Roster rebuilt from full states and merged from diffs
//! - **Router** - Channel table of one socket, routes inbound frames
//! - **Message** - Inbound application messages and request references
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Driver    │────▶│   Router    │────▶│  Channel    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Presence   │
//!                     └─────────────┘
//! ```

pub mod channel;
pub mod message;
pub mod presence;
pub mod router;

pub use channel::{validate_topic, Channel, ChannelState, PushAdmission, PushPolicy};
pub use message::{Message, Ref, RefGenerator};
pub use presence::{Presence, PresenceEvent, PresenceSnapshot};
pub use router::{ChannelEntry, Router, RouterConfig, RouterError, RouterStats};
