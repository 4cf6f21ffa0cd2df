//! Frame types for the Tether protocol.
//!
//! Frames are the unit of communication between a client socket and the
//! server. Every frame is a MessagePack map tagged by `type`; application
//! payloads are carried as JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::presence::{PresenceDiff, PresenceMap};

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The token was missing, expired or rejected.
    pub const UNAUTHORIZED: u16 = 4001;
    /// The client speaks an incompatible protocol version.
    pub const UNSUPPORTED_VERSION: u16 = 4002;
    /// The frame could not be decoded or was not expected.
    pub const BAD_FRAME: u16 = 4003;
    /// The topic does not exist or may not be joined.
    pub const UNKNOWN_TOPIC: u16 = 4004;
    /// The server failed while handling the request.
    pub const INTERNAL: u16 = 5000;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Join = 0x03,
    Leave = 0x04,
    Push = 0x05,
    Reply = 0x06,
    Broadcast = 0x07,
    PresenceState = 0x08,
    PresenceDiff = 0x09,
    Close = 0x0A,
    Error = 0x0B,
    Ping = 0x0C,
    Pong = 0x0D,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Join),
            0x04 => Ok(FrameType::Leave),
            0x05 => Ok(FrameType::Push),
            0x06 => Ok(FrameType::Reply),
            0x07 => Ok(FrameType::Broadcast),
            0x08 => Ok(FrameType::PresenceState),
            0x09 => Ok(FrameType::PresenceDiff),
            0x0A => Ok(FrameType::Close),
            0x0B => Ok(FrameType::Error),
            0x0C => Ok(FrameType::Ping),
            0x0D => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Outcome of a request, as reported by [`Frame::Reply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client handshake, sent once right after the transport opens.
    #[serde(rename = "connect")]
    Connect {
        /// Major protocol version spoken by the client.
        version: u8,
        /// Bearer token issued out-of-band.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Server handshake response.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Major protocol version spoken by the server.
        version: u8,
        /// Recommended heartbeat interval in milliseconds (0 = client default).
        heartbeat: u32,
    },

    /// Join a topic.
    #[serde(rename = "join")]
    Join {
        /// Request reference echoed by the reply.
        id: u64,
        topic: String,
        /// Join parameters handed to the server-side channel.
        #[serde(default)]
        payload: Value,
    },

    /// Leave a topic.
    #[serde(rename = "leave")]
    Leave { id: u64, topic: String },

    /// Client message on a joined topic.
    #[serde(rename = "push")]
    Push {
        /// Request reference; `None` means no reply is wanted.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        topic: String,
        event: String,
        #[serde(default)]
        payload: Value,
    },

    /// Server reply to a `join`, `leave` or `push`.
    #[serde(rename = "reply")]
    Reply {
        id: u64,
        topic: String,
        status: ReplyStatus,
        #[serde(default)]
        response: Value,
    },

    /// Server message on a topic.
    #[serde(rename = "broadcast")]
    Broadcast {
        topic: String,
        event: String,
        #[serde(default)]
        payload: Value,
    },

    /// Full presence state of a topic.
    #[serde(rename = "presence_state")]
    PresenceState { topic: String, state: PresenceMap },

    /// Incremental presence change on a topic.
    #[serde(rename = "presence_diff")]
    PresenceDiff { topic: String, diff: PresenceDiff },

    /// The server closed the topic for this client.
    #[serde(rename = "close")]
    Close { topic: String, reason: String },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 for connection-level errors).
        id: u64,
        code: u16,
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Push { .. } => FrameType::Push,
            Frame::Reply { .. } => FrameType::Reply,
            Frame::Broadcast { .. } => FrameType::Broadcast,
            Frame::PresenceState { .. } => FrameType::PresenceState,
            Frame::PresenceDiff { .. } => FrameType::PresenceDiff,
            Frame::Close { .. } => FrameType::Close,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// The topic this frame is addressed to, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Frame::Join { topic, .. }
            | Frame::Leave { topic, .. }
            | Frame::Push { topic, .. }
            | Frame::Reply { topic, .. }
            | Frame::Broadcast { topic, .. }
            | Frame::PresenceState { topic, .. }
            | Frame::PresenceDiff { topic, .. }
            | Frame::Close { topic, .. } => Some(topic),
            _ => None,
        }
    }

    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    #[must_use]
    pub fn join(id: u64, topic: impl Into<String>, payload: Value) -> Self {
        Frame::Join {
            id,
            topic: topic.into(),
            payload,
        }
    }

    #[must_use]
    pub fn leave(id: u64, topic: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            topic: topic.into(),
        }
    }

    /// Create a Push frame that expects a reply.
    #[must_use]
    pub fn push(id: u64, topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Frame::Push {
            id: Some(id),
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    #[must_use]
    pub fn reply_ok(id: u64, topic: impl Into<String>, response: Value) -> Self {
        Frame::Reply {
            id,
            topic: topic.into(),
            status: ReplyStatus::Ok,
            response,
        }
    }

    #[must_use]
    pub fn reply_error(id: u64, topic: impl Into<String>, response: Value) -> Self {
        Frame::Reply {
            id,
            topic: topic.into(),
            status: ReplyStatus::Error,
            response,
        }
    }

    #[must_use]
    pub fn broadcast(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Frame::Broadcast {
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    #[must_use]
    pub fn presence_state(topic: impl Into<String>, state: PresenceMap) -> Self {
        Frame::PresenceState {
            topic: topic.into(),
            state,
        }
    }

    #[must_use]
    pub fn presence_diff(topic: impl Into<String>, diff: PresenceDiff) -> Self {
        Frame::PresenceDiff {
            topic: topic.into(),
            diff,
        }
    }

    #[must_use]
    pub fn close(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Frame::Close {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn ping_with_timestamp(timestamp: u64) -> Self {
        Frame::Ping {
            timestamp: Some(timestamp),
        }
    }

    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
