//! Codec for encoding and decoding Tether frames.
//!
//! Frames travel as a 4-byte big-endian length prefix followed by a
//! MessagePack body. A transport message may carry several frames, or a
//! frame may be split across transport messages; [`FrameCodec::decode_from`]
//! handles both by consuming a growing buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Default maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the size limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Structurally valid frame that makes no sense in context.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a frame with the default size limit.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    FrameCodec::default().encode(frame)
}

/// Decode exactly one frame from the start of `data` with the default limit.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    FrameCodec::default().decode(data)
}

/// Length-prefixed MessagePack codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that refuses frames larger than `max_frame_size`.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Encode a frame to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_into(frame, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append an encoded frame to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or encoding fails.
    pub fn encode_into(&self, frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = rmp_serde::to_vec_named(frame)?;
        self.check_size(body.len())?;

        buf.reserve(LENGTH_PREFIX_SIZE + body.len());
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);
        Ok(())
    }

    /// Decode one frame from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is incomplete, too large, or invalid.
    pub fn decode(&self, data: &[u8]) -> Result<Frame, ProtocolError> {
        let Some(length) = self.peek_length(data)? else {
            return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
        };

        let total = LENGTH_PREFIX_SIZE + length;
        if data.len() < total {
            return Err(ProtocolError::Incomplete(total - data.len()));
        }

        Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total])?)
    }

    /// Try to decode a frame from a buffer, advancing it if successful.
    ///
    /// Returns `Ok(None)` when more data is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or invalid. The buffer is
    /// left untouched on size errors and advanced past the frame on decode
    /// errors.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let Some(length) = self.peek_length(buf)? else {
            return Ok(None);
        };

        if buf.len() < LENGTH_PREFIX_SIZE + length {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let body = buf.split_to(length);
        Ok(Some(rmp_serde::from_slice(&body)?))
    }

    fn peek_length(&self, data: &[u8]) -> Result<Option<usize>, ProtocolError> {
        if data.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        self.check_size(length)?;
        Ok(Some(length))
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{Meta, PresenceDiff, PresenceEntry, PresenceMap};
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut state = PresenceMap::new();
        state.insert(
            "42".to_string(),
            PresenceEntry::new(vec![Meta::new("a", json!({"email": "ann@example.com"}))]),
        );

        let frames = vec![
            Frame::connect(1, Some("token123".to_string())),
            Frame::join(1, "room:lobby", json!({})),
            Frame::push(2, "room:lobby", "new_msg", json!({"body": "hi"})),
            Frame::reply_error(2, "room:lobby", json!({"reason": "unauthorized"})),
            Frame::presence_state("room:lobby", state),
            Frame::presence_diff(
                "room:lobby",
                PresenceDiff::default().leave("42", Meta::new("a", json!({}))),
            ),
            Frame::pong(Some(17)),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            assert_eq!(decode(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::leave(1, "room:lobby")).unwrap();

        match decode(&encoded[..2]) {
            Err(ProtocolError::Incomplete(2)) => {}
            other => panic!("Expected Incomplete(2), got {:?}", other),
        }
        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(n)) => assert_eq!(n, encoded.len() - 5),
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let codec = FrameCodec::with_max_frame_size(32);
        let frame = Frame::broadcast("room:lobby", "new_msg", json!({"body": "x".repeat(64)}));

        match codec.encode(&frame) {
            Err(ProtocolError::FrameTooLarge { max: 32, .. }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }

        // A peer announcing an oversized frame is refused before buffering it.
        let mut buf = BytesMut::from(&[0u8, 0, 1, 0][..]);
        assert!(matches!(
            codec.decode_from(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: 256, max: 32 })
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let codec = FrameCodec::new();
        let first = Frame::join(1, "room:lobby", json!({}));
        let second = Frame::broadcast("room:lobby", "new_msg", json!({"body": "hi"}));

        let mut wire = BytesMut::new();
        codec.encode_into(&first, &mut wire).unwrap();
        codec.encode_into(&second, &mut wire).unwrap();

        // Feed the bytes in two uneven chunks.
        let split = wire.len() / 3;
        let mut buf = BytesMut::from(&wire[..split]);
        assert_eq!(codec.decode_from(&mut buf).unwrap(), None);

        buf.extend_from_slice(&wire[split..]);
        assert_eq!(codec.decode_from(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode_from(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }
}
