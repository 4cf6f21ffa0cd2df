//! Client errors.

use serde_json::Value;
use tether_core::RouterError;
use tether_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by sockets, channels and presence handles.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server refused the token.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// The server refused the join; carries the reason it gave.
    #[error("Join rejected: {0}")]
    Join(String),

    #[error("Timed out waiting for a reply")]
    Timeout,

    /// The channel was left or closed, or the socket is gone.
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Already joined topic: {0}")]
    AlreadyJoined(String),

    /// The server answered a push with an error reply.
    #[error("Push rejected: {0}")]
    Rejected(Value),

    /// An `error` frame answered the request.
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized(reason) => ClientError::Auth(reason),
            other => ClientError::Transport(other),
        }
    }
}

impl From<RouterError> for ClientError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::InvalidTopic(reason) => ClientError::InvalidTopic(reason.to_string()),
            RouterError::AlreadyJoined(topic) => ClientError::AlreadyJoined(topic),
            other @ (RouterError::InvalidTransition { .. } | RouterError::MaxChannelsReached) => {
                ClientError::Join(other.to_string())
            }
        }
    }
}

/// Copy a transport error so every pending request can get its own.
pub(crate) fn duplicate(err: &TransportError) -> TransportError {
    match err {
        TransportError::ConnectionClosed => TransportError::ConnectionClosed,
        TransportError::Timeout => TransportError::Timeout,
        TransportError::Unauthorized(s) => TransportError::Unauthorized(s.clone()),
        TransportError::InvalidEndpoint(s) => TransportError::InvalidEndpoint(s.clone()),
        TransportError::ConnectFailed(s) => TransportError::ConnectFailed(s.clone()),
        TransportError::SendFailed(s) => TransportError::SendFailed(s.clone()),
        TransportError::ReceiveFailed(s) => TransportError::ReceiveFailed(s.clone()),
        TransportError::Protocol(e) => TransportError::Other(e.to_string()),
        TransportError::Io(e) => TransportError::Io(std::io::Error::new(e.kind(), e.to_string())),
        TransportError::Other(s) => TransportError::Other(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_transport_is_auth() {
        let err: ClientError = TransportError::Unauthorized("bad token".into()).into();
        assert!(matches!(err, ClientError::Auth(ref r) if r == "bad token"));

        let err: ClientError = TransportError::ConnectionClosed.into();
        assert!(matches!(err, ClientError::Transport(TransportError::ConnectionClosed)));
    }

    #[test]
    fn test_router_errors() {
        let err: ClientError = RouterError::InvalidTopic("Topic cannot be empty").into();
        assert!(matches!(err, ClientError::InvalidTopic(_)));

        let err: ClientError = RouterError::AlreadyJoined("room:lobby".into()).into();
        assert!(matches!(err, ClientError::AlreadyJoined(ref t) if t == "room:lobby"));

        let err: ClientError = RouterError::MaxChannelsReached.into();
        assert!(matches!(err, ClientError::Join(_)));
    }

    #[test]
    fn test_duplicate_keeps_kind() {
        let io = TransportError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        match duplicate(&io) {
            TransportError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(duplicate(&TransportError::Timeout), TransportError::Timeout));
    }
}
