//! Transport abstraction traits for Tether clients.
//!
//! A [`Transport`] knows how to open a duplex frame connection to an
//! [`Endpoint`]; the socket driver only ever talks to the resulting
//! [`Connection`].

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tether_protocol::{Frame, PROTOCOL_VERSION};
use thiserror::Error;
use url::Url;

/// Local identifier of a transport connection, used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", millis, seq))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    Timeout,

    /// The server refused the credentials during the handshake.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Where to connect, and with which credentials.
///
/// The token and extra params travel as URL query parameters, next to the
/// protocol version (`vsn`).
#[derive(Clone, PartialEq)]
pub struct Endpoint {
    url: Url,
    token: Option<String>,
    params: Vec<(String, String)>,
}

impl Endpoint {
    /// Parse an endpoint URL such as `ws://localhost:4000/socket`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEndpoint` if the URL cannot be parsed.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidEndpoint(format!("{url}: {e}")))?;
        Ok(Self {
            url,
            token: None,
            params: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// The URL as configured, without query parameters added.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The URL to dial: configured URL plus `vsn`, `token` and params.
    #[must_use]
    pub fn connect_url(&self) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("vsn", &PROTOCOL_VERSION.to_string());
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
        }
        url
    }
}

// Tokens never show up in logs.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Something that can open connections to an endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. The protocol handshake is left to the caller.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An open duplex frame connection.
#[async_trait]
pub trait Connection: Send {
    fn id(&self) -> &ConnectionId;

    /// Receive the next frame.
    ///
    /// Returns `None` once the peer closed the connection cleanly. Dropping
    /// the returned future before it completes loses no data.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn remote_addr(&self) -> Option<String> {
        None
    }

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connect_url_carries_token_and_version() {
        let endpoint = Endpoint::parse("ws://localhost:4000/socket")
            .unwrap()
            .with_token("s3cr3t token")
            .with_param("client", "cli");

        let url = endpoint.connect_url();
        assert_eq!(url.path(), "/socket");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            [
                ("vsn".to_string(), "1.0".to_string()),
                ("token".to_string(), "s3cr3t token".to_string()),
                ("client".to_string(), "cli".to_string()),
            ]
        );
        // The configured URL is untouched.
        assert_eq!(endpoint.url().query(), None);
    }

    #[test]
    fn test_endpoint_hides_token() {
        let endpoint = Endpoint::parse("ws://localhost/socket").unwrap().with_token("s3cr3t");
        assert!(!format!("{:?}", endpoint).contains("s3cr3t"));
        assert!(!endpoint.to_string().contains("s3cr3t"));
        assert_eq!(endpoint.token(), Some("s3cr3t"));
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            Endpoint::parse("not a url"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
