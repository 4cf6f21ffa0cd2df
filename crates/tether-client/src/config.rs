//! Socket configuration.

use std::time::Duration;
use tether_core::{PushPolicy, RouterConfig};
use tether_transport::{Endpoint, TransportError};

use crate::reconnect::ReconnectPolicy;

/// Configuration of one socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Endpoint URL, e.g. `ws://localhost:4000/socket`.
    pub endpoint: String,
    /// Bearer token sent in the URL and the `connect` frame.
    pub token: Option<String>,
    /// Extra query parameters for the endpoint URL.
    pub params: Vec<(String, String)>,
    /// How long a join, push or leave waits for its reply.
    pub timeout: Duration,
    /// How long opening the transport plus the handshake may take.
    pub connect_timeout: Duration,
    /// Heartbeat interval when the server does not recommend one.
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
    /// What to do with pushes made before a channel is joined.
    pub push_policy: PushPolicy,
    pub router: RouterConfig,
}

impl SocketConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            params: Vec::new(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            push_policy: PushPolicy::default(),
            router: RouterConfig::default(),
        }
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

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn with_push_policy(mut self, policy: PushPolicy) -> Self {
        self.push_policy = policy;
        self
    }

    /// Build the transport endpoint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEndpoint` if the URL does not parse.
    pub fn endpoint(&self) -> Result<Endpoint, TransportError> {
        let mut endpoint = Endpoint::parse(&self.endpoint)?;
        if let Some(token) = &self.token {
            endpoint = endpoint.with_token(token.clone());
        }
        for (key, value) in &self.params {
            endpoint = endpoint.with_param(key.clone(), value.clone());
        }
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SocketConfig::new("ws://localhost:4000/socket");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(!config.reconnect.enabled);
        assert_eq!(config.push_policy, PushPolicy::Buffer);
    }

    #[test]
    fn test_endpoint_carries_token() {
        let endpoint = SocketConfig::new("ws://localhost:4000/socket")
            .with_token("abc")
            .with_param("client", "cli")
            .endpoint()
            .unwrap();
        assert_eq!(endpoint.token(), Some("abc"));
        let query = endpoint.connect_url().query().unwrap_or_default().to_string();
        assert!(query.contains("token=abc"));
        assert!(query.contains("client=cli"));
    }

    #[test]
    fn test_bad_endpoint() {
        assert!(SocketConfig::new("::nope").endpoint().is_err());
    }
}
