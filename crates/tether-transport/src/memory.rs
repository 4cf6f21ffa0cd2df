//! In-process transport.
//!
//! Each `connect` hands a [`MemoryPeer`] to the matching [`MemoryListener`],
//! which plays the server side. Frames still pass through the codec, so
//! anything that crosses a memory connection would also cross the wire.

use async_trait::async_trait;
use bytes::Bytes;
use tether_protocol::{Frame, FrameCodec};
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, Endpoint, Transport, TransportError};

/// Create a connected transport/listener pair.
#[must_use]
pub fn memory_transport() -> (MemoryTransport, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryTransport { acceptor: tx }, MemoryListener { incoming: rx })
}

/// Client side: opens connections to a [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    acceptor: mpsc::UnboundedSender<MemoryPeer>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            to_client: Some(to_client),
            from_client,
            codec: FrameCodec::new(),
        };
        self.acceptor
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("connection refused".into()))?;

        let conn = MemoryConnection {
            id: ConnectionId::generate(),
            to_server: Some(to_server),
            from_server,
            codec: FrameCodec::new(),
        };
        debug!(connection = %conn.id, endpoint = %endpoint, "Memory connection opened");
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Server side: yields one [`MemoryPeer`] per client connect.
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next client. Returns `None` once every transport is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

/// The server end of a memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    endpoint: Endpoint,
    to_client: Option<mpsc::UnboundedSender<Bytes>>,
    from_client: mpsc::UnboundedReceiver<Bytes>,
    codec: FrameCodec,
}

impl MemoryPeer {
    /// The endpoint the client dialed, including its token.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is gone or the peer was closed.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let data = self.codec.encode(&frame)?;
        self.to_client
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(data)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next frame from the client, `None` once it closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the client sent an undecodable frame.
    pub async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.from_client.recv().await {
            Some(data) => Ok(Some(self.codec.decode(&data)?)),
            None => Ok(None),
        }
    }

    /// Drop the connection from the server side.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

/// The client end of a memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    to_server: Option<mpsc::UnboundedSender<Bytes>>,
    from_server: mpsc::UnboundedReceiver<Bytes>,
    codec: FrameCodec,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.from_server.recv().await {
            Some(data) => Ok(Some(self.codec.decode(&data)?)),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let data = self.codec.encode(&frame)?;
        self.to_server
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(data)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.to_server = None;
        self.from_server.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.to_server.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_cross_both_ways() {
        let (transport, mut listener) = memory_transport();
        let endpoint = Endpoint::parse("memory://test/socket").unwrap().with_token("abc");

        let mut conn = transport.connect(&endpoint).await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.endpoint().token(), Some("abc"));

        conn.send(Frame::join(1, "room:lobby", json!({}))).await.unwrap();
        assert_eq!(
            peer.recv().await.unwrap(),
            Some(Frame::join(1, "room:lobby", json!({})))
        );

        peer.send(Frame::reply_ok(1, "room:lobby", json!({}))).unwrap();
        assert_eq!(
            conn.recv().await.unwrap(),
            Some(Frame::reply_ok(1, "room:lobby", json!({})))
        );
    }

    #[tokio::test]
    async fn test_close_from_either_side() {
        let (transport, mut listener) = memory_transport();
        let endpoint = Endpoint::parse("memory://test").unwrap();

        let mut conn = transport.connect(&endpoint).await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        peer.close();
        assert_eq!(conn.recv().await.unwrap(), None);

        conn.close().await.unwrap();
        assert!(!conn.is_open());
        assert_eq!(peer.recv().await.unwrap(), None);
        assert!(matches!(
            conn.send(Frame::pong(None)).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_refused_without_listener() {
        let (transport, listener) = memory_transport();
        drop(listener);

        let endpoint = Endpoint::parse("memory://test").unwrap();
        assert!(matches!(
            transport.connect(&endpoint).await,
            Err(TransportError::ConnectFailed(_))
        ));
    }
}
