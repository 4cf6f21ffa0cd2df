//! WebSocket client transport.
//!
//! Frames are sent as binary WebSocket messages. The read side buffers
//! partial frames, so a frame may span several messages and a message may
//! carry several frames.

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tether_protocol::{Frame, FrameCodec, ProtocolError};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::traits::{Connection, ConnectionId, Endpoint, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Time allowed for TCP connect plus the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64 KB
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens WebSocket connections.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "unsupported scheme '{other}' for websocket transport"
                )))
            }
        }

        let url = endpoint.connect_url();
        debug!(endpoint = %endpoint, "Opening WebSocket");

        let (stream, response) = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(map_handshake_error)?;

        info!(endpoint = %endpoint, status = %response.status(), "WebSocket connected");

        Ok(Box::new(WebSocketConnection::new(
            stream,
            self.config.max_message_size,
        )))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

fn map_handshake_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                TransportError::Unauthorized(format!("handshake rejected with {status}"))
            } else {
                TransportError::ConnectFailed(format!("handshake rejected with {status}"))
            }
        }
        WsError::Io(e) => TransportError::Io(e),
        WsError::Url(e) => TransportError::InvalidEndpoint(e.to_string()),
        other => {
            error!("WebSocket handshake failed: {}", other);
            TransportError::ConnectFailed(other.to_string())
        }
    }
}

/// A client WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WsStream,
    remote_addr: Option<String>,
    is_open: bool,
    read_buffer: BytesMut,
    codec: FrameCodec,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(stream: WsStream, max_message_size: usize) -> Self {
        let remote_addr = match stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok().map(|a| a.to_string()),
            _ => None,
        };
        Self {
            id: ConnectionId::generate(),
            stream,
            remote_addr,
            is_open: true,
            read_buffer: BytesMut::with_capacity(4096),
            // No frame can be larger than the largest message we accept.
            codec: FrameCodec::with_max_frame_size(max_message_size),
            max_message_size,
        }
    }

    fn buffer(&mut self, data: &[u8]) -> Result<Option<Frame>, TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                connection = %self.id,
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            );
            return Err(TransportError::Protocol(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: self.max_message_size,
            }));
        }
        self.read_buffer.extend_from_slice(data);
        Ok(self.codec.decode_from(&mut self.read_buffer)?)
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if let Some(frame) = self.codec.decode_from(&mut self.read_buffer)? {
            return Ok(Some(frame));
        }

        loop {
            // The only await point; buffering happens after it returns.
            let next = self.stream.next().await;
            match next {
                Some(Ok(Message::Binary(data))) => {
                    if let Some(frame) = self.buffer(&data)? {
                        return Ok(Some(frame));
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    // For compatibility, treat text as binary
                    if let Some(frame) = self.buffer(text.as_bytes())? {
                        return Ok(Some(frame));
                    }
                }
                // tungstenite queues pong replies on its own.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(close))) => {
                    debug!(connection = %self.id, ?close, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!(connection = %self.id, "Connection closed");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(connection = %self.id, "WebSocket error: {}", e);
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let data = self.codec.encode(&frame)?;
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Other(format!("Failed to close: {}", e))),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
