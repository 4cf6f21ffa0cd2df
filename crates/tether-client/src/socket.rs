//! Connection manager.
//!
//! A [`Socket`] is a handle to one driver task. The driver owns the
//! transport connection, the channel router and every pending request, and
//! handles one input at a time: a command from a handle, an inbound frame,
//! a heartbeat tick, a reply deadline or a reconnect step. Handles only ever
//! talk to it through the command queue.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tether_core::message::now_millis;
use tether_core::{
    ChannelState, Message, PresenceEvent, PresenceSnapshot, PushAdmission, Ref, RefGenerator,
    Router, RouterStats,
};
use tether_protocol::{codes, Frame, ReplyStatus, PROTOCOL_VERSION};
use tether_transport::{Connection, Endpoint, Transport, TransportError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, trace, warn};

use crate::channel::Channel;
use crate::config::SocketConfig;
use crate::error::{duplicate, ClientError};
use crate::metrics;
use crate::pending::{PendingReplies, RequestKind, Waiter};
use crate::reconnect::Backoff;

/// Lifecycle of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Closed by the user or lost without a reconnect policy.
    Disconnected,
    /// Waiting for, or in the middle of, a reconnect attempt.
    Connecting,
    Connected,
    /// Reconnecting was refused by the server or gave up.
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// Requests from handles to the driver.
pub(crate) enum Command {
    Join {
        topic: String,
        params: Value,
        reply: Waiter,
    },
    Leave {
        topic: String,
        reply: Waiter,
    },
    Push {
        topic: String,
        event: String,
        payload: Value,
        reply: Waiter,
    },
    Subscribe {
        topic: String,
        params: Value,
        event: String,
        reply: Reply<mpsc::UnboundedReceiver<Message>>,
    },
    SubscribeSync {
        topic: String,
        params: Value,
        reply: Reply<mpsc::UnboundedReceiver<Arc<PresenceSnapshot>>>,
    },
    SubscribePresence {
        topic: String,
        params: Value,
        reply: Reply<mpsc::UnboundedReceiver<PresenceEvent>>,
    },
    Snapshot {
        topic: String,
        reply: oneshot::Sender<PresenceSnapshot>,
    },
    State {
        topic: String,
        reply: oneshot::Sender<ChannelState>,
    },
    WatchState {
        topic: String,
        params: Value,
        reply: Reply<watch::Receiver<ChannelState>>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Sending side of the command queue, shared by every handle.
#[derive(Debug, Clone)]
pub(crate) struct Commands {
    tx: mpsc::UnboundedSender<Command>,
}

impl Commands {
    /// Queue a command now. The receiver fails if the driver is gone.
    pub fn send<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> oneshot::Receiver<T> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).is_err() {
            trace!("Socket driver is gone");
        }
        rx
    }

    /// Queue a command and wait for the driver's answer.
    pub async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ClientError> {
        self.send(make).await.map_err(|_| ClientError::ChannelClosed)
    }
}

/// Wait for the outcome of a join, push or leave.
pub(crate) async fn settle(rx: oneshot::Receiver<Result<Value, ClientError>>) -> Result<Value, ClientError> {
    rx.await.unwrap_or(Err(ClientError::ChannelClosed))
}

/// Handle to a connected socket.
///
/// Cloning is cheap; every clone drives the same connection. The socket
/// shuts down on [`Socket::disconnect`] or once every socket and channel
/// handle is dropped.
#[derive(Debug, Clone)]
pub struct Socket {
    commands: Commands,
    state: watch::Receiver<ConnectionState>,
    config: Arc<SocketConfig>,
}

impl Socket {
    /// Open the transport, perform the handshake and start the driver.
    ///
    /// The first connection is never retried; the reconnect policy only
    /// applies once the socket was connected.
    ///
    /// # Errors
    ///
    /// `Auth` if the token is refused, `Timeout` if the handshake takes
    /// longer than `connect_timeout`, `Transport` if the endpoint cannot be
    /// reached, `Protocol` on a version mismatch.
    pub async fn connect(config: SocketConfig, transport: Arc<dyn Transport>) -> Result<Self, ClientError> {
        let endpoint = config.endpoint()?;
        let config = Arc::new(config);
        info!(endpoint = %endpoint, transport = transport.name(), "Connecting socket");

        let established = establish(transport.clone(), endpoint.clone(), config.clone()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let driver = Driver::new(config.clone(), transport, endpoint, rx, state_tx, established);
        tokio::spawn(driver.run());

        Ok(Self {
            commands: Commands { tx },
            state: state_rx,
            config,
        })
    }

    /// Connect over WebSocket.
    ///
    /// # Errors
    ///
    /// See [`Socket::connect`].
    pub async fn connect_websocket(config: SocketConfig) -> Result<Self, ClientError> {
        let transport = tether_transport::WebSocketTransport::new(tether_transport::WebSocketConfig {
            connect_timeout: config.connect_timeout,
            ..Default::default()
        });
        Self::connect(config, Arc::new(transport)).await
    }

    /// A handle for `topic`. Nothing is sent until [`Channel::join`].
    #[must_use]
    pub fn channel(&self, topic: impl Into<String>, params: Value) -> Channel {
        Channel::new(topic.into(), params, self.commands.clone())
    }

    /// Create a channel handle and join it.
    ///
    /// # Errors
    ///
    /// See [`Channel::join`].
    pub async fn join(&self, topic: impl Into<String>, params: Value) -> Result<Channel, ClientError> {
        let channel = self.channel(topic, params);
        channel.join().await?;
        Ok(channel)
    }

    /// Close the connection.
    ///
    /// Pending requests fail with `Transport`; later requests on any handle
    /// fail with `ChannelClosed`.
    pub async fn disconnect(&self) {
        // Already gone is fine.
        let _ = self.commands.call(|reply| Command::Disconnect { reply }).await;
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Current state followed by every change.
    #[must_use]
    pub fn state_changes(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.state.clone())
    }

    /// Channel and roster counts.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the socket is closed.
    pub async fn stats(&self) -> Result<RouterStats, ClientError> {
        self.commands.call(|reply| Command::Stats { reply }).await
    }

    #[must_use]
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

/// A connection that completed the handshake.
struct Established {
    conn: Box<dyn Connection>,
    connection_id: String,
    heartbeat: Duration,
}

async fn establish(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    config: Arc<SocketConfig>,
) -> Result<Established, ClientError> {
    tokio::time::timeout(config.connect_timeout, handshake(transport.as_ref(), &endpoint, &config))
        .await
        .map_err(|_| ClientError::Timeout)?
}

async fn handshake(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    config: &SocketConfig,
) -> Result<Established, ClientError> {
    let mut conn = transport.connect(endpoint).await?;
    conn.send(Frame::connect(
        PROTOCOL_VERSION.major,
        endpoint.token().map(str::to_string),
    ))
    .await?;

    loop {
        let frame = conn.recv().await?.ok_or(TransportError::ConnectionClosed)?;
        match frame {
            Frame::Connected {
                connection_id,
                version,
                heartbeat,
            } => {
                if !PROTOCOL_VERSION.accepts_major(version) {
                    let _ = conn.close().await;
                    return Err(ClientError::Protocol(format!(
                        "server speaks protocol {version}.x, client {PROTOCOL_VERSION}"
                    )));
                }
                let heartbeat = if heartbeat == 0 {
                    config.heartbeat_interval
                } else {
                    Duration::from_millis(u64::from(heartbeat))
                };
                debug!(connection = %connection_id, heartbeat_ms = heartbeat.as_millis() as u64, "Handshake complete");
                return Ok(Established {
                    conn,
                    connection_id,
                    heartbeat,
                });
            }
            Frame::Error { code, message, .. } if code == codes::UNAUTHORIZED => {
                return Err(ClientError::Auth(message));
            }
            Frame::Error { code, message, .. } => {
                return Err(ClientError::Server { code, message });
            }
            Frame::Ping { timestamp } => conn.send(Frame::pong(timestamp)).await?,
            other => {
                return Err(ClientError::Protocol(format!(
                    "unexpected {:?} frame during handshake",
                    other.frame_type()
                )));
            }
        }
    }
}

async fn recv_frame(conn: &mut Option<Box<dyn Connection>>) -> Result<Option<Frame>, TransportError> {
    match conn {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn join_connecting(
    task: &mut Option<JoinHandle<Result<Established, ClientError>>>,
) -> Result<Established, ClientError> {
    match task {
        Some(handle) => handle
            .await
            .unwrap_or_else(|e| Err(ClientError::Protocol(format!("connect task failed: {e}")))),
        None => std::future::pending().await,
    }
}

fn join_reason(response: &Value) -> String {
    response
        .get("reason")
        .and_then(Value::as_str)
        .map_or_else(|| response.to_string(), str::to_string)
}

fn loss_reason(err: &TransportError) -> &'static str {
    match err {
        TransportError::ConnectionClosed => "closed",
        TransportError::Timeout => "heartbeat",
        _ => "error",
    }
}

enum Input {
    Command(Option<Command>),
    Frame(Result<Option<Frame>, TransportError>),
    Heartbeat,
    Deadline,
    Reconnect,
    Established(Result<Established, ClientError>),
}

struct Driver {
    config: Arc<SocketConfig>,
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    conn: Option<Box<dyn Connection>>,
    connection_id: String,
    router: Router,
    refs: RefGenerator,
    pending: PendingReplies,
    heartbeat_every: Duration,
    next_heartbeat: Option<Instant>,
    awaiting_pong: bool,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    connecting: Option<JoinHandle<Result<Established, ClientError>>>,
    stopped: bool,
}

impl Driver {
    fn new(
        config: Arc<SocketConfig>,
        transport: Arc<dyn Transport>,
        endpoint: Endpoint,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        established: Established,
    ) -> Self {
        let router = Router::with_config(config.router.clone());
        let mut driver = Self {
            config,
            transport,
            endpoint,
            commands,
            state,
            conn: None,
            connection_id: String::new(),
            router,
            refs: RefGenerator::new(),
            pending: PendingReplies::new(),
            heartbeat_every: Duration::ZERO,
            next_heartbeat: None,
            awaiting_pong: false,
            backoff: Backoff::new(),
            reconnect_at: None,
            connecting: None,
            stopped: false,
        };
        driver.install(established);
        driver
    }

    async fn run(mut self) {
        while !self.stopped {
            let input = tokio::select! {
                command = self.commands.recv() => Input::Command(command),
                frame = recv_frame(&mut self.conn) => Input::Frame(frame),
                () = wait_until(self.next_heartbeat) => Input::Heartbeat,
                () = wait_until(self.pending.next_deadline()) => Input::Deadline,
                () = wait_until(self.reconnect_at) => Input::Reconnect,
                result = join_connecting(&mut self.connecting) => Input::Established(result),
            };

            match input {
                Input::Command(Some(command)) => self.handle_command(command).await,
                Input::Command(None) => {
                    debug!("Every handle dropped");
                    self.shutdown(ConnectionState::Disconnected, || {
                        ClientError::Transport(TransportError::ConnectionClosed)
                    })
                    .await;
                }
                Input::Frame(Ok(Some(frame))) => self.handle_frame(frame).await,
                Input::Frame(Ok(None)) => self.connection_lost(TransportError::ConnectionClosed).await,
                Input::Frame(Err(e)) => self.connection_lost(e).await,
                Input::Heartbeat => self.heartbeat().await,
                Input::Deadline => self.expire(),
                Input::Reconnect => self.start_reconnect(),
                Input::Established(result) => {
                    self.connecting = None;
                    self.reconnected(result).await;
                }
            }
        }
        debug!(connection = %self.connection_id, "Socket driver stopped");
    }

    fn install(&mut self, established: Established) {
        info!(connection = %established.connection_id, "Socket connected");
        metrics::record_connection();
        self.conn = Some(established.conn);
        self.connection_id = established.connection_id;
        self.heartbeat_every = established.heartbeat;
        self.next_heartbeat = Some(Instant::now() + self.heartbeat_every);
        self.awaiting_pong = false;
    }

    fn set_state(&mut self, state: ConnectionState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            debug!(from = %prev, to = %state, "Socket state changed");
        }
    }

    fn update_joined_gauge(&self) {
        metrics::set_joined_channels(self.router.stats().joined_count);
    }

    // Commands

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { topic, params, reply } => self.join(topic, params, reply).await,
            Command::Leave { topic, reply } => self.leave(topic, reply).await,
            Command::Push {
                topic,
                event,
                payload,
                reply,
            } => self.push(topic, event, payload, reply).await,
            Command::Subscribe {
                topic,
                params,
                event,
                reply,
            } => {
                let result = self
                    .router
                    .register(&topic, params)
                    .map(|entry| entry.channel.subscribe(event))
                    .map_err(ClientError::from);
                let _ = reply.send(result);
            }
            Command::SubscribeSync { topic, params, reply } => {
                let result = self
                    .router
                    .register(&topic, params)
                    .map(|entry| entry.presence.subscribe_sync())
                    .map_err(ClientError::from);
                let _ = reply.send(result);
            }
            Command::SubscribePresence { topic, params, reply } => {
                let result = self
                    .router
                    .register(&topic, params)
                    .map(|entry| entry.presence.subscribe_events())
                    .map_err(ClientError::from);
                let _ = reply.send(result);
            }
            Command::Snapshot { topic, reply } => {
                let snapshot = self
                    .router
                    .get(&topic)
                    .map(|entry| entry.presence.snapshot().clone())
                    .unwrap_or_default();
                let _ = reply.send(snapshot);
            }
            Command::State { topic, reply } => {
                let _ = reply.send(self.router.state(&topic));
            }
            Command::WatchState { topic, params, reply } => {
                let result = self
                    .router
                    .register(&topic, params)
                    .map(|entry| entry.channel.watch_state())
                    .map_err(ClientError::from);
                let _ = reply.send(result);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.router.stats());
            }
            Command::Disconnect { reply } => {
                info!(connection = %self.connection_id, "Disconnecting");
                self.shutdown(ConnectionState::Disconnected, || {
                    ClientError::Transport(TransportError::ConnectionClosed)
                })
                .await;
                let _ = reply.send(());
            }
        }
    }

    async fn join(&mut self, topic: String, params: Value, reply: Waiter) {
        let id = self.refs.next_ref();
        let deadline = Instant::now() + self.config.timeout;

        let entry = match self.router.register(&topic, params.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        if let Err(e) = entry.channel.begin_join(id) {
            let _ = reply.send(Err(e.into()));
            return;
        }
        entry.presence.reset();
        info!(topic = %topic, join_ref = id, "Joining channel");

        let frame = Frame::join(id, &topic, params);
        if self.conn.is_some() {
            self.pending.insert(id, &topic, RequestKind::Join, deadline, Some(reply));
            self.send_or_lose(frame).await;
        } else {
            // Goes out once the transport is back.
            self.pending
                .insert_unsent(id, &topic, RequestKind::Join, deadline, Some(reply), frame);
        }
    }

    async fn leave(&mut self, topic: String, reply: Waiter) {
        let Some(mut entry) = self.router.remove(&topic) else {
            let _ = reply.send(Ok(Value::Null));
            return;
        };
        let was_member = entry.channel.state().is_member();
        entry.channel.mark_left();
        drop(entry);

        let failed = self.pending.fail_topic(&topic, || ClientError::ChannelClosed);
        info!(topic = %topic, failed, "Left channel");
        self.update_joined_gauge();

        if was_member && self.conn.is_some() {
            let id = self.refs.next_ref();
            let deadline = Instant::now() + self.config.timeout;
            self.pending.insert(id, &topic, RequestKind::Leave, deadline, Some(reply));
            self.send_or_lose(Frame::leave(id, &topic)).await;
        } else {
            let _ = reply.send(Ok(Value::Null));
        }
    }

    async fn push(&mut self, topic: String, event: String, payload: Value, reply: Waiter) {
        let admission = self
            .router
            .get(&topic)
            .map_or(PushAdmission::Reject, |entry| {
                entry.channel.admit_push(self.config.push_policy)
            });

        let id = self.refs.next_ref();
        let deadline = Instant::now() + self.config.timeout;
        let frame = Frame::push(id, &topic, event, payload);

        match admission {
            PushAdmission::Send => {
                self.pending.insert(id, &topic, RequestKind::Push, deadline, Some(reply));
                self.send_or_lose(frame).await;
            }
            PushAdmission::Buffer => {
                debug!(topic = %topic, push_ref = id, "Buffering push until joined");
                self.pending
                    .insert_unsent(id, &topic, RequestKind::Push, deadline, Some(reply), frame);
            }
            PushAdmission::Reject => {
                debug!(topic = %topic, state = %self.router.state(&topic), "Rejecting push on unjoined channel");
                metrics::record_push("rejected");
                let _ = reply.send(Err(ClientError::ChannelClosed));
            }
        }
    }

    // Frames

    async fn handle_frame(&mut self, frame: Frame) {
        metrics::record_frame("in");
        trace!(frame = ?frame.frame_type(), "Received frame");

        match frame {
            Frame::Reply {
                id,
                topic,
                status,
                response,
            } => self.reply(id, &topic, status, response).await,
            Frame::Broadcast {
                topic,
                event,
                payload,
            } => {
                let message = Message::new(topic, event, payload);
                self.router.dispatch(&message);
            }
            Frame::PresenceState { topic, state } => {
                if self.router.presence_state(&topic, state).is_some() {
                    metrics::record_presence("state");
                }
            }
            Frame::PresenceDiff { topic, diff } => {
                if self.router.presence_diff(&topic, diff).is_some() {
                    metrics::record_presence("diff");
                }
            }
            Frame::Close { topic, reason } => self.closed_by_server(&topic, &reason),
            Frame::Error { id, code, message } => self.server_error(id, code, message).await,
            Frame::Ping { timestamp } => {
                self.send_or_lose(Frame::pong(timestamp)).await;
            }
            Frame::Pong { .. } => self.awaiting_pong = false,
            other => warn!(frame = ?other.frame_type(), "Unexpected frame from server"),
        }
    }

    async fn reply(&mut self, id: Ref, topic: &str, status: ReplyStatus, response: Value) {
        let Some(request) = self.pending.take(id) else {
            trace!(topic = %topic, id, "Reply for unknown or expired request");
            return;
        };

        match (request.kind, status) {
            (RequestKind::Join, ReplyStatus::Ok) => {
                let joined = self
                    .router
                    .get_mut(&request.topic)
                    .is_some_and(|entry| entry.channel.mark_joined(id));
                if !joined {
                    request.resolve(Err(ClientError::ChannelClosed));
                    return;
                }
                info!(topic = %request.topic, "Joined channel");
                self.update_joined_gauge();
                let held = self.pending.release(RequestKind::Push, Some(&request.topic));
                request.resolve(Ok(response));
                for frame in held {
                    if !self.send_or_lose(frame).await {
                        break;
                    }
                }
            }
            (RequestKind::Join, ReplyStatus::Error) => {
                self.join_failed(id, &request.topic);
                let reason = join_reason(&response);
                warn!(topic = %request.topic, reason = %reason, "Join rejected");
                request.resolve(Err(ClientError::Join(reason)));
            }
            (RequestKind::Push, ReplyStatus::Ok) => {
                metrics::record_push("ok");
                request.resolve(Ok(response));
            }
            (RequestKind::Push, ReplyStatus::Error) => {
                metrics::record_push("error");
                request.resolve(Err(ClientError::Rejected(response)));
            }
            (RequestKind::Leave, ReplyStatus::Ok) => request.resolve(Ok(response)),
            (RequestKind::Leave, ReplyStatus::Error) => {
                request.resolve(Err(ClientError::Rejected(response)));
            }
        }
    }

    fn join_failed(&mut self, id: Ref, topic: &str) {
        if let Some(entry) = self.router.get_mut(topic) {
            if entry.channel.join_ref() == Some(id) && entry.channel.state() == ChannelState::Joining {
                entry.channel.mark_errored();
            }
        }
    }

    async fn server_error(&mut self, id: Ref, code: u16, message: String) {
        if id == 0 {
            error!(code, message = %message, "Connection error from server");
            if code == codes::UNAUTHORIZED {
                self.shutdown(ConnectionState::Failed, || ClientError::Auth(message.clone()))
                    .await;
            }
            return;
        }

        let Some(request) = self.pending.take(id) else {
            trace!(id, code, "Error for unknown or expired request");
            return;
        };
        match request.kind {
            RequestKind::Join => self.join_failed(id, &request.topic),
            RequestKind::Push => metrics::record_push("error"),
            RequestKind::Leave => {}
        }
        request.resolve(Err(ClientError::Server { code, message }));
    }

    fn closed_by_server(&mut self, topic: &str, reason: &str) {
        let Some(entry) = self.router.get_mut(topic) else {
            debug!(topic = %topic, "Close for unknown topic");
            return;
        };
        warn!(topic = %topic, reason = %reason, "Server closed channel");
        entry.channel.mark_errored();
        entry.presence.reset();
        self.pending.fail_topic(topic, || ClientError::ChannelClosed);
        self.update_joined_gauge();
    }

    // Timers

    async fn heartbeat(&mut self) {
        if self.awaiting_pong {
            warn!(connection = %self.connection_id, "Heartbeat timed out");
            self.connection_lost(TransportError::Timeout).await;
            return;
        }
        self.awaiting_pong = true;
        self.next_heartbeat = Some(Instant::now() + self.heartbeat_every);
        self.send_or_lose(Frame::ping_with_timestamp(now_millis())).await;
    }

    fn expire(&mut self) {
        for (id, request) in self.pending.expire(Instant::now()) {
            match request.kind {
                RequestKind::Join => {
                    warn!(topic = %request.topic, join_ref = id, "Join timed out");
                    self.join_failed(id, &request.topic);
                }
                RequestKind::Push => {
                    debug!(topic = %request.topic, push_ref = id, "Push timed out");
                    metrics::record_push("timeout");
                }
                RequestKind::Leave => debug!(topic = %request.topic, "Leave timed out"),
            }
            request.resolve(Err(ClientError::Timeout));
        }
    }

    // Transport

    /// Send a frame; a failed send counts as a lost connection.
    async fn send_or_lose(&mut self, frame: Frame) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        match conn.send(frame).await {
            Ok(()) => {
                metrics::record_frame("out");
                true
            }
            Err(e) => {
                self.connection_lost(e).await;
                false
            }
        }
    }

    async fn connection_lost(&mut self, err: TransportError) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let _ = conn.close().await;
        warn!(connection = %self.connection_id, error = %err, "Connection lost");
        metrics::record_disconnect(loss_reason(&err));

        self.next_heartbeat = None;
        self.awaiting_pong = false;

        let reconnect = self.config.reconnect.enabled;
        let rejoining = self.router.transport_lost(reconnect);
        let failed = self
            .pending
            .fail_all(|| ClientError::Transport(duplicate(&err)));
        debug!(failed, rejoining = rejoining.len(), "Pending requests failed");
        self.update_joined_gauge();

        if reconnect {
            self.schedule_reconnect();
        } else {
            self.set_state(ConnectionState::Disconnected);
            self.stopped = true;
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.backoff.may_retry(&self.config.reconnect) {
            error!(attempts = self.backoff.attempts(), "Giving up reconnecting");
            self.pending
                .fail_all(|| ClientError::Transport(TransportError::ConnectionClosed));
            self.set_state(ConnectionState::Failed);
            self.stopped = true;
            return;
        }
        let delay = self.backoff.next_delay();
        info!(
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_state(ConnectionState::Connecting);
    }

    fn start_reconnect(&mut self) {
        self.reconnect_at = None;
        metrics::record_reconnect_attempt();
        debug!(endpoint = %self.endpoint, attempt = self.backoff.attempts(), "Reconnecting");
        self.connecting = Some(tokio::spawn(establish(
            self.transport.clone(),
            self.endpoint.clone(),
            self.config.clone(),
        )));
    }

    async fn reconnected(&mut self, result: Result<Established, ClientError>) {
        match result {
            Ok(established) => {
                self.backoff.reset();
                self.install(established);
                self.set_state(ConnectionState::Connected);
                self.rejoin().await;
            }
            Err(ClientError::Auth(reason)) => {
                error!(reason = %reason, "Reconnect refused by server");
                self.shutdown(ConnectionState::Failed, || ClientError::Auth(reason.clone()))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "Reconnect failed");
                self.schedule_reconnect();
            }
        }
    }

    async fn rejoin(&mut self) {
        let deadline = Instant::now() + self.config.timeout;

        for (topic, params) in self.router.rejoin_candidates() {
            let id = self.refs.next_ref();
            let Some(entry) = self.router.get_mut(&topic) else {
                continue;
            };
            if entry.channel.begin_join(id).is_err() {
                continue;
            }
            entry.presence.reset();
            info!(topic = %topic, join_ref = id, "Rejoining channel");
            self.pending.insert(id, &topic, RequestKind::Join, deadline, None);
            if !self.send_or_lose(Frame::join(id, &topic, params)).await {
                return;
            }
        }

        // Joins requested while the transport was down.
        for frame in self.pending.release(RequestKind::Join, None) {
            if !self.send_or_lose(frame).await {
                return;
            }
        }
    }

    async fn shutdown(&mut self, state: ConnectionState, err: impl Fn() -> ClientError) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error closing connection");
            }
            metrics::record_disconnect("closed");
        }
        let failed = self.pending.fail_all(err);
        self.router.transport_lost(false);
        self.next_heartbeat = None;
        self.reconnect_at = None;
        self.set_state(state);
        self.stopped = true;
        info!(connection = %self.connection_id, state = %state, failed, "Socket closed");
        self.update_joined_gauge();
    }
}
