//! The chat loop: join a room, print the roster and messages, send lines.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::io::Write;
use tether_client::{Channel, ChannelState, ClientError, ConnectionState, Socket};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metrics;
use crate::render;

/// Event carrying chat messages in both directions.
pub const NEW_MSG: &str = "new_msg";

/// Connect over WebSocket and chat on stdin/stdout until input ends.
///
/// # Errors
///
/// Returns an error if the connection or the join fails, or if the
/// connection is lost for good.
pub async fn run(config: &Config) -> Result<()> {
    let socket = Socket::connect_websocket(config.socket_config()?)
        .await
        .with_context(|| format!("Failed to connect to {}", config.endpoint))?;
    info!(endpoint = %config.endpoint, "Connected");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    chat(&socket, config, stdin, std::io::stdout()).await
}

/// Chat on `socket`, reading lines from `input` and printing to `out`.
///
/// Returns once `input` ends, after outstanding messages were acknowledged
/// and the room was left.
///
/// # Errors
///
/// Returns an error if the join fails, the room is lost, the connection is
/// lost for good, or `out` cannot be written.
pub async fn chat<R, W>(socket: &Socket, config: &Config, input: R, mut out: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let channel = socket.channel(config.topic.clone(), json!({}));

    // Subscribe before joining so nothing sent with the join is missed.
    let mut messages = if config.render.messages {
        Some(channel.on(NEW_MSG).await?)
    } else {
        None
    };
    let mut roster = if config.render.roster {
        Some(channel.presence().on_sync().await?)
    } else {
        None
    };

    match channel.join().await {
        Ok(response) => info!(topic = %channel.topic(), %response, "Joined successfully"),
        Err(e) => {
            error!(topic = %channel.topic(), error = %e, "Unable to join");
            return Err(e).with_context(|| format!("Failed to join {}", channel.topic()));
        }
    }

    let mut states = socket.state_changes();
    let mut room = channel.state_changes().await?;
    let mut lines = input.lines();
    let mut sends: JoinSet<Result<Value, ClientError>> = JoinSet::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            msg = next_from(&mut messages) => match msg {
                Some(msg) => print_message(&mut out, &msg)?,
                None => bail!("Channel {} closed", channel.topic()),
            },
            snapshot = next_from(&mut roster) => match snapshot {
                Some(snapshot) => print_roster(&mut out, &snapshot)?,
                None => bail!("Channel {} closed", channel.topic()),
            },
            state = room.next() => match state {
                // Closed by the server, or the rejoin after a reconnect was refused.
                Some(ChannelState::Errored) => bail!("Lost room {}", channel.topic()),
                Some(state) => debug!(topic = %channel.topic(), %state, "Room state changed"),
                None => bail!("Channel {} closed", channel.topic()),
            },
            Some(state) = states.next() => match state {
                ConnectionState::Failed => bail!("Gave up reconnecting to {}", config.endpoint),
                ConnectionState::Disconnected => bail!("Connection to {} lost", config.endpoint),
                ConnectionState::Connecting => warn!("Connection lost, reconnecting"),
                ConnectionState::Connected => debug!("Connected"),
            },
            Some(sent) = sends.join_next() => record_send(sent),
            line = lines.next_line() => match line.context("Failed to read input")? {
                Some(line) => send_line(&channel, &mut sends, &line),
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    while let Some(sent) = sends.join_next().await {
        record_send(sent);
    }

    if let Err(e) = channel.leave().await {
        warn!(topic = %channel.topic(), error = %e, "Leave not acknowledged");
    }

    // Leaving ends the streams; print whatever arrived before it.
    if let Some(messages) = messages.as_mut() {
        while let Some(msg) = messages.next().await {
            print_message(&mut out, &msg)?;
        }
    }
    if let Some(roster) = roster.as_mut() {
        let mut last = None;
        while let Some(snapshot) = roster.next().await {
            last = Some(snapshot);
        }
        if let Some(snapshot) = last {
            print_roster(&mut out, &snapshot)?;
        }
    }

    socket.disconnect().await;
    Ok(())
}

/// Next item of an optional stream; pending forever when there is none.
async fn next_from<S>(stream: &mut Option<S>) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn send_line(channel: &Channel, sends: &mut JoinSet<Result<Value, ClientError>>, line: &str) {
    let body = line.trim();
    if body.is_empty() {
        return;
    }
    sends.spawn(channel.push(NEW_MSG, json!({ "body": body })));
}

fn record_send(sent: Result<Result<Value, ClientError>, tokio::task::JoinError>) {
    match sent {
        Ok(Ok(_)) => metrics::record_sent("ok"),
        Ok(Err(e)) => {
            metrics::record_sent("error");
            warn!(error = %e, "Message not delivered");
        }
        Err(e) => {
            metrics::record_sent("error");
            warn!(error = %e, "Send task failed");
        }
    }
}

fn print_message(out: &mut impl Write, msg: &tether_client::Message) -> Result<()> {
    metrics::record_received();
    writeln!(out, "{}", render::message(msg))?;
    out.flush()?;
    Ok(())
}

fn print_roster(out: &mut impl Write, snapshot: &tether_client::PresenceSnapshot) -> Result<()> {
    metrics::record_roster();
    write!(out, "{}", render::roster(snapshot))?;
    out.flush()?;
    Ok(())
}
