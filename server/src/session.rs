//! One client connection: an inbound pump and an outbound pump.
//!
//! The inbound pump runs on the upgrade task and is the only reader of the
//! socket. The outbound pump is spawned and is the only writer; it drains the
//! session's bounded queue, whose sole sender lives in the hub. The two pumps
//! share nothing else: the writer stops when the hub closes the queue, and the
//! reader notices the writer stopping through its `JoinHandle`.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use labyrinth_shared::protocol::{
    ChatMessageMsg, ClientMsg, DecodeError, Player, PlayerQuitMsg, ServerMsg,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::hub::{Frame, HubHandle};

/// Per-connection limits, copied out of `ServerConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub send_queue_capacity: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            send_queue_capacity: config.send_queue_capacity,
            ping_interval: config.ping_interval,
            pong_timeout: config.pong_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// Why the inbound pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    Closed,
    Failed,
    TimedOut,
    WriterStopped,
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write timed out")]
    Timeout,
    #[error(transparent)]
    Socket(#[from] axum::Error),
}

/// Register a player for `socket` and pump messages until either side ends.
pub async fn run_session(
    socket: WebSocket,
    name: String,
    color: String,
    hub: HubHandle,
    config: SessionConfig,
) {
    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(config.send_queue_capacity);
    let Some(mut player) = hub.register(name, color, outbound_tx).await else {
        tracing::error!("Hub unavailable, dropping connection");
        return;
    };
    let id = player.id;
    tracing::info!(player_id = id, "Player connected");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(sink, outbound_rx, config));

    let end = read_pump(stream, &mut player, &hub, &mut writer, config).await;

    hub.broadcast(ServerMsg::PlayerQuit(PlayerQuitMsg { player }), Some(id))
        .await;
    hub.unregister(id).await;

    // The queue is closed now, so the writer sends a close frame and exits.
    if end != ReadEnd::WriterStopped {
        let _ = writer.await;
    }
    tracing::info!(player_id = id, reason = ?end, "Player disconnected");
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    player: &mut Player,
    hub: &HubHandle,
    writer: &mut JoinHandle<()>,
    config: SessionConfig,
) -> ReadEnd {
    let mut deadline = Instant::now() + config.pong_timeout;
    loop {
        tokio::select! {
            frame = timeout_at(deadline, stream.next()) => {
                let message = match frame {
                    Err(_) => return ReadEnd::TimedOut,
                    Ok(None) => return ReadEnd::Closed,
                    Ok(Some(Err(e))) => {
                        tracing::debug!(player_id = player.id, error = %e, "Read failed");
                        return ReadEnd::Failed;
                    }
                    Ok(Some(Ok(message))) => message,
                };

                // Any traffic, pongs included, proves the peer is alive.
                deadline = Instant::now() + config.pong_timeout;

                match message {
                    Message::Text(text) => dispatch(text.as_str().as_bytes(), player, hub).await,
                    Message::Binary(data) => dispatch(&data, player, hub).await,
                    Message::Close(_) => return ReadEnd::Closed,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }

            _ = &mut *writer => return ReadEnd::WriterStopped,
        }
    }
}

async fn dispatch(bytes: &[u8], player: &mut Player, hub: &HubHandle) {
    match ClientMsg::decode(bytes) {
        Ok(ClientMsg::MovePlayer(mv)) => {
            player.apply_move(mv);
            hub.player_moved(player.clone()).await;
        }
        Ok(ClientMsg::SyncWorld) => {
            hub.sync_world(player.id).await;
        }
        Ok(ClientMsg::ChatMessage(chat)) => {
            let message = ServerMsg::ChatMessage(ChatMessageMsg {
                player: player.clone(),
                message: chat.message,
            });
            hub.broadcast(message, None).await;
        }
        Err(DecodeError::UnknownEvent(name)) => {
            tracing::trace!(player_id = player.id, event = %name, "Ignoring unknown event");
        }
        Err(e) => {
            tracing::warn!(player_id = player.id, error = %e, "Dropping undecodable message");
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    config: SessionConfig,
) {
    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // The hub closed the queue.
                    let _ = send(&mut sink, Message::Close(None), config.write_timeout).await;
                    break;
                };
                let frame = coalesce(frame, &mut outbound, config.send_queue_capacity);
                if let Err(e) = send(&mut sink, Message::Text(frame), config.write_timeout).await {
                    tracing::debug!(error = %e, "Write failed");
                    break;
                }
            }

            _ = ping.tick() => {
                let ping_frame = Message::Ping(Bytes::new());
                if let Err(e) = send(&mut sink, ping_frame, config.write_timeout).await {
                    tracing::debug!(error = %e, "Ping failed");
                    break;
                }
            }
        }
    }

    let _ = timeout(config.write_timeout, sink.close()).await;
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_timeout: Duration,
) -> Result<(), WriteError> {
    timeout(write_timeout, sink.send(message))
        .await
        .map_err(|_| WriteError::Timeout)??;
    Ok(())
}

/// Append frames that are already waiting to `first`, one per line, up to
/// `limit` frames in total.
fn coalesce(first: Frame, outbound: &mut mpsc::Receiver<Frame>, limit: usize) -> Frame {
    if limit < 2 {
        return first;
    }
    let Ok(next) = outbound.try_recv() else {
        return first;
    };

    let mut batch = String::with_capacity(first.as_str().len() + next.as_str().len() + 1);
    batch.push_str(first.as_str());
    batch.push('\n');
    batch.push_str(next.as_str());
    for _ in 2..limit {
        match outbound.try_recv() {
            Ok(frame) => {
                batch.push('\n');
                batch.push_str(frame.as_str());
            }
            Err(_) => break,
        }
    }
    batch.into()
}
