//! Session registry and broadcast fan-out.
//!
//! `Hub` holds the registry and the maze; `run_hub` owns it inside a single
//! task and applies `HubCommand`s one at a time, so membership and delivery
//! never interleave. Sessions talk to it through a cloneable `HubHandle`.
//!
//! The hub never waits on a session: frames are pushed with `try_send`, and a
//! session whose outbound queue is full is dropped from the registry. Dropping
//! the registry entry drops the only sender of that queue, which is what stops
//! the session's outbound pump.

use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use labyrinth_shared::maze::Maze;
use labyrinth_shared::protocol::{
    Player, PlayerId, PlayerJoinMsg, PlayerQuitMsg, ServerMsg, SyncWorldMsg, UpdateMsg,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::config::ServerConfig;
use crate::maze::{generate_maze, MazeError};

/// One encoded server message as queued for a session.
pub type Frame = Utf8Bytes;

/// Requests from sessions to the hub task
pub enum HubCommand {
    Register {
        name: String,
        color: String,
        outbound: mpsc::Sender<Frame>,
        response: oneshot::Sender<Player>,
    },
    Unregister {
        id: PlayerId,
    },
    Broadcast {
        message: ServerMsg,
        except: Option<PlayerId>,
    },
    PlayerMoved {
        player: Player,
    },
    SyncWorld {
        id: PlayerId,
    },
}

struct Member {
    outbound: mpsc::Sender<Frame>,
    /// Latest state reported by the owning session.
    player: Player,
}

pub struct Hub {
    maze: Maze,
    members: HashMap<PlayerId, Member>,
    next_player_id: PlayerId,
}

impl Hub {
    /// Generate the maze and build an empty hub.
    pub fn new(config: &ServerConfig) -> Result<Self, MazeError> {
        let mut rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let maze = generate_maze(config.maze_width, config.maze_height, &mut rng)?;
        Ok(Self::with_maze(maze))
    }

    pub fn with_maze(maze: Maze) -> Self {
        Self {
            maze,
            members: HashMap::new(),
            next_player_id: 1,
        }
    }

    pub fn maze(&self) -> &Maze {
        &self.maze
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.members.contains_key(&id)
    }

    /// Add a session and announce its player to everyone already present.
    pub fn register(
        &mut self,
        name: String,
        color: String,
        outbound: mpsc::Sender<Frame>,
    ) -> Player {
        let id = self.next_player_id;
        self.next_player_id += 1;

        let player = Player::new(id, name, color);
        self.broadcast(
            &ServerMsg::PlayerJoin(PlayerJoinMsg {
                player: player.clone(),
            }),
            None,
        );
        self.members.insert(
            id,
            Member {
                outbound,
                player: player.clone(),
            },
        );
        tracing::info!(
            player_id = id,
            name = %player.name,
            online = self.members.len(),
            "Player registered"
        );
        player
    }

    /// Remove a session and close its outbound queue. Returns false if it was
    /// not registered.
    pub fn unregister(&mut self, id: PlayerId) -> bool {
        let removed = self.members.remove(&id).is_some();
        if removed {
            tracing::info!(player_id = id, online = self.members.len(), "Player unregistered");
        }
        removed
    }

    /// Queue `message` for every session except `except`, evicting sessions
    /// that cannot take it.
    pub fn broadcast(&mut self, message: &ServerMsg, except: Option<PlayerId>) {
        let Some(frame) = encode(message) else {
            return;
        };
        self.members.retain(|&id, member| {
            if except == Some(id) {
                return true;
            }
            deliver(id, member, frame.clone())
        });
    }

    /// Record the new state of `player` and send it to everyone else.
    pub fn player_moved(&mut self, player: Player) {
        let id = player.id;
        let Some(member) = self.members.get_mut(&id) else {
            return;
        };
        member.player = player.clone();
        self.broadcast(
            &ServerMsg::Update(UpdateMsg {
                players: vec![player],
            }),
            Some(id),
        );
    }

    /// Send the maze and the other players to `id` only.
    pub fn sync_world(&mut self, id: PlayerId) {
        let Some(member) = self.members.get(&id) else {
            return;
        };

        let mut players: Vec<Player> = self
            .members
            .iter()
            .filter(|(other, _)| **other != id)
            .map(|(_, m)| m.player.clone())
            .collect();
        players.sort_by_key(|p| p.id);

        let message = ServerMsg::SyncWorld(SyncWorldMsg {
            players,
            grid: self.maze.clone(),
        });
        let Some(frame) = encode(&message) else {
            return;
        };
        if !deliver(id, member, frame) {
            self.members.remove(&id);
        }
    }
}

fn encode(message: &ServerMsg) -> Option<Frame> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server message");
            None
        }
    }
}

/// Push one frame without waiting. False means the member must be dropped.
fn deliver(id: PlayerId, member: &Member, frame: Frame) -> bool {
    match member.outbound.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                player_id = id,
                "Outbound queue full, disconnecting unresponsive player"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(player_id = id, "Outbound queue already closed");
            false
        }
    }
}

/// Run the hub. Owns all registry state until every handle is dropped.
pub async fn run_hub(mut cmd_rx: mpsc::Receiver<HubCommand>, mut hub: Hub) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            HubCommand::Register {
                name,
                color,
                outbound,
                response,
            } => {
                let player = hub.register(name, color, outbound);
                if let Err(player) = response.send(player) {
                    // The connection went away before it learned its id.
                    hub.unregister(player.id);
                    hub.broadcast(&ServerMsg::PlayerQuit(PlayerQuitMsg { player }), None);
                }
            }
            HubCommand::Unregister { id } => {
                hub.unregister(id);
            }
            HubCommand::Broadcast { message, except } => {
                hub.broadcast(&message, except);
            }
            HubCommand::PlayerMoved { player } => {
                hub.player_moved(player);
            }
            HubCommand::SyncWorld { id } => {
                hub.sync_world(id);
            }
        }
    }

    tracing::info!("Hub loop ended");
}

/// Spawn `run_hub` on the current runtime.
pub fn spawn_hub(hub: Hub, capacity: usize) -> HubHandle {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(run_hub(rx, hub));
    HubHandle::new(tx)
}

/// Cloneable sender side of the hub loop.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub fn new(tx: mpsc::Sender<HubCommand>) -> Self {
        Self { tx }
    }

    /// Register a session. `None` if the hub has stopped.
    pub async fn register(
        &self,
        name: String,
        color: String,
        outbound: mpsc::Sender<Frame>,
    ) -> Option<Player> {
        let (response, response_rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Register {
                name,
                color,
                outbound,
                response,
            })
            .await
            .ok()?;
        response_rx.await.ok()
    }

    pub async fn unregister(&self, id: PlayerId) {
        self.send(HubCommand::Unregister { id }).await;
    }

    pub async fn broadcast(&self, message: ServerMsg, except: Option<PlayerId>) {
        self.send(HubCommand::Broadcast { message, except }).await;
    }

    pub async fn player_moved(&self, player: Player) {
        self.send(HubCommand::PlayerMoved { player }).await;
    }

    pub async fn sync_world(&self, id: PlayerId) {
        self.send(HubCommand::SyncWorld { id }).await;
    }

    async fn send(&self, cmd: HubCommand) {
        if self.tx.send(cmd).await.is_err() {
            tracing::debug!("Hub loop is gone, dropping command");
        }
    }
}
