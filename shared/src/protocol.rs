use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::maze::Maze;
use crate::vec3::Vector3;

/// Session identity. Assigned by the hub on join, never reused within a run.
pub type PlayerId = u32;

/// Animation every player starts with.
pub const IDLE_ANIMATION: &str = "Idle";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
    pub position: Vector3,
    pub rotation: Vector3,
    pub current_animation: String,
}

impl Player {
    pub fn new(id: PlayerId, name: String, color: String) -> Self {
        Self {
            id,
            name,
            color,
            position: Vector3::ZERO,
            rotation: Vector3::ZERO,
            current_animation: IDLE_ANIMATION.to_string(),
        }
    }

    /// Apply a client-reported move. Last write wins.
    pub fn apply_move(&mut self, mv: MovePlayerMsg) {
        self.position = mv.position;
        self.rotation = mv.rotation;
        self.current_animation = mv.current_animation;
    }
}

// === Server -> Client ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(tag = "name", content = "data")]
pub enum ServerMsg {
    #[serde(rename = "playerJoin")]
    PlayerJoin(PlayerJoinMsg),
    #[serde(rename = "playerQuit")]
    PlayerQuit(PlayerQuitMsg),
    #[serde(rename = "update")]
    Update(UpdateMsg),
    #[serde(rename = "syncWorld")]
    SyncWorld(SyncWorldMsg),
    #[serde(rename = "chatMessage")]
    ChatMessage(ChatMessageMsg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
pub struct PlayerJoinMsg {
    pub player: Player,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
pub struct PlayerQuitMsg {
    pub player: Player,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
pub struct UpdateMsg {
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
pub struct SyncWorldMsg {
    pub players: Vec<Player>,
    #[ts(type = "Array<Array<number>>")]
    pub grid: Maze,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
pub struct ChatMessageMsg {
    pub player: Player,
    pub message: String,
}

// === Client -> Server ===

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(tag = "name", content = "data")]
pub enum ClientMsg {
    #[serde(rename = "movePlayer")]
    MovePlayer(MovePlayerMsg),
    #[serde(rename = "syncWorld")]
    SyncWorld,
    #[serde(rename = "chatMessage")]
    ChatMessage(ChatMessageIn),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(default, rename_all = "camelCase")]
pub struct MovePlayerMsg {
    pub position: Vector3,
    pub rotation: Vector3,
    pub current_animation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(default)]
pub struct ChatMessageIn {
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("invalid `{event}` payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw `{name, data}` frame before the payload is interpreted.
#[derive(Deserialize)]
struct Envelope {
    name: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientMsg {
    /// Decode one inbound frame. The tag is checked first so an unknown event
    /// name is reported as such, independent of its payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(DecodeError::Envelope)?;
        match envelope.name.as_str() {
            "movePlayer" => payload("movePlayer", envelope.data).map(ClientMsg::MovePlayer),
            "syncWorld" => Ok(ClientMsg::SyncWorld),
            "chatMessage" => payload("chatMessage", envelope.data).map(ClientMsg::ChatMessage),
            _ => Err(DecodeError::UnknownEvent(envelope.name)),
        }
    }
}

fn payload<T: DeserializeOwned>(
    event: &'static str,
    data: serde_json::Value,
) -> Result<T, DecodeError> {
    // Absent data decodes like an empty object: every field takes its default.
    let data = if data.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|source| DecodeError::Payload { event, source })
}
