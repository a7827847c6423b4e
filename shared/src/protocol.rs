//! Wire protocol shared by the server, the headless client and the tests.
//!
//! Every frame is a JSON text message tagged as `{"type": ..., "data": ...}`.
//! The set of variants is closed: anything that does not decode into one of
//! them is malformed input and is dropped by the receiver.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unencodable message: {0}")]
    Unencodable(#[source] serde_json::Error),
}

/// Rate-limit bucket a client message is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    Join,
    Steer,
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    Place,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join {
        #[serde(default)]
        nickname: String,
    },
    #[serde(rename = "input")]
    Input {
        #[serde(default)]
        angle: Option<f64>,
        #[serde(default)]
        boosting: Option<bool>,
    },
    #[serde(rename = "block:update")]
    BlockUpdate {
        x: i64,
        y: i64,
        #[serde(rename = "blockId", default)]
        block_id: Option<String>,
        action: BlockAction,
    },
    #[serde(rename = "respawn")]
    Respawn {
        #[serde(default)]
        nickname: String,
    },
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Unencodable)
    }

    pub fn action_kind(&self) -> ActionKind {
        match self {
            ClientMessage::Join { .. } | ClientMessage::Respawn { .. } => ActionKind::Join,
            ClientMessage::Input { .. } => ActionKind::Steer,
            ClientMessage::BlockUpdate { .. } => ActionKind::Build,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentState {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: u32,
    pub nickname: String,
    pub segments: Vec<SegmentState>,
    pub color: String,
    pub angle: f32,
    pub boosting: bool,
    pub alive: bool,
}

impl PlayerState {
    pub fn head(&self) -> Option<&SegmentState> {
        self.segments.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodState {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub color: String,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub nickname: String,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub x: i64,
    pub y: i64,
    #[serde(rename = "blockId")]
    pub block_id: String,
}

impl BlockRecord {
    /// Key used by the persisted map and the grid snapshot.
    pub fn key(x: i64, y: i64) -> String {
        format!("{},{}", x, y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPatch {
    pub x: i64,
    pub y: i64,
    #[serde(rename = "blockId", default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    pub action: BlockAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaSnapshot {
    pub players: BTreeMap<String, PlayerState>,
    pub food: BTreeMap<String, FoodState>,
}

/// Full world state sent once to a newly joined connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorldSnapshot {
    Arena(ArenaSnapshot),
    Blocks(BTreeMap<String, BlockRecord>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "joined")]
    Joined {
        #[serde(rename = "playerId")]
        player_id: u32,
        #[serde(rename = "worldSize")]
        world_size: f32,
    },
    #[serde(rename = "world:snapshot")]
    WorldSnapshot(WorldSnapshot),
    #[serde(rename = "state")]
    State {
        players: Vec<PlayerState>,
        food: Vec<FoodState>,
        leaderboard: Vec<LeaderboardEntry>,
    },
    #[serde(rename = "world:patch")]
    WorldPatch(Vec<BlockPatch>),
    #[serde(rename = "died")]
    Died { length: usize },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Unencodable)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
