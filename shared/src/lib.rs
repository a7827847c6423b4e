use serde::{Deserialize, Serialize};

pub mod protocol;

pub use protocol::{
    ActionKind, ArenaSnapshot, BlockAction, BlockPatch, BlockRecord, ClientMessage, FoodState,
    LeaderboardEntry, PlayerState, ProtocolError, SegmentState, ServerMessage, WorldSnapshot,
};

pub const WORLD_SIZE: f32 = 5000.0;
pub const FOOD_COUNT: usize = 1000;
pub const TICK_RATE: u32 = 20;
pub const BROADCAST_RATE: u32 = 8;

pub const SEGMENT_SPACING: f32 = 5.0;
pub const SEGMENT_RADIUS: f32 = 8.0;
pub const INITIAL_SEGMENTS: usize = 10;
pub const BASE_SPEED: f32 = 150.0;
pub const BOOST_MULTIPLIER: f32 = 1.5;
pub const EAT_RADIUS: f32 = 15.0;
pub const COLLISION_RADIUS: f32 = 10.0;
pub const SELF_COLLISION_GRACE: usize = 5;
pub const FOOD_RADIUS: f32 = 4.0;

pub const MAX_NICKNAME_LEN: usize = 15;
pub const DEFAULT_NICKNAME: &str = "Player";
pub const LEADERBOARD_SIZE: usize = 10;

pub const GRID_SIZE: i64 = 1024;
pub const MAX_BLOCK_ID_LEN: usize = 32;

pub const PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
    "#F8B500", "#52B788",
];

///Represents a vector in 2D world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector2 {
    ///Value along the x-axis, growing to the right.
    pub x: f32,
    ///Value along the y-axis, growing downwards (screen space).
    pub y: f32,
}

impl Vector2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Unit vector pointing along `angle` (radians).
    pub fn from_angle(angle: f32) -> Self {
        Self {
            x: angle.cos(),
            y: angle.sin(),
        }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2 { x: 0.0, y: 0.0 }
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns `self - other`.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    ///Euclidean distance between two points.
    pub fn distance(&self, other: &Vector2) -> f32 {
        self.sub(other).magnitude()
    }

    ///Clamps both coordinates into `[0, size]`.
    pub fn clamp_to(&self, size: f32) -> Vector2 {
        Vector2 {
            x: self.x.clamp(0.0, size),
            y: self.y.clamp(0.0, size),
        }
    }
}

/// Trims, strips control characters and caps a display name.
///
/// Empty results fall back to [`DEFAULT_NICKNAME`].
pub fn sanitize_nickname(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NICKNAME_LEN)
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        DEFAULT_NICKNAME.to_string()
    } else {
        cleaned
    }
}
