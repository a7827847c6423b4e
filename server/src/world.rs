//! Arena world state: snakes keyed by connection and a fixed-size food field.

use crate::client_manager::ConnectionId;
use crate::config::ArenaConfig;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    ArenaSnapshot, FoodState, LeaderboardEntry, PlayerState, SegmentState, Vector2,
    LEADERBOARD_SIZE, PALETTE,
};
use std::collections::BTreeMap;
use std::f32::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub position: Vector2,
    pub radius: f32,
}

impl Segment {
    pub fn new(x: f32, y: f32, radius: f32) -> Self {
        Self {
            position: Vector2::new(x, y),
            radius,
        }
    }

    fn to_state(self) -> SegmentState {
        SegmentState {
            x: self.position.x,
            y: self.position.y,
            radius: self.radius,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snake {
    pub id: ConnectionId,
    pub nickname: String,
    /// Head first.
    pub segments: Vec<Segment>,
    /// Heading in radians, kept in `[0, 2π)`.
    pub angle: f32,
    pub boosting: bool,
    pub alive: bool,
    pub color: String,
}

impl Snake {
    pub fn new(
        id: ConnectionId,
        nickname: String,
        segments: Vec<Segment>,
        angle: f32,
        color: String,
    ) -> Self {
        Self {
            id,
            nickname,
            segments,
            angle,
            boosting: false,
            alive: true,
            color,
        }
    }

    pub fn head(&self) -> Vector2 {
        self.segments
            .first()
            .map(|segment| segment.position)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Appends one segment at the tail's current position.
    pub fn grow(&mut self) {
        if let Some(tail) = self.segments.last().copied() {
            self.segments.push(tail);
        }
    }

    pub fn to_state(&self) -> PlayerState {
        PlayerState {
            id: self.id.0,
            nickname: self.nickname.clone(),
            segments: self.segments.iter().map(|s| s.to_state()).collect(),
            color: self.color.clone(),
            angle: self.angle,
            boosting: self.boosting,
            alive: self.alive,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Food {
    pub id: u64,
    pub position: Vector2,
    pub color: String,
    pub radius: f32,
}

impl Food {
    pub fn to_state(&self) -> FoodState {
        FoodState {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            color: self.color.clone(),
            radius: self.radius,
        }
    }
}

/// The arena aggregate owned by the room.
///
/// Snakes iterate in ascending connection id order. Food keeps a fixed number
/// of slots; an eaten item is replaced in its own slot.
pub struct ArenaWorld {
    config: ArenaConfig,
    snakes: BTreeMap<ConnectionId, Snake>,
    food: Vec<Food>,
    next_food_id: u64,
    rng: StdRng,
}

impl ArenaWorld {
    pub fn new(config: ArenaConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic spawns for tests and reproducible runs.
    pub fn with_seed(config: ArenaConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ArenaConfig, rng: StdRng) -> Self {
        let mut world = Self {
            food: Vec::with_capacity(config.food_count),
            config,
            snakes: BTreeMap::new(),
            next_food_id: 1,
            rng,
        };
        for _ in 0..world.config.food_count {
            let food = world.spawn_food();
            world.food.push(food);
        }
        world
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn size(&self) -> f32 {
        self.config.world_size
    }

    /// Creates a snake at a random position and heading and stores it.
    ///
    /// The body trails behind the head along the heading so a fresh snake is
    /// never folded onto itself.
    pub fn spawn_snake(&mut self, id: ConnectionId, nickname: String) -> &Snake {
        let size = self.config.world_size;
        let trail = self.config.segment_spacing * self.config.initial_segments as f32;
        let margin = trail.min(size / 2.0);

        let head = Vector2::new(
            self.random_coord(margin, size - margin),
            self.random_coord(margin, size - margin),
        );
        let angle = self.rng.gen_range(0.0..TAU);
        let color = self.random_color();

        let backwards = Vector2::from_angle(angle).scale(-self.config.segment_spacing);
        let segments = (0..self.config.initial_segments.max(1))
            .map(|i| {
                let position = head.add(&backwards.scale(i as f32)).clamp_to(size);
                Segment {
                    position,
                    radius: self.config.segment_radius,
                }
            })
            .collect();

        info!(
            "Spawned snake {} ({}) at ({:.0}, {:.0})",
            id, nickname, head.x, head.y
        );
        self.insert_snake(Snake::new(id, nickname, segments, angle, color))
    }

    /// Stores a snake, replacing any previous entity bound to the same id.
    pub fn insert_snake(&mut self, snake: Snake) -> &Snake {
        let id = snake.id;
        self.snakes.insert(id, snake);
        &self.snakes[&id]
    }

    pub fn remove_snake(&mut self, id: ConnectionId) -> Option<Snake> {
        self.snakes.remove(&id)
    }

    pub fn snake(&self, id: ConnectionId) -> Option<&Snake> {
        self.snakes.get(&id)
    }

    pub fn snake_mut(&mut self, id: ConnectionId) -> Option<&mut Snake> {
        self.snakes.get_mut(&id)
    }

    pub fn snakes(&self) -> impl Iterator<Item = &Snake> {
        self.snakes.values()
    }

    pub fn snakes_mut(&mut self) -> impl Iterator<Item = &mut Snake> {
        self.snakes.values_mut()
    }

    pub fn snake_ids(&self) -> Vec<ConnectionId> {
        self.snakes.keys().copied().collect()
    }

    pub fn live_count(&self) -> usize {
        self.snakes.values().filter(|snake| snake.alive).count()
    }

    pub fn food(&self) -> &[Food] {
        &self.food
    }

    pub fn food_count(&self) -> usize {
        self.food.len()
    }

    /// Slots of every food item within `radius` of `point`.
    pub fn food_within(&self, point: Vector2, radius: f32) -> Vec<usize> {
        self.food
            .iter()
            .enumerate()
            .filter(|(_, food)| food.position.distance(&point) < radius)
            .map(|(index, _)| index)
            .collect()
    }

    /// Creates a new food item at a random position without storing it.
    pub fn spawn_food(&mut self) -> Food {
        let size = self.config.world_size;
        let id = self.next_food_id;
        self.next_food_id += 1;
        Food {
            id,
            position: Vector2::new(self.random_coord(0.0, size), self.random_coord(0.0, size)),
            color: self.random_color(),
            radius: self.config.food_radius,
        }
    }

    /// Replaces the item in `index` with a fresh one, returning the new id.
    pub fn replace_food(&mut self, index: usize) -> Option<u64> {
        if index >= self.food.len() {
            return None;
        }
        let food = self.spawn_food();
        let id = food.id;
        self.food[index] = food;
        Some(id)
    }

    pub fn player_states(&self) -> Vec<PlayerState> {
        self.snakes
            .values()
            .filter(|snake| snake.alive)
            .map(Snake::to_state)
            .collect()
    }

    pub fn food_states(&self) -> Vec<FoodState> {
        self.food.iter().map(Food::to_state).collect()
    }

    /// Live snakes ranked by length, ties broken by join order.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut ranked: Vec<&Snake> = self.snakes.values().filter(|s| s.alive).collect();
        ranked.sort_by(|a, b| b.len().cmp(&a.len()).then(a.id.cmp(&b.id)));
        ranked
            .into_iter()
            .take(LEADERBOARD_SIZE)
            .map(|snake| LeaderboardEntry {
                nickname: snake.nickname.clone(),
                length: snake.len(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> ArenaSnapshot {
        ArenaSnapshot {
            players: self
                .snakes
                .values()
                .filter(|snake| snake.alive)
                .map(|snake| (snake.id.to_string(), snake.to_state()))
                .collect(),
            food: self
                .food
                .iter()
                .map(|food| (food.id.to_string(), food.to_state()))
                .collect(),
        }
    }

    fn random_coord(&mut self, low: f32, high: f32) -> f32 {
        if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }

    fn random_color(&mut self) -> String {
        PALETTE[self.rng.gen_range(0..PALETTE.len())].to_string()
    }
}
