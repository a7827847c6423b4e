//! Arena simulation tick: apply staged intents, advance, then resolve.

use crate::client_manager::ConnectionId;
use crate::config::ArenaConfig;
use crate::ingest::IntentBuffer;
use crate::world::{ArenaWorld, Segment, Snake};
use log::debug;
use shared::Vector2;

/// A snake that died this tick, with its length at the moment of death.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Death {
    pub id: ConnectionId,
    pub length: usize,
    pub cause: DeathCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    HitSnake(ConnectionId),
    HitSelf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub deaths: Vec<Death>,
    pub food_eaten: usize,
    pub moved: usize,
}

impl TickReport {
    /// Whether anything observable changed during the tick.
    pub fn changed(&self) -> bool {
        self.moved > 0 || self.food_eaten > 0 || !self.deaths.is_empty()
    }
}

/// Runs one full tick over the world.
///
/// Dead snakes are marked `alive = false` but stay in the store; the session
/// layer removes them when it handles the reported deaths.
pub fn run_tick(world: &mut ArenaWorld, intents: &mut IntentBuffer, dt: f32) -> TickReport {
    apply_intents(world, intents);

    let config = world.config().clone();
    let mut moved = 0;
    for snake in world.snakes_mut().filter(|snake| snake.alive) {
        advance_snake(snake, dt, &config);
        moved += 1;
    }

    let food_eaten = consume_food(world);
    let deaths = detect_collisions(world);

    for death in &deaths {
        if let Some(snake) = world.snake_mut(death.id) {
            snake.alive = false;
        }
        debug!("Snake {} died at length {} ({:?})", death.id, death.length, death.cause);
    }

    TickReport {
        deaths,
        food_eaten,
        moved,
    }
}

/// Applies staged intents to live snakes; intents for anyone else are dropped.
pub fn apply_intents(world: &mut ArenaWorld, intents: &mut IntentBuffer) {
    for (id, intent) in intents.drain() {
        let Some(snake) = world.snake_mut(id).filter(|snake| snake.alive) else {
            continue;
        };
        if let Some(angle) = intent.angle {
            snake.angle = angle;
        }
        if let Some(boosting) = intent.boosting {
            snake.boosting = boosting;
        }
    }
}

/// Moves the head along its heading and drags the body behind it.
pub fn advance_snake(snake: &mut Snake, dt: f32, config: &ArenaConfig) {
    let Some(head) = snake.segments.first_mut() else {
        return;
    };

    let mut speed = config.base_speed;
    if snake.boosting {
        speed *= config.boost_multiplier;
    }

    let step = Vector2::from_angle(snake.angle).scale(speed * dt);
    head.position = head.position.add(&step).clamp_to(config.world_size);

    follow_leader(
        &mut snake.segments,
        config.segment_spacing,
        config.world_size,
    );
}

/// Pulls every segment to within `spacing` of the one in front of it.
pub fn follow_leader(segments: &mut [Segment], spacing: f32, world_size: f32) {
    for i in 1..segments.len() {
        let leader = segments[i - 1].position;
        let follower = segments[i].position;
        let gap = follower.distance(&leader);

        if gap > spacing {
            let direction = follower.sub(&leader).normalize();
            segments[i].position = leader.add(&direction.scale(spacing)).clamp_to(world_size);
        }
    }
}

/// Lets each live snake, in registry order, eat every food item under its head.
///
/// Eaten items are replaced in their slot before the next snake looks, so the
/// food count never changes.
pub fn consume_food(world: &mut ArenaWorld) -> usize {
    let radius = world.config().eat_radius;
    let mut eaten = 0;

    for id in world.snake_ids() {
        let Some(head) = world.snake(id).filter(|s| s.alive).map(Snake::head) else {
            continue;
        };

        let slots = world.food_within(head, radius);
        if slots.is_empty() {
            continue;
        }

        if let Some(snake) = world.snake_mut(id) {
            for _ in &slots {
                snake.grow();
            }
        }
        for slot in slots {
            world.replace_food(slot);
            eaten += 1;
        }
    }

    eaten
}

/// Finds every snake whose head touches another body or its own tail.
///
/// All checks read the same post-advance state, so two heads hitting each
/// other's bodies in one tick both die.
pub fn detect_collisions(world: &ArenaWorld) -> Vec<Death> {
    let config = world.config();
    let live: Vec<&Snake> = world.snakes().filter(|snake| snake.alive).collect();
    let mut deaths = Vec::new();

    for snake in &live {
        let head = snake.head();

        let hit_other = live
            .iter()
            .filter(|other| other.id != snake.id)
            .find(|other| touches_any(head, &other.segments, config.collision_radius));

        let cause = match hit_other {
            Some(other) => Some(DeathCause::HitSnake(other.id)),
            None if hits_own_tail(snake, config) => Some(DeathCause::HitSelf),
            None => None,
        };

        if let Some(cause) = cause {
            deaths.push(Death {
                id: snake.id,
                length: snake.len(),
                cause,
            });
        }
    }

    deaths
}

fn touches_any(point: Vector2, segments: &[Segment], radius: f32) -> bool {
    segments
        .iter()
        .any(|segment| segment.position.distance(&point) < radius)
}

/// Segments `0..=grace` are exempt; anything further back counts.
fn hits_own_tail(snake: &Snake, config: &ArenaConfig) -> bool {
    let tail = snake
        .segments
        .get(config.self_collision_grace + 1..)
        .unwrap_or(&[]);
    touches_any(snake.head(), tail, config.collision_radius)
}
