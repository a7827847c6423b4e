//! Command-line configuration and the tuning values derived from it.

use clap::{Args, Parser, Subcommand};
use shared::{
    ActionKind, BASE_SPEED, BOOST_MULTIPLIER, BROADCAST_RATE, COLLISION_RADIUS, EAT_RADIUS,
    FOOD_COUNT, FOOD_RADIUS, GRID_SIZE, INITIAL_SEGMENTS, SEGMENT_RADIUS, SEGMENT_SPACING,
    SELF_COLLISION_GRACE, TICK_RATE, WORLD_SIZE,
};
use std::path::PathBuf;
use std::time::Duration;

/// Authoritative real-time game server for the arcade's multiplayer rooms.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Cli {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,
    /// Server port to listen on (0 picks a free port)
    #[arg(short, long, default_value_t = 3000)]
    pub port: u16,
    /// Simulation ticks per second
    #[arg(short, long, default_value_t = TICK_RATE, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub tick_rate: u32,
    /// State broadcasts per second, independent of the tick rate
    #[arg(short, long, default_value_t = BROADCAST_RATE, value_parser = clap::value_parser!(u32).range(1..=240))]
    pub broadcast_rate: u32,
    /// Maximum number of concurrent connections
    #[arg(long, default_value_t = 256)]
    pub max_clients: usize,
    /// Allowed CORS origin; any origin when omitted
    #[arg(long)]
    pub origin: Option<String>,
    /// JSON file backing the score table
    #[arg(long, default_value = "data/scores.json")]
    pub scores_file: PathBuf,
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Slither-style snake arena
    Arena(ArenaArgs),
    /// Shared 2D block-placement world
    Blocks(BlockArgs),
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Arena(_) => "arena",
            Mode::Blocks(_) => "blocks",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ArenaArgs {
    /// Side length of the square world
    #[arg(long, default_value_t = WORLD_SIZE, value_parser = parse_world_size)]
    pub world_size: f32,
    /// Number of food items kept in the world
    #[arg(long, default_value_t = FOOD_COUNT)]
    pub food_count: usize,
    /// Seed for spawn positions (random when omitted)
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct BlockArgs {
    /// Persisted world file
    #[arg(long, default_value = "data/world.json")]
    pub world_file: PathBuf,
    /// Valid block coordinates are `0..grid_size` on both axes
    #[arg(long, default_value_t = GRID_SIZE)]
    pub grid_size: i64,
    /// Seconds between world saves
    #[arg(long, default_value_t = 30)]
    pub save_interval: u64,
}

impl Cli {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timing(&self) -> LoopTiming {
        let save_period = match &self.mode {
            Mode::Arena(_) => None,
            Mode::Blocks(args) => Some(Duration::from_secs(args.save_interval.max(1))),
        };
        LoopTiming {
            tick_period: Duration::from_secs_f64(1.0 / self.tick_rate as f64),
            broadcast_period: Duration::from_secs_f64(1.0 / self.broadcast_rate as f64),
            save_period,
        }
    }
}

/// Periods of the three independent timers driving the run loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTiming {
    pub tick_period: Duration,
    pub broadcast_period: Duration,
    pub save_period: Option<Duration>,
}

impl LoopTiming {
    /// Largest delta time a single tick may simulate.
    pub fn max_delta(&self) -> f32 {
        self.tick_period.as_secs_f32() * 4.0
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(1000 / TICK_RATE as u64),
            broadcast_period: Duration::from_millis(1000 / BROADCAST_RATE as u64),
            save_period: None,
        }
    }
}

/// Arena simulation constants.
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaConfig {
    pub world_size: f32,
    pub food_count: usize,
    pub initial_segments: usize,
    pub segment_spacing: f32,
    pub segment_radius: f32,
    pub food_radius: f32,
    pub base_speed: f32,
    pub boost_multiplier: f32,
    pub eat_radius: f32,
    pub collision_radius: f32,
    /// Segments behind the head exempt from self-collision.
    pub self_collision_grace: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            world_size: WORLD_SIZE,
            food_count: FOOD_COUNT,
            initial_segments: INITIAL_SEGMENTS,
            segment_spacing: SEGMENT_SPACING,
            segment_radius: SEGMENT_RADIUS,
            food_radius: FOOD_RADIUS,
            base_speed: BASE_SPEED,
            boost_multiplier: BOOST_MULTIPLIER,
            eat_radius: EAT_RADIUS,
            collision_radius: COLLISION_RADIUS,
            self_collision_grace: SELF_COLLISION_GRACE,
        }
    }
}

impl From<&ArenaArgs> for ArenaConfig {
    fn from(args: &ArenaArgs) -> Self {
        Self {
            world_size: args.world_size.max(1.0),
            food_count: args.food_count,
            ..Self::default()
        }
    }
}

/// Fixed-window admission policy: at most `max` actions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub max: u32,
    pub window: Duration,
}

impl RatePolicy {
    pub const fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }
}

/// One policy per [`ActionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicies {
    pub join: RatePolicy,
    pub steer: RatePolicy,
    pub build: RatePolicy,
}

impl RatePolicies {
    pub fn for_kind(&self, kind: ActionKind) -> RatePolicy {
        match kind {
            ActionKind::Join => self.join,
            ActionKind::Steer => self.steer,
            ActionKind::Build => self.build,
        }
    }
}

impl Default for RatePolicies {
    fn default() -> Self {
        Self {
            join: RatePolicy::new(5, Duration::from_secs(5)),
            steer: RatePolicy::new(240, Duration::from_secs(1)),
            build: RatePolicy::new(10, Duration::from_secs(5)),
        }
    }
}

/// Per-IP limit on score submissions over HTTP.
pub const SCORE_SUBMIT_POLICY: RatePolicy = RatePolicy::new(5, Duration::from_secs(60));

fn parse_world_size(value: &str) -> Result<f32, String> {
    let size: f32 = value.parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
    if size.is_finite() && size > 0.0 {
        Ok(size)
    } else {
        Err(format!("world size must be a positive finite number, got {}", value))
    }
}
