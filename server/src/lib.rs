//! # Realtime Arcade Server Library
//!
//! This library provides the authoritative server for two browser games that
//! share one transport: a slither-style snake arena and a shared block grid.
//! It owns the canonical world, validates every client intent, advances the
//! simulation at a fixed rate and pushes state to all connected WebSocket
//! clients.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Clients only ever send intents (a steering angle, a boost flag, a block
//! edit). Movement, food consumption, growth, collisions and deaths are
//! decided here and nowhere else.
//!
//! ### Connection Management
//! Handles the lifecycle of every WebSocket connection:
//! - Identifier assignment and the connection cap
//! - Per-connection, per-action rate windows
//! - Join, death and respawn transitions
//! - Cleanup of snakes, intents and windows on disconnect
//!
//! ### State Broadcasting
//! The arena sends a full state frame on a fixed cadence, but only after
//! something changed. The block grid sends batched patch lists. Each frame is
//! serialized once and shared across every recipient.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! One task owns the room and the connection registry. Socket tasks never
//! touch game state; they forward decoded messages as [`network::NetworkEvent`]
//! values and drain an outbound frame queue. Ticks, broadcasts and inbound
//! events therefore never interleave.
//!
//! ### Rooms
//! The [`room::Room`] trait is the seam between the transport and the game.
//! [`arena::ArenaRoom`] runs the snake simulation and [`block_room::BlockRoom`]
//! runs the block grid. The run loop in [`network::Server`] is generic over
//! both.
//!
//! ## Module Organization
//!
//! ### World State (`world`, `blocks`)
//! Snakes, food and the RNG for the arena; the keyed block map for the grid.
//!
//! ### Connection Registry (`client_manager`)
//! Connection ids, outbound queues, session phases and rate windows.
//!
//! ### Input Ingestion (`ingest`)
//! Validation of steering and block intents plus the per-tick buffers they
//! are staged into.
//!
//! ### Tick Engine (`game`)
//! Movement, food consumption and collision detection for one arena step.
//!
//! ### Broadcast Encoder (`broadcast`)
//! Dirty tracking, change-gated state frames and patch batching.
//!
//! ### Session Lifecycle (`session`)
//! Join, death, respawn and disconnect handling for arena players.
//!
//! ### Ambient Pieces
//! - `config`: command line flags and tuning values
//! - `error`: the fatal error type
//! - `persistence`, `scores`: atomic file writes and the high-score table
//! - `http`: the axum router with the WebSocket upgrade and JSON endpoints
//! - `app`: process wiring used by the binary and the integration tests
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use server::app;
//! use server::config::Cli;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Same flags as the binary, e.g. `server --port 3000 arena --seed 7`
//!     let cli = Cli::parse();
//!
//!     // Binds the listener, starts the run loop and serves /ws and /api/*
//!     let running = app::launch(&cli).await?;
//!     println!("listening on {}", running.addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     // Stops the loop; block worlds are saved one last time
//!     running.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! ### Input Validation
//! Malformed frames, non-finite angles, out-of-range coordinates and oversized
//! block ids are dropped with a debug log. None of them close the connection.
//!
//! ### Rate Limiting
//! Joins, steering and block edits each have their own fixed window per
//! connection. Score submissions over HTTP are limited per remote address.

pub mod app;
pub mod arena;
pub mod block_room;
pub mod blocks;
pub mod broadcast;
pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod ingest;
pub mod network;
pub mod persistence;
pub mod room;
pub mod scores;
pub mod session;
pub mod world;
