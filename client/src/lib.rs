//! # Headless Game Client Library
//!
//! A WebSocket client for the realtime arcade server. It speaks the same JSON
//! protocol as the browser front ends but renders nothing; it exists to drive
//! the server from integration tests and to generate load from the command
//! line.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection handling and typed message exchange:
//! - Connecting to the `/ws` endpoint
//! - Sending joins, steering input and block edits
//! - Receiving and decoding server frames, with timeouts
//!
//! ### Game Module (`game`)
//! A minimal local view of the arena built from `state` frames, plus the
//! steering policy the bot binary uses.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::GameClient;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), client::network::ClientError> {
//! let mut client = GameClient::connect("ws://127.0.0.1:3000/ws").await?;
//! client.join("viewer").await?;
//!
//! let joined = client.recv_timeout(Duration::from_secs(2)).await?;
//! println!("{:?}", joined);
//!
//! client.steer(1.57, false).await?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod game;
pub mod network;
