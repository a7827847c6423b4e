//! Frame encoding and fan-out.
//!
//! A frame is serialized once and the same `Arc<str>` is queued to every
//! registered connection. Each broadcast cycle either sends one frame or
//! nothing at all.

use crate::client_manager::{ClientManager, Frame};
use crate::world::ArenaWorld;
use log::{debug, error};
use shared::{BlockPatch, ServerMessage};
use std::sync::Arc;

pub fn encode(message: &ServerMessage) -> Frame {
    match message.to_json() {
        Ok(json) => Arc::from(json),
        Err(e) => {
            // Only reachable with non-string map keys, which no message has
            error!("Failed to encode {:?}: {}", message, e);
            Arc::from("")
        }
    }
}

pub fn state_message(world: &ArenaWorld) -> ServerMessage {
    ServerMessage::State {
        players: world.player_states(),
        food: world.food_states(),
        leaderboard: world.leaderboard(),
    }
}

/// Sends the arena `state` frame when the world changed since the last send.
#[derive(Debug, Default)]
pub struct StateBroadcaster {
    dirty: bool,
    sent: u64,
    skipped: u64,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true when a frame was queued.
    pub fn flush(&mut self, world: &ArenaWorld, clients: &ClientManager) -> bool {
        if !self.dirty || clients.is_empty() {
            self.skipped += 1;
            return false;
        }

        let frame = encode(&state_message(world));
        let delivered = clients.broadcast(&frame);
        self.dirty = false;
        self.sent += 1;

        if self.sent % 100 == 0 {
            debug!(
                "State broadcast #{} ({} bytes) to {} clients, {} cycles skipped",
                self.sent,
                frame.len(),
                delivered,
                self.skipped
            );
        }
        true
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

/// Accumulates block patches between broadcast cycles.
#[derive(Debug, Default)]
pub struct PatchBuffer {
    pending: Vec<BlockPatch>,
}

impl PatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, patch: BlockPatch) {
        self.pending.push(patch);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sends everything accumulated as one `world:patch` frame and clears
    /// the buffer. Nothing is sent when the buffer is empty.
    pub fn flush(&mut self, clients: &ClientManager) -> bool {
        if self.pending.is_empty() {
            return false;
        }

        let patches = std::mem::take(&mut self.pending);
        let count = patches.len();
        let frame = encode(&ServerMessage::WorldPatch(patches));
        let delivered = clients.broadcast(&frame);
        debug!("Broadcast {} block patches to {} clients", count, delivered);
        true
    }
}
