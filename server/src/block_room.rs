use crate::blocks::BlockWorld;
use crate::broadcast::{encode, PatchBuffer};
use crate::client_manager::{ClientManager, ConnectionId};
use crate::ingest::{self, PendingEdits, Rejection};
use crate::persistence::PersistJob;
use crate::room::{Room, StatusSnapshot};
use crate::session::SessionPhase;
use log::{debug, error};
use shared::{ClientMessage, ServerMessage, WorldSnapshot};
use std::path::PathBuf;

/// The shared block-placement grid.
///
/// Connections receive the full grid as soon as they connect and are live from
/// then on. Edits queue up until the next tick and go out as one patch list
/// per broadcast cycle.
pub struct BlockRoom {
    world: BlockWorld,
    pending: PendingEdits,
    patches: PatchBuffer,
    world_file: PathBuf,
    grid_size: i64,
    unsaved_edits: usize,
    /// Edits covered by the job currently being written
    in_flight_edits: usize,
}

impl BlockRoom {
    pub fn new(world: BlockWorld, world_file: PathBuf, grid_size: i64) -> Self {
        Self {
            world,
            pending: PendingEdits::new(),
            patches: PatchBuffer::new(),
            world_file,
            grid_size,
            unsaved_edits: 0,
            in_flight_edits: 0,
        }
    }

    pub fn world(&self) -> &BlockWorld {
        &self.world
    }
}

impl Room for BlockRoom {
    fn mode(&self) -> &'static str {
        "blocks"
    }

    fn on_connect(&mut self, id: ConnectionId, clients: &mut ClientManager) {
        clients.set_phase(id, SessionPhase::Alive);
        clients.send(
            id,
            encode(&ServerMessage::WorldSnapshot(WorldSnapshot::Blocks(
                self.world.snapshot(),
            ))),
        );
    }

    fn on_message(&mut self, id: ConnectionId, message: ClientMessage, clients: &mut ClientManager) {
        let result = match message {
            ClientMessage::BlockUpdate {
                x,
                y,
                block_id,
                action,
            } => ingest::validate_block_update(id, x, y, block_id, action, self.grid_size)
                .map(|edit| self.pending.push(edit)),
            ClientMessage::Join { .. } => {
                clients.send_message(
                    id,
                    &ServerMessage::Joined {
                        player_id: id.0,
                        world_size: self.grid_size as f32,
                    },
                );
                Ok(())
            }
            ClientMessage::Input { .. } | ClientMessage::Respawn { .. } => Err(Rejection::WrongRoom),
        };

        if let Err(rejection) = result {
            debug!("Dropped block input from client {}: {}", id, rejection);
        }
    }

    fn on_disconnect(&mut self, _id: ConnectionId, _clients: &mut ClientManager) {}

    fn tick(&mut self, _dt: f32, _clients: &mut ClientManager) {
        for edit in self.pending.drain() {
            let patch = self.world.apply(&edit);
            self.patches.push(patch);
            self.unsaved_edits += 1;
        }
    }

    fn broadcast(&mut self, clients: &ClientManager) -> bool {
        self.patches.flush(clients)
    }

    fn persist(&mut self, force: bool) -> Option<PersistJob> {
        if !force && self.unsaved_edits == 0 {
            return None;
        }

        match self.world.save_job(&self.world_file) {
            Ok(job) => {
                self.in_flight_edits = self.unsaved_edits;
                Some(job)
            }
            Err(e) => {
                error!("Failed to serialize block world: {}", e);
                None
            }
        }
    }

    fn persist_complete(&mut self, success: bool) {
        if success {
            self.unsaved_edits = self.unsaved_edits.saturating_sub(self.in_flight_edits);
        }
        self.in_flight_edits = 0;
    }

    fn status(&self, clients: &ClientManager) -> StatusSnapshot {
        StatusSnapshot {
            players: clients.len(),
            connections: clients.len(),
            food: 0,
            blocks: self.world.len(),
            leaderboard: Vec::new(),
        }
    }
}
