//! Per-connection session lifecycle for the arena.
//!
//! ```text
//! Connecting --join--> Alive --death--> Dead --join/respawn--> Alive
//!      any phase --disconnect--> (removed from the registry)
//! ```

use crate::broadcast::encode;
use crate::client_manager::{ClientManager, ConnectionId};
use crate::game::Death;
use crate::ingest::IntentBuffer;
use crate::scores::ScoreReporter;
use crate::world::ArenaWorld;
use log::{debug, info};
use shared::{sanitize_nickname, ServerMessage, WorldSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Alive,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Respawned,
    Ignored,
}

pub struct SessionManager {
    scores: ScoreReporter,
}

impl SessionManager {
    pub fn new(scores: ScoreReporter) -> Self {
        Self { scores }
    }

    /// Handles `join` and `respawn`.
    ///
    /// Creates a fresh snake bound to the connection, then sends `joined`
    /// followed by the full snapshot. Requests from a connection that already
    /// has a live snake are ignored.
    pub fn join(
        &self,
        id: ConnectionId,
        raw_nickname: &str,
        world: &mut ArenaWorld,
        clients: &mut ClientManager,
        intents: &mut IntentBuffer,
    ) -> JoinOutcome {
        let outcome = match clients.phase(id) {
            Some(SessionPhase::Connecting) => JoinOutcome::Joined,
            Some(SessionPhase::Dead) => JoinOutcome::Respawned,
            Some(SessionPhase::Alive) => {
                debug!("Ignoring join from client {} with a live snake", id);
                return JoinOutcome::Ignored;
            }
            None => return JoinOutcome::Ignored,
        };

        let nickname = sanitize_nickname(raw_nickname);
        intents.discard(id);
        world.spawn_snake(id, nickname);
        clients.set_phase(id, SessionPhase::Alive);

        clients.send_message(
            id,
            &ServerMessage::Joined {
                player_id: id.0,
                world_size: world.size(),
            },
        );
        clients.send(
            id,
            encode(&ServerMessage::WorldSnapshot(WorldSnapshot::Arena(
                world.snapshot(),
            ))),
        );

        info!("Client {} {:?}", id, outcome);
        outcome
    }

    /// Retires a snake the tick reported dead.
    ///
    /// Only the dying connection hears about it; everyone else sees the snake
    /// disappear from the next state broadcast.
    pub fn record_death(
        &self,
        death: &Death,
        world: &mut ArenaWorld,
        clients: &mut ClientManager,
        intents: &mut IntentBuffer,
    ) {
        let Some(snake) = world.remove_snake(death.id) else {
            return;
        };
        intents.discard(death.id);

        if clients.set_phase(death.id, SessionPhase::Dead) {
            clients.send_message(
                death.id,
                &ServerMessage::Died {
                    length: death.length,
                },
            );
        }

        info!(
            "Client {} ({}) died at length {}",
            death.id, snake.nickname, death.length
        );
        self.scores.report(&snake.nickname, death.length);
    }

    /// Drops everything the arena holds for a departing connection.
    ///
    /// The registry entry itself is removed by the run loop.
    pub fn disconnect(&self, id: ConnectionId, world: &mut ArenaWorld, intents: &mut IntentBuffer) {
        intents.discard(id);
        if let Some(snake) = world.remove_snake(id) {
            debug!("Removed snake of departed client {} ({})", id, snake.nickname);
        }
    }
}
