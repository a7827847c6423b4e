use crate::broadcast::StateBroadcaster;
use crate::client_manager::{ClientManager, ConnectionId};
use crate::config::ArenaConfig;
use crate::game;
use crate::ingest::{self, IntentBuffer, Rejection};
use crate::room::{Room, StatusSnapshot};
use crate::scores::ScoreReporter;
use crate::session::{JoinOutcome, SessionManager, SessionPhase};
use crate::world::ArenaWorld;
use log::debug;
use shared::ClientMessage;

/// The snake arena.
pub struct ArenaRoom {
    world: ArenaWorld,
    intents: IntentBuffer,
    broadcaster: StateBroadcaster,
    sessions: SessionManager,
}

impl ArenaRoom {
    pub fn new(config: ArenaConfig, seed: Option<u64>, scores: ScoreReporter) -> Self {
        let world = match seed {
            Some(seed) => ArenaWorld::with_seed(config, seed),
            None => ArenaWorld::new(config),
        };
        Self::with_world(world, scores)
    }

    pub fn with_world(world: ArenaWorld, scores: ScoreReporter) -> Self {
        Self {
            world,
            intents: IntentBuffer::new(),
            broadcaster: StateBroadcaster::new(),
            sessions: SessionManager::new(scores),
        }
    }

    pub fn world(&self) -> &ArenaWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut ArenaWorld {
        &mut self.world
    }

    fn steer(
        &mut self,
        id: ConnectionId,
        angle: Option<f64>,
        boosting: Option<bool>,
        clients: &ClientManager,
    ) -> Result<(), Rejection> {
        let intent = ingest::validate_steer(angle, boosting)?;
        // Input for a connection without a live snake goes nowhere
        if clients.phase(id) == Some(SessionPhase::Alive) {
            self.intents.stage(id, intent);
        }
        Ok(())
    }
}

impl Room for ArenaRoom {
    fn mode(&self) -> &'static str {
        "arena"
    }

    fn on_connect(&mut self, _id: ConnectionId, _clients: &mut ClientManager) {}

    fn on_message(&mut self, id: ConnectionId, message: ClientMessage, clients: &mut ClientManager) {
        let result = match message {
            ClientMessage::Join { nickname } | ClientMessage::Respawn { nickname } => {
                let outcome = self.sessions.join(
                    id,
                    &nickname,
                    &mut self.world,
                    clients,
                    &mut self.intents,
                );
                if outcome != JoinOutcome::Ignored {
                    self.broadcaster.mark_dirty();
                }
                Ok(())
            }
            ClientMessage::Input { angle, boosting } => self.steer(id, angle, boosting, clients),
            ClientMessage::BlockUpdate { .. } => Err(Rejection::WrongRoom),
        };

        if let Err(rejection) = result {
            debug!("Dropped input from client {}: {}", id, rejection);
        }
    }

    fn on_disconnect(&mut self, id: ConnectionId, _clients: &mut ClientManager) {
        if self.world.snake(id).is_some() {
            self.broadcaster.mark_dirty();
        }
        self.sessions.disconnect(id, &mut self.world, &mut self.intents);
    }

    fn tick(&mut self, dt: f32, clients: &mut ClientManager) {
        let report = game::run_tick(&mut self.world, &mut self.intents, dt);
        if report.changed() {
            self.broadcaster.mark_dirty();
        }

        for death in &report.deaths {
            self.sessions
                .record_death(death, &mut self.world, clients, &mut self.intents);
        }
    }

    fn broadcast(&mut self, clients: &ClientManager) -> bool {
        self.broadcaster.flush(&self.world, clients)
    }

    fn status(&self, clients: &ClientManager) -> StatusSnapshot {
        StatusSnapshot {
            players: clients.joined_count(),
            connections: clients.len(),
            food: self.world.food_count(),
            blocks: 0,
            leaderboard: self.world.leaderboard(),
        }
    }
}
