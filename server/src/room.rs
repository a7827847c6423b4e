//! The seam between the run loop and a game variant.

use crate::client_manager::{ClientManager, ConnectionId};
use crate::persistence::PersistJob;
use shared::{ClientMessage, LeaderboardEntry};
use std::sync::RwLock;
use std::time::Instant;

/// One isolated world plus its staged input.
///
/// Every method runs on the run loop task, which also owns the registry, so
/// implementations mutate freely without locking.
pub trait Room: Send + 'static {
    fn mode(&self) -> &'static str;

    /// A connection was registered.
    fn on_connect(&mut self, id: ConnectionId, clients: &mut ClientManager);

    /// A decoded message passed the rate limiter.
    fn on_message(&mut self, id: ConnectionId, message: ClientMessage, clients: &mut ClientManager);

    /// The connection is about to be unregistered.
    fn on_disconnect(&mut self, id: ConnectionId, clients: &mut ClientManager);

    fn tick(&mut self, dt: f32, clients: &mut ClientManager);

    /// Returns true when a frame was sent this cycle.
    fn broadcast(&mut self, clients: &ClientManager) -> bool;

    /// Serializes state for a background save. With `force` unset, rooms may
    /// skip the save when nothing changed since the last one.
    fn persist(&mut self, _force: bool) -> Option<PersistJob> {
        None
    }

    /// Reports how the write of the last [`Room::persist`] job ended. The run
    /// loop has at most one job in flight.
    fn persist_complete(&mut self, _success: bool) {}

    fn status(&self, clients: &ClientManager) -> StatusSnapshot;
}

/// Values the HTTP side-channel reports about the room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub players: usize,
    pub connections: usize,
    pub food: usize,
    pub blocks: usize,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Latest [`StatusSnapshot`], written by the run loop and read by handlers.
#[derive(Debug)]
pub struct RoomStatus {
    mode: &'static str,
    started_at: Instant,
    current: RwLock<StatusSnapshot>,
}

impl RoomStatus {
    pub fn new(mode: &'static str) -> Self {
        Self {
            mode,
            started_at: Instant::now(),
            current: RwLock::new(StatusSnapshot::default()),
        }
    }

    pub fn mode(&self) -> &'static str {
        self.mode
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn update(&self, snapshot: StatusSnapshot) {
        // A poisoned lock only means a reader panicked mid-copy
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = snapshot;
    }

    pub fn get(&self) -> StatusSnapshot {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
