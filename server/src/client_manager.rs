//! Connection registry for the multiplayer server
//!
//! This module tracks every live WebSocket connection the run loop knows about:
//! - Identity assignment (monotonic ids, never reused while the process runs)
//! - Capacity enforcement and address bookkeeping
//! - Per-connection, per-action fixed-window rate limiting
//! - Session phase storage and outbound frame delivery
//!
//! Only the run loop task owns a `ClientManager`, so none of this needs locking.

use crate::config::{RatePolicies, RatePolicy};
use crate::session::SessionPhase;
use log::{debug, info};
use serde::Serialize;
use shared::{ActionKind, ServerMessage};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// An encoded JSON text frame, shared between every connection it is queued to.
pub type Frame = Arc<str>;
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// Server-assigned identity of one connection.
///
/// Ordering follows assignment order, which is also the registry iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-window counter for one kind of action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub resets_at: Instant,
}

impl RateWindow {
    /// Opens a window that already counts the action that opened it.
    pub fn open(now: Instant, policy: RatePolicy) -> Self {
        Self {
            count: 1,
            resets_at: now + policy.window,
        }
    }

    /// Counts one more action, returning false when the window is full.
    pub fn admit(&mut self, now: Instant, policy: RatePolicy) -> bool {
        if now >= self.resets_at {
            *self = Self::open(now, policy);
            return true;
        }
        if self.count >= policy.max {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.resets_at
    }
}

/// A registered connection
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the registry
    pub id: ConnectionId,
    /// Peer address, for logging
    pub addr: SocketAddr,
    pub connected_at: Instant,
    pub phase: SessionPhase,
    outbound: FrameSender,
    windows: HashMap<ActionKind, RateWindow>,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr, outbound: FrameSender, now: Instant) -> Self {
        Self {
            id,
            addr,
            connected_at: now,
            phase: SessionPhase::Connecting,
            outbound,
            windows: HashMap::new(),
        }
    }

    /// Queues a frame for the connection's writer task.
    ///
    /// A closed writer is not an error here: the reader side reports the
    /// disconnect through the event channel.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Number of rate windows currently held for this connection
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

/// Manages all registered connections
///
/// The ClientManager is the single place where connection ids are handed out,
/// where capacity is enforced and where rate limits are decided. Iteration is
/// in ascending id order, i.e. join order.
pub struct ClientManager {
    /// Registered connections indexed by id
    clients: BTreeMap<ConnectionId, Client>,
    /// Next id to hand out; never decremented
    next_client_id: u32,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
    policies: RatePolicies,
}

impl ClientManager {
    /// Creates an empty registry with the given capacity and rate policies
    ///
    /// Ids start from 1 and increment for each new connection.
    pub fn new(max_clients: usize, policies: RatePolicies) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
            max_clients,
            policies,
        }
    }

    /// Registers a new connection
    ///
    /// Returns the assigned id, or None if the server is at capacity. The
    /// connection starts in the `Connecting` phase with no rate windows.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        outbound: FrameSender,
        now: Instant,
    ) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let id = ConnectionId(self.next_client_id);
        self.next_client_id += 1;

        info!("Client {} connected from {}", id, addr);
        self.clients.insert(id, Client::new(id, addr, outbound, now));

        Some(id)
    }

    /// Removes a connection together with its rate windows and outbound sender
    ///
    /// Returns true if the connection was found, false if it was already gone.
    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(id) {
            info!(
                "Client {} disconnected after {:.1}s",
                client.id,
                client.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    /// Counts an action against the connection's window for that kind
    ///
    /// Returns false when the action must be rejected, including for unknown
    /// ids.
    pub fn touch(&mut self, id: ConnectionId, kind: ActionKind, now: Instant) -> bool {
        let policy = self.policies.for_kind(kind);
        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };

        let admitted = match client.windows.entry(kind) {
            Entry::Vacant(entry) => {
                entry.insert(RateWindow::open(now, policy));
                true
            }
            Entry::Occupied(mut entry) => entry.get_mut().admit(now, policy),
        };

        if !admitted {
            debug!("Client {} exceeded the {:?} rate limit", id, kind);
        }
        admitted
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn client(&self, id: ConnectionId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn phase(&self, id: ConnectionId) -> Option<SessionPhase> {
        self.clients.get(&id).map(|client| client.phase)
    }

    /// Updates the stored phase; returns false for unknown ids
    pub fn set_phase(&mut self, id: ConnectionId, phase: SessionPhase) -> bool {
        match self.clients.get_mut(&id) {
            Some(client) => {
                client.phase = phase;
                true
            }
            None => false,
        }
    }

    /// Queues a frame for one connection
    pub fn send(&self, id: ConnectionId, frame: Frame) -> bool {
        self.clients
            .get(&id)
            .map(|client| client.send(frame))
            .unwrap_or(false)
    }

    /// Encodes and queues a single message for one connection
    pub fn send_message(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        self.send(id, crate::broadcast::encode(message))
    }

    /// Queues the same frame to every registered connection
    ///
    /// Returns the number of connections whose writer accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        self.clients
            .values()
            .filter(|client| client.send(Arc::clone(frame)))
            .count()
    }

    /// All registered ids in registry order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.clients.keys().copied().collect()
    }

    /// Total rate windows held across all connections
    pub fn tracked_windows(&self) -> usize {
        self.clients.values().map(Client::window_count).sum()
    }

    /// Connections that have joined at least once, dead or alive
    pub fn joined_count(&self) -> usize {
        self.clients
            .values()
            .filter(|client| client.phase != SessionPhase::Connecting)
            .count()
    }

    /// Returns the number of registered connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
