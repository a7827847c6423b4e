//! Server run loop and WebSocket transport
//!
//! One task owns the room and the connection registry. Connection tasks talk
//! to it only through [`NetworkEvent`]s, and it talks back only through each
//! connection's outbound frame channel.

use crate::client_manager::{ClientManager, ConnectionId, Frame, FrameSender};
use crate::config::LoopTiming;
use crate::error::ServerError;
use crate::room::{Room, RoomStatus};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ActionKind, ClientMessage, ServerMessage};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded";
pub const SERVER_FULL_MESSAGE: &str = "Server full";

/// Messages sent from connection tasks to the run loop
#[derive(Debug)]
pub enum NetworkEvent {
    Connected {
        addr: SocketAddr,
        outbound: FrameSender,
        /// Receives the assigned id, or None when the server is full
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    Message {
        id: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        id: ConnectionId,
    },
}

pub type EventSender = mpsc::UnboundedSender<NetworkEvent>;

/// Main server coordinating connections and one room's simulation
pub struct Server<R: Room> {
    room: R,
    clients: ClientManager,
    timing: LoopTiming,
    status: Arc<RoomStatus>,
    tick_count: u64,

    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl<R: Room> Server<R> {
    pub fn new(room: R, clients: ClientManager, timing: LoopTiming) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RoomStatus::new(room.mode()));

        Self {
            room,
            clients,
            timing,
            status,
            tick_count: 0,
            events_tx,
            events_rx,
        }
    }

    /// Handle for connection tasks to reach the run loop
    pub fn events(&self) -> EventSender {
        self.events_tx.clone()
    }

    pub fn status(&self) -> Arc<RoomStatus> {
        Arc::clone(&self.status)
    }

    pub fn room(&self) -> &R {
        &self.room
    }

    pub fn room_mut(&mut self) -> &mut R {
        &mut self.room
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    /// Applies one event from a connection task
    pub fn handle_event(&mut self, event: NetworkEvent) {
        let now = Instant::now();

        match event {
            NetworkEvent::Connected {
                addr,
                outbound,
                reply,
            } => {
                let id = self.clients.register(addr, outbound, now);
                match id {
                    Some(id) => self.room.on_connect(id, &mut self.clients),
                    None => warn!("Rejected connection from {}: server full", addr),
                }

                // The socket task is gone before it learned its id, so nobody
                // will ever report this connection's disconnect
                if reply.send(id).is_err() {
                    if let Some(id) = id {
                        self.disconnect(id);
                    }
                }
                self.refresh_status();
            }

            NetworkEvent::Message { id, message } => {
                if !self.clients.contains(id) {
                    return;
                }
                let kind = message.action_kind();
                if !self.clients.touch(id, kind, now) {
                    self.clients
                        .send_message(id, &ServerMessage::error(RATE_LIMIT_MESSAGE));
                    return;
                }
                self.room.on_message(id, message, &mut self.clients);
                // Roster changes show up in the status without waiting for a broadcast
                if kind == ActionKind::Join {
                    self.refresh_status();
                }
            }

            NetworkEvent::Disconnected { id } => {
                self.disconnect(id);
                self.refresh_status();
            }
        }
    }

    fn disconnect(&mut self, id: ConnectionId) {
        if self.clients.contains(id) {
            self.room.on_disconnect(id, &mut self.clients);
            self.clients.unregister(&id);
        }
    }

    /// Advances the room by `dt` seconds
    pub fn tick(&mut self, dt: f32) {
        self.room.tick(dt, &mut self.clients);
        self.tick_count += 1;

        if self.tick_count % 100 == 0 && !self.clients.is_empty() {
            debug!(
                "Tick {}: {} clients, dt {:.1}ms",
                self.tick_count,
                self.clients.len(),
                dt * 1000.0
            );
        }
    }

    /// Runs one broadcast cycle; returns true when a frame went out
    pub fn broadcast(&mut self) -> bool {
        let sent = self.room.broadcast(&self.clients);
        self.refresh_status();
        sent
    }

    fn refresh_status(&self) {
        self.status.update(self.room.status(&self.clients));
    }

    /// Main server loop
    ///
    /// Tick, broadcast and persistence each run on their own interval and
    /// skip missed periods instead of queueing them. Returns once `shutdown`
    /// completes, after a final save.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let mut tick_interval = interval_at(start + self.timing.tick_period, self.timing.tick_period);
        let mut broadcast_interval = interval_at(
            start + self.timing.broadcast_period,
            self.timing.broadcast_period,
        );
        let save_period = self.timing.save_period.unwrap_or(Duration::from_secs(3600));
        let mut save_interval = interval_at(start + save_period, save_period);
        let persist_enabled = self.timing.save_period.is_some();
        let mut save_task: Option<SaveTask> = None;

        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        broadcast_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        save_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let max_delta = self.timing.max_delta();
        let mut last_tick = start;
        tokio::pin!(shutdown);

        info!(
            "Running {} room: tick every {:?}, broadcast every {:?}",
            self.room.mode(),
            self.timing.tick_period,
            self.timing.broadcast_period
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event);
                }

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = capped_delta(now.duration_since(last_tick), max_delta);
                    last_tick = now;
                    self.tick(dt);
                }

                _ = broadcast_interval.tick() => {
                    self.broadcast();
                }

                _ = save_interval.tick(), if persist_enabled && save_task.is_none() => {
                    if let Some(job) = self.room.persist(false) {
                        save_task = Some(tokio::task::spawn_blocking(move || job.write()));
                    }
                }

                result = wait_for_save(&mut save_task), if save_task.is_some() => {
                    save_task = None;
                    self.room.persist_complete(save_succeeded(result, "Periodic"));
                }
            }
        }

        // The final snapshot must not race an older one onto the same file
        if let Some(handle) = save_task.take() {
            self.room.persist_complete(save_succeeded(handle.await, "Periodic"));
        }

        if let Some(job) = self.room.persist(true) {
            let result = tokio::task::spawn_blocking(move || job.write()).await;
            self.room.persist_complete(save_succeeded(result, "Final"));
        }

        Ok(())
    }
}

type SaveTask = JoinHandle<Result<usize, ServerError>>;

/// Resolves when the in-flight save finishes; pending forever without one.
async fn wait_for_save(task: &mut Option<SaveTask>) -> Result<Result<usize, ServerError>, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn save_succeeded(result: Result<Result<usize, ServerError>, JoinError>, label: &str) -> bool {
    match result {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            error!("{} save failed: {}", label, e);
            false
        }
        Err(e) => {
            error!("{} save task failed: {}", label, e);
            false
        }
    }
}

/// Converts the measured tick interval to seconds, capped at `max_delta`.
pub fn capped_delta(elapsed: Duration, max_delta: f32) -> f32 {
    let dt = elapsed.as_secs_f32();
    if dt > max_delta {
        warn!(
            "Tick delta {:.0}ms exceeds {:.0}ms, capping",
            dt * 1000.0,
            max_delta * 1000.0
        );
        max_delta
    } else {
        dt
    }
}

/// Drives one upgraded WebSocket until either side closes it
///
/// Inbound text frames are decoded here, so only well-formed messages reach
/// the run loop. Outbound frames arrive pre-encoded from the run loop.
pub async fn handle_socket(mut socket: WebSocket, addr: SocketAddr, events: EventSender) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    let (reply_tx, reply_rx) = oneshot::channel();

    let connected = NetworkEvent::Connected {
        addr,
        outbound: outbound_tx,
        reply: reply_tx,
    };
    if events.send(connected).is_err() {
        return;
    }

    let id = match reply_rx.await {
        Ok(Some(id)) => id,
        Ok(None) => {
            let refusal = crate::broadcast::encode(&ServerMessage::error(SERVER_FULL_MESSAGE));
            let _ = socket.send(Message::Text(refusal.to_string())).await;
            let _ = socket.close().await;
            return;
        }
        Err(_) => return,
    };

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let reader_events = events.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match ClientMessage::from_json(&text) {
                    Ok(message) => {
                        if reader_events
                            .send(NetworkEvent::Message { id, message })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => debug!("Dropping frame from client {}: {}", id, e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error from client {}: {}", id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if events.send(NetworkEvent::Disconnected { id }).is_err() {
        debug!("Run loop already stopped while client {} left", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaRoom;
    use crate::block_room::BlockRoom;
    use crate::blocks::BlockWorld;
    use crate::config::{ArenaConfig, RatePolicies};
    use crate::scores::ScoreReporter;
    use crate::session::SessionPhase;
    use shared::{BlockAction, WorldSnapshot};
    use std::path::PathBuf;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn block_server() -> Server<BlockRoom> {
        let room = BlockRoom::new(BlockWorld::new(), PathBuf::from("unused.json"), 1024);
        Server::new(
            room,
            ClientManager::new(8, RatePolicies::default()),
            LoopTiming::default(),
        )
    }

    fn arena_server(max_clients: usize) -> Server<ArenaRoom> {
        let config = ArenaConfig::default();
        let room = ArenaRoom::new(config, Some(1), ScoreReporter::disabled());
        Server::new(
            room,
            ClientManager::new(max_clients, RatePolicies::default()),
            LoopTiming::default(),
        )
    }

    fn connect<R: Room>(server: &mut Server<R>) -> (Option<ConnectionId>, UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        server.handle_event(NetworkEvent::Connected {
            addr: "127.0.0.1:4000".parse().unwrap(),
            outbound: tx,
            reply: reply_tx,
        });
        (reply_rx.try_recv().unwrap(), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Frame>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(ServerMessage::from_json(&frame).unwrap());
        }
        messages
    }

    fn place(x: i64) -> ClientMessage {
        ClientMessage::BlockUpdate {
            x,
            y: 0,
            block_id: Some("stone".to_string()),
            action: BlockAction::Place,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_build_in_window_is_rejected() {
        let mut server = block_server();
        let (id, mut rx) = connect(&mut server);
        let id = id.unwrap();
        drain(&mut rx);

        for x in 0..11 {
            server.handle_event(NetworkEvent::Message {
                id,
                message: place(x),
            });
        }
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::error(RATE_LIMIT_MESSAGE)]
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        server.handle_event(NetworkEvent::Message {
            id,
            message: place(20),
        });
        assert!(drain(&mut rx).is_empty());

        server.tick(0.05);
        assert_eq!(server.room().world().len(), 11);
        assert!(server.clients().contains(id));
    }

    #[tokio::test]
    async fn test_full_server_replies_none() {
        let mut server = arena_server(1);
        let (first, _rx1) = connect(&mut server);
        let (second, _rx2) = connect(&mut server);

        assert_eq!(first, Some(ConnectionId(1)));
        assert_eq!(second, None);
        assert_eq!(server.clients().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_reply_unregisters() {
        let mut server = arena_server(4);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        drop(reply_rx);

        server.handle_event(NetworkEvent::Connected {
            addr: "127.0.0.1:4001".parse().unwrap(),
            outbound: tx,
            reply: reply_tx,
        });
        assert!(server.clients().is_empty());
    }

    #[tokio::test]
    async fn test_status_counts_joined_players_immediately() {
        let mut server = arena_server(4);
        let (a, _rx_a) = connect(&mut server);
        let (_b, _rx_b) = connect(&mut server);
        let a = a.unwrap();

        server.handle_event(NetworkEvent::Message {
            id: a,
            message: ClientMessage::Join {
                nickname: "ana".to_string(),
            },
        });

        // No tick or broadcast has run yet
        let status = server.status().get();
        assert_eq!(status.players, 1);
        assert_eq!(status.connections, 2);

        server.room_mut().world_mut().remove_snake(a);
        server.clients.set_phase(a, SessionPhase::Dead);
        server.broadcast();
        assert_eq!(server.status().get().players, 1);
    }

    #[tokio::test]
    async fn test_connect_disconnect_cycles_release_memory() {
        let mut server = arena_server(4);

        for _ in 0..100 {
            let (id, _rx) = connect(&mut server);
            let id = id.unwrap();
            server.handle_event(NetworkEvent::Message {
                id,
                message: ClientMessage::Join {
                    nickname: "cycler".to_string(),
                },
            });
            server.handle_event(NetworkEvent::Message {
                id,
                message: ClientMessage::Input {
                    angle: Some(0.5),
                    boosting: Some(false),
                },
            });
            server.handle_event(NetworkEvent::Disconnected { id });
        }

        assert!(server.clients().is_empty());
        assert_eq!(server.clients().tracked_windows(), 0);
        assert_eq!(server.room().world().snakes().count(), 0);
        assert_eq!(server.status().get().players, 0);
    }

    #[tokio::test]
    async fn test_disconnected_player_absent_from_next_broadcast() {
        let mut server = arena_server(4);
        let (a, _rx_a) = connect(&mut server);
        let (b, mut rx_b) = connect(&mut server);
        let (a, b) = (a.unwrap(), b.unwrap());
        for id in [a, b] {
            server.handle_event(NetworkEvent::Message {
                id,
                message: ClientMessage::Join {
                    nickname: format!("p{}", id),
                },
            });
        }
        server.tick(0.05);
        server.broadcast();
        drain(&mut rx_b);

        server.handle_event(NetworkEvent::Disconnected { id: a });
        server.tick(0.05);
        assert!(server.broadcast());

        match drain(&mut rx_b).pop() {
            Some(ServerMessage::State { players, .. }) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, b.0);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_block_room_snapshot_on_connect() {
        let mut server = block_server();
        let (id, mut rx) = connect(&mut server);

        assert_eq!(server.clients().phase(id.unwrap()), Some(SessionPhase::Alive));
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::WorldSnapshot(WorldSnapshot::Blocks(
                Default::default()
            ))]
        );
        assert_eq!(server.status().get().connections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_broadcast_cadence_and_steady_heading() {
        let config = ArenaConfig {
            world_size: 5000.0,
            food_count: 1000,
            ..ArenaConfig::default()
        };
        let room = ArenaRoom::new(config, Some(7), ScoreReporter::disabled());
        let server = Server::new(
            room,
            ClientManager::new(4, RatePolicies::default()),
            LoopTiming::default(),
        );
        let events = server.events();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let (tx, rx) = mpsc::unbounded_channel();
            let (reply_tx, reply_rx) = oneshot::channel();
            events
                .send(NetworkEvent::Connected {
                    addr: "127.0.0.1:4002".parse().unwrap(),
                    outbound: tx,
                    reply: reply_tx,
                })
                .unwrap();
            let id = reply_rx.await.unwrap().unwrap();
            events
                .send(NetworkEvent::Message {
                    id,
                    message: ClientMessage::Join {
                        nickname: format!("p{}", id),
                    },
                })
                .unwrap();
            ids.push(id);
            receivers.push(rx);
        }

        // 2 seconds at 20 ticks/s with an input every tick
        for _ in 0..40 {
            events
                .send(NetworkEvent::Message {
                    id: ids[0],
                    message: ClientMessage::Input {
                        angle: Some(0.0),
                        boosting: Some(false),
                    },
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let expected = 2 * shared::BROADCAST_RATE as i64;
        let mut head_xs = Vec::new();
        for (index, rx) in receivers.iter_mut().enumerate() {
            let states: Vec<ServerMessage> = drain(rx)
                .into_iter()
                .filter(|m| matches!(m, ServerMessage::State { .. }))
                .collect();
            let count = states.len() as i64;
            assert!((count - expected).abs() <= 1, "got {} states", count);

            if index == 0 {
                for state in &states {
                    if let ServerMessage::State { players, .. } = state {
                        let me = players.iter().find(|p| p.id == ids[0].0).unwrap();
                        head_xs.push(me.segments[0].x);
                    }
                }
            }
        }

        assert!(head_xs.windows(2).all(|w| w[1] >= w[0]), "{:?}", head_xs);
        assert!(head_xs.last().unwrap() > head_xs.first().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_save_follows_periodic_save() {
        let dir = tempfile::tempdir().unwrap();
        let world_file = dir.path().join("world.json");
        let room = BlockRoom::new(BlockWorld::new(), world_file.clone(), 1024);
        let timing = LoopTiming {
            save_period: Some(Duration::from_millis(100)),
            ..LoopTiming::default()
        };
        let server = Server::new(room, ClientManager::new(4, RatePolicies::default()), timing);
        let events = server.events();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stop_rx.await;
        }));

        let (tx, _rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        events
            .send(NetworkEvent::Connected {
                addr: "127.0.0.1:4003".parse().unwrap(),
                outbound: tx,
                reply: reply_tx,
            })
            .unwrap();
        let id = reply_rx.await.unwrap().unwrap();

        events.send(NetworkEvent::Message { id, message: place(1) }).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Applied on the next tick, then shut down while the periodic save may
        // still be writing
        events.send(NetworkEvent::Message { id, message: place(2) }).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let saved = BlockWorld::load(&world_file).unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.get(2, 0).is_some());
    }

    #[test]
    fn test_capped_delta() {
        assert_eq!(capped_delta(Duration::from_millis(50), 0.2), 0.05);
        assert_eq!(capped_delta(Duration::from_secs(3), 0.2), 0.2);
    }
}
