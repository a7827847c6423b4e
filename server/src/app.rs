//! Process wiring: builds the configured room, binds the listener and spawns
//! the run loop, the HTTP server and the score writer.

use crate::arena::ArenaRoom;
use crate::block_room::BlockRoom;
use crate::blocks::BlockWorld;
use crate::client_manager::ClientManager;
use crate::config::{ArenaConfig, Cli, Mode, RatePolicies};
use crate::error::ServerError;
use crate::http::{self, AppState};
use crate::network::{EventSender, Server};
use crate::room::{Room, RoomStatus};
use crate::scores::{spawn_score_writer, ScoreStore};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handles to a started server.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub status: Arc<RoomStatus>,
    shutdown_tx: oneshot::Sender<()>,
    game_handle: JoinHandle<Result<(), ServerError>>,
    http_handle: JoinHandle<Result<(), ServerError>>,
    score_handle: JoinHandle<()>,
}

impl RunningServer {
    /// Resolves if the HTTP server stops on its own.
    pub async fn http_stopped(&mut self) -> Result<(), ServerError> {
        match (&mut self.http_handle).await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Serve(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            ))),
        }
    }

    /// Stops the run loop (which saves the world one last time) and the
    /// HTTP server.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.shutdown_tx.send(());
        let result = match self.game_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Game loop task panicked: {}", e);
                Ok(())
            }
        };
        self.http_handle.abort();
        self.score_handle.abort();
        result
    }
}

/// Starts everything described by `cli`.
///
/// Fails only when the world file cannot be loaded or the address cannot be
/// bound.
pub async fn launch(cli: &Cli) -> Result<RunningServer, ServerError> {
    let scores = ScoreStore::load(&cli.scores_file).shared();
    let (reporter, score_handle) = spawn_score_writer(Arc::clone(&scores));
    let clients = ClientManager::new(cli.max_clients, RatePolicies::default());
    let timing = cli.timing();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let (events, status, game_handle) = match &cli.mode {
        Mode::Arena(args) => {
            let room = ArenaRoom::new(ArenaConfig::from(args), args.seed, reporter);
            spawn_loop(Server::new(room, clients, timing), shutdown_rx)
        }
        Mode::Blocks(args) => {
            let world = BlockWorld::load(&args.world_file)?;
            let room = BlockRoom::new(world, args.world_file.clone(), args.grid_size);
            spawn_loop(Server::new(room, clients, timing), shutdown_rx)
        }
    };

    let address = cli.bind_address();
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(source) => {
            let _ = shutdown_tx.send(());
            return Err(ServerError::Bind {
                addr: address,
                source,
            });
        }
    };
    let addr = listener.local_addr().map_err(|source| ServerError::Bind {
        addr: address.clone(),
        source,
    })?;

    let app = http::router(
        AppState::new(events, Arc::clone(&status), scores),
        cli.origin.as_deref(),
    );
    let http_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(ServerError::Serve)
    });

    info!("Server listening on {} ({} mode)", addr, cli.mode.name());
    info!("WebSocket endpoint: ws://{}/ws", addr);

    Ok(RunningServer {
        addr,
        status,
        shutdown_tx,
        game_handle,
        http_handle,
        score_handle,
    })
}

fn spawn_loop<R: Room>(
    server: Server<R>,
    shutdown_rx: oneshot::Receiver<()>,
) -> (
    EventSender,
    Arc<RoomStatus>,
    JoinHandle<Result<(), ServerError>>,
) {
    let events = server.events();
    let status = server.status();
    let handle = tokio::spawn(server.run(async move {
        let _ = shutdown_rx.await;
    }));
    (events, status, handle)
}
