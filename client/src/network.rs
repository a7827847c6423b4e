use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{BlockAction, ClientMessage, ProtocolError, ServerMessage};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("timed out waiting for the server")]
    Timeout,
    #[error("connection closed by the server")]
    Closed,
}

/// Headless WebSocket client for either room.
pub struct GameClient {
    socket: Socket,
    player_id: Option<u32>,
    world_size: Option<f32>,
}

impl GameClient {
    /// Connects to a `ws://host:port/ws` endpoint.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (socket, _response) = connect_async(url).await?;
        info!("Connected to {}", url);
        Ok(Self {
            socket,
            player_id: None,
            world_size: None,
        })
    }

    /// Id assigned by the last `joined` reply.
    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    pub fn world_size(&self) -> Option<f32> {
        self.world_size
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        self.send_raw(message.to_json()?).await
    }

    /// Sends a text frame as is. Useful for checking how the server treats
    /// garbage.
    pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn join(&mut self, nickname: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::Join {
            nickname: nickname.to_string(),
        })
        .await
    }

    pub async fn respawn(&mut self, nickname: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::Respawn {
            nickname: nickname.to_string(),
        })
        .await
    }

    pub async fn steer(&mut self, angle: f64, boosting: bool) -> Result<(), ClientError> {
        self.send(&ClientMessage::Input {
            angle: Some(angle),
            boosting: Some(boosting),
        })
        .await
    }

    pub async fn place_block(&mut self, x: i64, y: i64, block_id: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::BlockUpdate {
            x,
            y,
            block_id: Some(block_id.to_string()),
            action: BlockAction::Place,
        })
        .await
    }

    pub async fn remove_block(&mut self, x: i64, y: i64) -> Result<(), ClientError> {
        self.send(&ClientMessage::BlockUpdate {
            x,
            y,
            block_id: None,
            action: BlockAction::Remove,
        })
        .await
    }

    /// Next server message, or `None` once the server has closed the socket.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        while let Some(frame) = self.socket.next().await {
            match frame? {
                Message::Text(text) => {
                    let message = ServerMessage::from_json(&text)?;
                    if let ServerMessage::Joined {
                        player_id,
                        world_size,
                    } = &message
                    {
                        self.player_id = Some(*player_id);
                        self.world_size = Some(*world_size);
                    }
                    return Ok(Some(message));
                }
                Message::Close(frame) => {
                    debug!("Server closed the connection: {:?}", frame);
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn recv_timeout(&mut self, limit: Duration) -> Result<ServerMessage, ClientError> {
        match timeout(limit, self.recv()).await {
            Ok(Ok(Some(message))) => Ok(message),
            Ok(Ok(None)) => Err(ClientError::Closed),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Reads until a message matches `accept`, discarding the rest.
    pub async fn recv_until<F>(&mut self, limit: Duration, mut accept: F) -> Result<ServerMessage, ClientError>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout);
            }
            let message = self.recv_timeout(remaining).await?;
            if accept(&message) {
                return Ok(message);
            }
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.socket.close(None).await {
            warn!("Error while closing connection: {}", e);
        }
    }
}
