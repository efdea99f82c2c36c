//! Client transport: WebSocket connection and join handshake

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{
    JoinRequest, JoinResponse, JumpCommand, Message, PlayerInput, ProtocolError, Rgb, Snapshot,
    SpawnDummies, Vec3,
};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("join rejected: {0}")]
    Rejected(String),
    #[error("timed out waiting for join response")]
    JoinTimeout,
    #[error("connection closed by server")]
    Closed,
}

/// Sending half of a joined connection
pub struct ClientSender {
    sink: WsSink,
    entity_id: u32,
}

impl ClientSender {
    pub fn entity_id(&self) -> u32 {
        self.entity_id
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        self.sink.send(WsMessage::text(message.encode())).await?;
        Ok(())
    }

    pub async fn send_input(&mut self, movement: Vec3) -> Result<(), ClientError> {
        let input = PlayerInput::new(self.entity_id, movement);
        self.send(&Message::PlayerInput(input)).await
    }

    pub async fn send_jump(&mut self) -> Result<(), ClientError> {
        let jump = JumpCommand {
            player_id: self.entity_id,
        };
        self.send(&Message::JumpCommand(jump)).await
    }

    pub async fn spawn_dummies(&mut self, count: u32) -> Result<(), ClientError> {
        self.send(&Message::SpawnDummies(SpawnDummies { count })).await
    }

    pub async fn delete_all_dummies(&mut self) -> Result<(), ClientError> {
        self.send(&Message::DeleteAllDummies).await
    }

    /// Sends a close frame. Errors are ignored; the socket is going away anyway.
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Error while closing connection: {}", e);
        }
    }
}

/// Receiving half of a connection
pub struct ClientReceiver {
    stream: SplitStream<WsStream>,
}

impl ClientReceiver {
    /// Next decodable message. Malformed frames are logged and skipped.
    pub async fn next_message(&mut self) -> Result<Message, ClientError> {
        loop {
            let frame = match self.stream.next().await {
                Some(frame) => frame?,
                None => return Err(ClientError::Closed),
            };

            let decoded = match frame {
                WsMessage::Text(text) => Message::decode(text.as_str()),
                WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => Message::decode(text),
                    Err(_) => {
                        warn!("Skipping non UTF-8 binary frame");
                        continue;
                    }
                },
                WsMessage::Close(_) => return Err(ClientError::Closed),
                _ => continue,
            };

            match decoded {
                Ok(message) => return Ok(message),
                Err(e) => warn!("Skipping malformed message from server: {}", e),
            }
        }
    }

    /// Next GAME_STATE, skipping anything else.
    pub async fn next_snapshot(&mut self) -> Result<Snapshot, ClientError> {
        loop {
            if let Message::GameState(snapshot) = self.next_message().await? {
                return Ok(snapshot);
            }
        }
    }
}

/// WebSocket upgrade, JOIN_REQUEST and the matching JOIN_RESPONSE.
async fn handshake(
    url: &str,
    nickname: &str,
    color: Rgb,
) -> Result<(WsSink, ClientReceiver, JoinResponse), ClientError> {
    let (websocket, _response) = connect_async(url).await?;
    let (mut sink, stream) = websocket.split();
    let mut receiver = ClientReceiver { stream };

    let request = Message::JoinRequest(JoinRequest {
        nickname: nickname.to_string(),
        color,
    });
    sink.send(WsMessage::text(request.encode())).await?;

    loop {
        if let Message::JoinResponse(response) = receiver.next_message().await? {
            return Ok((sink, receiver, response));
        }
    }
}

/// A connection that completed the join handshake
pub struct GameClient {
    sender: ClientSender,
    receiver: ClientReceiver,
    nickname: String,
}

impl GameClient {
    /// Connects to `url`, sends JOIN_REQUEST and waits for the JOIN_RESPONSE,
    /// all within `timeout`. A rejection closes the socket and returns
    /// `ClientError::Rejected` with the server's reason.
    pub async fn join(
        url: &str,
        nickname: &str,
        color: Rgb,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let (mut sink, receiver, response) =
            tokio::time::timeout(timeout, handshake(url, nickname, color))
                .await
                .map_err(|_| ClientError::JoinTimeout)??;

        if !response.success {
            let _ = sink.close().await;
            return Err(ClientError::Rejected(response.message));
        }

        let entity_id = response
            .player_id
            .ok_or(ClientError::Protocol(ProtocolError::MissingField("playerId")))?;
        info!("Joined {} as {} (entity {})", url, response.nickname, entity_id);

        Ok(Self {
            sender: ClientSender { sink, entity_id },
            receiver,
            nickname: response.nickname,
        })
    }

    pub fn entity_id(&self) -> u32 {
        self.sender.entity_id
    }

    /// Nickname as accepted by the server (trimmed).
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn sender(&mut self) -> &mut ClientSender {
        &mut self.sender
    }

    pub fn receiver(&mut self) -> &mut ClientReceiver {
        &mut self.receiver
    }

    /// Splits into halves that can be driven from separate branches or tasks.
    pub fn into_split(self) -> (ClientSender, ClientReceiver) {
        (self.sender, self.receiver)
    }
}
