//! Per-connection transport task
//!
//! Each accepted TCP stream is upgraded to a WebSocket and split in two:
//! the reader decodes frames and forwards them to the coordinator, the writer
//! sends control replies and, once the session has joined, the latest
//! snapshot whenever a new one is published. When either half finishes the
//! other is dropped and the coordinator hears `Disconnected` exactly once.
//!
//! A peer gets `join_timeout` from TCP accept to finish both the upgrade and
//! the JOIN handshake; after that the connection is closed.

use crate::broadcast::SnapshotReceiver;
use crate::network::ServerEvent;
use crate::session::{ConnectionId, Outbound};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::Message;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

pub struct Connection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub events: mpsc::Sender<ServerEvent>,
    pub outbound: mpsc::Receiver<Outbound>,
    pub snapshots: SnapshotReceiver,
    pub join_timeout: Duration,
}

impl Connection {
    pub async fn run(self, stream: TcpStream) {
        let Connection {
            id,
            peer,
            events,
            outbound,
            snapshots,
            join_timeout,
        } = self;
        let join_deadline = Instant::now() + join_timeout;

        match timeout_at(join_deadline, accept_async(stream)).await {
            Ok(Ok(websocket)) => {
                info!("Connection {} established from {}", id, peer);
                let (sink, source) = websocket.split();
                tokio::select! {
                    _ = read_frames(id, source, &events) => {}
                    _ = write_frames(id, sink, outbound, snapshots, join_deadline) => {}
                }
                info!("Connection {} from {} closed", id, peer);
            }
            Ok(Err(e)) => warn!("WebSocket handshake with {} failed: {}", peer, e),
            Err(_) => warn!("WebSocket handshake with {} timed out", peer),
        }

        if events
            .send(ServerEvent::Disconnected { connection_id: id })
            .await
            .is_err()
        {
            debug!("Coordinator gone before connection {} closed", id);
        }
    }
}

async fn read_frames(id: ConnectionId, mut source: WsSource, events: &mpsc::Sender<ServerEvent>) {
    while let Some(frame) = source.next().await {
        let message = match frame {
            Ok(WsMessage::Text(text)) => decode(id, text.as_str()),
            Ok(WsMessage::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => decode(id, text),
                Err(_) => {
                    warn!("Dropping non UTF-8 binary frame from connection {}", id);
                    None
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => None,
            Err(e) => {
                debug!("Read error on connection {}: {}", id, e);
                break;
            }
        };

        if let Some(message) = message {
            let event = ServerEvent::Inbound {
                connection_id: id,
                message,
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
}

fn decode(id: ConnectionId, text: &str) -> Option<Message> {
    match Message::decode(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Dropping malformed message from connection {}: {}", id, e);
            None
        }
    }
}

async fn write_frames(
    id: ConnectionId,
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Outbound>,
    mut snapshots: SnapshotReceiver,
    join_deadline: Instant,
) {
    let mut joined = false;
    loop {
        tokio::select! {
            _ = sleep_until(join_deadline), if !joined => {
                warn!("Connection {} did not join in time, closing", id);
                let _ = sink.close().await;
                break;
            }
            command = outbound.recv() => match command {
                Some(Outbound::Joined(text)) => {
                    if let Err(e) = sink.send(WsMessage::text(text)).await {
                        debug!("Write error on connection {}: {}", id, e);
                        break;
                    }
                    joined = true;
                }
                Some(Outbound::Rejected(text)) => {
                    if let Err(e) = sink.send(WsMessage::text(text)).await {
                        debug!("Write error on connection {}: {}", id, e);
                    }
                    let _ = sink.close().await;
                    break;
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            changed = snapshots.changed(), if joined => {
                if changed.is_err() {
                    let _ = sink.close().await;
                    break;
                }
                let latest = snapshots.borrow_and_update().clone();
                if let Some(frame) = latest {
                    if let Err(e) = sink.send(WsMessage::Text(frame.text.clone())).await {
                        debug!("Write error on connection {}: {}", id, e);
                        break;
                    }
                }
            }
        }
    }
}
