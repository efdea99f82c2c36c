//! Server network layer: WebSocket accept loop and tick coordination

use crate::broadcast::{SnapshotBroadcaster, SnapshotReceiver};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::game::GameState;
use crate::session::{ConnectionId, JoinState, Outbound, SessionRegistry};
use log::{debug, error, info, warn};
use shared::{JoinRequest, JoinResponse, Message, Snapshot, MAX_NICKNAME_LEN};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Events sent from connection tasks to the coordinator
#[derive(Debug)]
pub enum ServerEvent {
    Inbound {
        connection_id: ConnectionId,
        message: Message,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
}

/// Owns the world, the sessions and the broadcaster
///
/// All mutation happens through `&mut self` on the coordinator task: joins,
/// input, disconnects and ticks are applied strictly one after another, so a
/// published snapshot never observes a half-applied join or removal.
#[derive(Debug)]
pub struct Coordinator {
    config: ServerConfig,
    game_state: GameState,
    sessions: SessionRegistry,
    broadcaster: SnapshotBroadcaster,
}

impl Coordinator {
    pub fn new(config: ServerConfig, game_state: GameState) -> Self {
        Self {
            config,
            game_state,
            sessions: SessionRegistry::new(),
            broadcaster: SnapshotBroadcaster::new(),
        }
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.broadcaster.subscribe()
    }

    pub fn open_session(
        &mut self,
        peer: SocketAddr,
        outbound: mpsc::Sender<Outbound>,
    ) -> ConnectionId {
        self.sessions.open(peer, outbound)
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Inbound {
                connection_id,
                message,
            } => self.handle_message(connection_id, message),
            ServerEvent::Disconnected { connection_id } => {
                if let Some(entity_id) = self.sessions.close(connection_id) {
                    self.game_state.remove_entity(entity_id);
                }
                self.sessions.forget(connection_id);
            }
        }
    }

    fn handle_message(&mut self, connection_id: ConnectionId, message: Message) {
        let Some(session) = self.sessions.get(connection_id) else {
            debug!(
                "Ignoring {} from unknown connection {}",
                message.message_type(),
                connection_id
            );
            return;
        };

        match (session.state(), session.bound_entity()) {
            (JoinState::Closed, _) => debug!(
                "Ignoring {} from closed connection {}",
                message.message_type(),
                connection_id
            ),
            (JoinState::Connecting, _) => match message {
                Message::JoinRequest(request) => self.handle_join(connection_id, request),
                other => warn!(
                    "Connection {} sent {} before joining, dropped",
                    connection_id,
                    other.message_type()
                ),
            },
            (JoinState::Joined, Some(entity_id)) => {
                self.handle_joined(connection_id, entity_id, message)
            }
            (JoinState::Joined, None) => {
                error!("Joined connection {} has no entity", connection_id)
            }
        }
    }

    fn handle_join(&mut self, connection_id: ConnectionId, request: JoinRequest) {
        let Some(nickname) = validate_nickname(&request.nickname) else {
            self.reject(connection_id, "invalid nickname");
            return;
        };

        if self.game_state.player_count() >= self.config.max_players {
            info!(
                "Rejecting {} on connection {}: server full ({} players)",
                nickname,
                connection_id,
                self.game_state.player_count()
            );
            self.reject(connection_id, "Server is full");
            return;
        }

        let entity_id = self
            .game_state
            .add_player(nickname.clone(), request.color.clamped());
        self.sessions.bind(connection_id, entity_id);

        let reply = Message::JoinResponse(JoinResponse::accepted(entity_id, nickname)).encode();
        self.sessions.send(connection_id, Outbound::Joined(reply));
    }

    fn reject(&mut self, connection_id: ConnectionId, reason: &str) {
        let reply = Message::JoinResponse(JoinResponse::rejected(reason)).encode();
        self.sessions.send(connection_id, Outbound::Rejected(reply));
        self.sessions.close(connection_id);
    }

    fn handle_joined(&mut self, connection_id: ConnectionId, entity_id: u32, message: Message) {
        match message {
            Message::PlayerInput(input) => {
                if input.player_id != entity_id {
                    warn!(
                        "Connection {} sent input for entity {} but controls {}",
                        connection_id, input.player_id, entity_id
                    );
                    return;
                }
                self.game_state.set_movement(entity_id, input.movement());
            }
            Message::JumpCommand(jump) => {
                if jump.player_id != entity_id {
                    warn!(
                        "Connection {} sent jump for entity {} but controls {}",
                        connection_id, jump.player_id, entity_id
                    );
                    return;
                }
                self.game_state.request_jump(entity_id);
            }
            Message::SpawnDummies(spawn) => {
                let spawned = self.game_state.spawn_dummies(spawn.count as usize);
                debug!(
                    "Connection {} requested {} dummies, spawned {}",
                    connection_id,
                    spawn.count,
                    spawned.len()
                );
            }
            Message::DeleteAllDummies => {
                let removed = self.game_state.delete_all_dummies();
                debug!("Connection {} deleted {} dummies", connection_id, removed);
            }
            Message::JoinRequest(_) => {
                warn!("Connection {} is already joined", connection_id)
            }
            other => warn!(
                "Connection {} sent server-only message {}",
                connection_id,
                other.message_type()
            ),
        }
    }

    /// Advances the world one step and publishes the snapshot.
    pub fn tick(&mut self) -> Arc<Snapshot> {
        let snapshot = Arc::new(self.game_state.step());
        self.broadcaster.publish(Arc::clone(&snapshot));

        let tick_rate = u64::from(self.config.simulation.effective_tick_rate());
        if snapshot.tick % tick_rate == 0 {
            debug!(
                "Tick {}: {} players, {} dummies, {} sessions",
                snapshot.tick,
                snapshot.players.len(),
                snapshot.dummies.len(),
                self.sessions.len()
            );
        }
        snapshot
    }

    /// Closes every session and releases their entities.
    pub fn shutdown(&mut self) {
        for entity_id in self.sessions.close_all() {
            self.game_state.remove_entity(entity_id);
        }
    }
}

/// Trims the nickname and checks its length; `None` if it is unusable.
pub fn validate_nickname(raw: &str) -> Option<String> {
    let nickname = raw.trim();
    let length = nickname.chars().count();
    if length == 0 || length > MAX_NICKNAME_LEN {
        return None;
    }
    Some(nickname.to_string())
}

/// Main server: accepts connections and drives the coordinator
pub struct Server {
    listener: TcpListener,
    coordinator: Coordinator,
    control_queue: usize,
    tick_duration: Duration,
    join_timeout: Duration,
    shutdown_grace: Duration,
    events_tx: mpsc::Sender<ServerEvent>,
    events_rx: mpsc::Receiver<ServerEvent>,
    connections: JoinSet<()>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::channel(config.event_queue.max(1));
        let control_queue = config.control_queue.max(1);
        let tick_duration = config.simulation.tick_duration();
        let join_timeout = config.join_timeout;
        let shutdown_grace = config.shutdown_grace;
        let game_state = GameState::new(config.simulation.clone());

        Ok(Server {
            listener,
            coordinator: Coordinator::new(config, game_state),
            control_queue,
            tick_duration,
            join_timeout,
            shutdown_grace,
            events_tx,
            events_rx,
            connections: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Receiver of every published snapshot, for observers in the same process.
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.coordinator.subscribe()
    }

    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until `shutdown` resolves, then closes every connection and waits
    /// up to `shutdown_grace` for them to finish.
    pub async fn run_until<F>(mut self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "Server running at {:.1} Hz",
            1.0 / self.tick_duration.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(event) = self.events_rx.recv() => self.coordinator.handle_event(event),
                Some(_) = self.connections.join_next() => {}
                _ = ticker.tick() => {
                    self.coordinator.tick();
                }
            }
        }

        self.coordinator.shutdown();
        self.drain_connections().await;
        Ok(())
    }

    /// Lets connection tasks flush their close frames, then aborts stragglers.
    async fn drain_connections(&mut self) {
        let grace = sleep(self.shutdown_grace);
        tokio::pin!(grace);

        while !self.connections.is_empty() {
            tokio::select! {
                _ = &mut grace => {
                    warn!(
                        "{} connections still open after shutdown grace, aborting",
                        self.connections.len()
                    );
                    self.connections.abort_all();
                    break;
                }
                _ = self.connections.join_next() => {}
                Some(event) = self.events_rx.recv() => self.coordinator.handle_event(event),
            }
        }
        debug!("All connection tasks finished");
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.control_queue);
        let id = self.coordinator.open_session(peer, outbound_tx);
        let connection = Connection {
            id,
            peer,
            events: self.events_tx.clone(),
            outbound: outbound_rx,
            snapshots: self.coordinator.subscribe(),
            join_timeout: self.join_timeout,
        };
        self.connections.spawn(connection.run(stream));
    }
}
