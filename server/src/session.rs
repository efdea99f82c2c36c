//! Connection sessions and their lifecycle
//!
//! Every accepted WebSocket gets a `Session` in the `SessionRegistry`. A
//! session moves through three states:
//! - `Connecting`: handshake done, waiting for JOIN_REQUEST
//! - `Joined`: bound to exactly one player entity
//! - `Closed`: terminal; the bound entity has been released
//!
//! The registry lives on the coordinator task. Connection tasks never touch it
//! directly; they receive `Outbound` commands over their control channel.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Connecting,
    Joined,
    Closed,
}

/// Commands from the coordinator to a connection's writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Accepting JOIN_RESPONSE; snapshots start flowing after it
    Joined(String),
    /// Rejecting JOIN_RESPONSE; the connection closes once it is flushed
    Rejected(String),
    /// Close without a reply
    Close,
}

#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    peer: SocketAddr,
    state: JoinState,
    bound_entity: Option<u32>,
    outbound: mpsc::Sender<Outbound>,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn bound_entity(&self) -> Option<u32> {
        self.bound_entity
    }

    /// Queues a command without waiting; a full or closed queue is logged.
    fn send(&self, command: Outbound) -> bool {
        match self.outbound.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Control queue of connection {} is full", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} already gone", self.id);
                false
            }
        }
    }
}

/// All sessions known to the coordinator, keyed by connection id
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Session>,
    next_connection_id: ConnectionId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_connection_id: 1,
        }
    }

    /// Registers a freshly accepted connection in the `Connecting` state.
    pub fn open(&mut self, peer: SocketAddr, outbound: mpsc::Sender<Outbound>) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.sessions.insert(
            id,
            Session {
                id,
                peer,
                state: JoinState::Connecting,
                bound_entity: None,
                outbound,
            },
        );
        debug!("Session {} opened for {}", id, peer);
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Binds a connecting session to its player entity.
    /// Returns false if the session is unknown or not `Connecting`.
    pub fn bind(&mut self, id: ConnectionId, entity_id: u32) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if session.state == JoinState::Connecting => {
                session.state = JoinState::Joined;
                session.bound_entity = Some(entity_id);
                info!(
                    "Session {} from {} joined as entity {}",
                    id, session.peer, entity_id
                );
                true
            }
            _ => false,
        }
    }

    /// Moves the session to `Closed`. Only the first call reports the bound
    /// entity; later calls and unknown ids return `None`.
    pub fn close(&mut self, id: ConnectionId) -> Option<u32> {
        let session = self.sessions.get_mut(&id)?;
        if session.state == JoinState::Closed {
            return None;
        }
        session.state = JoinState::Closed;
        session.bound_entity.take()
    }

    /// Drops a session once its transport is gone.
    pub fn forget(&mut self, id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    pub fn send(&self, id: ConnectionId, command: Outbound) -> bool {
        self.sessions
            .get(&id)
            .map(|session| session.send(command))
            .unwrap_or(false)
    }

    /// Closes every session, telling each connection to hang up.
    /// Returns the entities that were bound.
    pub fn close_all(&mut self) -> Vec<u32> {
        let ids: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        let mut released = Vec::new();
        for id in ids {
            self.send(id, Outbound::Close);
            released.extend(self.close(id));
        }
        released
    }

    pub fn joined_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|session| session.state == JoinState::Joined)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_open_assigns_unique_ids() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let a = registry.open(peer(), tx.clone());
        let b = registry.open(peer(), tx);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(a).unwrap().state(), JoinState::Connecting);
    }

    #[test]
    fn test_bind_only_from_connecting() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.open(peer(), tx);

        assert!(registry.bind(id, 7));
        assert_eq!(registry.get(id).unwrap().state(), JoinState::Joined);
        assert_eq!(registry.get(id).unwrap().bound_entity(), Some(7));
        assert!(!registry.bind(id, 8));
        assert_eq!(registry.joined_count(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.open(peer(), tx);
        registry.bind(id, 3);

        assert_eq!(registry.close(id), Some(3));
        assert_eq!(registry.close(id), None);
        assert_eq!(registry.get(id).unwrap().state(), JoinState::Closed);
        assert_eq!(registry.close(999), None);
    }

    #[test]
    fn test_closed_session_cannot_rejoin() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.open(peer(), tx);
        registry.close(id);
        assert!(!registry.bind(id, 1));
    }

    #[test]
    fn test_send_reaches_connection() {
        let mut registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let id = registry.open(peer(), tx);

        assert!(registry.send(id, Outbound::Joined("hello".to_string())));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Joined("hello".to_string()));
        assert!(!registry.send(42, Outbound::Close));
    }

    #[test]
    fn test_close_all_releases_bound_entities() {
        let mut registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let joined = registry.open(peer(), tx.clone());
        registry.open(peer(), tx);
        registry.bind(joined, 5);

        assert_eq!(registry.close_all(), vec![5]);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }
}
