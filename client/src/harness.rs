//! Load harness: many simulated clients against one server
//!
//! Each `SimulatedSession` is an independent tokio task that connects, joins
//! with a `Dummy_<n>` nickname and then streams PLAYER_INPUT at a fixed
//! interval, occasionally turning in a new random direction. Failures are
//! confined to the session they happen in.
//!
//! Sessions stay in the harness after they finish so their outcome can be
//! inspected; `prune_finished` is the only way to drop them. Dropping the
//! harness aborts every task, so no connection outlives it.

use crate::network::{ClientError, GameClient};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Message, Rgb, Vec3};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// WebSocket URL of the server, e.g. `ws://127.0.0.1:9002`
    pub server_url: String,
    /// Delay between consecutive connection attempts in `spawn_batch`
    pub stagger: Duration,
    /// Interval between PLAYER_INPUT messages of one session
    pub input_interval: Duration,
    /// Chance per input that the session picks a new direction
    pub direction_change_probability: f64,
    pub join_timeout: Duration,
    /// How long `teardown` waits for a session to close before aborting it
    pub teardown_timeout: Duration,
    pub nickname_prefix: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}", shared::DEFAULT_PORT),
            stagger: Duration::from_millis(200),
            input_interval: Duration::from_millis(100),
            direction_change_probability: 0.05,
            join_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(2),
            nickname_prefix: "Dummy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Joined = 1,
    Rejected = 2,
    Failed = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Joined,
            2 => SessionState::Rejected,
            3 => SessionState::Failed,
            _ => SessionState::Closed,
        }
    }

    pub fn is_finished(self) -> bool {
        !matches!(self, SessionState::Connecting | SessionState::Joined)
    }
}

/// Counters shared between a session task and the harness
#[derive(Debug)]
struct SessionStats {
    state: AtomicU8,
    /// Zero until joined; the server never hands out entity id 0
    entity_id: AtomicU32,
    inputs_sent: AtomicU64,
    snapshots_received: AtomicU64,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
            entity_id: AtomicU32::new(0),
            inputs_sent: AtomicU64::new(0),
            snapshots_received: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }
}

pub struct SimulatedSession {
    index: usize,
    nickname: String,
    stats: Arc<SessionStats>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SimulatedSession {
    fn spawn(index: usize, config: &HarnessConfig) -> Self {
        let nickname = format!("{}_{}", config.nickname_prefix, index);
        let stats = Arc::new(SessionStats::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut rng = StdRng::from_entropy();
        let color = Rgb::new(rng.gen(), rng.gen(), rng.gen());

        let task = tokio::spawn(run_session(
            nickname.clone(),
            color,
            config.clone(),
            Arc::clone(&stats),
            shutdown_rx,
            rng,
        ));

        Self {
            index,
            nickname,
            stats,
            shutdown,
            task: Some(task),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn state(&self) -> SessionState {
        self.stats.state()
    }

    pub fn entity_id(&self) -> Option<u32> {
        match self.stats.entity_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn inputs_sent(&self) -> u64 {
        self.stats.inputs_sent.load(Ordering::Relaxed)
    }

    pub fn snapshots_received(&self) -> u64 {
        self.stats.snapshots_received.load(Ordering::Relaxed)
    }

    /// Asks the session to close its connection. Safe to call repeatedly.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// True once the session task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    async fn join_task(&mut self, timeout: Duration) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            warn!("[{}] Did not close in time, aborting", self.nickname);
            task.abort();
            self.stats.set_state(SessionState::Closed);
        }
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_session(
    nickname: String,
    color: Rgb,
    config: HarnessConfig,
    stats: Arc<SessionStats>,
    mut shutdown: watch::Receiver<bool>,
    mut rng: StdRng,
) {
    let joined = tokio::select! {
        result = GameClient::join(&config.server_url, &nickname, color, config.join_timeout) => result,
        _ = shutdown.changed() => {
            stats.set_state(SessionState::Closed);
            return;
        }
    };

    let client = match joined {
        Ok(client) => client,
        Err(ClientError::Rejected(reason)) => {
            warn!("[{}] Join rejected: {}", nickname, reason);
            stats.set_state(SessionState::Rejected);
            return;
        }
        Err(e) => {
            warn!("[{}] Failed to join: {}", nickname, e);
            stats.set_state(SessionState::Failed);
            return;
        }
    };

    stats.entity_id.store(client.entity_id(), Ordering::Release);
    stats.set_state(SessionState::Joined);
    info!("[{}] Joined as entity {}", nickname, client.entity_id());

    let probability = config.direction_change_probability.clamp(0.0, 1.0);
    let (mut sender, mut receiver) = client.into_split();
    let mut movement = random_direction(&mut rng);
    let mut ticker = interval(config.input_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            _ = shutdown.changed() => break SessionState::Closed,
            message = receiver.next_message() => match message {
                Ok(Message::GameState(_)) => {
                    stats.snapshots_received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(other) => debug!("[{}] Ignoring {}", nickname, other.message_type()),
                Err(e) => {
                    warn!("[{}] Connection lost: {}", nickname, e);
                    break SessionState::Failed;
                }
            },
            _ = ticker.tick() => {
                if rng.gen_bool(probability) {
                    movement = random_direction(&mut rng);
                }
                if let Err(e) = sender.send_input(movement).await {
                    warn!("[{}] Failed to send input: {}", nickname, e);
                    break SessionState::Failed;
                }
                stats.inputs_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    };

    sender.close().await;
    stats.set_state(outcome);
    debug!("[{}] Session ended: {:?}", nickname, outcome);
}

/// Random horizontal direction of unit length.
fn random_direction<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    loop {
        let direction = Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0));
        if direction.length() > 0.01 {
            return direction.normalized();
        }
    }
}

/// Counts of sessions per state plus traffic totals
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarnessSummary {
    pub connecting: usize,
    pub joined: usize,
    pub rejected: usize,
    pub failed: usize,
    pub closed: usize,
    pub inputs_sent: u64,
    pub snapshots_received: u64,
}

impl HarnessSummary {
    pub fn total(&self) -> usize {
        self.connecting + self.joined + self.rejected + self.failed + self.closed
    }
}

impl fmt::Display for HarnessSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sessions: {} connecting, {} joined, {} rejected, {} failed, {} closed | {} inputs sent, {} snapshots received",
            self.total(),
            self.connecting,
            self.joined,
            self.rejected,
            self.failed,
            self.closed,
            self.inputs_sent,
            self.snapshots_received
        )
    }
}

pub struct LoadHarness {
    config: HarnessConfig,
    sessions: Vec<SimulatedSession>,
    spawned_total: usize,
}

impl LoadHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            sessions: Vec::new(),
            spawned_total: 0,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Starts one simulated session without waiting for it to join.
    /// Must be called from within a tokio runtime.
    pub fn spawn_one(&mut self) -> &SimulatedSession {
        self.spawned_total += 1;
        let session = SimulatedSession::spawn(self.spawned_total, &self.config);
        debug!("Spawned session {}", session.nickname());
        self.sessions.push(session);
        &self.sessions[self.sessions.len() - 1]
    }

    /// Starts `count` sessions, waiting `stagger` between connection attempts.
    pub async fn spawn_batch(&mut self, count: usize) {
        info!(
            "Spawning {} sessions against {} ({:?} apart)",
            count, self.config.server_url, self.config.stagger
        );
        for i in 0..count {
            self.spawn_one();
            if i + 1 < count {
                sleep(self.config.stagger).await;
            }
        }
    }

    /// Closes every session and waits for them to finish, aborting any that
    /// take longer than `teardown_timeout`. Finished sessions are kept.
    pub async fn teardown(&mut self) {
        info!("Tearing down {} sessions", self.sessions.len());
        for session in &self.sessions {
            session.close();
        }
        let timeout = self.config.teardown_timeout;
        for session in &mut self.sessions {
            session.join_task(timeout).await;
        }
    }

    /// Removes sessions whose task has exited. Returns how many were removed.
    pub fn prune_finished(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|session| !session.is_finished());
        before - self.sessions.len()
    }

    pub fn sessions(&self) -> &[SimulatedSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn summary(&self) -> HarnessSummary {
        let mut summary = HarnessSummary::default();
        for session in &self.sessions {
            match session.state() {
                SessionState::Connecting => summary.connecting += 1,
                SessionState::Joined => summary.joined += 1,
                SessionState::Rejected => summary.rejected += 1,
                SessionState::Failed => summary.failed += 1,
                SessionState::Closed => summary.closed += 1,
            }
            summary.inputs_sent += session.inputs_sent();
            summary.snapshots_received += session.snapshots_received();
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> HarnessConfig {
        HarnessConfig {
            // port 1 is reserved and closed in test environments
            server_url: "ws://127.0.0.1:1".to_string(),
            stagger: Duration::from_millis(10),
            join_timeout: Duration::from_millis(500),
            teardown_timeout: Duration::from_millis(500),
            ..HarnessConfig::default()
        }
    }

    async fn wait_until_finished(harness: &LoadHarness) {
        for _ in 0..200 {
            if harness.sessions().iter().all(|s| s.state().is_finished()) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.stagger, Duration::from_millis(200));
        assert_eq!(config.input_interval, Duration::from_millis(100));
        assert_eq!(config.direction_change_probability, 0.05);
        assert!(config.server_url.ends_with(":9002"));
    }

    #[test]
    fn test_session_state_round_trip() {
        for state in [
            SessionState::Connecting,
            SessionState::Joined,
            SessionState::Rejected,
            SessionState::Failed,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
        assert!(!SessionState::Joined.is_finished());
        assert!(SessionState::Rejected.is_finished());
    }

    #[test]
    fn test_random_direction_is_unit_and_flat() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..100 {
            let direction = random_direction(&mut rng);
            assert!((direction.length() - 1.0).abs() < 1e-4);
            assert_eq!(direction.y, 0.0);
        }
    }

    #[test]
    fn test_summary_display() {
        let summary = HarnessSummary {
            joined: 2,
            failed: 1,
            inputs_sent: 10,
            ..HarnessSummary::default()
        };
        assert_eq!(summary.total(), 3);
        assert!(summary.to_string().starts_with("3 sessions: 0 connecting, 2 joined"));
    }

    #[tokio::test]
    async fn test_connection_failures_are_isolated() {
        let mut harness = LoadHarness::new(unreachable_config());
        harness.spawn_batch(3).await;
        assert_eq!(harness.len(), 3);

        wait_until_finished(&harness).await;
        let summary = harness.summary();
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.joined, 0);

        let names: Vec<&str> = harness.sessions().iter().map(|s| s.nickname()).collect();
        assert_eq!(names, vec!["Dummy_1", "Dummy_2", "Dummy_3"]);
    }

    #[tokio::test]
    async fn test_finished_sessions_stay_until_pruned() {
        let mut harness = LoadHarness::new(unreachable_config());
        harness.spawn_batch(2).await;
        wait_until_finished(&harness).await;
        harness.teardown().await;

        assert_eq!(harness.len(), 2);
        assert_eq!(harness.prune_finished(), 2);
        assert!(harness.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut harness = LoadHarness::new(unreachable_config());
        let session = harness.spawn_one();
        session.close();
        session.close();
        harness.teardown().await;
        assert!(harness.sessions()[0].state().is_finished());
    }
}
