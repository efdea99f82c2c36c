//! Server and simulation settings
//!
//! Binaries build these from command line arguments; tests construct them
//! directly, usually starting from `Default`.

use shared::{FACING_DEADZONE, GRAVITY, JUMP_IMPULSE, MAP_HALF_EXTENT, MOVE_SPEED};
use std::time::Duration;

/// Highest tick rate the server will run at
pub const MAX_TICK_RATE: u32 = 1000;

/// Tunables of the fixed-tick simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Ticks per second; every tick advances the world by `1 / tick_rate` seconds
    pub tick_rate: u32,
    pub move_speed: f32,
    pub jump_impulse: f32,
    pub gravity: f32,
    pub map_half_extent: f32,
    pub facing_deadzone: f32,
    /// Upper bound on live dummies; SPAWN_DUMMIES never goes past it
    pub max_dummies: usize,
    /// Dummies spawn uniformly within `[-r, r]` on x and z
    pub dummy_spawn_radius: f32,
}

impl SimulationConfig {
    /// `tick_rate` clamped to `1..=MAX_TICK_RATE`
    pub fn effective_tick_rate(&self) -> u32 {
        self.tick_rate.clamp(1, MAX_TICK_RATE)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.effective_tick_rate()))
    }

    /// Simulation step in seconds
    pub fn dt(&self) -> f32 {
        1.0 / self.effective_tick_rate() as f32
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            move_speed: MOVE_SPEED,
            jump_impulse: JUMP_IMPULSE,
            gravity: GRAVITY,
            map_half_extent: MAP_HALF_EXTENT,
            facing_deadzone: FACING_DEADZONE,
            max_dummies: 500,
            dummy_spawn_radius: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// `host:port` to listen on; port 0 picks an ephemeral port
    pub bind_addr: String,
    /// Player capacity; joins beyond it are rejected with "Server is full"
    pub max_players: usize,
    /// Capacity of the connection -> coordinator event queue
    pub event_queue: usize,
    /// Capacity of each connection's control queue (join replies, close)
    pub control_queue: usize,
    /// Deadline for the WebSocket upgrade plus the JOIN handshake
    pub join_timeout: Duration,
    /// How long shutdown waits for connections to flush their close frames
    pub shutdown_grace: Duration,
    pub simulation: SimulationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", shared::DEFAULT_PORT),
            max_players: 100,
            event_queue: 4096,
            control_queue: 16,
            join_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            simulation: SimulationConfig::default(),
        }
    }
}
