//! # World Server Library
//!
//! Authoritative server for a shared real-time world. It owns the canonical
//! position and velocity of every entity, applies player input on a fixed
//! tick and broadcasts the resulting snapshot to every joined client.
//!
//! ## Entities
//!
//! Two kinds of entity live in the world:
//! - **Players**, each steered by exactly one WebSocket connection
//! - **Dummies**, spawned on request and steered by a server-side wander
//!   generator
//!
//! Both are simulated by the same kinematic step (`entity`), so a dummy is
//! indistinguishable from an idle-wandering player apart from the missing
//! nickname and velocity in its snapshot view.
//!
//! ## Architecture
//!
//! ### Single Coordinator
//! One task owns the entity table, the session registry and the tick
//! (`network::Coordinator`). Connection tasks only decode frames and forward
//! them over a bounded channel, so joins, input, removals and ticks are
//! applied strictly in order without locks.
//!
//! ### Input Model
//! Each entity has one pending input slot. The newest PLAYER_INPUT replaces
//! the previous one; a JUMP_COMMAND sets a one-shot flag. The tick takes the
//! slot, so only the last input before a tick has any effect.
//!
//! ### Broadcast
//! Snapshots are encoded once per tick and published through a `watch`
//! channel (`broadcast`). Slow connections skip stale snapshots instead of
//! queueing them, and the tick never waits on a socket.
//!
//! ## Module Organization
//!
//! - `config`: server and simulation settings
//! - `entity`: entity state, pending input and the kinematic step
//! - `wander`: synthetic input for dummies
//! - `game`: entity table, fixed step and snapshot assembly
//! - `session`: connection state machine and registry
//! - `connection`: per-connection WebSocket task
//! - `broadcast`: most-recent-wins snapshot fan-out
//! - `network`: coordinator and accept loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:9002".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let server = Server::bind(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod entity;
pub mod game;
pub mod network;
pub mod session;
pub mod wander;

pub use config::{ServerConfig, SimulationConfig};
pub use network::Server;
