//! # World Client Library
//!
//! Client side of the world server: connecting and joining, turning local
//! input into network commands, smoothing authoritative snapshots for
//! display, and a load harness that drives many simulated clients at once.
//!
//! ## Reconciliation
//!
//! The server is authoritative. Snapshots arrive at the server tick rate and
//! are applied to a `game::Reconciler`, which keeps a target position per
//! entity and eases the displayed position toward it every frame. The local
//! player's own entity is blended back in line when it drifts a little and
//! snapped when it drifts far.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! - Entity set maintenance per snapshot (add / remove by id)
//! - Snap-or-blend correction of the local entity
//! - Frame-rate independent smoothing of positions and facing
//!
//! ### Input Module (`input`)
//! - Movement normalization and camera-relative rotation
//! - Change detection with keep-alive, edge-triggered jump
//!
//! ### Network Module (`network`)
//! - WebSocket connect and JOIN handshake
//! - Split sender / receiver halves for concurrent use
//!
//! ### Harness Module (`harness`)
//! - Independent simulated sessions with staggered start
//! - Per-session statistics, explicit teardown and pruning

pub mod game;
pub mod harness;
pub mod input;
pub mod network;

pub use game::{ReconcileConfig, Reconciler};
pub use harness::{HarnessConfig, LoadHarness};
pub use network::{ClientError, GameClient};
