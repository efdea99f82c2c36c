//! Types shared by the world server, the reconciling client and the load harness.
//!
//! The crate holds the wire protocol (`protocol`), the small vector and color
//! types that appear in it (`math`) and the simulation constants both sides
//! agree on. Everything here is synchronous and free of I/O so it can be used
//! from the coordinator task, connection tasks and tests alike.

pub mod math;
pub mod protocol;

pub use math::{Rgb, Vec3};
pub use protocol::{
    EntityKind, EntityView, JoinRequest, JoinResponse, JumpCommand, Message, MessageType,
    PlayerInput, ProtocolError, Snapshot, SpawnDummies,
};

/// Port the server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 9002;

/// Horizontal speed in units per second at full input.
pub const MOVE_SPEED: f32 = 5.0;
/// Upward velocity applied by a jump.
pub const JUMP_IMPULSE: f32 = 8.0;
pub const GRAVITY: f32 = 9.81;
/// Entities are kept within `[-MAP_HALF_EXTENT, MAP_HALF_EXTENT]` on x and z.
pub const MAP_HALF_EXTENT: f32 = 25.0;
/// Movement magnitude below which an entity keeps its current facing.
pub const FACING_DEADZONE: f32 = 0.1;
pub const MAX_NICKNAME_LEN: usize = 32;
