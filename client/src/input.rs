//! Local input to network commands, with change and edge detection
//!
//! The view layer samples raw input each frame (a movement vector and whether
//! jump is held) and hands it to `InputTracker::update`, which decides what to
//! put on the wire: movement when it changed or the keep-alive interval ran
//! out, and a jump only on the frame the button goes down.

use shared::Vec3;
use std::time::{Duration, Instant};

/// Movement difference below which two vectors count as the same input
const MOVEMENT_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputCommand {
    Move(Vec3),
    Jump,
}

/// Scales movement longer than 1 down to unit length; non-finite input is
/// treated as no movement.
pub fn normalize_movement(raw: Vec3) -> Vec3 {
    if !raw.is_finite() {
        return Vec3::ZERO;
    }
    if raw.length() > 1.0 {
        raw.normalized()
    } else {
        raw
    }
}

/// Rotates stick/keyboard axes into world space for a camera looking along
/// `camera_yaw` (radians, zero along +z).
pub fn camera_relative(horizontal: f32, vertical: f32, camera_yaw: f32) -> Vec3 {
    let forward = Vec3::new(camera_yaw.sin(), 0.0, camera_yaw.cos());
    let right = Vec3::new(camera_yaw.cos(), 0.0, -camera_yaw.sin());
    normalize_movement(forward * vertical + right * horizontal)
}

pub struct InputTracker {
    current_movement: Vec3,
    jump_held: bool,
    last_sent: Option<Instant>,
    keepalive: Duration,
}

impl InputTracker {
    pub fn new(keepalive: Duration) -> Self {
        Self {
            current_movement: Vec3::ZERO,
            jump_held: false,
            last_sent: None,
            keepalive,
        }
    }

    /// Movement most recently handed out for transmission.
    pub fn current_movement(&self) -> Vec3 {
        self.current_movement
    }

    /// Feeds one frame of raw input and returns the commands to send.
    pub fn update(&mut self, raw_movement: Vec3, jump_down: bool, now: Instant) -> Vec<InputCommand> {
        let mut commands = Vec::new();

        let movement = normalize_movement(raw_movement);
        let changed = (movement - self.current_movement).length() > MOVEMENT_EPSILON;
        let keepalive_due = match self.last_sent {
            Some(sent) => now.saturating_duration_since(sent) >= self.keepalive,
            None => true,
        };

        if changed || keepalive_due {
            self.current_movement = movement;
            self.last_sent = Some(now);
            commands.push(InputCommand::Move(movement));
        }

        // Edge triggered
        if jump_down && !self.jump_held {
            commands.push(InputCommand::Jump);
        }
        self.jump_held = jump_down;

        commands
    }
}

impl Default for InputTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
