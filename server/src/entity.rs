//! Simulated entities and their per-tick kinematics
//!
//! Players and dummies share one `Entity` type. The only difference is where
//! their input comes from: players are steered by their connection, dummies by
//! a `WanderGenerator`.

use crate::config::SimulationConfig;
use crate::wander::WanderGenerator;
use rand::Rng;
use shared::math::yaw_of;
use shared::{EntityKind, EntityView, Rgb, Vec3};

/// Input received since the previous tick
///
/// A newer movement vector overwrites an older one (last write wins). The
/// jump flag is one-shot and is cleared when the tick takes the slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingInput {
    pub movement: Option<Vec3>,
    pub jump: bool,
}

impl PendingInput {
    pub fn is_empty(&self) -> bool {
        self.movement.is_none() && !self.jump
    }
}

#[derive(Debug, Clone)]
pub enum InputSource {
    External,
    Wander(WanderGenerator),
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u32,
    pub kind: EntityKind,
    pub nickname: String,
    pub color: Rgb,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Facing in radians, zero along +z
    pub yaw: f32,
    pub grounded: bool,
    /// Movement currently in effect, kept until newer input arrives
    pub movement: Vec3,
    pending: PendingInput,
    input: InputSource,
}

impl Entity {
    pub fn player(id: u32, nickname: String, color: Rgb, position: Vec3) -> Self {
        Self::new(id, EntityKind::Player, nickname, color, position, InputSource::External)
    }

    pub fn dummy(
        id: u32,
        nickname: String,
        color: Rgb,
        position: Vec3,
        wander: WanderGenerator,
    ) -> Self {
        Self::new(
            id,
            EntityKind::Dummy,
            nickname,
            color,
            position,
            InputSource::Wander(wander),
        )
    }

    fn new(
        id: u32,
        kind: EntityKind,
        nickname: String,
        color: Rgb,
        position: Vec3,
        input: InputSource,
    ) -> Self {
        Self {
            id,
            kind,
            nickname,
            color,
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            grounded: position.y <= 0.0,
            movement: Vec3::ZERO,
            pending: PendingInput::default(),
            input,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.kind == EntityKind::Dummy
    }

    pub fn pending(&self) -> &PendingInput {
        &self.pending
    }

    pub fn set_movement(&mut self, movement: Vec3) {
        self.pending.movement = Some(movement);
    }

    pub fn request_jump(&mut self) {
        self.pending.jump = true;
    }

    /// Takes this tick's input, asking the wander generator for dummies.
    pub fn next_input<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) -> PendingInput {
        let pending = std::mem::take(&mut self.pending);
        match &mut self.input {
            InputSource::External => pending,
            InputSource::Wander(wander) => wander.next_input(dt, rng),
        }
    }

    /// Advances the entity by one fixed step.
    pub fn integrate(&mut self, input: PendingInput, config: &SimulationConfig, dt: f32) {
        if let Some(movement) = input.movement {
            self.movement = sanitize_movement(movement);
        }

        self.velocity.x = self.movement.x * config.move_speed;
        self.velocity.z = self.movement.z * config.move_speed;

        // Consumed even when airborne
        if input.jump && self.grounded {
            self.velocity.y = config.jump_impulse;
            self.grounded = false;
        }

        if !self.grounded {
            self.velocity.y -= config.gravity * dt;
        }

        self.position += self.velocity * dt;

        if self.position.y <= 0.0 {
            self.position.y = 0.0;
            self.velocity.y = 0.0;
            self.grounded = true;
        }

        let extent = config.map_half_extent;
        self.position.x = self.position.x.clamp(-extent, extent);
        self.position.z = self.position.z.clamp(-extent, extent);

        if self.movement.length() > config.facing_deadzone {
            self.yaw = yaw_of(self.movement);
        }
    }

    pub fn view(&self) -> EntityView {
        let is_player = self.kind == EntityKind::Player;
        EntityView {
            id: self.id,
            position: self.position,
            velocity: is_player.then_some(self.velocity),
            color: self.color,
            yaw: self.yaw,
            nickname: is_player.then(|| self.nickname.clone()),
        }
    }
}

/// Clamps each axis into `[-1, 1]` and the magnitude to 1; non-finite input
/// counts as no movement.
pub fn sanitize_movement(movement: Vec3) -> Vec3 {
    if !movement.is_finite() {
        return Vec3::ZERO;
    }
    movement.clamp_axes(-1.0, 1.0).clamp_length(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> SimulationConfig {
        SimulationConfig::default()
    }

    fn player() -> Entity {
        Entity::player(1, "alice".to_string(), Rgb::WHITE, Vec3::ZERO)
    }

    #[test]
    fn test_movement_sets_horizontal_velocity() {
        let config = config();
        let dt = config.dt();
        let mut entity = player();

        entity.integrate(
            PendingInput {
                movement: Some(Vec3::new(1.0, 0.0, 0.0)),
                jump: false,
            },
            &config,
            dt,
        );

        assert_approx_eq!(entity.velocity.x, config.move_speed, 1e-5);
        assert_approx_eq!(entity.position.x, config.move_speed * dt, 1e-5);
        assert_eq!(entity.position.y, 0.0);
        assert!(entity.grounded);
    }

    #[test]
    fn test_movement_persists_between_inputs() {
        let config = config();
        let mut entity = player();
        entity.integrate(
            PendingInput {
                movement: Some(Vec3::new(0.0, 0.0, 1.0)),
                jump: false,
            },
            &config,
            config.dt(),
        );
        entity.integrate(PendingInput::default(), &config, config.dt());

        assert_approx_eq!(entity.position.z, 2.0 * config.move_speed * config.dt(), 1e-5);
    }

    #[test]
    fn test_oversized_movement_is_clamped() {
        let clamped = sanitize_movement(Vec3::new(3.0, 0.0, 3.0));
        assert_approx_eq!(clamped.length(), 1.0, 1e-5);
        assert_eq!(sanitize_movement(Vec3::new(f32::NAN, 0.0, 1.0)), Vec3::ZERO);
    }

    #[test]
    fn test_jump_rises_then_lands() {
        let config = config();
        let dt = config.dt();
        let mut entity = player();

        entity.integrate(
            PendingInput {
                movement: None,
                jump: true,
            },
            &config,
            dt,
        );
        assert!(!entity.grounded);
        assert!(entity.position.y > 0.0);

        for _ in 0..(config.tick_rate * 3) {
            entity.integrate(PendingInput::default(), &config, dt);
        }
        assert!(entity.grounded);
        assert_eq!(entity.position.y, 0.0);
        assert_eq!(entity.velocity.y, 0.0);
    }

    #[test]
    fn test_airborne_jump_is_consumed() {
        let config = config();
        let dt = config.dt();
        let mut entity = player();
        entity.integrate(PendingInput { movement: None, jump: true }, &config, dt);
        let vertical = entity.velocity.y;

        entity.integrate(PendingInput { movement: None, jump: true }, &config, dt);
        assert!(entity.velocity.y < vertical, "second jump must not re-apply the impulse");
    }

    #[test]
    fn test_position_clamped_to_map() {
        let config = config();
        let mut entity = Entity::player(
            1,
            "edge".to_string(),
            Rgb::WHITE,
            Vec3::new(config.map_half_extent, 0.0, 0.0),
        );
        entity.integrate(
            PendingInput {
                movement: Some(Vec3::new(1.0, 0.0, 0.0)),
                jump: false,
            },
            &config,
            config.dt(),
        );
        assert_eq!(entity.position.x, config.map_half_extent);
    }

    #[test]
    fn test_facing_ignores_deadzone_input() {
        let config = config();
        let mut entity = player();
        entity.integrate(
            PendingInput {
                movement: Some(Vec3::new(1.0, 0.0, 0.0)),
                jump: false,
            },
            &config,
            config.dt(),
        );
        let facing = entity.yaw;
        assert_approx_eq!(facing, std::f32::consts::FRAC_PI_2, 1e-5);

        entity.integrate(
            PendingInput {
                movement: Some(Vec3::new(0.0, 0.0, -0.05)),
                jump: false,
            },
            &config,
            config.dt(),
        );
        assert_eq!(entity.yaw, facing);
    }

    #[test]
    fn test_next_input_takes_pending_slot() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut entity = player();
        entity.set_movement(Vec3::new(1.0, 0.0, 0.0));
        entity.set_movement(Vec3::new(0.0, 0.0, 1.0));
        entity.request_jump();

        let input = entity.next_input(1.0 / 30.0, &mut rng);
        assert_eq!(input.movement, Some(Vec3::new(0.0, 0.0, 1.0)));
        assert!(input.jump);
        assert!(entity.pending().is_empty());
    }

    #[test]
    fn test_views_hide_dummy_details() {
        let mut rng = StdRng::seed_from_u64(5);
        let dummy = Entity::dummy(
            2,
            "Dummy1".to_string(),
            Rgb::WHITE,
            Vec3::ZERO,
            WanderGenerator::new(&mut rng),
        );
        let view = dummy.view();
        assert!(view.velocity.is_none());
        assert!(view.nickname.is_none());

        let view = player().view();
        assert_eq!(view.nickname.as_deref(), Some("alice"));
        assert_eq!(view.velocity, Some(Vec3::ZERO));
    }
}
