//! Synthetic input for server-driven dummies
//!
//! A dummy walks in a random direction for a few seconds, then picks a new
//! one, and jumps on its own independent timer. Timers advance by the
//! simulation step rather than wall-clock time, so a seeded generator
//! produces the same path every run.

use crate::entity::PendingInput;
use rand::Rng;
use shared::Vec3;
use std::f32::consts::TAU;

const MIN_HOLD_SECS: f32 = 3.0;
const MAX_HOLD_SECS: f32 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct WanderGenerator {
    heading: Vec3,
    heading_timer: f32,
    jump_timer: f32,
}

impl WanderGenerator {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            heading: random_heading(rng),
            heading_timer: hold_time(rng),
            jump_timer: hold_time(rng),
        }
    }

    pub fn heading(&self) -> Vec3 {
        self.heading
    }

    /// Advances both timers by `dt` and returns this tick's input.
    pub fn next_input<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) -> PendingInput {
        self.heading_timer -= dt;
        if self.heading_timer <= 0.0 {
            self.heading = random_heading(rng);
            self.heading_timer = hold_time(rng);
        }

        self.jump_timer -= dt;
        let jump = self.jump_timer <= 0.0;
        if jump {
            self.jump_timer = hold_time(rng);
        }

        PendingInput {
            movement: Some(self.heading),
            jump,
        }
    }
}

fn random_heading<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    let yaw = rng.gen_range(0.0..TAU);
    Vec3::new(yaw.sin(), 0.0, yaw.cos())
}

fn hold_time<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    rng.gen_range(MIN_HOLD_SECS..=MAX_HOLD_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const DT: f32 = 1.0 / 30.0;

    #[test]
    fn test_heading_is_unit_and_flat() {
        let mut rng = StdRng::seed_from_u64(7);
        let wander = WanderGenerator::new(&mut rng);
        assert_approx_eq!(wander.heading().length(), 1.0, 1e-5);
        assert_eq!(wander.heading().y, 0.0);
    }

    #[test]
    fn test_heading_held_for_at_least_three_seconds() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut wander = WanderGenerator::new(&mut rng);
        let initial = wander.heading();

        // 89 ticks at 30 Hz is just under three seconds
        for _ in 0..89 {
            let input = wander.next_input(DT, &mut rng);
            assert_eq!(input.movement, Some(initial));
        }
    }

    #[test]
    fn test_heading_changes_within_five_seconds() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut wander = WanderGenerator::new(&mut rng);
        let initial = wander.heading();

        let mut changed = false;
        for _ in 0..(5 * 30 + 2) {
            if wander.next_input(DT, &mut rng).movement != Some(initial) {
                changed = true;
                break;
            }
        }
        assert!(changed, "heading should be re-rolled after at most five seconds");
    }

    #[test]
    fn test_jump_cadence() {
        let mut rng = StdRng::seed_from_u64(21);
        let mut wander = WanderGenerator::new(&mut rng);

        let jumps = (0..60 * 30)
            .filter(|_| wander.next_input(DT, &mut rng).jump)
            .count();
        // one jump every 3-5 seconds over a minute
        assert!((11..=20).contains(&jumps), "got {} jumps", jumps);
    }

    #[test]
    fn test_seeded_generators_agree() {
        let mut a_rng = StdRng::seed_from_u64(99);
        let mut b_rng = StdRng::seed_from_u64(99);
        let mut a = WanderGenerator::new(&mut a_rng);
        let mut b = WanderGenerator::new(&mut b_rng);
        for _ in 0..300 {
            assert_eq!(a.next_input(DT, &mut a_rng), b.next_input(DT, &mut b_rng));
        }
    }
}
