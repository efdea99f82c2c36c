use crate::config::SimulationConfig;
use crate::entity::Entity;
use crate::wander::WanderGenerator;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{EntityKind, Rgb, Snapshot, Vec3};
use std::collections::BTreeMap;

/// Radius of the ring players spawn on
const PLAYER_SPAWN_RADIUS: f32 = 5.0;

/// Authoritative entity table and fixed-step simulation
///
/// Entities are kept in id order, so every tick integrates them in the same
/// order and snapshots list them deterministically.
#[derive(Debug)]
pub struct GameState {
    pub tick: u64,
    entities: BTreeMap<u32, Entity>,
    next_entity_id: u32,
    next_dummy_number: u32,
    config: SimulationConfig,
    rng: StdRng,
}

impl GameState {
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic world for tests and benchmarks.
    pub fn with_seed(config: SimulationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulationConfig, rng: StdRng) -> Self {
        Self {
            tick: 0,
            entities: BTreeMap::new(),
            next_entity_id: 1,
            next_dummy_number: 1,
            config,
            rng,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn add_player(&mut self, nickname: String, color: Rgb) -> u32 {
        let id = self.allocate_id();
        let angle = id as f32 * 2.399_963; // golden angle spreads consecutive joins
        let position = Vec3::new(
            PLAYER_SPAWN_RADIUS * angle.sin(),
            0.0,
            PLAYER_SPAWN_RADIUS * angle.cos(),
        );

        info!(
            "Added player {} ({}) at ({:.2}, {:.2})",
            id, nickname, position.x, position.z
        );
        self.entities
            .insert(id, Entity::player(id, nickname, color, position));
        id
    }

    pub fn remove_entity(&mut self, id: u32) -> Option<Entity> {
        let removed = self.entities.remove(&id);
        if let Some(entity) = &removed {
            info!("Removed {:?} {} ({})", entity.kind, id, entity.nickname);
        }
        removed
    }

    /// Spawns up to `count` dummies without exceeding `max_dummies`.
    /// Returns the ids of the dummies actually created.
    pub fn spawn_dummies(&mut self, count: usize) -> Vec<u32> {
        let room = self
            .config
            .max_dummies
            .saturating_sub(self.dummy_count());
        let count = count.min(room);
        if count == 0 {
            debug!("Dummy spawn ignored, {} live of {}", self.dummy_count(), self.config.max_dummies);
            return Vec::new();
        }

        let radius = self.config.dummy_spawn_radius;
        let mut spawned = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.allocate_id();
            let number = self.next_dummy_number;
            self.next_dummy_number += 1;

            let position = Vec3::new(
                self.rng.gen_range(-radius..=radius),
                0.0,
                self.rng.gen_range(-radius..=radius),
            );
            let color = Rgb::from_hsv(
                self.rng.gen_range(0.0..1.0),
                self.rng.gen_range(0.8..=1.0),
                self.rng.gen_range(0.8..=1.0),
            );
            let wander = WanderGenerator::new(&mut self.rng);
            self.entities.insert(
                id,
                Entity::dummy(id, format!("Dummy{}", number), color, position, wander),
            );
            spawned.push(id);
        }

        info!("Spawned {} dummies ({} live)", spawned.len(), self.dummy_count());
        spawned
    }

    /// Removes every dummy and returns how many there were.
    pub fn delete_all_dummies(&mut self) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, entity| !entity.is_dummy());
        let removed = before - self.entities.len();
        if removed > 0 {
            info!("Deleted {} dummies", removed);
        }
        removed
    }

    /// Overwrites the entity's pending movement. Returns false for unknown ids.
    pub fn set_movement(&mut self, id: u32, movement: Vec3) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.set_movement(movement);
                true
            }
            None => false,
        }
    }

    pub fn request_jump(&mut self, id: u32) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.request_jump();
                true
            }
            None => false,
        }
    }

    pub fn entity(&self, id: u32) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.entities.values().filter(|e| !e.is_dummy()).count()
    }

    pub fn dummy_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_dummy()).count()
    }

    /// Runs one fixed step over every entity and returns the resulting snapshot.
    pub fn step(&mut self) -> Snapshot {
        let dt = self.config.dt();
        for entity in self.entities.values_mut() {
            let input = entity.next_input(dt, &mut self.rng);
            entity.integrate(input, &self.config, dt);
        }
        self.tick += 1;
        self.snapshot()
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            tick: self.tick,
            players: Vec::new(),
            dummies: Vec::new(),
        };
        for entity in self.entities.values() {
            match entity.kind {
                EntityKind::Player => snapshot.players.push(entity.view()),
                EntityKind::Dummy => snapshot.dummies.push(entity.view()),
            }
        }
        snapshot
    }
}
