//! Client-side world state: reconciliation and interpolation of server snapshots
//!
//! Snapshots arrive at the server tick rate, which is usually lower and less
//! regular than the render rate. The `Reconciler` keeps, per entity, the last
//! authoritative position (the target) and the position to display, and moves
//! the displayed position toward the target every frame with time-scaled
//! exponential smoothing.
//!
//! The local player's entity is treated specially: a small divergence from the
//! server is blended away, a large one is snapped.

use log::debug;
use shared::math::lerp_angle;
use shared::{EntityKind, EntityView, Rgb, Snapshot, Vec3};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Divergence above which the local entity is snapped instead of blended
    pub snap_threshold: f32,
    /// Fraction of a small correction applied as soon as the snapshot arrives
    pub correction_blend: f32,
    /// Per-second smoothing rate toward the target for the local entity
    pub local_smoothing_rate: f32,
    /// Per-second smoothing rate toward the target for everyone else
    pub remote_smoothing_rate: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            snap_threshold: 0.5,
            correction_blend: 0.1,
            local_smoothing_rate: 10.0,
            remote_smoothing_rate: 10.0,
        }
    }
}

/// How the local entity was corrected by a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    Snap { divergence: f32 },
    Blend { divergence: f32 },
}

/// What changed when a snapshot was applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotOutcome {
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
    pub correction: Option<Correction>,
    /// The snapshot was older than one already applied and was ignored
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub id: u32,
    pub kind: EntityKind,
    /// Position to display
    pub position: Vec3,
    /// Last authoritative position
    pub target: Vec3,
    pub velocity: Option<Vec3>,
    pub yaw: f32,
    pub target_yaw: f32,
    pub color: Rgb,
    pub nickname: Option<String>,
}

impl TrackedEntity {
    fn from_view(kind: EntityKind, view: &EntityView) -> Self {
        Self {
            id: view.id,
            kind,
            position: view.position,
            target: view.position,
            velocity: view.velocity,
            yaw: view.yaw,
            target_yaw: view.yaw,
            color: view.color,
            nickname: view.nickname.clone(),
        }
    }

    /// The entity as the view layer should draw it.
    pub fn view(&self) -> EntityView {
        EntityView {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            color: self.color,
            yaw: self.yaw,
            nickname: self.nickname.clone(),
        }
    }
}

/// Fraction of the remaining distance covered in `dt` seconds at `rate`.
pub fn smoothing_alpha(rate: f32, dt: f32) -> f32 {
    if dt <= 0.0 || rate <= 0.0 {
        0.0
    } else {
        1.0 - (-rate * dt).exp()
    }
}

#[derive(Debug)]
pub struct Reconciler {
    config: ReconcileConfig,
    local_id: Option<u32>,
    entities: BTreeMap<u32, TrackedEntity>,
    last_tick: Option<u64>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            local_id: None,
            entities: BTreeMap::new(),
            last_tick: None,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Marks which entity belongs to this client.
    pub fn set_local_id(&mut self, id: Option<u32>) {
        self.local_id = id;
    }

    pub fn local_id(&self) -> Option<u32> {
        self.local_id
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    /// Applies an authoritative snapshot.
    ///
    /// Entities missing locally are created at their authoritative position,
    /// entities missing from the snapshot are dropped. Remote entities only get
    /// a new target; `update` moves them. The local entity is blended toward
    /// the server position when the divergence is small and snapped when it is
    /// above `snap_threshold`.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> SnapshotOutcome {
        let mut outcome = SnapshotOutcome::default();

        if let Some(last) = self.last_tick {
            if snapshot.tick < last {
                debug!("Ignoring stale snapshot {} (have {})", snapshot.tick, last);
                outcome.stale = true;
                return outcome;
            }
        }
        self.last_tick = Some(snapshot.tick);

        let present: HashSet<u32> = snapshot.entities().map(|(_, view)| view.id).collect();
        outcome.removed = self
            .entities
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in &outcome.removed {
            self.entities.remove(id);
        }

        let snap_threshold = self.config.snap_threshold;
        let blend = self.config.correction_blend;
        for (kind, view) in snapshot.entities() {
            let Some(tracked) = self.entities.get_mut(&view.id) else {
                self.entities
                    .insert(view.id, TrackedEntity::from_view(kind, view));
                outcome.added.push(view.id);
                continue;
            };

            tracked.kind = kind;
            tracked.target = view.position;
            tracked.target_yaw = view.yaw;
            tracked.velocity = view.velocity;
            tracked.color = view.color;
            tracked.nickname.clone_from(&view.nickname);

            if self.local_id == Some(view.id) {
                let divergence = tracked.position.distance(view.position);
                if divergence > snap_threshold {
                    tracked.position = view.position;
                    tracked.yaw = view.yaw;
                    outcome.correction = Some(Correction::Snap { divergence });
                } else {
                    tracked.position = tracked.position.lerp(view.position, blend);
                    outcome.correction = Some(Correction::Blend { divergence });
                }
            }
        }

        if let Some(Correction::Snap { divergence }) = outcome.correction {
            debug!("Snapped local entity, divergence {:.3}", divergence);
        }
        outcome
    }

    /// Advances smoothing by one render frame of `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        let local_alpha = smoothing_alpha(self.config.local_smoothing_rate, dt);
        let remote_alpha = smoothing_alpha(self.config.remote_smoothing_rate, dt);

        for entity in self.entities.values_mut() {
            let alpha = if self.local_id == Some(entity.id) {
                local_alpha
            } else {
                remote_alpha
            };
            entity.position = entity.position.lerp(entity.target, alpha);
            entity.yaw = lerp_angle(entity.yaw, entity.target_yaw, alpha);
        }
    }

    pub fn entity(&self, id: u32) -> Option<&TrackedEntity> {
        self.entities.get(&id)
    }

    pub fn position(&self, id: u32) -> Option<Vec3> {
        self.entities.get(&id).map(|entity| entity.position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Displayed state of every entity, split like a snapshot.
    pub fn views(&self) -> Snapshot {
        let mut views = Snapshot {
            tick: self.last_tick.unwrap_or(0),
            ..Snapshot::default()
        };
        for entity in self.entities.values() {
            match entity.kind {
                EntityKind::Player => views.players.push(entity.view()),
                EntityKind::Dummy => views.dummies.push(entity.view()),
            }
        }
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn player(id: u32, position: Vec3) -> EntityView {
        EntityView {
            id,
            position,
            velocity: Some(Vec3::ZERO),
            color: Rgb::WHITE,
            yaw: 0.0,
            nickname: Some(format!("player{}", id)),
        }
    }

    fn dummy(id: u32, position: Vec3) -> EntityView {
        EntityView {
            id,
            position,
            velocity: None,
            color: Rgb::WHITE,
            yaw: 0.0,
            nickname: None,
        }
    }

    fn snapshot(tick: u64, players: Vec<EntityView>, dummies: Vec<EntityView>) -> Snapshot {
        Snapshot {
            tick,
            players,
            dummies,
        }
    }

    fn local_reconciler() -> Reconciler {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        reconciler.set_local_id(Some(1));
        reconciler.apply_snapshot(&snapshot(1, vec![player(1, Vec3::ZERO)], vec![]));
        reconciler
    }

    #[test]
    fn test_new_entities_appear_at_authoritative_position() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        let outcome = reconciler.apply_snapshot(&snapshot(
            1,
            vec![player(1, Vec3::new(1.0, 0.0, 2.0))],
            vec![dummy(2, Vec3::new(-3.0, 0.0, 0.0))],
        ));

        assert_eq!(outcome.added, vec![1, 2]);
        assert!(outcome.removed.is_empty());
        assert_eq!(reconciler.position(1), Some(Vec3::new(1.0, 0.0, 2.0)));
        assert_eq!(reconciler.entity(2).unwrap().kind, EntityKind::Dummy);
    }

    #[test]
    fn test_missing_entities_are_removed() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        reconciler.apply_snapshot(&snapshot(
            1,
            vec![player(1, Vec3::ZERO)],
            vec![dummy(2, Vec3::ZERO), dummy(3, Vec3::ZERO)],
        ));
        let outcome = reconciler.apply_snapshot(&snapshot(2, vec![player(1, Vec3::ZERO)], vec![]));

        assert_eq!(outcome.removed, vec![2, 3]);
        assert_eq!(reconciler.len(), 1);
    }

    #[test]
    fn test_small_divergence_blends() {
        let mut reconciler = local_reconciler();
        let outcome =
            reconciler.apply_snapshot(&snapshot(2, vec![player(1, Vec3::new(0.1, 0.0, 0.0))], vec![]));

        match outcome.correction {
            Some(Correction::Blend { divergence }) => assert_approx_eq!(divergence, 0.1, 1e-6),
            other => panic!("expected blend, got {:?}", other),
        }
        let position = reconciler.position(1).unwrap();
        assert_approx_eq!(position.x, 0.01, 1e-6);
    }

    #[test]
    fn test_large_divergence_snaps() {
        let mut reconciler = local_reconciler();
        let outcome =
            reconciler.apply_snapshot(&snapshot(2, vec![player(1, Vec3::new(10.0, 0.0, 0.0))], vec![]));

        assert!(matches!(outcome.correction, Some(Correction::Snap { .. })));
        assert_eq!(reconciler.position(1), Some(Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_blend_converges_over_frames() {
        let mut reconciler = local_reconciler();
        reconciler.apply_snapshot(&snapshot(2, vec![player(1, Vec3::new(0.4, 0.0, 0.0))], vec![]));
        for _ in 0..120 {
            reconciler.update(1.0 / 60.0);
        }
        assert_approx_eq!(reconciler.position(1).unwrap().x, 0.4, 1e-3);
    }

    #[test]
    fn test_remote_entities_move_only_on_update() {
        let mut reconciler = local_reconciler();
        reconciler.apply_snapshot(&snapshot(2, vec![player(1, Vec3::ZERO)], vec![dummy(5, Vec3::ZERO)]));
        let outcome = reconciler.apply_snapshot(&snapshot(
            3,
            vec![player(1, Vec3::ZERO)],
            vec![dummy(5, Vec3::new(2.0, 0.0, 0.0))],
        ));
        assert_eq!(outcome.correction, Some(Correction::Blend { divergence: 0.0 }));
        assert_eq!(reconciler.position(5), Some(Vec3::ZERO));

        reconciler.update(0.1);
        let expected = 2.0 * smoothing_alpha(10.0, 0.1);
        assert_approx_eq!(reconciler.position(5).unwrap().x, expected, 1e-5);
    }

    #[test]
    fn test_smoothing_is_frame_rate_independent() {
        let mut coarse = Reconciler::new(ReconcileConfig::default());
        let mut fine = Reconciler::new(ReconcileConfig::default());
        for reconciler in [&mut coarse, &mut fine] {
            reconciler.apply_snapshot(&snapshot(1, vec![], vec![dummy(1, Vec3::ZERO)]));
            reconciler.apply_snapshot(&snapshot(2, vec![], vec![dummy(1, Vec3::new(4.0, 0.0, 0.0))]));
        }

        coarse.update(1.0 / 30.0);
        fine.update(1.0 / 60.0);
        fine.update(1.0 / 60.0);

        assert_approx_eq!(
            coarse.position(1).unwrap().x,
            fine.position(1).unwrap().x,
            1e-4
        );
    }

    #[test]
    fn test_yaw_takes_shortest_arc() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        let mut view = dummy(1, Vec3::ZERO);
        view.yaw = 3.0;
        reconciler.apply_snapshot(&snapshot(1, vec![], vec![view.clone()]));
        view.yaw = -3.0;
        reconciler.apply_snapshot(&snapshot(2, vec![], vec![view]));

        reconciler.update(0.01);
        let yaw = reconciler.entity(1).unwrap().yaw;
        assert!(yaw > 3.0, "yaw should wrap through pi, got {}", yaw);
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let mut reconciler = local_reconciler();
        reconciler.apply_snapshot(&snapshot(5, vec![player(1, Vec3::ZERO)], vec![]));
        let outcome = reconciler.apply_snapshot(&snapshot(4, vec![], vec![]));

        assert!(outcome.stale);
        assert_eq!(reconciler.len(), 1);
        assert_eq!(reconciler.last_tick(), Some(5));
    }

    #[test]
    fn test_views_split_players_and_dummies() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        reconciler.apply_snapshot(&snapshot(
            3,
            vec![player(1, Vec3::ZERO)],
            vec![dummy(2, Vec3::ZERO)],
        ));
        let views = reconciler.views();
        assert_eq!(views.tick, 3);
        assert_eq!(views.players.len(), 1);
        assert_eq!(views.dummies.len(), 1);
        assert_eq!(views.players[0].nickname.as_deref(), Some("player1"));
    }

    #[test]
    fn test_smoothing_alpha_bounds() {
        assert_eq!(smoothing_alpha(10.0, 0.0), 0.0);
        assert!(smoothing_alpha(10.0, 10.0) <= 1.0);
        assert_approx_eq!(smoothing_alpha(10.0, 0.1), 1.0 - (-1.0f32).exp(), 1e-6);
    }
}
