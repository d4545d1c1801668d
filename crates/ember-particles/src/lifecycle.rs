//! Sleep/wake and cleanup decisions for pooled particles
//!
//! The manager holds policy and counters only. The owning pool feeds it each
//! particle's recorded position and velocity and applies the verdicts to its
//! own buffer and grid.

use crate::host::ParticleHost;
use ember_core::{Aabb, EntityHandle, Vec3};
use serde::Serialize;
use std::collections::HashMap;

/// Why a particle was retired. Every cleanup is attributed to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    Expired,
    OutOfBounds,
    Manual,
    Error,
}

/// Aggregate cleanup counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub total_cleaned: u64,
    pub expired: u64,
    pub out_of_bounds: u64,
    pub manual: u64,
    pub error: u64,
    /// Estimated bytes of slot state handed back to the pool
    pub reclaimed_bytes: u64,
}

impl CleanupStats {
    fn record(&mut self, reason: CleanupReason, bytes: u64) {
        self.total_cleaned += 1;
        self.reclaimed_bytes += bytes;
        match reason {
            CleanupReason::Expired => self.expired += 1,
            CleanupReason::OutOfBounds => self.out_of_bounds += 1,
            CleanupReason::Manual => self.manual += 1,
            CleanupReason::Error => self.error += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTransition {
    Sleep,
    Wake,
}

/// Tunables for sleep and cleanup policy
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    /// Particles farther than this from the viewpoint sleep
    pub sleep_distance: f32,
    /// Awake particles slower than this fall asleep
    pub sleep_velocity: f32,
    pub world_bounds: Option<Aabb>,
    /// How long a host-despawned particle may linger before its slot is reclaimed
    pub cleanup_delay_ms: f64,
    pub sweep_interval_ms: f64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            sleep_distance: 100.0,
            sleep_velocity: 0.01,
            world_bounds: None,
            cleanup_delay_ms: 250.0,
            sweep_interval_ms: 1000.0,
        }
    }
}

pub struct LifecycleManager {
    settings: LifecycleSettings,
    viewpoint: Vec3,
    stats: CleanupStats,
    /// First time each despawned-but-still-pooled entity was noticed
    lingering: HashMap<EntityHandle, f64>,
    last_sweep_ms: f64,
}

impl LifecycleManager {
    pub fn new(settings: LifecycleSettings) -> Self {
        Self {
            settings,
            viewpoint: Vec3::ZERO,
            stats: CleanupStats::default(),
            lingering: HashMap::new(),
            last_sweep_ms: 0.0,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn viewpoint(&self) -> Vec3 {
        self.viewpoint
    }

    pub fn set_viewpoint(&mut self, viewpoint: Vec3) {
        self.viewpoint = viewpoint;
    }

    pub fn set_sleep_distance(&mut self, distance: f32) {
        self.settings.sleep_distance = distance;
    }

    pub fn set_world_bounds(&mut self, bounds: Option<Aabb>) {
        self.settings.world_bounds = bounds;
    }

    /// Decide whether a particle should change sleep state.
    ///
    /// Awake particles sleep when far from the viewpoint or nearly still.
    /// Sleeping particles wake on proximity alone; velocity is not consulted.
    pub fn evaluate_sleep(
        &self,
        position: Vec3,
        velocity: Vec3,
        sleeping: bool,
    ) -> Option<SleepTransition> {
        let dist_sq = position.distance_squared(&self.viewpoint);
        let sleep_dist_sq = self.settings.sleep_distance * self.settings.sleep_distance;

        if sleeping {
            (dist_sq <= sleep_dist_sq).then_some(SleepTransition::Wake)
        } else {
            let min_speed_sq = self.settings.sleep_velocity * self.settings.sleep_velocity;
            (dist_sq > sleep_dist_sq || velocity.length_squared() < min_speed_sq)
                .then_some(SleepTransition::Sleep)
        }
    }

    /// Push a sleep state change out to the host and its physics body
    pub fn apply_sleep<H: ParticleHost>(&self, host: &mut H, entity: EntityHandle, sleeping: bool) {
        host.set_sleeping(entity, sleeping);
        if host.has_physics_body(entity) {
            if let Err(err) = host.set_body_sleeping(entity, sleeping) {
                tracing::warn!(%entity, sleeping, error = %err, "failed to toggle body sleep");
            }
        }
    }

    /// Whether a live slot should be retired, and why.
    ///
    /// Checked in priority order: out of bounds, host request, then a host
    /// despawn that has lingered past the cleanup delay.
    pub fn cleanup_reason<H: ParticleHost>(
        &mut self,
        host: &H,
        entity: EntityHandle,
        position: Vec3,
        now_ms: f64,
    ) -> Option<CleanupReason> {
        if let Some(bounds) = &self.settings.world_bounds {
            if !bounds.contains(position) {
                return Some(CleanupReason::OutOfBounds);
            }
        }
        if host.should_cleanup(entity) {
            return Some(CleanupReason::Manual);
        }
        if host.is_spawned(entity) {
            self.lingering.remove(&entity);
            return None;
        }
        let since = *self.lingering.entry(entity).or_insert(now_ms);
        (now_ms - since >= self.settings.cleanup_delay_ms).then_some(CleanupReason::Expired)
    }

    /// Run the host's cleanup for `entity` and count it exactly once.
    ///
    /// A failing host call is logged and recorded as `Error` instead of the
    /// requested reason. Returns the reason that was recorded.
    pub fn cleanup<H: ParticleHost>(
        &mut self,
        host: &mut H,
        entity: EntityHandle,
        reason: CleanupReason,
        reclaimed_bytes: u64,
    ) -> CleanupReason {
        let recorded = match host.cleanup(entity) {
            Ok(()) => reason,
            Err(err) => {
                tracing::warn!(%entity, ?reason, error = %err, "particle cleanup failed");
                CleanupReason::Error
            }
        };
        self.lingering.remove(&entity);
        self.stats.record(recorded, reclaimed_bytes);
        recorded
    }

    /// True once per sweep interval; arms the next interval when it fires
    pub fn sweep_due(&mut self, now_ms: f64) -> bool {
        if now_ms - self.last_sweep_ms >= self.settings.sweep_interval_ms {
            self.last_sweep_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Drop lingering bookkeeping for an entity that left the pool another way
    pub fn forget(&mut self, entity: EntityHandle) {
        self.lingering.remove(&entity);
    }

    pub fn stats(&self) -> &CleanupStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = CleanupStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EntityDesc, ParticleSpawn};
    use crate::sim::SimulatedHost;

    fn spawned_entity(host: &mut SimulatedHost, position: Vec3) -> EntityHandle {
        let entity = host
            .create_entity(&EntityDesc {
                model: "spark",
                scale: 1.0,
                physics: None,
            })
            .unwrap();
        host.spawn(
            entity,
            &ParticleSpawn {
                position,
                velocity: Vec3::new(1.0, 0.0, 0.0),
                scale: 1.0,
                lifetime: 10.0,
                animation: None,
            },
        )
        .unwrap();
        entity
    }

    #[test]
    fn far_particle_sleeps_and_wakes_on_approach() {
        let mut manager = LifecycleManager::new(LifecycleSettings {
            sleep_distance: 100.0,
            ..Default::default()
        });
        let position = Vec3::new(150.0, 0.0, 0.0);
        let velocity = Vec3::new(5.0, 0.0, 0.0);

        assert_eq!(
            manager.evaluate_sleep(position, velocity, false),
            Some(SleepTransition::Sleep)
        );
        assert_eq!(manager.evaluate_sleep(position, velocity, true), None);

        manager.set_viewpoint(Vec3::new(60.0, 0.0, 0.0));
        assert_eq!(
            manager.evaluate_sleep(position, velocity, true),
            Some(SleepTransition::Wake)
        );
        assert_eq!(manager.evaluate_sleep(position, velocity, false), None);
    }

    #[test]
    fn slow_particle_sleeps_but_wakes_on_distance_only() {
        let manager = LifecycleManager::new(LifecycleSettings {
            sleep_velocity: 0.5,
            ..Default::default()
        });
        let near = Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(
            manager.evaluate_sleep(near, Vec3::ZERO, false),
            Some(SleepTransition::Sleep)
        );
        // Still motionless, but near the viewpoint: proximity alone wakes it
        assert_eq!(
            manager.evaluate_sleep(near, Vec3::ZERO, true),
            Some(SleepTransition::Wake)
        );
    }

    #[test]
    fn apply_sleep_reaches_physics_body() {
        let mut host = SimulatedHost::new();
        let entity = host
            .create_entity(&EntityDesc {
                model: "debris",
                scale: 1.0,
                physics: Some(&crate::host::PhysicsOptions::default()),
            })
            .unwrap();
        let manager = LifecycleManager::new(LifecycleSettings::default());
        manager.apply_sleep(&mut host, entity, true);
        let sim = host.entity(entity).unwrap();
        assert!(sim.sleeping);
        assert!(sim.body.as_ref().unwrap().sleeping);
    }

    #[test]
    fn out_of_bounds_beats_manual_request() {
        let mut host = SimulatedHost::new();
        let entity = spawned_entity(&mut host, Vec3::ZERO);
        host.request_cleanup(entity);

        let mut manager = LifecycleManager::new(LifecycleSettings {
            world_bounds: Some(Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0))),
            ..Default::default()
        });
        assert_eq!(
            manager.cleanup_reason(&host, entity, Vec3::new(20.0, 0.0, 0.0), 0.0),
            Some(CleanupReason::OutOfBounds)
        );
        assert_eq!(
            manager.cleanup_reason(&host, entity, Vec3::ZERO, 0.0),
            Some(CleanupReason::Manual)
        );
    }

    #[test]
    fn lingering_despawn_expires_after_delay() {
        let mut host = SimulatedHost::new();
        let entity = spawned_entity(&mut host, Vec3::ZERO);
        host.despawn(entity);

        let mut manager = LifecycleManager::new(LifecycleSettings {
            cleanup_delay_ms: 200.0,
            ..Default::default()
        });
        assert_eq!(manager.cleanup_reason(&host, entity, Vec3::ZERO, 1000.0), None);
        assert_eq!(manager.cleanup_reason(&host, entity, Vec3::ZERO, 1150.0), None);
        assert_eq!(
            manager.cleanup_reason(&host, entity, Vec3::ZERO, 1200.0),
            Some(CleanupReason::Expired)
        );
    }

    #[test]
    fn failed_cleanup_counts_once_as_error() {
        let mut host = SimulatedHost::new();
        let entity = spawned_entity(&mut host, Vec3::ZERO);
        host.set_fail_cleanup(true);

        let mut manager = LifecycleManager::new(LifecycleSettings::default());
        let recorded = manager.cleanup(&mut host, entity, CleanupReason::Expired, 36);
        assert_eq!(recorded, CleanupReason::Error);

        let stats = manager.stats();
        assert_eq!(stats.total_cleaned, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.reclaimed_bytes, 36);

        manager.reset_stats();
        assert_eq!(*manager.stats(), CleanupStats::default());
    }

    #[test]
    fn sweep_fires_once_per_interval() {
        let mut manager = LifecycleManager::new(LifecycleSettings {
            sweep_interval_ms: 1000.0,
            ..Default::default()
        });
        assert!(!manager.sweep_due(500.0));
        assert!(manager.sweep_due(1000.0));
        assert!(!manager.sweep_due(1500.0));
        assert!(manager.sweep_due(2100.0));
    }
}
