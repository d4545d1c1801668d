//! Bounded per-effect particle pool
//!
//! Owns the slot → entity mapping, one data buffer and one spatial grid.
//! Slots are never freed back to the host; a retired slot keeps its entity
//! and is handed out again by the next `acquire`.

use crate::buffer::{ParticleDataBuffer, ParticleFlags, SlotUpdate, RECORD_STRIDE};
use crate::grid::SpatialGrid;
use crate::host::{EntityDesc, ParticleHost, ParticleSpawn, PhysicsOptions};
use crate::lifecycle::{
    CleanupReason, CleanupStats, LifecycleManager, LifecycleSettings, SleepTransition,
};
use ember_core::{Aabb, EntityHandle, Vec3};
use std::collections::HashMap;

/// Bytes of buffer state one slot occupies
const SLOT_BYTES: u64 = (RECORD_STRIDE * 4) as u64;

/// Smallest buffer allocation when the first slot is created
const MIN_BUFFER_CAPACITY: usize = 8;

/// A slot handed out by `acquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleSlot {
    pub slot: usize,
    pub entity: EntityHandle,
}

pub struct ParticlePool {
    name: String,
    entities: Vec<EntityHandle>,
    slot_of: HashMap<EntityHandle, usize>,
    buffer: ParticleDataBuffer,
    grid: SpatialGrid<EntityHandle>,
    lifecycle: LifecycleManager,
    active: usize,
    /// Per-frame write batch, reused across frames
    pending: Vec<SlotUpdate>,
    retired: Vec<(usize, CleanupReason)>,
}

impl ParticlePool {
    pub fn new(
        name: impl Into<String>,
        initial_capacity: usize,
        cell_size: f32,
        lifecycle: LifecycleSettings,
    ) -> Self {
        Self {
            name: name.into(),
            entities: Vec::with_capacity(initial_capacity),
            slot_of: HashMap::with_capacity(initial_capacity),
            buffer: ParticleDataBuffer::new(initial_capacity),
            grid: SpatialGrid::new(cell_size),
            lifecycle: LifecycleManager::new(lifecycle),
            active: 0,
            pending: Vec::with_capacity(initial_capacity),
            retired: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand out a free slot, creating a new entity if the pool may still grow.
    ///
    /// Finished particles are reclaimed first. Returns `None` when every slot
    /// up to `pool_capacity` is live or the host refuses to create an entity.
    /// The returned slot must be passed to [`spawn`](Self::spawn) before the
    /// next `acquire`, otherwise the same slot is handed out again.
    pub fn acquire<H: ParticleHost>(
        &mut self,
        host: &mut H,
        desc: &EntityDesc<'_>,
        pool_capacity: usize,
        now_ms: f64,
    ) -> Option<ParticleSlot> {
        self.reclaim(host, now_ms);

        for slot in 0..self.entities.len() {
            if !self.buffer.has_flag(slot, ParticleFlags::SPAWNED) {
                self.buffer.set_scale(slot, desc.scale);
                self.buffer.set_flags(slot, ParticleFlags::empty());
                return Some(ParticleSlot {
                    slot,
                    entity: self.entities[slot],
                });
            }
        }

        if self.entities.len() >= pool_capacity {
            tracing::debug!(pool = %self.name, pool_capacity, "pool exhausted");
            return None;
        }

        let entity = match host.create_entity(desc) {
            Ok(entity) => entity,
            Err(err) => {
                tracing::warn!(pool = %self.name, error = %err, "failed to create particle entity");
                return None;
            }
        };

        let slot = self.entities.len();
        if slot >= self.buffer.capacity() {
            let grown = (self.buffer.capacity() * 2)
                .max(MIN_BUFFER_CAPACITY)
                .min(pool_capacity)
                .max(slot + 1);
            self.buffer.resize(grown);
        }
        self.entities.push(entity);
        self.slot_of.insert(entity, slot);
        self.buffer.set_scale(slot, desc.scale);
        self.buffer.set_flags(slot, ParticleFlags::empty());
        Some(ParticleSlot { slot, entity })
    }

    /// Put an acquired slot into the world.
    ///
    /// When the entity has a physics body the launch velocity is delivered as
    /// an impulse; physics failures are logged and the particle stays live.
    /// Returns false if the host refused to spawn, leaving the slot free.
    pub fn spawn<H: ParticleHost>(
        &mut self,
        host: &mut H,
        slot: ParticleSlot,
        spawn: &ParticleSpawn<'_>,
        physics: Option<&PhysicsOptions>,
    ) -> bool {
        let ParticleSlot { slot, entity } = slot;
        let body = physics.filter(|_| host.has_physics_body(entity));

        let host_spawn = ParticleSpawn {
            velocity: if body.is_some() { Vec3::ZERO } else { spawn.velocity },
            ..*spawn
        };
        if let Err(err) = host.spawn(entity, &host_spawn) {
            tracing::warn!(pool = %self.name, %entity, error = %err, "host refused spawn");
            return false;
        }
        if let Some(opts) = body {
            apply_physics(host, entity, spawn.velocity, opts);
        }

        self.buffer.update_many(&[SlotUpdate {
            position: Some(spawn.position),
            velocity: Some(spawn.velocity),
            scale: Some(spawn.scale),
            lifetime: Some(spawn.lifetime),
            flags: Some(ParticleFlags::SPAWNED),
            ..SlotUpdate::new(slot)
        }]);
        self.grid.update_position(entity, None, spawn.position);
        self.active += 1;
        true
    }

    /// Return a particle to the pool. Releasing a free slot is a no-op.
    pub fn release<H: ParticleHost>(&mut self, host: &mut H, entity: EntityHandle) -> bool {
        match self.slot_of.get(&entity) {
            Some(&slot) => self.release_slot(host, slot),
            None => false,
        }
    }

    fn release_slot<H: ParticleHost>(&mut self, host: &mut H, slot: usize) -> bool {
        if !self.buffer.has_flag(slot, ParticleFlags::SPAWNED) {
            return false;
        }
        let entity = self.entities[slot];
        self.buffer.set_flags(slot, ParticleFlags::empty());
        self.grid.remove(entity);
        self.lifecycle.forget(entity);
        if host.is_spawned(entity) {
            host.despawn(entity);
        }
        self.active -= 1;
        true
    }

    fn retire<H: ParticleHost>(&mut self, host: &mut H, slot: usize, reason: CleanupReason) {
        let entity = self.entities[slot];
        let recorded = self.lifecycle.cleanup(host, entity, reason, SLOT_BYTES);
        tracing::trace!(pool = %self.name, slot, ?recorded, "particle retired");
        self.release_slot(host, slot);
    }

    /// Retire every live slot that is finished: out of bounds, flagged by the
    /// host, lingering past the cleanup delay, or out of lifetime.
    fn reclaim<H: ParticleHost>(&mut self, host: &mut H, now_ms: f64) {
        self.retired.clear();
        for slot in 0..self.entities.len() {
            if !self.buffer.has_flag(slot, ParticleFlags::SPAWNED) {
                continue;
            }
            let entity = self.entities[slot];
            let position = self.buffer.position(slot);
            if let Some(reason) = self.lifecycle.cleanup_reason(host, entity, position, now_ms) {
                self.retired.push((slot, reason));
            } else if self.buffer.lifetime(slot) <= 0.0 {
                self.retired.push((slot, CleanupReason::Expired));
            }
        }
        self.drain_retired(host);
    }

    fn drain_retired<H: ParticleHost>(&mut self, host: &mut H) {
        let retired = std::mem::take(&mut self.retired);
        for &(slot, reason) in &retired {
            self.retire(host, slot, reason);
        }
        self.retired = retired;
    }

    /// Advance every live particle by one frame.
    ///
    /// Sleep/wake and cleanup are decided first; awake particles are then
    /// ticked by the host and their new state is written back to the buffer
    /// in a single batch. Grid membership follows position changes.
    pub fn update_all<H: ParticleHost>(&mut self, host: &mut H, dt: f32, now_ms: f64) {
        self.pending.clear();
        self.retired.clear();

        for slot in 0..self.entities.len() {
            let flags = self.buffer.flags(slot);
            if !flags.contains(ParticleFlags::SPAWNED) {
                continue;
            }
            let entity = self.entities[slot];
            let position = self.buffer.position(slot);

            if let Some(reason) = self.lifecycle.cleanup_reason(host, entity, position, now_ms) {
                self.retired.push((slot, reason));
                continue;
            }
            if !host.is_spawned(entity) {
                // Despawned by the host; waits out the cleanup delay
                continue;
            }

            let mut update = SlotUpdate::new(slot);
            let mut sleeping = flags.contains(ParticleFlags::SLEEPING);
            let velocity = self.buffer.velocity(slot);
            match self.lifecycle.evaluate_sleep(position, velocity, sleeping) {
                Some(SleepTransition::Sleep) => {
                    self.lifecycle.apply_sleep(host, entity, true);
                    sleeping = true;
                    update.flags = Some(flags | ParticleFlags::SLEEPING);
                }
                Some(SleepTransition::Wake) => {
                    self.lifecycle.apply_sleep(host, entity, false);
                    sleeping = false;
                    update.flags = Some(flags - ParticleFlags::SLEEPING);
                }
                None => {}
            }

            let remaining = self.buffer.lifetime(slot) - dt;
            update.lifetime = Some(remaining);

            if !sleeping {
                host.update(entity, dt);
                let new_position = host.position(entity);
                update.velocity = Some(host.velocity(entity));
                if new_position != position {
                    update.position = Some(new_position);
                    self.grid.update_position(entity, Some(position), new_position);
                }
            }

            if remaining <= 0.0 {
                self.retired.push((slot, CleanupReason::Expired));
            }
            self.pending.push(update);
        }

        self.buffer.update_many(&self.pending);
        self.drain_retired(host);

        if self.lifecycle.sweep_due(now_ms) {
            self.sweep(host, now_ms);
        }
    }

    /// Periodic full scan. Sleeping particles skip the per-frame host read,
    /// so their buffered positions go stale if the host moves them; the sweep
    /// pulls fresh positions for those before deciding what to reclaim.
    fn sweep<H: ParticleHost>(&mut self, host: &mut H, now_ms: f64) {
        self.pending.clear();
        for slot in 0..self.entities.len() {
            let flags = self.buffer.flags(slot);
            if !flags.contains(ParticleFlags::SPAWNED | ParticleFlags::SLEEPING) {
                continue;
            }
            let entity = self.entities[slot];
            if !host.is_spawned(entity) {
                continue;
            }
            let position = self.buffer.position(slot);
            let current = host.position(entity);
            if current != position {
                let mut update = SlotUpdate::new(slot);
                update.position = Some(current);
                self.pending.push(update);
                self.grid.update_position(entity, Some(position), current);
            }
        }
        if !self.pending.is_empty() {
            tracing::debug!(pool = %self.name, refreshed = self.pending.len(), "sweep refreshed sleeping positions");
            self.buffer.update_many(&self.pending);
        }
        self.reclaim(host, now_ms);
    }

    /// Despawn everything and drop storage
    pub fn dispose<H: ParticleHost>(&mut self, host: &mut H) {
        for slot in 0..self.entities.len() {
            self.release_slot(host, slot);
        }
        self.entities.clear();
        self.slot_of.clear();
        self.grid.clear();
        self.buffer.dispose();
        self.pending = Vec::new();
        self.retired = Vec::new();
    }

    pub fn set_viewpoint(&mut self, viewpoint: Vec3) {
        self.lifecycle.set_viewpoint(viewpoint);
    }

    pub fn set_world_bounds(&mut self, bounds: Option<Aabb>) {
        self.lifecycle.set_world_bounds(bounds);
    }

    pub fn set_sleep_distance(&mut self, distance: f32) {
        self.lifecycle.set_sleep_distance(distance);
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Slots created so far, live or free
    pub fn total_count(&self) -> usize {
        self.entities.len()
    }

    pub fn sleeping_count(&self) -> usize {
        (0..self.entities.len())
            .filter(|&slot| self.buffer.has_flag(slot, ParticleFlags::SLEEPING))
            .count()
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer.byte_len()
    }

    pub fn buffer(&self) -> &ParticleDataBuffer {
        &self.buffer
    }

    /// Entity bound to `slot`, if the slot exists
    pub fn entity(&self, slot: usize) -> Option<EntityHandle> {
        self.entities.get(slot).copied()
    }

    pub fn slot_of(&self, entity: EntityHandle) -> Option<usize> {
        self.slot_of.get(&entity).copied()
    }

    /// Live particles whose grid cells overlap the sphere (superset)
    pub fn nearby(&self, center: Vec3, radius: f32) -> Vec<EntityHandle> {
        self.grid.query_radius(center, radius)
    }

    /// Live particles whose grid cells overlap the box (superset)
    pub fn in_bounds(&self, min: Vec3, max: Vec3) -> Vec<EntityHandle> {
        self.grid.query_bounds(min, max)
    }

    pub fn cell_count(&self) -> usize {
        self.grid.cell_count()
    }

    pub fn cleanup_stats(&self) -> &CleanupStats {
        self.lifecycle.stats()
    }

    pub fn reset_cleanup_stats(&mut self) {
        self.lifecycle.reset_stats();
    }
}

fn apply_physics<H: ParticleHost>(
    host: &mut H,
    entity: EntityHandle,
    velocity: Vec3,
    opts: &PhysicsOptions,
) {
    let results = [
        host.set_damping(entity, opts.linear_damping, opts.angular_damping),
        host.set_fixed_rotation(entity, opts.fixed_rotation),
        host.apply_impulse(entity, velocity * opts.mass),
        match opts.angular_velocity {
            Some(spin) => host.set_angular_velocity(entity, spin),
            None => Ok(()),
        },
    ];
    for err in results.into_iter().filter_map(|r| r.err()) {
        tracing::warn!(%entity, error = %err, "physics setup failed");
    }
}
