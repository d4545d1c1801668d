//! In-memory reference host
//!
//! Stands in for a game world in tests and headless runs. Entities without
//! a physics body use the kinematic fallback (`v += g·dt`, `p += v·dt`);
//! bodies additionally get linear damping. Failure injection lets callers
//! exercise the runtime's error paths.

use crate::curves::ParticleAnimation;
use crate::host::{EntityDesc, ParticleHost, ParticleSpawn};
use ember_core::{EmberError, EntityHandle, Result, Vec3};
use std::collections::HashMap;

/// Simulated rigid body state
#[derive(Debug, Clone, Default)]
pub struct SimBody {
    pub mass: f32,
    pub sleeping: bool,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub angular_velocity: Vec3,
    pub fixed_rotation: bool,
    pub impulses: u32,
}

/// One simulated entity
#[derive(Debug, Clone)]
pub struct SimEntity {
    pub model: String,
    pub base_scale: f32,
    pub scale: f32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub spawned: bool,
    pub sleeping: bool,
    pub age: f32,
    pub lifetime: f32,
    pub opacity: f32,
    /// Tint from the color gradient, if the effect has one
    pub color: Option<[f32; 4]>,
    /// Spin in degrees
    pub rotation: f32,
    pub cleanup_requested: bool,
    pub animation: Option<ParticleAnimation>,
    pub body: Option<SimBody>,
}

impl SimEntity {
    /// Normalized age in [0, 1]
    pub fn age_ratio(&self) -> f32 {
        if self.lifetime <= 0.0 {
            1.0
        } else {
            (self.age / self.lifetime).min(1.0)
        }
    }
}

pub struct SimulatedHost {
    entities: HashMap<EntityHandle, SimEntity>,
    next_handle: u64,
    pub gravity: Vec3,
    fail_cleanup: bool,
    fail_physics: bool,
    cleanup_calls: u64,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_handle: 1,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fail_cleanup: false,
            fail_physics: false,
            cleanup_calls: 0,
        }
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&SimEntity> {
        self.entities.get(&handle)
    }

    /// Raise the entity's "clean me up" signal
    pub fn request_cleanup(&mut self, handle: EntityHandle) {
        if let Some(e) = self.entities.get_mut(&handle) {
            e.cleanup_requested = true;
        }
    }

    pub fn set_fail_cleanup(&mut self, fail: bool) {
        self.fail_cleanup = fail;
    }

    pub fn set_fail_physics(&mut self, fail: bool) {
        self.fail_physics = fail;
    }

    pub fn created_count(&self) -> usize {
        self.entities.len()
    }

    pub fn spawned_count(&self) -> usize {
        self.entities.values().filter(|e| e.spawned).count()
    }

    pub fn cleanup_calls(&self) -> u64 {
        self.cleanup_calls
    }

    fn body_mut(&mut self, handle: EntityHandle) -> Result<&mut SimBody> {
        if self.fail_physics {
            return Err(EmberError::PhysicsError(format!(
                "simulated physics failure on {handle}"
            )));
        }
        self.entities
            .get_mut(&handle)
            .and_then(|e| e.body.as_mut())
            .ok_or_else(|| EmberError::PhysicsError(format!("entity {handle} has no body")))
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleHost for SimulatedHost {
    fn create_entity(&mut self, desc: &EntityDesc<'_>) -> Result<EntityHandle> {
        let handle = EntityHandle::from_raw(self.next_handle);
        self.next_handle += 1;
        let body = desc.physics.map(|opts| SimBody {
            mass: opts.mass.max(f32::EPSILON),
            linear_damping: opts.linear_damping,
            angular_damping: opts.angular_damping,
            fixed_rotation: opts.fixed_rotation,
            ..Default::default()
        });
        self.entities.insert(
            handle,
            SimEntity {
                model: desc.model.to_string(),
                base_scale: desc.scale,
                scale: desc.scale,
                position: Vec3::ZERO,
                velocity: Vec3::ZERO,
                spawned: false,
                sleeping: false,
                age: 0.0,
                lifetime: 0.0,
                opacity: 1.0,
                color: None,
                rotation: 0.0,
                cleanup_requested: false,
                animation: None,
                body,
            },
        );
        Ok(handle)
    }

    fn spawn(&mut self, entity: EntityHandle, spawn: &ParticleSpawn<'_>) -> Result<()> {
        let e = self
            .entities
            .get_mut(&entity)
            .ok_or_else(|| EmberError::HostError(format!("unknown entity {entity}")))?;
        e.position = spawn.position;
        e.velocity = spawn.velocity;
        e.base_scale = spawn.scale;
        e.scale = spawn.scale;
        e.lifetime = spawn.lifetime;
        e.age = 0.0;
        e.opacity = 1.0;
        e.color = spawn
            .animation
            .and_then(|anim| anim.color.as_ref())
            .map(|gradient| gradient.sample(0.0));
        e.rotation = 0.0;
        e.spawned = true;
        e.sleeping = false;
        e.cleanup_requested = false;
        e.animation = spawn.animation.cloned();
        Ok(())
    }

    fn despawn(&mut self, entity: EntityHandle) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.spawned = false;
            e.sleeping = false;
        }
    }

    fn is_spawned(&self, entity: EntityHandle) -> bool {
        self.entities.get(&entity).is_some_and(|e| e.spawned)
    }

    fn update(&mut self, entity: EntityHandle, dt: f32) {
        let gravity = self.gravity;
        let Some(e) = self.entities.get_mut(&entity) else {
            return;
        };
        if !e.spawned || e.sleeping {
            return;
        }

        e.age += dt;
        e.velocity += gravity * dt;
        if let Some(body) = &e.body {
            if body.linear_damping > 0.0 {
                e.velocity = e.velocity * (1.0 - body.linear_damping * dt).max(0.0);
            }
        }
        e.position += e.velocity * dt;

        let t = e.age_ratio();
        if let Some(anim) = &e.animation {
            if let Some(curve) = &anim.scale {
                e.scale = e.base_scale * curve.sample(t);
            }
            if let Some(curve) = &anim.opacity {
                e.opacity = curve.sample(t);
            }
            if let Some(gradient) = &anim.color {
                e.color = Some(gradient.sample(t));
            }
            if let Some(speed) = anim.rotation_speed {
                e.rotation = (e.rotation + speed * dt) % 360.0;
            }
        }
        if e.age >= e.lifetime {
            e.cleanup_requested = true;
        }
    }

    fn position(&self, entity: EntityHandle) -> Vec3 {
        self.entities
            .get(&entity)
            .map(|e| e.position)
            .unwrap_or_default()
    }

    fn set_position(&mut self, entity: EntityHandle, position: Vec3) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.position = position;
        }
    }

    fn velocity(&self, entity: EntityHandle) -> Vec3 {
        self.entities
            .get(&entity)
            .map(|e| e.velocity)
            .unwrap_or_default()
    }

    fn set_velocity(&mut self, entity: EntityHandle, velocity: Vec3) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.velocity = velocity;
        }
    }

    fn set_sleeping(&mut self, entity: EntityHandle, sleeping: bool) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.sleeping = sleeping;
        }
    }

    fn should_cleanup(&self, entity: EntityHandle) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|e| e.cleanup_requested)
    }

    fn cleanup(&mut self, entity: EntityHandle) -> Result<()> {
        self.cleanup_calls += 1;
        if self.fail_cleanup {
            return Err(EmberError::HostError(format!(
                "simulated cleanup failure on {entity}"
            )));
        }
        if let Some(e) = self.entities.get_mut(&entity) {
            e.cleanup_requested = false;
            e.animation = None;
        }
        Ok(())
    }

    fn has_physics_body(&self, entity: EntityHandle) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|e| e.body.is_some())
    }

    fn apply_impulse(&mut self, entity: EntityHandle, impulse: Vec3) -> Result<()> {
        let body = self.body_mut(entity)?;
        body.impulses += 1;
        let inv_mass = 1.0 / body.mass;
        if let Some(e) = self.entities.get_mut(&entity) {
            e.velocity += impulse * inv_mass;
        }
        Ok(())
    }

    fn set_angular_velocity(&mut self, entity: EntityHandle, velocity: Vec3) -> Result<()> {
        self.body_mut(entity)?.angular_velocity = velocity;
        Ok(())
    }

    fn set_damping(&mut self, entity: EntityHandle, linear: f32, angular: f32) -> Result<()> {
        let body = self.body_mut(entity)?;
        body.linear_damping = linear;
        body.angular_damping = angular;
        Ok(())
    }

    fn set_fixed_rotation(&mut self, entity: EntityHandle, fixed: bool) -> Result<()> {
        self.body_mut(entity)?.fixed_rotation = fixed;
        Ok(())
    }

    fn set_body_sleeping(&mut self, entity: EntityHandle, sleeping: bool) -> Result<()> {
        self.body_mut(entity)?.sleeping = sleeping;
        Ok(())
    }
}
