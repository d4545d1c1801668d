//! Contract between the particle runtime and the host world
//!
//! The host owns entities, models and physics. Ember asks it to create,
//! spawn, tick and despawn entities and reads positions back; it never
//! touches host state any other way.

use crate::curves::ParticleAnimation;
use ember_core::{EntityHandle, Result, Vec3};
use serde::{Deserialize, Serialize};

/// Rigid-body parameters for particles that get a physics body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsOptions {
    /// Scales the launch velocity into an impulse
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Initial spin in radians per second
    pub angular_velocity: Option<Vec3>,
    pub fixed_rotation: bool,
}

impl Default for PhysicsOptions {
    fn default() -> Self {
        Self {
            mass: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            angular_velocity: None,
            fixed_rotation: false,
        }
    }
}

/// What to build when a pool needs a fresh entity
#[derive(Debug, Clone, Copy)]
pub struct EntityDesc<'a> {
    pub model: &'a str,
    pub scale: f32,
    pub physics: Option<&'a PhysicsOptions>,
}

/// Initial state handed to the host when a slot goes live
#[derive(Debug, Clone, Copy)]
pub struct ParticleSpawn<'a> {
    pub position: Vec3,
    pub velocity: Vec3,
    pub scale: f32,
    /// Seconds until the runtime retires the particle
    pub lifetime: f32,
    pub animation: Option<&'a ParticleAnimation>,
}

/// Host world operations the particle runtime depends on.
///
/// All calls are synchronous. Physics operations default to no-ops so a
/// host without rigid bodies only implements the entity half.
pub trait ParticleHost {
    fn create_entity(&mut self, desc: &EntityDesc<'_>) -> Result<EntityHandle>;

    fn spawn(&mut self, entity: EntityHandle, spawn: &ParticleSpawn<'_>) -> Result<()>;

    fn despawn(&mut self, entity: EntityHandle);

    fn is_spawned(&self, entity: EntityHandle) -> bool;

    /// Advance the entity's own visual state (integration, animation, spin)
    fn update(&mut self, entity: EntityHandle, dt: f32);

    fn position(&self, entity: EntityHandle) -> Vec3;

    fn set_position(&mut self, entity: EntityHandle, position: Vec3);

    fn velocity(&self, entity: EntityHandle) -> Vec3;

    fn set_velocity(&mut self, entity: EntityHandle, velocity: Vec3);

    /// Presentation-layer sleep toggle
    fn set_sleeping(&mut self, entity: EntityHandle, sleeping: bool);

    /// The entity asks to be retired now
    fn should_cleanup(&self, _entity: EntityHandle) -> bool {
        false
    }

    /// Release whatever the host attached to the entity
    fn cleanup(&mut self, _entity: EntityHandle) -> Result<()> {
        Ok(())
    }

    fn has_physics_body(&self, _entity: EntityHandle) -> bool {
        false
    }

    fn apply_impulse(&mut self, _entity: EntityHandle, _impulse: Vec3) -> Result<()> {
        Ok(())
    }

    fn set_angular_velocity(&mut self, _entity: EntityHandle, _velocity: Vec3) -> Result<()> {
        Ok(())
    }

    fn set_damping(&mut self, _entity: EntityHandle, _linear: f32, _angular: f32) -> Result<()> {
        Ok(())
    }

    fn set_fixed_rotation(&mut self, _entity: EntityHandle, _fixed: bool) -> Result<()> {
        Ok(())
    }

    fn set_body_sleeping(&mut self, _entity: EntityHandle, _sleeping: bool) -> Result<()> {
        Ok(())
    }
}
