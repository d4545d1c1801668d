//! Ember Particles - pooled particle effects for a hosted 3-D world
//!
//! Provides bounded, allocation-free-per-frame particle management with:
//! - Fixed-stride packed particle records and a uniform spatial grid per pool
//! - Sleep/wake and cleanup policy driven by viewpoint distance and bounds
//! - A prioritized, batching effect queue with per-frame emission caps
//! - Adaptive scaling of particle counts to hold a target frame time
//! - TOML effect templates, named patterns, and animation curves

pub mod buffer;
pub mod config;
pub mod curves;
pub mod emitter;
pub mod grid;
pub mod host;
pub mod lifecycle;
pub mod pattern;
pub mod performance;
pub mod pool;
pub mod queue;
pub mod rand;
pub mod sim;

use ember_core::Result;
use ember_runtime::RuntimeSystem;

pub use buffer::{ParticleDataBuffer, ParticleFlags, ParticleRecord, SlotUpdate};
pub use config::{EffectConfig, EffectOverrides, EffectsFile, GlobalSettings, SpeedRange};
pub use curves::{ColorGradient, Curve, ParticleAnimation};
pub use emitter::{EffectEmitter, EmitterStats, PoolStats};
pub use grid::SpatialGrid;
pub use host::{EntityDesc, ParticleHost, ParticleSpawn, PhysicsOptions};
pub use lifecycle::{CleanupReason, CleanupStats, LifecycleManager, LifecycleSettings};
pub use pattern::{Pattern, PatternRegistry};
pub use performance::{PerformanceController, PerformanceMetrics};
pub use pool::{ParticlePool, ParticleSlot};
pub use queue::{EffectQueue, QueueOptions, QueueStats};
pub use sim::SimulatedHost;

/// Lets a host frame loop tick the emitter alongside its other systems.
impl<H: ParticleHost> RuntimeSystem for EffectEmitter<H> {
    fn initialize(&mut self) -> Result<()> {
        let count = self.effect_names().count();
        tracing::info!(effects = count, "particle effects ready");
        Ok(())
    }

    fn update(&mut self, dt: f64) -> Result<()> {
        EffectEmitter::update(self, dt as f32);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.dispose();
        Ok(())
    }

    fn name(&self) -> &str {
        "particles"
    }
}
