//! Effect templates, per-request overrides and global settings
//!
//! Everything here is plain data loaded from TOML. Parsing is structural;
//! the runtime assumes the values it receives are sensible.

use crate::curves::ParticleAnimation;
use crate::host::PhysicsOptions;
use crate::lifecycle::LifecycleSettings;
use crate::rand::ParticleRng;
use ember_core::{Aabb, EmberError, Result, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Uniform launch-speed range in world units per second
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedRange {
    pub min: f32,
    pub max: f32,
}

impl SpeedRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn sample(&self, rng: &mut ParticleRng) -> f32 {
        rng.range(self.min, self.max)
    }
}

/// A named effect template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectConfig {
    /// Particles per emission before performance scaling
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_model")]
    pub model: String,
    /// Seconds each particle lives
    #[serde(default = "default_lifetime")]
    pub lifetime: f32,
    pub speed: SpeedRange,
    /// Cone half-angle in degrees; 180 or more means any direction
    #[serde(default = "default_spread")]
    pub spread: f32,
    /// Cone axis; absent means a full sphere
    #[serde(default)]
    pub direction: Option<Vec3>,
    #[serde(default = "default_size")]
    pub size: f32,
    #[serde(default)]
    pub physics: Option<PhysicsOptions>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub pattern_modifiers: BTreeMap<String, f32>,
    #[serde(default)]
    pub animation: Option<ParticleAnimation>,
}

fn default_count() -> u32 {
    10
}

fn default_model() -> String {
    "particle".to_string()
}

fn default_lifetime() -> f32 {
    1.0
}

fn default_spread() -> f32 {
    180.0
}

fn default_size() -> f32 {
    1.0
}

impl EffectConfig {
    /// Template with defaults for everything but the speed range
    pub fn new(speed: SpeedRange) -> Self {
        Self {
            count: default_count(),
            model: default_model(),
            lifetime: default_lifetime(),
            speed,
            spread: default_spread(),
            direction: None,
            size: default_size(),
            physics: None,
            pattern: None,
            pattern_modifiers: BTreeMap::new(),
            animation: None,
        }
    }
}

/// Per-request adjustments layered over a template. Only `Some` fields apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectOverrides {
    pub count: Option<u32>,
    pub model: Option<String>,
    pub lifetime: Option<f32>,
    pub speed: Option<SpeedRange>,
    pub spread: Option<f32>,
    pub direction: Option<Vec3>,
    pub size: Option<f32>,
    pub physics: Option<PhysicsOptions>,
    /// Pattern to generate the config through
    pub pattern: Option<String>,
    /// Modifier values for the pattern, by modifier name
    pub modifiers: BTreeMap<String, f32>,
}

impl EffectOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Write every set field onto `config`. Modifiers are left to the pattern.
    pub fn apply_to(&self, config: &mut EffectConfig) {
        if let Some(count) = self.count {
            config.count = count;
        }
        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        if let Some(lifetime) = self.lifetime {
            config.lifetime = lifetime;
        }
        if let Some(speed) = self.speed {
            config.speed = speed;
        }
        if let Some(spread) = self.spread {
            config.spread = spread;
        }
        if let Some(direction) = self.direction {
            config.direction = Some(direction);
        }
        if let Some(size) = self.size {
            config.size = size;
        }
        if let Some(physics) = &self.physics {
            config.physics = Some(physics.clone());
        }
        if let Some(pattern) = &self.pattern {
            config.pattern = Some(pattern.clone());
        }
    }
}

/// Runtime-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub adaptive_performance: bool,
    /// Ceiling on live particles across every pool
    pub max_particles: usize,
    pub target_fps: f64,
    pub min_reduction_factor: f64,
    pub max_queue_size: usize,
    pub max_effects_per_frame: usize,
    pub batch_size: usize,
    pub default_max_age_ms: f64,
    /// Pool capacity is `count * pool_multiplier` unless overridden
    pub pool_multiplier: usize,
    pub pool_sizes: BTreeMap<String, usize>,
    pub sleep_distance: f32,
    pub sleep_velocity: f32,
    pub cleanup_delay_ms: f64,
    pub sweep_interval_ms: f64,
    pub grid_cell_size: f32,
    pub world_bounds: Option<Aabb>,
    pub gravity: Vec3,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            adaptive_performance: true,
            max_particles: 2000,
            target_fps: 60.0,
            min_reduction_factor: 0.1,
            max_queue_size: 256,
            max_effects_per_frame: 16,
            batch_size: 10,
            default_max_age_ms: 1000.0,
            pool_multiplier: 3,
            pool_sizes: BTreeMap::new(),
            sleep_distance: 100.0,
            sleep_velocity: 0.01,
            cleanup_delay_ms: 250.0,
            sweep_interval_ms: 1000.0,
            grid_cell_size: 10.0,
            world_bounds: None,
            gravity: Vec3::new(0.0, -9.81, 0.0),
        }
    }
}

impl GlobalSettings {
    /// Capacity of the pool backing `effect`
    pub fn pool_capacity(&self, effect: &str, template: &EffectConfig) -> usize {
        self.pool_sizes
            .get(effect)
            .copied()
            .unwrap_or(template.count as usize * self.pool_multiplier)
            .max(1)
    }

    pub fn target_frame_ms(&self) -> f64 {
        1000.0 / self.target_fps
    }

    pub fn lifecycle(&self) -> LifecycleSettings {
        LifecycleSettings {
            sleep_distance: self.sleep_distance,
            sleep_velocity: self.sleep_velocity,
            world_bounds: self.world_bounds,
            cleanup_delay_ms: self.cleanup_delay_ms,
            sweep_interval_ms: self.sweep_interval_ms,
        }
    }
}

/// An effects file: global settings plus named templates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectsFile {
    #[serde(default)]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub effects: BTreeMap<String, EffectConfig>,
}

impl EffectsFile {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: Self = toml::from_str(source)?;
        if file.settings.target_fps <= 0.0 {
            return Err(EmberError::ConfigError(format!(
                "target_fps must be positive, got {}",
                file.settings.target_fps
            )));
        }
        if file.settings.grid_cell_size <= 0.0 {
            return Err(EmberError::ConfigError(format!(
                "grid_cell_size must be positive, got {}",
                file.settings.grid_cell_size
            )));
        }
        Ok(file)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }
}
