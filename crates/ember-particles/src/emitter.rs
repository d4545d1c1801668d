//! Effect emitter: pools, queue and performance control behind one facade
//!
//! Gameplay code calls [`EffectEmitter::trigger`] whenever an effect should
//! fire and [`EffectEmitter::update`] once per frame. Each update measures
//! real elapsed time, drains the queue into the pools and then ticks every
//! pool, in that order.

use crate::config::{EffectConfig, EffectOverrides, EffectsFile, GlobalSettings};
use crate::host::{EntityDesc, ParticleHost, ParticleSpawn};
use crate::lifecycle::CleanupStats;
use crate::pattern::PatternRegistry;
use crate::performance::{PerformanceController, PerformanceMetrics};
use crate::pool::ParticlePool;
use crate::queue::{EffectQueue, QueueOptions, QueueSettings, QueueStats};
use crate::rand::ParticleRng;
use ember_core::{Aabb, EmberError, Result, Vec3};
use ember_runtime::{FrameClock, MonotonicTime, TimeSource};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const DEFAULT_SEED: u32 = 0x5EED_F1A5;

/// Per-pool counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub active: usize,
    pub pooled: usize,
    pub sleeping: usize,
    pub buffer_bytes: usize,
    pub cells: usize,
    pub cleanup: CleanupStats,
}

/// Counters for every pool, keyed by effect name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmitterStats {
    pub pools: BTreeMap<String, PoolStats>,
}

impl EmitterStats {
    pub fn total_active(&self) -> usize {
        self.pools.values().map(|p| p.active).sum()
    }

    pub fn total_pooled(&self) -> usize {
        self.pools.values().map(|p| p.pooled).sum()
    }

    pub fn total_sleeping(&self) -> usize {
        self.pools.values().map(|p| p.sleeping).sum()
    }

    pub fn total_cleaned(&self) -> u64 {
        self.pools.values().map(|p| p.cleanup.total_cleaned).sum()
    }
}

pub struct EffectEmitter<H: ParticleHost> {
    host: H,
    settings: GlobalSettings,
    effects: BTreeMap<String, EffectConfig>,
    pools: HashMap<String, ParticlePool>,
    queue: EffectQueue,
    controller: PerformanceController,
    patterns: PatternRegistry,
    time: Box<dyn TimeSource>,
    clock: FrameClock,
    rng: ParticleRng,
    camera: Vec3,
}

impl<H: ParticleHost> EffectEmitter<H> {
    /// Build an emitter with one pool per configured effect, the built-in
    /// patterns and wall-clock frame timing.
    pub fn new(host: H, file: EffectsFile) -> Self {
        let EffectsFile { settings, effects } = file;

        let pools = effects
            .iter()
            .map(|(name, template)| {
                let capacity = settings.pool_capacity(name, template);
                let initial = (template.count as usize).clamp(1, capacity);
                let pool = ParticlePool::new(
                    name.clone(),
                    initial,
                    settings.grid_cell_size,
                    settings.lifecycle(),
                );
                (name.clone(), pool)
            })
            .collect();

        let queue = EffectQueue::new(QueueSettings {
            max_queue_size: settings.max_queue_size,
            max_effects_per_frame: settings.max_effects_per_frame,
            batch_size: settings.batch_size,
            default_max_age_ms: settings.default_max_age_ms,
        });
        let controller = PerformanceController::new(
            settings.target_frame_ms(),
            settings.adaptive_performance,
            settings.min_reduction_factor,
        );

        tracing::debug!(effects = effects.len(), "effect emitter created");
        Self {
            host,
            settings,
            effects,
            pools,
            queue,
            controller,
            patterns: PatternRegistry::with_builtins(),
            time: Box::new(MonotonicTime::new()),
            clock: FrameClock::new(),
            rng: ParticleRng::new(DEFAULT_SEED),
            camera: Vec3::ZERO,
        }
    }

    /// Replace the clock used for frame timing and queue ages
    pub fn with_time_source(mut self, time: impl TimeSource + 'static) -> Self {
        self.time = Box::new(time);
        self.clock.reset();
        self
    }

    pub fn with_patterns(mut self, patterns: PatternRegistry) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.rng = ParticleRng::new(seed);
        self
    }

    fn now_ms(&self) -> f64 {
        self.time.now().as_secs_f64() * 1000.0
    }

    /// Queue an effect for emission on the next update.
    ///
    /// Returns false for an unknown effect name or when the queue rejects
    /// the request.
    pub fn trigger(
        &mut self,
        name: &str,
        position: Vec3,
        overrides: Option<EffectOverrides>,
        options: QueueOptions,
    ) -> bool {
        if !self.effects.contains_key(name) {
            tracing::warn!(effect = name, "trigger for unknown effect ignored");
            return false;
        }
        let now_ms = self.now_ms();
        self.queue.enqueue(name, position, overrides, options, now_ms)
    }

    /// Run one frame: metrics, queue drain and emission, then simulation.
    ///
    /// `dt` drives particle simulation only; performance metrics use the
    /// measured time since the previous call.
    pub fn update(&mut self, dt: f32) {
        let now = self.time.now();
        if let Some(elapsed) = self.clock.tick(now) {
            self.controller.record_frame(elapsed * 1000.0);
        }
        let now_ms = now.as_secs_f64() * 1000.0;

        for batch in self.queue.dequeue(now_ms) {
            tracing::trace!(key = %batch.key, size = batch.effects.len(), "emitting batch");
            for effect in batch.effects {
                if let Err(err) = self.emit_now(&effect.name, effect.position, effect.overrides.as_ref()) {
                    tracing::warn!(effect = %effect.name, error = %err, "queued effect failed");
                }
            }
        }

        for pool in self.pools.values_mut() {
            pool.update_all(&mut self.host, dt, now_ms);
        }
    }

    /// Emit an effect immediately, bypassing the queue.
    ///
    /// Returns how many particles were spawned, which may be fewer than the
    /// effect asks for when the pool or the global ceiling runs out.
    pub fn emit_now(
        &mut self,
        name: &str,
        position: Vec3,
        overrides: Option<&EffectOverrides>,
    ) -> Result<usize> {
        let Some(template) = self.effects.get(name) else {
            return Err(EmberError::UnknownEffect(name.to_string()));
        };
        let config = self.patterns.generate(template, overrides);
        let capacity = self.settings.pool_capacity(name, template);
        let count = self.controller.scaled_count(config.count);
        let now_ms = self.now_ms();
        let other_active: usize = self
            .pools
            .iter()
            .filter(|(pool_name, _)| pool_name.as_str() != name)
            .map(|(_, pool)| pool.active_count())
            .sum();

        let Some(pool) = self.pools.get_mut(name) else {
            return Err(EmberError::UnknownEffect(name.to_string()));
        };
        let desc = EntityDesc {
            model: &config.model,
            scale: config.size,
            physics: config.physics.as_ref(),
        };

        let mut emitted = 0;
        for _ in 0..count {
            if other_active + pool.active_count() >= self.settings.max_particles {
                tracing::debug!(effect = name, emitted, "global particle ceiling reached");
                break;
            }
            let Some(slot) = pool.acquire(&mut self.host, &desc, capacity, now_ms) else {
                tracing::debug!(effect = name, emitted, requested = count, "effect cut short, pool exhausted");
                break;
            };

            let speed = config.speed.sample(&mut self.rng);
            let direction = self.rng.cone_direction(config.direction, config.spread);
            let spawn = ParticleSpawn {
                position,
                velocity: direction * speed,
                scale: config.size,
                lifetime: config.lifetime,
                animation: config.animation.as_ref(),
            };
            if !pool.spawn(&mut self.host, slot, &spawn, config.physics.as_ref()) {
                break;
            }
            emitted += 1;
        }
        Ok(emitted)
    }

    /// Viewpoint used for sleep and wake distances
    pub fn set_camera_position(&mut self, position: Vec3) {
        self.camera = position;
        for pool in self.pools.values_mut() {
            pool.set_viewpoint(position);
        }
    }

    pub fn camera_position(&self) -> Vec3 {
        self.camera
    }

    /// Retire particles that leave the box
    pub fn set_world_bounds(&mut self, min: Vec3, max: Vec3) {
        let bounds = Some(Aabb::new(min, max));
        self.settings.world_bounds = bounds;
        for pool in self.pools.values_mut() {
            pool.set_world_bounds(bounds);
        }
    }

    pub fn clear_world_bounds(&mut self) {
        self.settings.world_bounds = None;
        for pool in self.pools.values_mut() {
            pool.set_world_bounds(None);
        }
    }

    pub fn set_sleep_distance(&mut self, distance: f32) {
        self.settings.sleep_distance = distance;
        for pool in self.pools.values_mut() {
            pool.set_sleep_distance(distance);
        }
    }

    pub fn set_adaptive_performance(&mut self, adaptive: bool) {
        self.settings.adaptive_performance = adaptive;
        self.controller.set_adaptive(adaptive);
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.controller.metrics(self.total_active(), self.total_pooled())
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn cleanup_stats(&self, effect: &str) -> Option<&CleanupStats> {
        self.pools.get(effect).map(ParticlePool::cleanup_stats)
    }

    /// Zero one effect's cleanup counters. Returns false for an unknown effect.
    pub fn reset_cleanup_stats(&mut self, effect: &str) -> bool {
        match self.pools.get_mut(effect) {
            Some(pool) => {
                pool.reset_cleanup_stats();
                true
            }
            None => false,
        }
    }

    pub fn reset_all_cleanup_stats(&mut self) {
        for pool in self.pools.values_mut() {
            pool.reset_cleanup_stats();
        }
    }

    pub fn stats(&self) -> EmitterStats {
        let pools = self
            .pools
            .iter()
            .map(|(name, pool)| {
                let capacity = self
                    .effects
                    .get(name)
                    .map(|template| self.settings.pool_capacity(name, template))
                    .unwrap_or_default();
                let stats = PoolStats {
                    capacity,
                    active: pool.active_count(),
                    pooled: pool.total_count(),
                    sleeping: pool.sleeping_count(),
                    buffer_bytes: pool.buffer_bytes(),
                    cells: pool.cell_count(),
                    cleanup: pool.cleanup_stats().clone(),
                };
                (name.clone(), stats)
            })
            .collect();
        EmitterStats { pools }
    }

    pub fn total_active(&self) -> usize {
        self.pools.values().map(ParticlePool::active_count).sum()
    }

    pub fn total_pooled(&self) -> usize {
        self.pools.values().map(ParticlePool::total_count).sum()
    }

    pub fn pool(&self, effect: &str) -> Option<&ParticlePool> {
        self.pools.get(effect)
    }

    pub fn has_effect(&self, name: &str) -> bool {
        self.effects.contains_key(name)
    }

    pub fn effect_names(&self) -> impl Iterator<Item = &str> {
        self.effects.keys().map(String::as_str)
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    pub fn patterns_mut(&mut self) -> &mut PatternRegistry {
        &mut self.patterns
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Despawn every particle, drop all pools and pending requests
    pub fn dispose(&mut self) {
        for pool in self.pools.values_mut() {
            pool.dispose(&mut self.host);
        }
        self.pools.clear();
        self.effects.clear();
        self.queue.clear();
        tracing::debug!("effect emitter disposed");
    }
}
