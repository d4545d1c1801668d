//! Named effect patterns
//!
//! A pattern is data: default overrides layered over a template plus a table
//! of modifier functions keyed by name. Registries are plain values owned by
//! whoever builds the emitter.

use crate::config::{EffectConfig, EffectOverrides, SpeedRange};
use ember_core::Vec3;
use std::collections::HashMap;

/// Adjusts a generated config by a caller-supplied amount
pub type ModifierFn = fn(&mut EffectConfig, f32);

#[derive(Debug, Clone)]
pub struct Pattern {
    pub name: String,
    pub defaults: EffectOverrides,
    pub modifiers: HashMap<String, ModifierFn>,
}

impl Pattern {
    pub fn new(name: impl Into<String>, defaults: EffectOverrides) -> Self {
        Self {
            name: name.into(),
            defaults,
            modifiers: HashMap::new(),
        }
    }

    pub fn with_modifier(mut self, name: impl Into<String>, modifier: ModifierFn) -> Self {
        self.modifiers.insert(name.into(), modifier);
        self
    }

    /// Run a modifier by name. Returns false if the pattern has no such modifier.
    pub fn apply_modifier(&self, config: &mut EffectConfig, name: &str, value: f32) -> bool {
        match self.modifiers.get(name) {
            Some(modifier) => {
                modifier(config, value);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    patterns: HashMap<String, Pattern>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `burst`, `fountain` and `trail`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(burst());
        registry.register(fountain());
        registry.register(trail());
        registry
    }

    /// Add or replace a pattern, returning the one it replaced
    pub fn register(&mut self, pattern: Pattern) -> Option<Pattern> {
        self.patterns.insert(pattern.name.clone(), pattern)
    }

    pub fn get(&self, name: &str) -> Option<&Pattern> {
        self.patterns.get(name)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    /// Resolve the config a request should emit with.
    ///
    /// With a known pattern (named by the overrides, else the template) the
    /// layers are: template, raw overrides, pattern defaults, then modifier
    /// values from the template followed by the overrides. The pattern wins
    /// any field both set. Without one the overrides go straight onto the
    /// template.
    pub fn generate(
        &self,
        template: &EffectConfig,
        overrides: Option<&EffectOverrides>,
    ) -> EffectConfig {
        let mut config = template.clone();
        let pattern_name = overrides
            .and_then(|o| o.pattern.as_deref())
            .or(template.pattern.as_deref());

        let pattern = match pattern_name {
            Some(name) => {
                let found = self.patterns.get(name);
                if found.is_none() {
                    tracing::warn!(pattern = name, "unknown pattern, applying overrides directly");
                }
                found
            }
            None => None,
        };

        let Some(pattern) = pattern else {
            if let Some(overrides) = overrides {
                overrides.apply_to(&mut config);
            }
            return config;
        };

        if let Some(overrides) = overrides {
            overrides.apply_to(&mut config);
        }
        pattern.defaults.apply_to(&mut config);
        let modifiers = template
            .pattern_modifiers
            .iter()
            .chain(overrides.into_iter().flat_map(|o| o.modifiers.iter()));
        for (name, &value) in modifiers {
            if !pattern.apply_modifier(&mut config, name, value) {
                tracing::debug!(pattern = %pattern.name, modifier = %name, "unknown modifier ignored");
            }
        }
        config
    }
}

fn scale_count(config: &mut EffectConfig, factor: f32) {
    config.count = (config.count as f32 * factor.max(0.0)).round() as u32;
}

fn scale_speed(config: &mut EffectConfig, factor: f32) {
    let factor = factor.max(0.0);
    config.speed.min *= factor;
    config.speed.max *= factor;
}

fn scale_size(config: &mut EffectConfig, factor: f32) {
    config.size *= factor.max(0.0);
}

fn scale_lifetime(config: &mut EffectConfig, factor: f32) {
    config.lifetime *= factor.max(0.0);
}

fn set_spread(config: &mut EffectConfig, degrees: f32) {
    config.spread = degrees.clamp(0.0, 180.0);
}

/// Omnidirectional burst
fn burst() -> Pattern {
    Pattern::new(
        "burst",
        EffectOverrides {
            spread: Some(180.0),
            ..Default::default()
        },
    )
    .with_modifier("intensity", scale_count)
    .with_modifier("force", scale_speed)
    .with_modifier("size", scale_size)
}

/// Narrow upward jet
fn fountain() -> Pattern {
    Pattern::new(
        "fountain",
        EffectOverrides {
            direction: Some(Vec3::UP),
            spread: Some(15.0),
            speed: Some(SpeedRange::new(4.0, 7.0)),
            ..Default::default()
        },
    )
    .with_modifier("intensity", scale_count)
    .with_modifier("height", scale_speed)
    .with_modifier("width", set_spread)
}

/// Few slow, short-lived particles for following a moving source
fn trail() -> Pattern {
    Pattern::new(
        "trail",
        EffectOverrides {
            count: Some(3),
            lifetime: Some(0.5),
            spread: Some(10.0),
            speed: Some(SpeedRange::new(0.1, 0.5)),
            ..Default::default()
        },
    )
    .with_modifier("length", scale_lifetime)
    .with_modifier("density", scale_count)
}
