//! Effects file inspection command

use crate::OutputFormat;
use anyhow::{Context, Result};
use ember_particles::{EffectsFile, PatternRegistry};

/// One effect as reported by `check`
struct EffectSummary<'a> {
    name: &'a str,
    count: u32,
    model: &'a str,
    lifetime: f32,
    capacity: usize,
    pattern: Option<&'a str>,
    pattern_known: bool,
    physics: bool,
}

pub fn run(path: &str, format: OutputFormat) -> Result<()> {
    let file = EffectsFile::load(path).with_context(|| format!("Failed to load {}", path))?;
    let patterns = PatternRegistry::with_builtins();
    let summaries = summarize(&file, &patterns);

    match format {
        OutputFormat::Json => print_json(&file, &summaries)?,
        OutputFormat::Text => print_text(path, &file, &summaries),
    }
    Ok(())
}

fn summarize<'a>(file: &'a EffectsFile, patterns: &PatternRegistry) -> Vec<EffectSummary<'a>> {
    file.effects
        .iter()
        .map(|(name, effect)| EffectSummary {
            name,
            count: effect.count,
            model: &effect.model,
            lifetime: effect.lifetime,
            capacity: file.settings.pool_capacity(name, effect),
            pattern: effect.pattern.as_deref(),
            pattern_known: effect
                .pattern
                .as_deref()
                .map_or(true, |p| patterns.get(p).is_some()),
            physics: effect.physics.is_some(),
        })
        .collect()
}

fn print_text(path: &str, file: &EffectsFile, summaries: &[EffectSummary<'_>]) {
    let settings = &file.settings;
    println!("[ember] {}: {} effect(s)", path, summaries.len());
    println!(
        "  max_particles={} target_fps={} adaptive={} queue={} per_frame={} batch={}",
        settings.max_particles,
        settings.target_fps,
        settings.adaptive_performance,
        settings.max_queue_size,
        settings.max_effects_per_frame,
        settings.batch_size,
    );

    let total_capacity: usize = summaries.iter().map(|s| s.capacity).sum();
    for s in summaries {
        let pattern = match (s.pattern, s.pattern_known) {
            (Some(p), true) => format!(" pattern={}", p),
            (Some(p), false) => format!(" pattern={} (unknown)", p),
            (None, _) => String::new(),
        };
        let physics = if s.physics { " physics" } else { "" };
        println!(
            "  {:<16} count={:<4} pool={:<5} lifetime={:.2}s model={}{}{}",
            s.name, s.count, s.capacity, s.lifetime, s.model, pattern, physics
        );
    }

    if total_capacity > settings.max_particles {
        println!(
            "  note: pools can hold {} particles, the global ceiling is {}",
            total_capacity, settings.max_particles
        );
    }
}

fn print_json(file: &EffectsFile, summaries: &[EffectSummary<'_>]) -> Result<()> {
    let effects: Vec<serde_json::Value> = summaries
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "count": s.count,
                "model": s.model,
                "lifetime": s.lifetime,
                "pool_capacity": s.capacity,
                "pattern": s.pattern,
                "pattern_known": s.pattern_known,
                "physics": s.physics,
            })
        })
        .collect();

    let output = serde_json::json!({
        "settings": file.settings,
        "effects": effects,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
