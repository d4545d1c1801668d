//! Headless load simulation against the simulated host
//!
//! Every frame fires a fixed number of triggers at seeded random spots, then
//! advances a manual clock by a frame time that grows with the live particle
//! count. The adaptive controller sees those frame times and thins effects.

use crate::OutputFormat;
use anyhow::{bail, Context, Result};
use ember_core::Vec3;
use ember_particles::performance::PerformanceMetrics;
use ember_particles::rand::ParticleRng;
use ember_particles::{EffectEmitter, EffectsFile, EmitterStats, QueueOptions, QueueStats, SimulatedHost};
use ember_runtime::ManualTime;
use serde::Serialize;

/// Frame time with no particles alive, as a fraction of the target
const BASE_LOAD: f64 = 0.5;

/// Half-extent of the square triggers are scattered over
const SPREAD: f32 = 40.0;

/// Number of evenly spaced samples kept for the report
const SAMPLES: u32 = 10;

pub struct StressArgs {
    pub file: String,
    pub frames: u32,
    pub triggers: u32,
    pub seed: u32,
    pub frame_cost_us: f64,
    pub camera: [f32; 3],
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct FrameSample {
    frame: u32,
    frame_ms: f64,
    active: usize,
    queued: usize,
    reduction_factor: f64,
}

#[derive(Debug, Serialize)]
struct StressReport {
    frames: u32,
    triggers_per_frame: u32,
    accepted: u64,
    rejected: u64,
    peak_active: usize,
    simulated_ms: f64,
    performance: PerformanceMetrics,
    queue: QueueStats,
    pools: EmitterStats,
    samples: Vec<FrameSample>,
}

pub fn run(args: StressArgs) -> Result<()> {
    let file = EffectsFile::load(&args.file).with_context(|| format!("Failed to load {}", args.file))?;
    let report = simulate(file, &args)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }
    Ok(())
}

fn simulate(file: EffectsFile, args: &StressArgs) -> Result<StressReport> {
    let names: Vec<String> = file.effects.keys().cloned().collect();
    if names.is_empty() {
        bail!("{} defines no effects", args.file);
    }

    let target_ms = file.settings.target_frame_ms();
    let gravity = file.settings.gravity;
    let time = ManualTime::new();
    let host = SimulatedHost::new().with_gravity(gravity);
    let mut emitter = EffectEmitter::new(host, file)
        .with_time_source(time.clone())
        .with_seed(args.seed);
    emitter.set_camera_position(Vec3::from_array(args.camera));

    let mut rng = ParticleRng::new(args.seed.wrapping_add(1));
    let sample_every = (args.frames / SAMPLES).max(1);
    let mut samples = Vec::new();
    let mut accepted = 0u64;
    let mut rejected = 0u64;
    let mut peak_active = 0usize;
    let mut simulated_ms = 0.0;

    tracing::info!(frames = args.frames, triggers = args.triggers, seed = args.seed, "stress run started");
    emitter.update(0.0);

    for frame in 1..=args.frames {
        for _ in 0..args.triggers {
            let index = (rng.next_f32() * names.len() as f32) as usize % names.len();
            let position = Vec3::new(
                rng.range(-SPREAD, SPREAD),
                rng.range(0.0, SPREAD * 0.25),
                rng.range(-SPREAD, SPREAD),
            );
            let priority = (rng.next_f32() * 3.0) as i32;
            if emitter.trigger(&names[index], position, None, QueueOptions::with_priority(priority)) {
                accepted += 1;
            } else {
                rejected += 1;
            }
        }

        let active = emitter.total_active();
        let frame_ms = target_ms * BASE_LOAD + active as f64 * args.frame_cost_us / 1000.0;
        time.advance_ms(frame_ms);
        simulated_ms += frame_ms;
        emitter.update((frame_ms / 1000.0).min(0.1) as f32);

        let active = emitter.total_active();
        peak_active = peak_active.max(active);
        if frame % sample_every == 0 || frame == args.frames {
            samples.push(FrameSample {
                frame,
                frame_ms,
                active,
                queued: emitter.queue_stats().total,
                reduction_factor: emitter.performance_metrics().reduction_factor,
            });
        }
    }

    let report = StressReport {
        frames: args.frames,
        triggers_per_frame: args.triggers,
        accepted,
        rejected,
        peak_active,
        simulated_ms,
        performance: emitter.performance_metrics(),
        queue: emitter.queue_stats(),
        pools: emitter.stats(),
        samples,
    };
    emitter.dispose();
    Ok(report)
}

fn print_text(report: &StressReport) {
    let perf = &report.performance;
    println!(
        "[ember] {} frames, {} trigger(s)/frame: {} accepted, {} rejected",
        report.frames, report.triggers_per_frame, report.accepted, report.rejected
    );
    println!(
        "[ember] peak active {}, final factor {:.3}, avg frame {:.2}ms (target {:.2}ms), dropped frames {}",
        report.peak_active,
        perf.reduction_factor,
        perf.average_frame_ms,
        perf.target_frame_ms,
        perf.dropped_frames
    );
    println!(
        "[ember] queue: {} pending, {} expired, {} rejected",
        report.queue.total, report.queue.expired, report.queue.rejected
    );

    println!();
    println!("  {:>6} {:>9} {:>7} {:>7} {:>7}", "frame", "frame_ms", "active", "queued", "factor");
    for s in &report.samples {
        println!(
            "  {:>6} {:>9.2} {:>7} {:>7} {:>7.3}",
            s.frame, s.frame_ms, s.active, s.queued, s.reduction_factor
        );
    }

    println!();
    for (name, pool) in &report.pools.pools {
        let c = &pool.cleanup;
        println!(
            "  {:<16} pool {:>4}/{:<4} cleaned {} (expired {}, bounds {}, manual {}, error {})",
            name, pool.pooled, pool.capacity, c.total_cleaned, c.expired, c.out_of_bounds, c.manual, c.error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EFFECTS: &str = r#"
[settings]
max_particles = 300
target_fps = 60.0

[effects.spark]
count = 12
lifetime = 1.0
speed = { min = 2.0, max = 5.0 }

[effects.smoke]
count = 6
lifetime = 2.0
speed = { min = 0.2, max = 0.6 }
direction = [0.0, 1.0, 0.0]
spread = 20.0
"#;

    fn args(frames: u32, frame_cost_us: f64) -> StressArgs {
        StressArgs {
            file: "inline".to_string(),
            frames,
            triggers: 6,
            seed: 3,
            frame_cost_us,
            camera: [0.0, 0.0, 0.0],
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn runs_are_deterministic() {
        let first = simulate(EffectsFile::from_toml_str(EFFECTS).unwrap(), &args(120, 50.0)).unwrap();
        let second = simulate(EffectsFile::from_toml_str(EFFECTS).unwrap(), &args(120, 50.0)).unwrap();
        assert_eq!(first.peak_active, second.peak_active);
        assert_eq!(first.accepted, second.accepted);
        assert_eq!(first.performance, second.performance);
        assert!(!first.samples.is_empty());
    }

    #[test]
    fn heavy_particles_drive_the_factor_down() {
        let report = simulate(EffectsFile::from_toml_str(EFFECTS).unwrap(), &args(300, 200.0)).unwrap();
        assert!(report.peak_active <= 300);
        assert!(report.performance.reduction_factor < 1.0);
    }

    #[test]
    fn cheap_particles_keep_full_counts() {
        let report = simulate(EffectsFile::from_toml_str(EFFECTS).unwrap(), &args(120, 0.0)).unwrap();
        assert_eq!(report.performance.reduction_factor, 1.0);
        assert_eq!(report.performance.dropped_frames, 0);
    }

    #[test]
    fn empty_effects_file_is_an_error() {
        let file = EffectsFile::from_toml_str("").unwrap();
        assert!(simulate(file, &args(10, 0.0)).is_err());
    }
}
