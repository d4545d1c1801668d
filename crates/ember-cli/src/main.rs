//! Ember CLI - inspect effect files and stress the particle runtime headlessly

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{check, stress};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Pooled particle effects with adaptive load shedding", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an effects file and summarize its effects and pools
    Check {
        /// Path to the effects TOML file
        file: String,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a deterministic headless load simulation
    Stress {
        /// Path to the effects TOML file
        file: String,

        /// Frames to simulate
        #[arg(long, default_value = "600")]
        frames: u32,

        /// Effect triggers per frame
        #[arg(long, default_value = "4")]
        triggers: u32,

        /// Seed for effect placement and emission
        #[arg(long, default_value = "1")]
        seed: u32,

        /// Simulated cost of one live particle per frame, in microseconds
        #[arg(long, default_value = "20.0")]
        frame_cost_us: f64,

        /// Camera position (comma-separated x,y,z)
        #[arg(long, value_parser = parse_vec3, default_value = "0,0,0")]
        camera: [f32; 3],

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn parse_vec3(s: &str) -> Result<[f32; 3], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected 3 comma-separated values, got {}", parts.len()));
    }
    let x: f32 = parts[0].trim().parse().map_err(|e| format!("invalid x: {}", e))?;
    let y: f32 = parts[1].trim().parse().map_err(|e| format!("invalid y: {}", e))?;
    let z: f32 = parts[2].trim().parse().map_err(|e| format!("invalid z: {}", e))?;
    Ok([x, y, z])
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file, format } => check::run(&file, format),
        Commands::Stress {
            file,
            frames,
            triggers,
            seed,
            frame_cost_us,
            camera,
            format,
        } => stress::run(stress::StressArgs {
            file,
            frames,
            triggers,
            seed,
            frame_cost_us,
            camera,
            format,
        }),
    }
}
