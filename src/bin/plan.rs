//! Grinding trajectory CLI
//!
//! Usage:
//!   plan <input.ply> <default.ply> -o trajectory.json
//!   plan <input.ply> <default.ply> --config params.json --dump-passes out/

use anyhow::{Context, Result};
use clap::Parser;
use grindpath::planner::{self, PlannerConfig};
use grindpath::io as mesh_io;
use log::{info, LevelFilter};
use std::fs;
use std::path::PathBuf;

/// Layered 6-DOF grinding tool-path planner
#[derive(Parser, Debug)]
#[command(name = "plan", version, about)]
struct Cli {
    /// Surface to grind (PLY or STL)
    input: PathBuf,

    /// Protected surface that must not be removed (PLY or STL)
    default_mesh: PathBuf,

    /// Write the trajectory as JSON
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Planner configuration file (JSON); overrides the defaults
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dump the pass stack as mesh_<i>.ply into this directory
    #[arg(long, value_name = "DIR")]
    dump_passes: Option<PathBuf>,

    /// Step between successive passes, in metres
    #[arg(long)]
    grind_depth: Option<f64>,

    /// Effector diameter, in metres
    #[arg(long)]
    effector_diameter: Option<f64>,

    /// Fractional overlap between adjacent lines, in [0, 1)
    #[arg(long)]
    covering: Option<f64>,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<PlannerConfig>(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => PlannerConfig::default(),
    };
    if let Some(depth) = cli.grind_depth {
        config.grind_depth = depth;
    }
    if let Some(diameter) = cli.effector_diameter {
        config.effector_diameter = diameter;
    }
    if let Some(covering) = cli.covering {
        config.covering = covering;
    }

    let input = mesh_io::load_mesh(&cli.input)
        .with_context(|| format!("failed to load input mesh {}", cli.input.display()))?;
    let default_mesh = mesh_io::load_mesh(&cli.default_mesh).with_context(|| {
        format!("failed to load default mesh {}", cli.default_mesh.display())
    })?;

    let trajectory = planner::generate_trajectory(&input, &default_mesh, &config)
        .context("trajectory generation failed")?;
    let grinding_count = trajectory.grinding.iter().filter(|&&g| g).count();
    info!(
        "{} poses ({} grinding) across {} passes",
        trajectory.len(),
        grinding_count,
        trajectory.pass_ends.len()
    );

    if let Some(dir) = &cli.dump_passes {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let stack = planner::build_pass_stack(&input, &default_mesh, &config)
            .context("pass stack construction failed")?;
        mesh_io::save_pass_stack(dir, &stack)
            .context("failed to persist the pass stack")?;
    }

    if let Some(path) = &cli.output {
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &trajectory)
            .context("failed to serialize the trajectory")?;
        info!("trajectory written to {}", path.display());
    }

    Ok(())
}
