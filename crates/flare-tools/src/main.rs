//! # Flare Replay
//!
//! Loads a particle replay capture and prints a per-frame, per-emitter
//! report. With `--render` every frame is also packed offline and the
//! resulting draws are counted.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flare_render::{RenderConfig, ReplayCapture};
use flare_tools::{render_offline, summarize};

#[derive(Debug, Parser)]
#[command(name = "flare-replay")]
#[command(about = "Report on a captured particle replay", long_about = None)]
#[command(version)]
struct Cli {
    /// Replay capture file
    capture: PathBuf,

    /// Pack and draw every frame offline
    #[arg(long)]
    render: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Render configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera position (comma-separated x,y,z), looking at the origin
    #[arg(long, value_parser = parse_vec3, default_value = "0,0,1000", allow_hyphen_values = true)]
    eye: Vec3,
}

fn parse_vec3(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected 3 comma-separated values, got {}", parts.len()));
    }
    let component = |i: usize, name: &str| {
        parts[i]
            .trim()
            .parse::<f32>()
            .map_err(|e| format!("invalid {name}: {e}"))
    };
    Ok(Vec3::new(component(0, "x")?, component(1, "y")?, component(2, "z")?))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("flare=info".parse()?))
        .init();

    let capture = ReplayCapture::load_from_path(&cli.capture)
        .with_context(|| format!("failed to load {}", cli.capture.display()))?;
    info!(
        "Loaded '{}' with {} frames ({} emitter snapshots)",
        capture.metadata.label,
        capture.frames.len(),
        capture.emitter_count()
    );

    let report = if cli.render {
        let config = cli.config.as_ref().map_or_else(RenderConfig::default, RenderConfig::load_from);
        render_offline(&capture, config, cli.eye)
    } else {
        summarize(&capture)
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.to_text());
    }
    Ok(())
}
