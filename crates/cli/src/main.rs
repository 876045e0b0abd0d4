//! Headless scenario driver
//!
//! Loads a scenario, runs it on a background runner and logs progress.
//! With `--snapshots` every frame's positions are written as one JSON line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use sph2d_kernel::{Stage, StepProfile};
use sph2d_orchestrator::{launch, BackendType, FrameSettings, SimulationConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Cpu,
    Gpu,
    Auto,
}

impl From<BackendArg> for BackendType {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Cpu => BackendType::Cpu,
            BackendArg::Gpu => BackendType::Gpu,
            BackendArg::Auto => BackendType::Auto,
        }
    }
}

/// Run a 2D particle scenario headlessly.
#[derive(Debug, Parser)]
#[command(name = "sph2d", version, about)]
struct Cli {
    /// Scenario file (JSON)
    #[arg(short, long, default_value = "configs/falling_blocks.json")]
    config: PathBuf,

    /// Override the number of frames to simulate
    #[arg(short, long)]
    frames: Option<u64>,

    /// Override the compute backend
    #[arg(short, long, value_enum)]
    backend: Option<BackendArg>,

    /// Write one JSON line of positions per frame to this file
    #[arg(long)]
    snapshots: Option<PathBuf>,

    /// Report per-stage timings at exit
    #[arg(long)]
    profile: bool,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sph2d=info,sph2d_orchestrator=info,sph2d_kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Cli::parse()) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = SimulationConfig::load(&cli.config)?;
    if let Some(frames) = cli.frames {
        config.max_frames = Some(frames);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    config.validate()?;
    if config.max_frames.is_none() {
        tracing::warn!("no max_frames set; running until interrupted");
    }

    let settings = FrameSettings {
        profile: cli.profile,
        stream_frames: cli.snapshots.is_some(),
        ..FrameSettings::from(&config)
    };
    tracing::info!(
        name = %config.name,
        backend = ?config.backend,
        frames = ?config.max_frames,
        "starting scenario"
    );

    let started = Instant::now();
    let mut runner = launch(&config, settings)?;

    if let (Some(path), Some(frames)) = (&cli.snapshots, runner.take_frames()) {
        let mut out = BufWriter::new(File::create(path)?);
        for snapshot in frames {
            serde_json::to_writer(&mut out, snapshot.as_ref())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        tracing::info!(path = %path.display(), "snapshots written");
    }

    let summary = runner.join()?;
    let wall = started.elapsed().as_secs_f64();
    tracing::info!(
        frames = summary.frames,
        particles = summary.particles,
        wall_s = format_args!("{wall:.2}"),
        fps = format_args!("{:.1}", summary.frames as f64 / wall.max(1e-9)),
        "scenario finished"
    );

    if cli.profile {
        print_profile(&summary.profile, summary.frames);
    }
    Ok(())
}

fn print_profile(profile: &StepProfile, frames: u64) {
    let per_frame = |us: u64| us as f64 / 1000.0 / frames.max(1) as f64;
    println!("{:>10} {:>12}", "stage", "ms/frame");
    println!("{:>10} {:>12.3}", "upload", per_frame(profile.upload_us));
    for stage in Stage::ALL {
        println!("{:>10} {:>12.3}", stage.name(), per_frame(profile.stage_us(stage)));
    }
    println!("{:>10} {:>12.3}", "download", per_frame(profile.download_us));
    println!("{:>10} {:>12.3}", "total", per_frame(profile.total_us));
}
