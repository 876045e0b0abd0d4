//! Orchestration Layer
//!
//! This crate turns scenario files into running simulations:
//! - JSON scenario parsing and validation
//! - Convex polygon emitters
//! - Scheduled emitters and clears
//! - Background runner with emit/clear/pause/resume/stop commands and a
//!   shared latest-frame snapshot

#![warn(missing_docs)]

pub mod config;
pub mod domain;
pub mod geometry;
pub mod runner;

pub use config::{BackendType, ConfigError, SimulationConfig};
pub use domain::{RegionEmitter, Scenario};
pub use geometry::Polygon;
pub use runner::{FrameSettings, FrameSnapshot, RunnerError, SimulationRunner};

use std::path::Path;

use sph2d_kernel::{ComputeBackend, CpuBackend, ParticleSimulation};

/// Create a runner from a configuration file
///
/// Loads and validates the scenario, builds the backend it asks for and
/// starts the runner thread.
///
/// # Example
/// ```no_run
/// use sph2d_orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/falling_blocks.json")?;
/// let summary = runner.join()?;
/// println!("{} frames", summary.frames);
/// # Ok::<(), sph2d_orchestrator::RunnerError>(())
/// ```
pub fn create_simulation(config_path: impl AsRef<Path>) -> Result<SimulationRunner, RunnerError> {
    let config_path = config_path.as_ref();
    tracing::info!(path = %config_path.display(), "creating simulation");
    let config = SimulationConfig::load(config_path)?;
    launch(&config, FrameSettings::from(&config))
}

/// Build the simulation and schedule of `config` and start a runner.
pub fn launch(
    config: &SimulationConfig,
    settings: FrameSettings,
) -> Result<SimulationRunner, RunnerError> {
    let scenario = Scenario::from_config(config)?;
    tracing::info!(
        name = %config.name,
        emitters = scenario.emitter_count(),
        bounds = ?scenario.bounds(),
        "launching scenario"
    );
    let sim = build_simulation(config)?;
    SimulationRunner::spawn(sim, scenario, settings)
}

/// Create an empty simulation on the backend `config` selects.
pub fn build_simulation(config: &SimulationConfig) -> Result<ParticleSimulation, RunnerError> {
    let backend = create_backend(config.backend)?;
    Ok(ParticleSimulation::new(config.sim_params(), backend))
}

impl From<&SimulationConfig> for FrameSettings {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            frame_dt: config.frame_dt,
            substeps: config.substeps,
            max_frames: config.max_frames,
            ..Self::default()
        }
    }
}

/// Create a compute backend.
///
/// For `Auto`, attempts GPU first and falls back to CPU if unavailable.
/// For `Gpu`, fails unless the `gpu` feature is enabled and a device opens.
pub fn create_backend(
    backend: BackendType,
) -> Result<Box<dyn ComputeBackend + Send>, RunnerError> {
    match backend {
        BackendType::Cpu => {
            tracing::info!("creating CPU backend");
            Ok(Box::new(CpuBackend::new(0)?))
        }
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            tracing::info!("creating GPU backend");
            Ok(Box::new(sph2d_kernel::GpuBackend::new()?))
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => Err(ConfigError::Invalid(
            "GPU backend requested but the 'gpu' feature is not enabled".into(),
        )
        .into()),
        #[cfg(feature = "gpu")]
        BackendType::Auto => match sph2d_kernel::GpuBackend::new() {
            Ok(gpu) => Ok(Box::new(gpu)),
            Err(e) => {
                tracing::warn!(error = %e, "GPU unavailable, falling back to CPU");
                Ok(Box::new(CpuBackend::new(0)?))
            }
        },
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::info!("GPU feature not enabled, using CPU backend");
            Ok(Box::new(CpuBackend::new(0)?))
        }
    }
}
