//! Scenario configuration parsing and validation

use std::fs;
use std::path::{Path, PathBuf};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use sph2d_kernel::SimParams;

use crate::geometry::{Polygon, ShapeError};

/// Failure to load or validate a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}: {}", path.display(), source)]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid scenario JSON.
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// An emitter shape is malformed.
    #[error("invalid emitter {index}: {source}")]
    Shape {
        /// Position of the emitter in the `emitters` list.
        index: usize,
        /// What is wrong with it.
        #[source]
        source: ShapeError,
    },
}

/// Which compute backend drives the simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// Data-parallel CPU backend.
    #[default]
    Cpu,
    /// wgpu compute backend (requires the `gpu` feature).
    Gpu,
    /// GPU when an adapter is present, CPU otherwise.
    Auto,
}

/// Emitter outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeConfig {
    /// Axis-aligned rectangle.
    Rect {
        /// Center point.
        center: [f32; 2],
        /// Half width and half height.
        half_extents: [f32; 2],
    },
    /// Circle approximated by a regular polygon.
    Circle {
        /// Center point.
        center: [f32; 2],
        /// Radius.
        radius: f32,
        /// Number of polygon vertices.
        #[serde(default = "default_segments")]
        segments: u32,
    },
    /// Convex polygon from a flat `[x0, y0, x1, y1, ...]` list.
    Polygon {
        /// Flat vertex coordinates.
        vertices: Vec<f32>,
    },
}

impl ShapeConfig {
    /// Build the polygon this shape describes.
    pub fn to_polygon(&self) -> Result<Polygon, ShapeError> {
        match self {
            ShapeConfig::Rect {
                center,
                half_extents,
            } => Polygon::rect(Vec2::from(*center), half_extents[0], half_extents[1]),
            ShapeConfig::Circle {
                center,
                radius,
                segments,
            } => Polygon::circle(Vec2::from(*center), *radius, *segments),
            ShapeConfig::Polygon { vertices } => Polygon::from_flat(vertices),
        }
    }
}

/// An emitter fired once at a given frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Frame before which the emitter fires (0 = initial state).
    #[serde(default)]
    pub frame: u64,
    /// Region to fill.
    pub shape: ShapeConfig,
    /// Initial velocity of every seeded particle.
    #[serde(default)]
    pub velocity: [f32; 2],
    /// Sampling stride; defaults to `diameter * spacing_factor`.
    #[serde(default)]
    pub stride: Option<f32>,
}

/// Main scenario configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable scenario name
    pub name: String,
    /// Interaction radius
    #[serde(default = "default_diameter")]
    pub diameter: f32,
    /// Gravity vector
    #[serde(default = "default_gravity")]
    pub gravity: [f32; 2],
    /// Store capacity at start and after every clear
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
    /// Emitter stride as a fraction of the diameter
    #[serde(default = "default_spacing_factor")]
    pub spacing_factor: f32,
    /// Numerical speed of sound
    #[serde(default = "default_speed_of_sound")]
    pub speed_of_sound: f32,
    /// Artificial viscosity coefficient
    #[serde(default = "default_viscosity")]
    pub viscosity: f32,
    /// Explicit rest density; derived from the emitter lattice when absent
    #[serde(default)]
    pub rest_density: Option<f32>,
    /// Simulated time per frame
    #[serde(default = "default_frame_dt")]
    pub frame_dt: f32,
    /// Sub-steps per frame
    #[serde(default = "default_substeps")]
    pub substeps: u32,
    /// Stop after this many frames
    #[serde(default)]
    pub max_frames: Option<u64>,
    /// Compute backend
    #[serde(default)]
    pub backend: BackendType,
    /// Scheduled emitters
    #[serde(default)]
    pub emitters: Vec<EmitterConfig>,
    /// Frames before which every particle is removed
    #[serde(default)]
    pub clear_at: Vec<u64>,
}

/// Smallest accepted `spacing_factor`; finer lattices seed millions of
/// particles per emitter.
pub const MIN_SPACING_FACTOR: f32 = 0.05;

// Default values
fn default_diameter() -> f32 {
    0.05
}

fn default_gravity() -> [f32; 2] {
    [0.0, -9.8]
}

fn default_initial_capacity() -> usize {
    1024
}

fn default_spacing_factor() -> f32 {
    0.75
}

fn default_speed_of_sound() -> f32 {
    10.0
}

fn default_viscosity() -> f32 {
    0.1
}

fn default_frame_dt() -> f32 {
    0.016
}

fn default_substeps() -> u32 {
    6
}

fn default_segments() -> u32 {
    32
}

impl SimulationConfig {
    /// Load and validate a scenario from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a scenario from JSON text
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !(self.diameter > 0.0) || !self.diameter.is_finite() {
            return invalid("diameter must be positive");
        }
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return invalid("gravity must be finite");
        }
        if self.initial_capacity == 0 {
            return invalid("initial_capacity must be at least 1");
        }
        if !(self.spacing_factor >= MIN_SPACING_FACTOR) || !self.spacing_factor.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "spacing_factor must be at least {MIN_SPACING_FACTOR}"
            )));
        }
        if !(self.speed_of_sound > 0.0) {
            return invalid("speed_of_sound must be positive");
        }
        if !(self.viscosity >= 0.0) {
            return invalid("viscosity must be non-negative");
        }
        if let Some(rho) = self.rest_density {
            if !(rho > 0.0) {
                return invalid("rest_density must be positive");
            }
        }
        if !(self.frame_dt > 0.0) || !self.frame_dt.is_finite() {
            return invalid("frame_dt must be positive");
        }
        if self.substeps == 0 {
            return invalid("substeps must be at least 1");
        }
        if self.max_frames == Some(0) {
            return invalid("max_frames must be at least 1");
        }

        for (index, emitter) in self.emitters.iter().enumerate() {
            emitter
                .shape
                .to_polygon()
                .map_err(|source| ConfigError::Shape { index, source })?;
            if let Some(stride) = emitter.stride {
                if !(stride > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "emitter {index}: stride must be positive"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Kernel parameters for this scenario
    pub fn sim_params(&self) -> SimParams {
        SimParams {
            diameter: self.diameter,
            gravity: Vec2::from(self.gravity),
            initial_capacity: self.initial_capacity,
            spacing_factor: self.spacing_factor,
            speed_of_sound: self.speed_of_sound,
            viscosity: self.viscosity,
            rest_density: self.rest_density,
        }
    }
}
