//! Numeric parameters of a simulation.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::backend::SolveParams;
use crate::particle::DEFAULT_INITIAL_CAPACITY;
use crate::{eos, sph};

/// Physical and sizing parameters shared by every step.
///
/// Derived quantities (smoothing length, stride, mass, rest density) are
/// computed from these on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Interaction radius; also the hash cell side and kernel support.
    pub diameter: f32,
    /// Gravity acceleration.
    pub gravity: Vec2,
    /// Store capacity at creation and after `clear`.
    pub initial_capacity: usize,
    /// Region sampling stride as a fraction of the diameter.
    pub spacing_factor: f32,
    /// Numerical speed of sound.
    pub speed_of_sound: f32,
    /// Artificial viscosity coefficient.
    pub viscosity: f32,
    /// Explicit rest density. `None` uses the density of the sampling
    /// lattice, so freshly seeded regions start pressure-free.
    pub rest_density: Option<f32>,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            diameter: 0.05,
            gravity: Vec2::new(0.0, -9.8),
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            spacing_factor: 0.75,
            speed_of_sound: 10.0,
            viscosity: 0.1,
            rest_density: None,
        }
    }
}

impl SimParams {
    /// Defaults with the given interaction diameter.
    pub fn with_diameter(diameter: f32) -> Self {
        Self {
            diameter,
            ..Self::default()
        }
    }

    /// Smoothing length h; the kernel support 2h equals the diameter.
    pub fn smoothing_length(&self) -> f32 {
        0.5 * self.diameter
    }

    /// Default region sampling stride.
    pub fn sample_stride(&self) -> f32 {
        self.diameter * self.spacing_factor
    }

    /// Uniform particle mass.
    pub fn particle_mass(&self) -> f32 {
        eos::lattice_particle_mass(self.sample_stride())
    }

    /// Rest density actually used by the equation of state.
    pub fn effective_rest_density(&self) -> f32 {
        self.rest_density.unwrap_or_else(|| {
            sph::lattice_density(
                self.sample_stride(),
                self.smoothing_length(),
                self.particle_mass(),
            )
        })
    }

    /// Solve-stage parameters for `count` particles over `key_space` buckets.
    pub fn solve_params(&self, count: u32, key_space: u32) -> SolveParams {
        SolveParams::new(
            count,
            key_space,
            self.diameter,
            self.smoothing_length(),
            self.particle_mass(),
            self.effective_rest_density(),
            self.speed_of_sound,
            self.viscosity,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_reference_scene() {
        let p = SimParams::default();
        assert_eq!(p.diameter, 0.05);
        assert_eq!(p.gravity, Vec2::new(0.0, -9.8));
        assert_eq!(p.initial_capacity, 1024);
        assert!((p.sample_stride() - 0.0375).abs() < 1e-6);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let p: SimParams = serde_json::from_str(r#"{ "diameter": 0.1, "gravity": [0.0, -1.0] }"#).unwrap();
        assert_eq!(p.diameter, 0.1);
        assert_eq!(p.gravity, Vec2::new(0.0, -1.0));
        assert_eq!(p.spacing_factor, 0.75);
        assert!(p.rest_density.is_none());
    }

    #[test]
    fn lattice_rest_density_is_positive_and_overridable() {
        let p = SimParams::with_diameter(0.1);
        let rho0 = p.effective_rest_density();
        assert!(rho0 > 0.0);
        let q = SimParams {
            rest_density: Some(42.0),
            ..p
        };
        assert_eq!(q.effective_rest_density(), 42.0);
        assert_eq!(q.solve_params(3, 8).rest_density, 42.0);
        assert_eq!(q.solve_params(3, 8).cell_size, 0.1);
    }
}
