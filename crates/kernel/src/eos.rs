//! Equation of state for the weakly-compressible fluid.
//!
//! Pressure only resists compression: sparse particles feel no suction, so
//! isolated clusters are not pulled together by negative pressure.

/// Nominal fluid density used to derive particle mass (kg/m^2 in 2D).
pub const NOMINAL_DENSITY: f32 = 1000.0;

/// Linear equation of state clamped at zero.
///
/// ```text
/// P = c_s^2 * max(rho - rho0, 0)
/// ```
///
/// # Arguments
/// * `density` - Current summed density rho.
/// * `rest_density` - Reference density rho0 at which pressure vanishes.
/// * `speed_of_sound` - Numerical speed of sound c_s.
pub fn clamped_linear_eos(density: f32, rest_density: f32, speed_of_sound: f32) -> f32 {
    speed_of_sound * speed_of_sound * (density - rest_density).max(0.0)
}

/// Mass of one particle sampled on a square lattice of spacing `stride`.
pub fn lattice_particle_mass(stride: f32) -> f32 {
    NOMINAL_DENSITY * stride * stride
}
