//! SPH smoothing kernel and the per-particle solver passes.
//!
//! Implements the 2D Wendland C2 kernel and its gradient, then the three
//! data-parallel passes a step runs over the neighbor index:
//! density/pressure, acceleration, and semi-implicit Euler integration.
//! Each pass writes only its own output slice; inputs are read-only.

use std::f32::consts::PI;

use glam::Vec2;
use rayon::prelude::*;

use crate::backend::SolveParams;
use crate::eos;
use crate::neighbor::NeighborIndex;

/// Normalization constant for the 2D Wendland C2 kernel: 7 / (4 * pi).
///
/// With q = r/h and support radius 2h the kernel integrates to one over the
/// plane when scaled by `7 / (4 pi h^2)`.
const WENDLAND_C2_NORM_2D: f32 = 7.0 / (4.0 * PI);

/// Beyond this many lattice rings inside the support the direct sum is
/// replaced by its continuum limit `mass / stride^2`.
const MAX_LATTICE_REACH: i32 = 256;

/// Softening term in the viscosity denominator, as a fraction of h^2.
const VISCOSITY_EPS: f32 = 0.01;

/// Wendland C2 smoothing kernel in 2D.
///
/// ```text
/// W(r, h) = (7 / (4 pi h^2)) * (1 - q/2)^4 * (1 + 2q)   for q = r/h < 2
/// W(r, h) = 0                                            otherwise
/// ```
pub fn wendland_c2(r: f32, h: f32) -> f32 {
    let q = r / h;
    if q >= 2.0 {
        return 0.0;
    }
    let t = 1.0 - 0.5 * q;
    let t2 = t * t;
    WENDLAND_C2_NORM_2D / (h * h) * t2 * t2 * (1.0 + 2.0 * q)
}

/// Gradient of the 2D Wendland C2 kernel with respect to `r_i`.
///
/// `rij` is `r_i - r_j` and `r` its length. Overlapping particles get a zero
/// gradient.
///
/// ```text
/// dW/dr = (7 / (4 pi h^2)) * (-5 q) * (1 - q/2)^3 / h
/// ```
pub fn wendland_c2_gradient(rij: Vec2, r: f32, h: f32) -> Vec2 {
    let q = r / h;
    if q >= 2.0 || r < 1.0e-12 {
        return Vec2::ZERO;
    }
    let t = 1.0 - 0.5 * q;
    let dw_dr = WENDLAND_C2_NORM_2D / (h * h * h) * (-5.0 * q) * t * t * t;
    rij * (dw_dr / r)
}

/// Density an interior particle sees when particles of `mass` sit on a
/// square lattice of spacing `stride`. Includes the self term.
pub fn lattice_density(stride: f32, h: f32, mass: f32) -> f32 {
    if !(stride > 0.0) {
        return mass * wendland_c2(0.0, h);
    }
    let reach = (2.0 * h / stride).ceil();
    if !(reach <= MAX_LATTICE_REACH as f32) {
        return mass / (stride * stride);
    }
    let reach = reach as i32;
    let mut rho = 0.0;
    for iy in -reach..=reach {
        for ix in -reach..=reach {
            let r = Vec2::new(ix as f32, iy as f32).length() * stride;
            rho += mass * wendland_c2(r, h);
        }
    }
    rho
}

/// Monaghan artificial viscosity term `Pi_ij`, non-zero only for
/// approaching pairs.
#[inline]
pub fn artificial_viscosity(
    vij: Vec2,
    rij: Vec2,
    r: f32,
    rho_avg: f32,
    params: &SolveParams,
) -> f32 {
    let vr = vij.dot(rij);
    if vr >= 0.0 {
        return 0.0;
    }
    let h = params.smoothing_length;
    let mu = h * vr / (r * r + VISCOSITY_EPS * h * h);
    -params.viscosity * params.speed_of_sound * mu / rho_avg
}

/// Density summation followed by the equation of state.
///
/// ```text
/// rho_i = sum_j m * W(|r_i - r_j|, h)     (j includes i)
/// p_i   = c^2 * max(rho_i - rho0, 0)
/// ```
pub fn compute_density_pressure(
    positions: &[Vec2],
    index: &NeighborIndex<'_>,
    params: &SolveParams,
    densities: &mut [f32],
    pressures: &mut [f32],
) {
    let h = params.smoothing_length;
    let support = params.cell_size;
    densities
        .par_iter_mut()
        .zip(pressures.par_iter_mut())
        .enumerate()
        .for_each(|(i, (rho, p))| {
            let mut sum = 0.0;
            index.for_each_neighbor(i, positions, support, |_, _, r| {
                sum += params.mass * wendland_c2(r, h);
            });
            *rho = sum;
            *p = eos::clamped_linear_eos(sum, params.rest_density, params.speed_of_sound);
        });
}

/// Pressure and viscous acceleration of every particle (gravity excluded).
///
/// ```text
/// a_i = -sum_j m * (p_i/rho_i^2 + p_j/rho_j^2 + Pi_ij) * grad_W(r_ij, h)
/// ```
pub fn compute_accelerations(
    positions: &[Vec2],
    velocities: &[Vec2],
    densities: &[f32],
    pressures: &[f32],
    index: &NeighborIndex<'_>,
    params: &SolveParams,
    accelerations: &mut [Vec2],
) {
    let h = params.smoothing_length;
    let support = params.cell_size;
    accelerations
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, acc)| {
            let rho_i = densities[i];
            let p_term_i = pressures[i] / (rho_i * rho_i);
            let mut a = Vec2::ZERO;
            index.for_each_neighbor(i, positions, support, |j, rij, r| {
                if j == i {
                    return;
                }
                let rho_j = densities[j];
                let grad = wendland_c2_gradient(rij, r, h);
                let vij = velocities[i] - velocities[j];
                let visc = artificial_viscosity(vij, rij, r, 0.5 * (rho_i + rho_j), params);
                a -= params.mass * (p_term_i + pressures[j] / (rho_j * rho_j) + visc) * grad;
            });
            *acc = a;
        });
}

/// Semi-implicit Euler: `v += (a + g) dt`, then `x += v dt`.
pub fn integrate(
    positions: &mut [Vec2],
    velocities: &mut [Vec2],
    accelerations: &[Vec2],
    gravity: Vec2,
    dt: f32,
) {
    positions
        .par_iter_mut()
        .zip(velocities.par_iter_mut())
        .zip(accelerations.par_iter())
        .for_each(|((x, v), a)| {
            *v += (*a + gravity) * dt;
            *x += *v * dt;
        });
}
