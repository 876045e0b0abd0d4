//! 2D particle simulation kernel.
//!
//! This crate holds the core of the simulation: a growable particle store,
//! a spatial-hash neighbor pipeline rebuilt every step, an SPH solver that
//! consumes it, and the orchestrator that drives those stages on a compute
//! backend.
//!
//! # Modules
//! - [`particle`] -- Struct-of-arrays particle store with doubling capacity.
//! - [`emitter`] -- `Aabb` and the `Emitter` interface used to seed regions.
//! - [`neighbor`] -- Spatial hasher, bitonic proxy sorter and offset index.
//! - [`sph`] -- Wendland C2 kernel and the density, force and integration passes.
//! - [`eos`] -- Clamped linear equation of state.
//! - [`params`] -- `SimParams` and derived quantities.
//! - [`backend`] -- `ComputeBackend` seam, typed stage parameters and the CPU backend.
//! - [`simulation`] -- `ParticleSimulation`, the per-step pipeline.
//! - `gpu` -- wgpu compute backend (feature `gpu`).

#![warn(missing_docs)]

pub mod backend;
pub mod emitter;
pub mod eos;
pub mod error;
pub mod neighbor;
pub mod params;
pub mod particle;
pub mod simulation;
pub mod sph;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use backend::cpu::CpuBackend;
pub use backend::{ComputeBackend, Dispatch, HostMirror, Stage, Submission};
pub use emitter::{Aabb, Emitter};
pub use error::BackendError;
pub use neighbor::{BucketRange, NeighborIndex, Proxy};
pub use params::SimParams;
pub use particle::ParticleStore;
pub use simulation::{ParticleSimulation, StepProfile};

#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;
