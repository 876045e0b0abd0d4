//! Pipeline orchestrator.
//!
//! [`ParticleSimulation`] owns the particle store and the compute backend and
//! runs one step as a linear chain of awaited dispatches:
//!
//! ```text
//! upload -> hash -> sort -> offsets -> solve -> integrate -> download
//! ```
//!
//! Device buffers are (re)allocated lazily at the start of a step whenever
//! the store's allocation generation changed, so growth and `clear` between
//! steps are always safe.

use std::ops::AddAssign;
use std::time::Instant;

use glam::Vec2;

use crate::backend::cpu::CpuBackend;
use crate::backend::{
    ComputeBackend, Dispatch, HashParams, HostMirror, IntegrateParams, OffsetParams, SolveParams,
    SortParams, Stage,
};
use crate::emitter::Emitter;
use crate::error::BackendError;
use crate::neighbor;
use crate::params::SimParams;
use crate::particle::ParticleStore;

/// Wall-clock breakdown of one or more steps, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepProfile {
    /// Host to device transfer.
    pub upload_us: u64,
    /// Spatial hashing.
    pub hash_us: u64,
    /// Bitonic sort.
    pub sort_us: u64,
    /// Offset table build.
    pub offsets_us: u64,
    /// Density and force passes.
    pub solve_us: u64,
    /// Velocity and position update.
    pub integrate_us: u64,
    /// Device to host transfer.
    pub download_us: u64,
    /// Whole step, including allocation.
    pub total_us: u64,
}

impl StepProfile {
    /// Time spent in `stage`.
    pub fn stage_us(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Hash => self.hash_us,
            Stage::Sort => self.sort_us,
            Stage::BuildOffsets => self.offsets_us,
            Stage::Solve => self.solve_us,
            Stage::Integrate => self.integrate_us,
        }
    }

    fn add_stage(&mut self, stage: Stage, us: u64) {
        let slot = match stage {
            Stage::Hash => &mut self.hash_us,
            Stage::Sort => &mut self.sort_us,
            Stage::BuildOffsets => &mut self.offsets_us,
            Stage::Solve => &mut self.solve_us,
            Stage::Integrate => &mut self.integrate_us,
        };
        *slot += us;
    }
}

impl AddAssign for StepProfile {
    fn add_assign(&mut self, rhs: Self) {
        self.upload_us += rhs.upload_us;
        self.hash_us += rhs.hash_us;
        self.sort_us += rhs.sort_us;
        self.offsets_us += rhs.offsets_us;
        self.solve_us += rhs.solve_us;
        self.integrate_us += rhs.integrate_us;
        self.download_us += rhs.download_us;
        self.total_us += rhs.total_us;
    }
}

fn micros(since: Instant) -> u64 {
    since.elapsed().as_micros() as u64
}

/// A growing 2D particle set advanced by a compute backend.
pub struct ParticleSimulation {
    store: ParticleStore,
    backend: Box<dyn ComputeBackend + Send>,
    params: SimParams,
    /// Solve parameters with `count` and `key_space` left at zero.
    solve_template: SolveParams,
    /// Store generation the device buffers were sized for.
    device_generation: Option<u64>,
}

impl ParticleSimulation {
    /// Create an empty simulation driving `backend`.
    pub fn new(params: SimParams, backend: Box<dyn ComputeBackend + Send>) -> Self {
        tracing::info!(
            backend = backend.name(),
            diameter = params.diameter,
            capacity = params.initial_capacity,
            "simulation created"
        );
        Self {
            store: ParticleStore::with_capacity(params.initial_capacity),
            backend,
            solve_template: params.solve_params(0, 0),
            params,
            device_generation: None,
        }
    }

    /// Create an empty simulation on a [`CpuBackend`] using every core.
    pub fn with_cpu(params: SimParams) -> Result<Self, BackendError> {
        Ok(Self::new(params, Box::new(CpuBackend::new(0)?)))
    }

    /// Simulation parameters.
    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Name of the compute backend.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Direct access to the backend, e.g. to inspect the last step's proxies.
    pub fn backend_mut(&mut self) -> &mut (dyn ComputeBackend + Send) {
        self.backend.as_mut()
    }

    /// Current gravity.
    pub fn gravity(&self) -> Vec2 {
        self.params.gravity
    }

    /// Replace gravity; takes effect on the next step.
    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.params.gravity = gravity;
    }

    /// Live particle count.
    pub fn count(&self) -> usize {
        self.store.len()
    }

    /// Store capacity.
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Live positions. Re-fetch after every step, add or clear.
    pub fn positions(&self) -> &[Vec2] {
        self.store.positions()
    }

    /// Live velocities.
    pub fn velocities(&self) -> &[Vec2] {
        self.store.velocities()
    }

    /// Summed kernel density of each particle from the last step.
    pub fn weights(&self) -> &[f32] {
        self.store.weights()
    }

    /// Append one particle.
    pub fn add_particle(&mut self, position: Vec2, velocity: Vec2) {
        self.store.add(position, velocity);
    }

    /// Seed `emitter` at the default stride (`diameter * spacing_factor`).
    pub fn add_region<E: Emitter + ?Sized>(&mut self, emitter: &E, velocity: Vec2) -> usize {
        let stride = self.params.sample_stride();
        self.add_region_with_stride(emitter, velocity, stride)
    }

    /// Seed `emitter` on a grid of spacing `stride`.
    pub fn add_region_with_stride<E: Emitter + ?Sized>(
        &mut self,
        emitter: &E,
        velocity: Vec2,
        stride: f32,
    ) -> usize {
        let added = self.store.add_region(emitter, velocity, stride);
        tracing::info!(added, count = self.store.len(), stride, "region seeded");
        added
    }

    /// Remove every particle, return to the base capacity and release the
    /// device buffers.
    pub fn clear(&mut self) {
        tracing::info!(count = self.store.len(), "clearing simulation");
        self.store.clear();
        self.backend.release();
        self.device_generation = None;
    }

    /// Advance by `dt`. No-op when the store is empty.
    ///
    /// On error the host state is left as it was before the step.
    pub fn step(&mut self, dt: f32) -> Result<(), BackendError> {
        let mut profile = StepProfile::default();
        self.run_step(dt, &mut profile)
    }

    /// Advance by `dt` split into `iterations` equal sub-steps. Zero
    /// iterations leave the state untouched.
    pub fn step_substeps(&mut self, dt: f32, iterations: u32) -> Result<(), BackendError> {
        if iterations == 0 {
            return Ok(());
        }
        let sub_dt = dt / iterations as f32;
        for _ in 0..iterations {
            self.step(sub_dt)?;
        }
        Ok(())
    }

    /// [`ParticleSimulation::step`] with a per-stage timing breakdown.
    pub fn step_profiled(&mut self, dt: f32) -> Result<StepProfile, BackendError> {
        let mut profile = StepProfile::default();
        self.run_step(dt, &mut profile)?;
        Ok(profile)
    }

    /// [`ParticleSimulation::step_substeps`] with timings summed over every
    /// sub-step.
    pub fn step_substeps_profiled(
        &mut self,
        dt: f32,
        iterations: u32,
    ) -> Result<StepProfile, BackendError> {
        let mut total = StepProfile::default();
        if iterations == 0 {
            return Ok(total);
        }
        let sub_dt = dt / iterations as f32;
        for _ in 0..iterations {
            total += self.step_profiled(sub_dt)?;
        }
        Ok(total)
    }

    fn ensure_device(&mut self) -> Result<(), BackendError> {
        let generation = self.store.generation();
        let capacity = self.store.capacity();
        if self.device_generation == Some(generation)
            && self.backend.allocated_capacity() == Some(capacity)
        {
            return Ok(());
        }
        tracing::debug!(capacity, backend = self.backend.name(), "allocating device buffers");
        self.backend.allocate(capacity)?;
        self.device_generation = Some(generation);
        Ok(())
    }

    fn dispatches(&self, count: u32, dt: f32) -> [Dispatch; 5] {
        let capacity = self.store.capacity();
        let padded = neighbor::padded_len(capacity) as u32;
        let key_space = neighbor::key_space(capacity);
        let solve = SolveParams {
            count,
            key_space,
            ..self.solve_template
        };
        [
            Dispatch::Hash(HashParams {
                count,
                padded,
                key_space,
                cell_size: self.params.diameter,
            }),
            Dispatch::Sort(SortParams::new(padded)),
            Dispatch::BuildOffsets(OffsetParams::new(count, key_space)),
            Dispatch::Solve(solve),
            Dispatch::Integrate(IntegrateParams {
                count,
                dt,
                gravity_x: self.params.gravity.x,
                gravity_y: self.params.gravity.y,
            }),
        ]
    }

    fn run_dispatch(&mut self, dispatch: Dispatch) -> Result<(), BackendError> {
        let stage = dispatch.stage();
        tracing::trace!(%stage, "submit");
        let submission = self.backend.submit(dispatch)?;
        self.backend.wait(submission)?;
        tracing::trace!(%stage, "complete");
        Ok(())
    }

    fn run_step(&mut self, dt: f32, profile: &mut StepProfile) -> Result<(), BackendError> {
        let n = self.store.len();
        if n == 0 {
            return Ok(());
        }
        let started = Instant::now();
        let count = u32::try_from(n).map_err(|_| BackendError::CapacityMismatch {
            required: n,
            allocated: u32::MAX as usize,
        })?;
        self.ensure_device()?;

        let t = Instant::now();
        self.backend
            .upload(self.store.positions(), self.store.velocities())?;
        profile.upload_us += micros(t);

        for dispatch in self.dispatches(count, dt) {
            let t = Instant::now();
            self.run_dispatch(dispatch)?;
            profile.add_stage(dispatch.stage(), micros(t));
        }

        let t = Instant::now();
        let (positions, velocities, weights) = self.store.state_mut();
        self.backend.download(HostMirror {
            positions,
            velocities,
            weights,
        })?;
        profile.download_us += micros(t);
        profile.total_us += micros(started);
        Ok(())
    }
}
