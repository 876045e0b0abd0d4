//! Compute backend seam.
//!
//! The pipeline drives a backend through a linear chain of
//! `submit` -> `wait` pairs, one per named stage. Each stage is described by
//! a typed parameter struct; the same `#[repr(C)]` layout is uploaded as a
//! uniform by the GPU backend and read directly by the CPU backend.

pub mod cpu;

use std::fmt;

use glam::Vec2;

use crate::error::BackendError;
use crate::neighbor::{self, BucketRange, Proxy};

/// Named pipeline stage, used for logging, profiling and error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Spatial hashing into proxies.
    Hash,
    /// Bitonic proxy sort.
    Sort,
    /// Bucket offset table construction.
    BuildOffsets,
    /// Density, pressure and acceleration passes.
    Solve,
    /// Velocity and position update.
    Integrate,
}

impl Stage {
    /// Stages in pipeline order.
    pub const ALL: [Stage; 5] = [
        Stage::Hash,
        Stage::Sort,
        Stage::BuildOffsets,
        Stage::Solve,
        Stage::Integrate,
    ];

    /// Short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Hash => "hash",
            Stage::Sort => "sort",
            Stage::BuildOffsets => "offsets",
            Stage::Solve => "solve",
            Stage::Integrate => "integrate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of the hash stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HashParams {
    /// Live particle count.
    pub count: u32,
    /// Proxy array length (power of two, `>= count`).
    pub padded: u32,
    /// Number of buckets.
    pub key_space: u32,
    /// Grid cell side (the interaction radius).
    pub cell_size: f32,
}

/// Parameters of the sort stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SortParams {
    /// Proxy array length (power of two).
    pub padded: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

impl SortParams {
    /// Sort an array of `padded` proxies.
    pub fn new(padded: u32) -> Self {
        Self {
            padded,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        }
    }
}

/// Parameters of the offset-table stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OffsetParams {
    /// Live particle count (real proxies at the head of the sorted array).
    pub count: u32,
    /// Number of buckets.
    pub key_space: u32,
    _pad0: u32,
    _pad1: u32,
}

impl OffsetParams {
    /// Build offsets for `count` sorted proxies over `key_space` buckets.
    pub fn new(count: u32, key_space: u32) -> Self {
        Self {
            count,
            key_space,
            _pad0: 0,
            _pad1: 0,
        }
    }
}

/// Parameters of the solve stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SolveParams {
    /// Live particle count.
    pub count: u32,
    /// Number of buckets.
    pub key_space: u32,
    /// Grid cell side; also the neighbor acceptance radius.
    pub cell_size: f32,
    /// Smoothing length h (support is 2h).
    pub smoothing_length: f32,
    /// Uniform particle mass.
    pub mass: f32,
    /// Density at which pressure vanishes.
    pub rest_density: f32,
    /// Numerical speed of sound.
    pub speed_of_sound: f32,
    /// Artificial viscosity coefficient (alpha).
    pub viscosity: f32,
}

impl SolveParams {
    /// Collect solve parameters.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        count: u32,
        key_space: u32,
        cell_size: f32,
        smoothing_length: f32,
        mass: f32,
        rest_density: f32,
        speed_of_sound: f32,
        viscosity: f32,
    ) -> Self {
        Self {
            count,
            key_space,
            cell_size,
            smoothing_length,
            mass,
            rest_density,
            speed_of_sound,
            viscosity,
        }
    }
}

/// Parameters of the integrate stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IntegrateParams {
    /// Live particle count.
    pub count: u32,
    /// Time step.
    pub dt: f32,
    /// Gravity, x component.
    pub gravity_x: f32,
    /// Gravity, y component.
    pub gravity_y: f32,
}

impl IntegrateParams {
    /// Gravity as a vector.
    pub fn gravity(&self) -> Vec2 {
        Vec2::new(self.gravity_x, self.gravity_y)
    }
}

/// One named dispatch with its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatch {
    /// See [`HashParams`].
    Hash(HashParams),
    /// See [`SortParams`].
    Sort(SortParams),
    /// See [`OffsetParams`].
    BuildOffsets(OffsetParams),
    /// See [`SolveParams`].
    Solve(SolveParams),
    /// See [`IntegrateParams`].
    Integrate(IntegrateParams),
}

impl Dispatch {
    /// Stage this dispatch runs.
    pub fn stage(&self) -> Stage {
        match self {
            Dispatch::Hash(_) => Stage::Hash,
            Dispatch::Sort(_) => Stage::Sort,
            Dispatch::BuildOffsets(_) => Stage::BuildOffsets,
            Dispatch::Solve(_) => Stage::Solve,
            Dispatch::Integrate(_) => Stage::Integrate,
        }
    }

    /// Particle count the dispatch operates on (zero for the sort).
    pub fn count(&self) -> u32 {
        match self {
            Dispatch::Hash(p) => p.count,
            Dispatch::Sort(_) => 0,
            Dispatch::BuildOffsets(p) => p.count,
            Dispatch::Solve(p) => p.count,
            Dispatch::Integrate(p) => p.count,
        }
    }
}

/// Reject a dispatch whose sizes disagree with buffers allocated for
/// `capacity` particles.
pub fn check_dispatch(dispatch: &Dispatch, capacity: usize) -> Result<(), BackendError> {
    let stage = dispatch.stage();
    let fail = |message: String| Err(BackendError::Dispatch { stage, message });
    if dispatch.count() as usize > capacity {
        return fail(format!(
            "count {} exceeds allocated capacity {capacity}",
            dispatch.count()
        ));
    }
    let padded = neighbor::padded_len(capacity) as u32;
    let key_space = neighbor::key_space(capacity);
    let (want_padded, want_keys) = match dispatch {
        Dispatch::Hash(p) => (Some(p.padded), Some(p.key_space)),
        Dispatch::Sort(p) => (Some(p.padded), None),
        Dispatch::BuildOffsets(p) => (None, Some(p.key_space)),
        Dispatch::Solve(p) => (None, Some(p.key_space)),
        Dispatch::Integrate(_) => (None, None),
    };
    if let Some(want) = want_padded.filter(|&w| w != padded) {
        return fail(format!("padded length {want}, buffers hold {padded}"));
    }
    if let Some(want) = want_keys.filter(|&w| w != key_space) {
        return fail(format!("key space {want}, buffers hold {key_space}"));
    }
    Ok(())
}

/// Handle for a submitted dispatch; redeem it with [`ComputeBackend::wait`].
#[derive(Debug)]
#[must_use = "a submission must be awaited before the next stage reads its output"]
pub struct Submission {
    /// Stage that was submitted.
    pub stage: Stage,
    /// Backend-assigned sequence number.
    pub ticket: u64,
}

/// Host arrays a download writes into. Each slice is exactly `count` long.
#[derive(Debug)]
pub struct HostMirror<'a> {
    /// Destination for positions.
    pub positions: &'a mut [Vec2],
    /// Destination for velocities.
    pub velocities: &'a mut [Vec2],
    /// Destination for per-particle weights (summed density).
    pub weights: &'a mut [f32],
}

impl HostMirror<'_> {
    /// Number of particles the mirror holds.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` if the mirror holds no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// An execution context that owns device-side particle and pipeline
/// buffers and runs the named stages against them.
///
/// Buffer contents are only guaranteed visible to the host, or to the next
/// stage, once the stage's [`Submission`] has been awaited.
pub trait ComputeBackend {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// (Re)create every device buffer sized for `capacity` particles,
    /// dropping the previous set. Prior contents are not preserved.
    fn allocate(&mut self, capacity: usize) -> Result<(), BackendError>;

    /// Drop every device buffer. A later [`ComputeBackend::allocate`] is
    /// required before the next upload.
    fn release(&mut self);

    /// Capacity of the current allocation, if any.
    fn allocated_capacity(&self) -> Option<usize>;

    /// Copy the live host state to the device.
    fn upload(&mut self, positions: &[Vec2], velocities: &[Vec2]) -> Result<(), BackendError>;

    /// Issue one dispatch. The returned submission must be awaited before the
    /// next submit.
    fn submit(&mut self, dispatch: Dispatch) -> Result<Submission, BackendError>;

    /// Block until `submission` has completed.
    fn wait(&mut self, submission: Submission) -> Result<(), BackendError>;

    /// Copy positions, velocities and weights of the first `mirror.len()`
    /// particles back to the host.
    fn download(&mut self, mirror: HostMirror<'_>) -> Result<(), BackendError>;

    /// Read the proxy array (padded length) as left by the last stage.
    fn read_proxies(&mut self) -> Result<Vec<Proxy>, BackendError>;

    /// Read the bucket offset table.
    fn read_offsets(&mut self) -> Result<Vec<BucketRange>, BackendError>;
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn allocate(&mut self, capacity: usize) -> Result<(), BackendError> {
        (**self).allocate(capacity)
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn allocated_capacity(&self) -> Option<usize> {
        (**self).allocated_capacity()
    }

    fn upload(&mut self, positions: &[Vec2], velocities: &[Vec2]) -> Result<(), BackendError> {
        (**self).upload(positions, velocities)
    }

    fn submit(&mut self, dispatch: Dispatch) -> Result<Submission, BackendError> {
        (**self).submit(dispatch)
    }

    fn wait(&mut self, submission: Submission) -> Result<(), BackendError> {
        (**self).wait(submission)
    }

    fn download(&mut self, mirror: HostMirror<'_>) -> Result<(), BackendError> {
        (**self).download(mirror)
    }

    fn read_proxies(&mut self) -> Result<Vec<Proxy>, BackendError> {
        (**self).read_proxies()
    }

    fn read_offsets(&mut self) -> Result<Vec<BucketRange>, BackendError> {
        (**self).read_offsets()
    }
}
