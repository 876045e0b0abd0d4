//! Data-parallel CPU backend.
//!
//! A dedicated rayon pool plays the role of the compute device. Each
//! dispatch runs to completion inside the pool before `submit` returns, so
//! `wait` only validates the ticket.

use glam::Vec2;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{check_dispatch, ComputeBackend, Dispatch, HostMirror, Submission};
use crate::error::BackendError;
use crate::neighbor::{self, hash, offsets, sort, BucketRange, NeighborIndex, Proxy};
use crate::sph;

/// Device-side buffers of the CPU backend, all sized from one capacity.
#[derive(Debug)]
pub struct CpuBuffers {
    capacity: usize,
    positions: Vec<Vec2>,
    velocities: Vec<Vec2>,
    densities: Vec<f32>,
    pressures: Vec<f32>,
    accelerations: Vec<Vec2>,
    proxies: Vec<Proxy>,
    offsets: Vec<BucketRange>,
}

impl CpuBuffers {
    /// Allocate every buffer for `capacity` particles.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            positions: vec![Vec2::ZERO; capacity],
            velocities: vec![Vec2::ZERO; capacity],
            densities: vec![0.0; capacity],
            pressures: vec![0.0; capacity],
            accelerations: vec![Vec2::ZERO; capacity],
            proxies: vec![Proxy::padding(0); neighbor::padded_len(capacity)],
            offsets: vec![BucketRange::EMPTY; neighbor::key_space(capacity) as usize],
        }
    }

    /// Particle capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for CpuBuffers {
    fn drop(&mut self) {
        tracing::trace!(capacity = self.capacity, "cpu buffers released");
    }
}

/// Compute backend running every stage on a private rayon pool.
pub struct CpuBackend {
    pool: ThreadPool,
    buffers: Option<CpuBuffers>,
    count: usize,
    next_ticket: u64,
    pending: Option<u64>,
}

impl CpuBackend {
    /// Create a backend with `threads` workers (0 = one per core).
    pub fn new(threads: usize) -> Result<Self, BackendError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sph2d-cpu-{i}"))
            .build()
            .map_err(|e| BackendError::RequestDevice(e.to_string()))?;
        tracing::info!(threads = pool.current_num_threads(), "cpu backend ready");
        Ok(Self {
            pool,
            buffers: None,
            count: 0,
            next_ticket: 0,
            pending: None,
        })
    }
}

fn run(buffers: &mut CpuBuffers, dispatch: Dispatch) {
    match dispatch {
        Dispatch::Hash(p) => {
            let n = p.count as usize;
            hash::hash_positions(&buffers.positions[..n], p.cell_size, p.key_space, &mut buffers.proxies);
        }
        Dispatch::Sort(_) => {
            sort::bitonic_sort(&mut buffers.proxies);
        }
        Dispatch::BuildOffsets(p) => {
            let n = p.count as usize;
            offsets::build_offsets(&buffers.proxies[..n], &mut buffers.offsets);
        }
        Dispatch::Solve(p) => {
            let n = p.count as usize;
            let CpuBuffers {
                positions,
                velocities,
                densities,
                pressures,
                accelerations,
                proxies,
                offsets,
                ..
            } = buffers;
            let index = NeighborIndex::new(&proxies[..], &offsets[..], p.cell_size);
            let positions = &positions[..n];
            sph::compute_density_pressure(positions, &index, &p, &mut densities[..n], &mut pressures[..n]);
            sph::compute_accelerations(
                positions,
                &velocities[..n],
                &densities[..n],
                &pressures[..n],
                &index,
                &p,
                &mut accelerations[..n],
            );
        }
        Dispatch::Integrate(p) => {
            let n = p.count as usize;
            sph::integrate(
                &mut buffers.positions[..n],
                &mut buffers.velocities[..n],
                &buffers.accelerations[..n],
                p.gravity(),
                p.dt,
            );
        }
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn allocate(&mut self, capacity: usize) -> Result<(), BackendError> {
        // Drop the old set before building the new one.
        self.buffers = None;
        self.buffers = Some(CpuBuffers::new(capacity));
        self.count = 0;
        tracing::debug!(capacity, "cpu buffers allocated");
        Ok(())
    }

    fn release(&mut self) {
        self.buffers = None;
        self.count = 0;
        self.pending = None;
    }

    fn allocated_capacity(&self) -> Option<usize> {
        self.buffers.as_ref().map(CpuBuffers::capacity)
    }

    fn upload(&mut self, positions: &[Vec2], velocities: &[Vec2]) -> Result<(), BackendError> {
        let buffers = self.buffers.as_mut().ok_or(BackendError::NotAllocated)?;
        let n = positions.len();
        if n > buffers.capacity || velocities.len() != n {
            return Err(BackendError::CapacityMismatch {
                required: n.max(velocities.len()),
                allocated: buffers.capacity,
            });
        }
        buffers.positions[..n].copy_from_slice(positions);
        buffers.velocities[..n].copy_from_slice(velocities);
        self.count = n;
        Ok(())
    }

    fn submit(&mut self, dispatch: Dispatch) -> Result<Submission, BackendError> {
        let stage = dispatch.stage();
        if self.pending.is_some() {
            return Err(BackendError::Dispatch {
                stage,
                message: "previous submission was not awaited".into(),
            });
        }
        let Self { pool, buffers, .. } = self;
        let buffers = buffers.as_mut().ok_or(BackendError::NotAllocated)?;
        check_dispatch(&dispatch, buffers.capacity)?;
        pool.install(|| run(buffers, dispatch));
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some(ticket);
        Ok(Submission { stage, ticket })
    }

    fn wait(&mut self, submission: Submission) -> Result<(), BackendError> {
        match self.pending.take() {
            Some(ticket) if ticket == submission.ticket => Ok(()),
            _ => Err(BackendError::Dispatch {
                stage: submission.stage,
                message: format!("unknown submission {}", submission.ticket),
            }),
        }
    }

    fn download(&mut self, mirror: HostMirror<'_>) -> Result<(), BackendError> {
        let buffers = self.buffers.as_ref().ok_or(BackendError::NotAllocated)?;
        let n = mirror.len();
        if n > self.count {
            return Err(BackendError::CapacityMismatch {
                required: n,
                allocated: self.count,
            });
        }
        mirror.positions.copy_from_slice(&buffers.positions[..n]);
        mirror.velocities.copy_from_slice(&buffers.velocities[..n]);
        mirror.weights.copy_from_slice(&buffers.densities[..n]);
        Ok(())
    }

    fn read_proxies(&mut self) -> Result<Vec<Proxy>, BackendError> {
        let buffers = self.buffers.as_ref().ok_or(BackendError::NotAllocated)?;
        Ok(buffers.proxies.clone())
    }

    fn read_offsets(&mut self) -> Result<Vec<BucketRange>, BackendError> {
        let buffers = self.buffers.as_ref().ok_or(BackendError::NotAllocated)?;
        Ok(buffers.offsets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HashParams, OffsetParams, SortParams, Stage};

    fn backend_with(positions: &[Vec2], capacity: usize) -> CpuBackend {
        let mut backend = CpuBackend::new(2).unwrap();
        backend.allocate(capacity).unwrap();
        let velocities = vec![Vec2::ZERO; positions.len()];
        backend.upload(positions, &velocities).unwrap();
        backend
    }

    fn run_stage(backend: &mut CpuBackend, dispatch: Dispatch) {
        let submission = backend.submit(dispatch).unwrap();
        backend.wait(submission).unwrap();
    }

    #[test]
    fn unallocated_backend_rejects_work() {
        let mut backend = CpuBackend::new(1).unwrap();
        assert!(matches!(
            backend.upload(&[Vec2::ZERO], &[Vec2::ZERO]),
            Err(BackendError::NotAllocated)
        ));
        assert!(matches!(
            backend.submit(Dispatch::Sort(SortParams::new(1))),
            Err(BackendError::NotAllocated)
        ));
        assert!(backend.allocated_capacity().is_none());
    }

    #[test]
    fn upload_beyond_capacity_fails() {
        let mut backend = CpuBackend::new(1).unwrap();
        backend.allocate(2).unwrap();
        let three = [Vec2::ZERO; 3];
        assert!(matches!(
            backend.upload(&three, &three),
            Err(BackendError::CapacityMismatch {
                required: 3,
                allocated: 2
            })
        ));
    }

    #[test]
    fn neighbor_stages_produce_sorted_offsets() {
        let positions: Vec<Vec2> = (0..10).map(|i| Vec2::new(i as f32 * 0.07, 0.3)).collect();
        let capacity = 16;
        let mut backend = backend_with(&positions, capacity);
        let padded = neighbor::padded_len(capacity) as u32;
        let key_space = neighbor::key_space(capacity);
        run_stage(
            &mut backend,
            Dispatch::Hash(HashParams {
                count: 10,
                padded,
                key_space,
                cell_size: 0.1,
            }),
        );
        run_stage(&mut backend, Dispatch::Sort(SortParams::new(padded)));
        run_stage(&mut backend, Dispatch::BuildOffsets(OffsetParams::new(10, key_space)));

        let proxies = backend.read_proxies().unwrap();
        assert!(proxies.windows(2).all(|w| w[0].key <= w[1].key));
        assert!(proxies[10..].iter().all(Proxy::is_padding));
        let offsets = backend.read_offsets().unwrap();
        assert_eq!(offsets.iter().map(BucketRange::len).sum::<usize>(), 10);
    }

    #[test]
    fn mismatched_sort_length_is_a_dispatch_error() {
        let mut backend = backend_with(&[Vec2::ZERO], 4);
        let err = backend.submit(Dispatch::Sort(SortParams::new(8))).unwrap_err();
        assert!(matches!(err, BackendError::Dispatch { stage: Stage::Sort, .. }));
    }

    #[test]
    fn submissions_must_be_awaited_in_order() {
        let mut backend = backend_with(&[Vec2::ZERO], 4);
        let first = backend.submit(Dispatch::Sort(SortParams::new(4))).unwrap();
        assert!(backend.submit(Dispatch::Sort(SortParams::new(4))).is_err());
        backend.wait(first).unwrap();
        let stale = Submission {
            stage: Stage::Sort,
            ticket: 99,
        };
        assert!(backend.wait(stale).is_err());
    }

    #[test]
    fn release_drops_buffers() {
        let mut backend = backend_with(&[Vec2::ZERO], 4);
        assert_eq!(backend.allocated_capacity(), Some(4));
        backend.release();
        assert!(backend.allocated_capacity().is_none());
        assert!(backend.read_proxies().is_err());
    }
}
