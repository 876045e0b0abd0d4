//! Host-side particle storage with explicit, doubling capacity.
//!
//! Struct-of-arrays layout: index `i` across every array refers to the same
//! particle. Indices are only stable until the next growth or `clear`.

use glam::Vec2;

use crate::emitter::Emitter;

/// Capacity the store starts with (and returns to on `clear`) unless
/// configured otherwise.
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;

/// Growable particle arrays mirrored to a compute device by the pipeline.
#[derive(Debug, Clone)]
pub struct ParticleStore {
    /// Positions.
    positions: Vec<Vec2>,
    /// Velocities.
    velocities: Vec<Vec2>,
    /// Per-particle weight (summed kernel density from the last step).
    weights: Vec<f32>,
    /// Slots available before the next growth. Always `>= len()`.
    capacity: usize,
    /// Capacity restored by `clear`.
    base_capacity: usize,
    /// Bumped on every reallocation or clear; device mirrors sized for an
    /// older generation are stale.
    generation: u64,
}

impl ParticleStore {
    /// Create an empty store with [`DEFAULT_INITIAL_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    /// Create an empty store with room for `capacity` particles (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            positions: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
            capacity,
            base_capacity: capacity,
            generation: 0,
        }
    }

    /// Number of live particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` if there are no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Slots available before the next growth.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocation generation; changes whenever the arrays are reallocated or
    /// cleared.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Live positions.
    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    /// Live velocities.
    pub fn velocities(&self) -> &[Vec2] {
        &self.velocities
    }

    /// Live weights.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Mutable views of positions, velocities and weights, for writing back a
    /// completed step.
    pub fn state_mut(&mut self) -> (&mut [Vec2], &mut [Vec2], &mut [f32]) {
        (&mut self.positions, &mut self.velocities, &mut self.weights)
    }

    /// Append one particle, doubling capacity first if the store is full.
    ///
    /// Returns `true` if the arrays were reallocated.
    pub fn add(&mut self, position: Vec2, velocity: Vec2) -> bool {
        let grew = if self.len() == self.capacity {
            self.grow(self.capacity * 2);
            true
        } else {
            false
        };
        self.positions.push(position);
        self.velocities.push(velocity);
        self.weights.push(0.0);
        grew
    }

    /// Sample a regular grid with spacing `stride` over `emitter`'s bounding
    /// box and add every sample the emitter includes.
    ///
    /// Returns the number of particles added. Degenerate or non-finite boxes
    /// and non-positive strides add nothing, as do boxes needing more than
    /// `u32::MAX` samples along an axis.
    pub fn add_region<E: Emitter + ?Sized>(
        &mut self,
        emitter: &E,
        velocity: Vec2,
        stride: f32,
    ) -> usize {
        if !(stride > 0.0) || !stride.is_finite() {
            return 0;
        }
        let aabb = emitter.aabb();
        if !aabb.lower.is_finite() || !aabb.upper.is_finite() {
            return 0;
        }
        let steps = (aabb.extent() / stride).ceil();
        if !steps.is_finite() || steps.max_element() >= u32::MAX as f32 {
            return 0;
        }
        // One extra sample per axis absorbs rounding in `steps`; the bound
        // checks below decide membership.
        let nx = steps.x.max(0.0) as u32 + 1;
        let ny = steps.y.max(0.0) as u32 + 1;

        let before = self.len();
        for iy in 0..ny {
            let y = aabb.lower.y + iy as f32 * stride;
            if !(y < aabb.upper.y) {
                break;
            }
            for ix in 0..nx {
                let x = aabb.lower.x + ix as f32 * stride;
                if !(x < aabb.upper.x) {
                    break;
                }
                let p = Vec2::new(x, y);
                if emitter.includes(p) {
                    self.add(p, velocity);
                }
            }
        }
        self.len() - before
    }

    /// Discard every particle and return to the base capacity.
    pub fn clear(&mut self) {
        self.positions = Vec::with_capacity(self.base_capacity);
        self.velocities = Vec::with_capacity(self.base_capacity);
        self.weights = Vec::with_capacity(self.base_capacity);
        self.capacity = self.base_capacity;
        self.generation += 1;
    }

    /// Reallocate every array at `new_capacity`, copying live data across.
    fn grow(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity > self.capacity);
        tracing::debug!(
            from = self.capacity,
            to = new_capacity,
            count = self.len(),
            "growing particle store"
        );
        self.positions = realloc(&self.positions, new_capacity);
        self.velocities = realloc(&self.velocities, new_capacity);
        self.weights = realloc(&self.weights, new_capacity);
        self.capacity = new_capacity;
        self.generation += 1;
    }
}

impl Default for ParticleStore {
    fn default() -> Self {
        Self::new()
    }
}

fn realloc<T: Copy>(old: &[T], capacity: usize) -> Vec<T> {
    let mut fresh = Vec::with_capacity(capacity);
    fresh.extend_from_slice(old);
    fresh
}
