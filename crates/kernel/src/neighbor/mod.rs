//! Spatial-hash neighbor discovery.
//!
//! Every step the pipeline rebuilds a flat, GPU-friendly index from scratch:
//!
//! 1. [`hash`] assigns each particle a bucket key from its grid cell.
//! 2. [`sort`] orders the `(index, key)` proxies by key with a bitonic network.
//! 3. [`offsets`] turns the sorted keys into a bucket -> `[start, end)` table.
//!
//! Lookups then walk the 3x3 block of cells around a position. Because the
//! cell side equals the interaction radius, any pair closer than the radius
//! sits in adjacent cells, so the walk never misses a true neighbor. Hash
//! collisions only add far-away candidates, which the distance test rejects.

pub mod hash;
pub mod offsets;
pub mod sort;

use glam::Vec2;

/// Key carried by padding proxies; sorts after every real key.
pub const EMPTY_KEY: u32 = u32::MAX;

/// Transient pairing of a particle slot with its bucket key.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Proxy {
    /// Particle slot in the store.
    pub index: u32,
    /// Bucket key in `[0, key_space)`, or [`EMPTY_KEY`] for padding.
    pub key: u32,
}

impl Proxy {
    /// Padding proxy occupying sort slot `slot`.
    pub fn padding(slot: u32) -> Self {
        Self {
            index: slot,
            key: EMPTY_KEY,
        }
    }

    /// `true` for padding proxies.
    pub fn is_padding(&self) -> bool {
        self.key == EMPTY_KEY
    }
}

/// Contiguous range of the sorted proxy array sharing one bucket key.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BucketRange {
    /// First sorted slot of the bucket.
    pub start: u32,
    /// One past the last sorted slot of the bucket.
    pub end: u32,
}

impl BucketRange {
    /// Range of a bucket with no particles.
    pub const EMPTY: BucketRange = BucketRange { start: 0, end: 0 };

    /// Number of proxies in the bucket.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    /// `true` if the bucket holds no proxies.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Number of buckets for a store of the given capacity.
pub fn key_space(capacity: usize) -> u32 {
    let buckets = capacity.max(1).saturating_mul(2);
    u32::try_from(buckets).unwrap_or(u32::MAX - 1)
}

/// Length of the proxy array handed to the sorting network.
pub fn padded_len(capacity: usize) -> usize {
    capacity.max(1).next_power_of_two()
}

/// Read-only view over one step's sorted proxies and offset table.
#[derive(Debug, Clone, Copy)]
pub struct NeighborIndex<'a> {
    proxies: &'a [Proxy],
    offsets: &'a [BucketRange],
    cell_size: f32,
}

impl<'a> NeighborIndex<'a> {
    /// Wrap sorted proxies and their offset table. `offsets.len()` is the key
    /// space the proxies were hashed into.
    pub fn new(proxies: &'a [Proxy], offsets: &'a [BucketRange], cell_size: f32) -> Self {
        Self {
            proxies,
            offsets,
            cell_size,
        }
    }

    /// Distinct bucket keys covering the 3x3 block of cells around `position`.
    ///
    /// Returns the key array and how many leading entries are valid.
    pub fn neighbor_keys(&self, position: Vec2) -> ([u32; 9], usize) {
        let key_space = self.offsets.len() as u32;
        let (cx, cy) = hash::cell_of(position, self.cell_size);
        let mut keys = [0u32; 9];
        let mut n = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let key = hash::bucket_key(cx.wrapping_add(dx), cy.wrapping_add(dy), key_space);
                if !keys[..n].contains(&key) {
                    keys[n] = key;
                    n += 1;
                }
            }
        }
        (keys, n)
    }

    /// Call `f` with the particle index of every candidate in the buckets
    /// around `position`. Candidates are unfiltered; `f` must apply its own
    /// distance test.
    pub fn for_each_candidate<F>(&self, position: Vec2, mut f: F)
    where
        F: FnMut(usize),
    {
        let (keys, n) = self.neighbor_keys(position);
        for &key in &keys[..n] {
            let range = self.offsets[key as usize];
            for slot in range.start..range.end {
                f(self.proxies[slot as usize].index as usize);
            }
        }
    }

    /// Call `f(j, r_ij, dist)` for every particle `j` within `radius` of
    /// particle `i` (including `i` itself, with zero offset), where
    /// `r_ij = positions[i] - positions[j]`.
    pub fn for_each_neighbor<F>(&self, i: usize, positions: &[Vec2], radius: f32, mut f: F)
    where
        F: FnMut(usize, Vec2, f32),
    {
        let pi = positions[i];
        let radius_sq = radius * radius;
        self.for_each_candidate(pi, |j| {
            let rij = pi - positions[j];
            let dist_sq = rij.length_squared();
            if dist_sq < radius_sq {
                f(j, rij, dist_sq.sqrt());
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(positions: &[Vec2], cell: f32, ks: u32) -> (Vec<Proxy>, Vec<BucketRange>) {
        let mut proxies = vec![Proxy::padding(0); padded_len(positions.len())];
        hash::hash_positions(positions, cell, ks, &mut proxies);
        sort::bitonic_sort(&mut proxies);
        let mut offsets = vec![BucketRange::EMPTY; ks as usize];
        offsets::build_offsets(&proxies[..positions.len()], &mut offsets);
        (proxies, offsets)
    }

    #[test]
    fn key_space_and_padding() {
        assert_eq!(key_space(1024), 2048);
        assert_eq!(key_space(0), 2);
        assert_eq!(padded_len(1000), 1024);
        assert_eq!(padded_len(1024), 1024);
        assert_eq!(padded_len(0), 1);
    }

    #[test]
    fn bucket_range_len() {
        assert!(BucketRange::EMPTY.is_empty());
        let r = BucketRange { start: 3, end: 7 };
        assert_eq!(r.len(), 4);
        assert!(!r.is_empty());
    }

    #[test]
    fn single_particle_sees_only_itself() {
        let positions = [Vec2::new(0.5, 0.5)];
        let (proxies, offsets) = build(&positions, 0.2, 16);
        let index = NeighborIndex::new(&proxies, &offsets, 0.2);
        let mut found = Vec::new();
        index.for_each_neighbor(0, &positions, 0.2, |j, _, _| found.push(j));
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn pair_across_cell_boundary() {
        let positions = [Vec2::new(0.19, 0.5), Vec2::new(0.21, 0.5)];
        let (proxies, offsets) = build(&positions, 0.2, 16);
        let index = NeighborIndex::new(&proxies, &offsets, 0.2);
        let mut found = Vec::new();
        index.for_each_neighbor(0, &positions, 0.2, |j, _, _| found.push(j));
        found.sort_unstable();
        assert_eq!(found, vec![0, 1]);
    }

    #[test]
    fn far_pair_is_rejected_by_distance() {
        let positions = [Vec2::new(0.1, 0.1), Vec2::new(0.9, 0.9)];
        let (proxies, offsets) = build(&positions, 0.2, 16);
        let index = NeighborIndex::new(&proxies, &offsets, 0.2);
        let mut found = Vec::new();
        index.for_each_neighbor(0, &positions, 0.2, |j, _, _| found.push(j));
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn colliding_keys_are_walked_once() {
        // With a key space of 2 most of the nine cells collide.
        let positions: Vec<Vec2> = (0..6).map(|i| Vec2::new(i as f32 * 0.05, 0.0)).collect();
        let (proxies, offsets) = build(&positions, 0.2, 2);
        assert_eq!(offsets.len(), 2);
        let index = NeighborIndex::new(&proxies, &offsets, 0.2);
        let (keys, n) = index.neighbor_keys(positions[0]);
        assert!(n <= 2);
        assert!(keys[..n].iter().all(|&k| k < 2));

        let mut seen = Vec::new();
        index.for_each_candidate(positions[0], |j| seen.push(j));
        seen.sort_unstable();
        assert_eq!(seen, (0..6).collect::<Vec<_>>(), "each candidate exactly once");
    }
}
