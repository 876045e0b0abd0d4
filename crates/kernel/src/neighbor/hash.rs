//! Spatial hasher: position -> grid cell -> bucket key.
//!
//! The same arithmetic runs in `gpu/shaders/hash.wgsl`; keep the two in sync.
//! Positions sitting exactly on a cell boundary may still land in different
//! cells on the two backends, since device division is not correctly rounded.

use glam::Vec2;
use rayon::prelude::*;

use super::Proxy;

/// Large primes mixing the two cell coordinates (Teschner et al. 2003).
const PRIME_X: u32 = 73_856_093;
const PRIME_Y: u32 = 19_349_663;

/// Grid cell containing `position` for cells of side `cell_size`.
#[inline]
pub fn cell_of(position: Vec2, cell_size: f32) -> (i32, i32) {
    let c = (position / cell_size).floor();
    (c.x as i32, c.y as i32)
}

/// Bucket key of cell `(cx, cy)` reduced into `[0, key_space)`.
#[inline]
pub fn bucket_key(cx: i32, cy: i32, key_space: u32) -> u32 {
    let h = (cx as u32).wrapping_mul(PRIME_X) ^ (cy as u32).wrapping_mul(PRIME_Y);
    h % key_space.max(1)
}

/// Bucket key of `position`.
#[inline]
pub fn key_of(position: Vec2, cell_size: f32, key_space: u32) -> u32 {
    let (cx, cy) = cell_of(position, cell_size);
    bucket_key(cx, cy, key_space)
}

/// Fill `out` with one proxy per position followed by padding proxies.
///
/// `out.len()` is the padded sort length and must be at least
/// `positions.len()`. Every slot is written independently.
pub fn hash_positions(positions: &[Vec2], cell_size: f32, key_space: u32, out: &mut [Proxy]) {
    let n = positions.len();
    debug_assert!(out.len() >= n, "proxy buffer shorter than particle count");
    out.par_iter_mut().enumerate().for_each(|(slot, proxy)| {
        *proxy = if slot < n {
            Proxy {
                index: slot as u32,
                key: key_of(positions[slot], cell_size, key_space),
            }
        } else {
            Proxy::padding(slot as u32)
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_floor_negative_coordinates() {
        assert_eq!(cell_of(Vec2::new(0.05, 0.15), 0.1), (0, 1));
        assert_eq!(cell_of(Vec2::new(-0.05, -0.15), 0.1), (-1, -2));
    }

    #[test]
    fn keys_stay_in_range() {
        for cx in -20..20 {
            for cy in -20..20 {
                assert!(bucket_key(cx, cy, 37) < 37);
            }
        }
    }

    #[test]
    fn same_cell_same_key() {
        let a = key_of(Vec2::new(0.51, 0.52), 0.1, 2048);
        let b = key_of(Vec2::new(0.59, 0.58), 0.1, 2048);
        assert_eq!(a, b);
    }

    #[test]
    fn hashing_is_idempotent_and_pads_tail() {
        let positions: Vec<Vec2> = (0..5)
            .map(|i| Vec2::new(i as f32 * 0.13, -(i as f32) * 0.07))
            .collect();
        let mut first = vec![Proxy::padding(0); 8];
        let mut second = vec![Proxy::padding(0); 8];
        hash_positions(&positions, 0.1, 16, &mut first);
        hash_positions(&positions, 0.1, 16, &mut second);
        assert_eq!(first, second);
        for (i, p) in first.iter().enumerate() {
            assert_eq!(p.index as usize, i);
            assert_eq!(p.is_padding(), i >= 5);
        }
    }
}
