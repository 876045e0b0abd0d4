//! Proxy sorter: bitonic sorting network over a power-of-two proxy array.
//!
//! The network is oblivious: the sequence of `(k, j)` compare-exchange stages
//! depends only on the array length, and every stage touches disjoint pairs,
//! so each stage is one fully data-parallel dispatch. Equal keys may be
//! reordered arbitrarily.

use rayon::prelude::*;

use super::Proxy;

/// Half-block size above which a single block is itself split across threads.
const PARALLEL_HALF_BLOCK: usize = 4096;

/// One compare-exchange stage of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitonicStage {
    /// Size of the bitonic sequences being merged.
    pub k: u32,
    /// Distance between compared elements.
    pub j: u32,
}

/// Stage sequence for an array of `len` elements (a power of two).
///
/// Yields `log2(len) * (log2(len) + 1) / 2` stages.
pub fn bitonic_stages(len: usize) -> Vec<BitonicStage> {
    debug_assert!(len.is_power_of_two() || len == 0);
    let mut stages = Vec::new();
    let mut k = 2usize;
    while k <= len {
        let mut j = k >> 1;
        while j > 0 {
            stages.push(BitonicStage {
                k: k as u32,
                j: j as u32,
            });
            j >>= 1;
        }
        k <<= 1;
    }
    stages
}

/// Run one compare-exchange stage over `data`.
///
/// Element `i` pairs with `i ^ j`; the pair is put in ascending order when
/// `i & k == 0`, descending otherwise.
pub fn compare_exchange(data: &mut [Proxy], stage: BitonicStage) {
    let k = stage.k as usize;
    let j = stage.j as usize;
    data.par_chunks_mut(2 * j)
        .enumerate()
        .for_each(|(block, chunk)| {
            let ascending = (block * 2 * j) & k == 0;
            let (lo, hi) = chunk.split_at_mut(j);
            if j >= PARALLEL_HALF_BLOCK {
                lo.par_iter_mut()
                    .zip(hi.par_iter_mut())
                    .for_each(|(a, b)| order_pair(a, b, ascending));
            } else {
                for (a, b) in lo.iter_mut().zip(hi.iter_mut()) {
                    order_pair(a, b, ascending);
                }
            }
        });
}

#[inline]
fn order_pair(a: &mut Proxy, b: &mut Proxy, ascending: bool) {
    let out_of_order = if ascending {
        a.key > b.key
    } else {
        a.key < b.key
    };
    if out_of_order {
        std::mem::swap(a, b);
    }
}

/// Sort `data` by key, non-decreasing. `data.len()` must be a power of two.
pub fn bitonic_sort(data: &mut [Proxy]) {
    for stage in bitonic_stages(data.len()) {
        compare_exchange(data, stage);
    }
}
