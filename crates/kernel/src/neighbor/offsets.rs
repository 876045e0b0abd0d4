//! Offset index builder: sorted proxies -> per-bucket `[start, end)` ranges.

use rayon::prelude::*;

use super::{BucketRange, Proxy};

/// Reset every bucket to the empty range.
pub fn clear_offsets(offsets: &mut [BucketRange]) {
    offsets
        .par_iter_mut()
        .for_each(|range| *range = BucketRange::EMPTY);
}

/// Sorted slots where a new key run begins.
///
/// Slot `i` starts a run when it is the first slot or its key differs from
/// slot `i - 1`. Padding proxies terminate the scan.
pub fn run_starts(sorted: &[Proxy]) -> Vec<u32> {
    let live = live_len(sorted);
    (0..live)
        .into_par_iter()
        .filter(|&i| i == 0 || sorted[i - 1].key != sorted[i].key)
        .map(|i| i as u32)
        .collect()
}

/// Rebuild `offsets` from `sorted`, which must be ordered by key.
///
/// `offsets.len()` is the key space. Buckets without proxies end up with
/// [`BucketRange::EMPTY`].
pub fn build_offsets(sorted: &[Proxy], offsets: &mut [BucketRange]) {
    clear_offsets(offsets);
    let live = live_len(sorted) as u32;
    let starts = run_starts(sorted);
    for (run, &start) in starts.iter().enumerate() {
        let end = starts.get(run + 1).copied().unwrap_or(live);
        let key = sorted[start as usize].key as usize;
        debug_assert!(key < offsets.len(), "bucket key {key} outside key space");
        if let Some(range) = offsets.get_mut(key) {
            *range = BucketRange { start, end };
        }
    }
}

/// Number of leading non-padding proxies.
fn live_len(sorted: &[Proxy]) -> usize {
    sorted.partition_point(|p| !p.is_padding())
}
