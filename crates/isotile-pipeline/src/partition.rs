//! Static work partitioning.

use std::ops::Range;

/// The contiguous slice of `0..len` that worker `worker` of `workers`
/// owns: `[worker * len / workers, min((worker + 1) * len / workers, len))`.
///
/// Ranges of consecutive workers are adjacent and together cover
/// `0..len` exactly once. Workers beyond `len` get empty ranges.
#[must_use]
pub fn partition(worker: usize, workers: usize, len: usize) -> Range<usize> {
    if workers == 0 {
        return 0..0;
    }
    let start = (worker * len / workers).min(len);
    let end = ((worker + 1) * len / workers).min(len);
    start..end
}
