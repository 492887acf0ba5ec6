//! Flat-contraction simplification: merge two indices that form a
//! contiguous nested pair in every access.
//!
//! Index `i` can fold into `j` when the output walks them as one flattened
//! loop (`stride[i] == range[j] · stride[j]`) and every other access —
//! contraction inputs and post-op inputs alike — either walks them the same
//! way or ignores both. Constraints bail the whole pass out: they reference
//! indices by position and a merge would change their meaning.

use mosaic_ir::{FlatContraction, FlatTensorAccess};
use tracing::trace;

fn pair_is_safe(access: &FlatTensorAccess, i: usize, j: usize, i_stride: i64, j_stride: i64) -> bool {
    let perfect_match = access.strides[i] == i_stride && access.strides[j] == j_stride;
    let both_zero = access.strides[i] == 0 && access.strides[j] == 0;
    perfect_match || both_zero
}

/// Perform at most one merge; returns whether anything changed.
///
/// The caller reruns until a fixpoint: indices shift on every merge, so a
/// single pass restarts rather than continuing with stale positions. Each
/// call is O(n²) over the index count, the fixpoint loop O(n³) worst case.
pub fn merge_adjacent_indices(flat: &mut FlatContraction) -> bool {
    if !flat.constraints.is_empty() || flat.access.is_empty() {
        return false;
    }
    let sz = flat.ranges.len();
    for i in 0..sz {
        let i_stride = flat.access[0].strides[i];
        if i_stride == 0 {
            continue;
        }
        for j in 0..sz {
            if i == j {
                continue;
            }
            let j_stride = flat.access[0].strides[j];
            if j_stride == 0 {
                continue;
            }
            if i_stride != flat.ranges[j] as i64 * j_stride {
                continue;
            }
            let safe = flat.access[1..]
                .iter()
                .chain(flat.post_op_inputs.values())
                .all(|a| pair_is_safe(a, i, j, i_stride, j_stride));
            if !safe {
                continue;
            }

            trace!(outer = %flat.names[i], inner = %flat.names[j], "merging contiguous index pair");
            flat.names[j] = format!("{}_{}", flat.names[i], flat.names[j]);
            flat.names.remove(i);
            flat.ranges[j] *= flat.ranges[i];
            flat.ranges.remove(i);
            for access in &mut flat.access {
                access.strides.remove(i);
            }
            for access in flat.post_op_inputs.values_mut() {
                access.strides.remove(i);
            }
            return true;
        }
    }
    false
}

/// Merge until nothing more folds.
pub fn simplify_flat(flat: &mut FlatContraction) {
    while merge_adjacent_indices(flat) {}
}
