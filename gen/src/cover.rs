//! Output-coverage analysis: does a contraction write its whole output
//! exactly once?
//!
//! When it does not, the driver issues a zero (or copy-from-default)
//! prelude kernel so unwritten cells hold a defined value, and skips
//! unification for the contraction.

use mosaic_ir::FlatContraction;

/// True when the output region needs initializing before the contraction
/// runs. That is the case when any of:
///
/// - the output access starts at a nonzero offset;
/// - the output walks some index backwards (no attempt to analyze those);
/// - a constraint restricts only output-addressing indices, carving cells
///   out of the output space entirely;
/// - the output strides, sorted, do not tile `[0, global_index_limit)`
///   contiguously.
pub fn needs_zero(flat: &FlatContraction) -> bool {
    let out = &flat.access[0];
    if out.offset != 0 {
        return true;
    }

    let mut out_pattern: Vec<(i64, u64)> = Vec::new();
    for i in 0..flat.names.len() {
        let stride = out.strides[i];
        if stride == 0 {
            continue;
        }
        if stride < 0 {
            return true;
        }
        out_pattern.push((stride, flat.ranges[i]));
    }

    // A constraint touching only output indices cuts cells out of the
    // output region. One that also involves a reduction index merely skips
    // accumulation steps, which the contraction handles on its own.
    for constraint in &flat.constraints {
        let output_only = (0..flat.names.len()).all(|i| constraint.lhs[i] == 0 || out.strides[i] != 0);
        if output_only {
            return true;
        }
    }

    out_pattern.sort_unstable();
    let mut cur: u64 = 1;
    for (stride, range) in out_pattern {
        if cur != stride as u64 {
            return true;
        }
        cur *= range;
    }
    cur != out.global_index_limit
}
