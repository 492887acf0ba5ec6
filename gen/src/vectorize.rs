//! SIMD-width selection for a flat contraction.
//!
//! The driver calls this with halving widths until it sticks
//! (`agg_vec != 1`) or the width reaches 1. A width sticks when some index
//! is unit-stride in the output, at worst unit-stride everywhere else, and
//! unguarded — then every access either vectorizes cleanly or broadcasts.

use mosaic_ir::FlatContraction;
use tracing::debug;

/// Try to vectorize by `vec_size`. Returns the (possibly unchanged) flat
/// contraction; success is visible as `agg_vec == vec_size`.
pub fn vectorize(mut flat: FlatContraction, vec_size: u64) -> FlatContraction {
    if vec_size <= 1 || flat.access.is_empty() {
        return flat;
    }

    // Innermost candidate wins: scan from the last index down.
    let candidate = (0..flat.names.len()).rev().find(|&i| {
        flat.ranges[i] % vec_size == 0
            && flat.access[0].strides[i] == 1
            && flat
                .access
                .iter()
                .chain(flat.post_op_inputs.values())
                .all(|a| a.strides[i] == 0 || a.strides[i] == 1)
            && flat.constraints.iter().all(|c| c.lhs[i] == 0)
    });

    if let Some(i) = candidate {
        debug!(index = %flat.names[i], vec_size, "vectorizing");
        flat.agg_vec = vec_size;
        flat.vector = vec_size;
        for access in flat.access.iter_mut().chain(flat.post_op_inputs.values_mut()) {
            if access.strides[i] == 1 {
                access.vector = vec_size;
            }
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_ir::{ElemType, FlatTensorAccess, TensorShape};

    fn elementwise(sizes: &[u64]) -> FlatContraction {
        let shape = TensorShape::contiguous(ElemType::Float32, sizes);
        FlatContraction::elementwise("y", &shape).0
    }

    #[test]
    fn unit_stride_index_vectorizes() {
        let flat = vectorize(elementwise(&[4, 8]), 4);
        assert_eq!(flat.agg_vec, 4);
        assert_eq!(flat.access[0].vector, 4);
    }

    #[test]
    fn indivisible_range_falls_through() {
        let flat = vectorize(elementwise(&[4, 6]), 4);
        assert_eq!(flat.agg_vec, 1);
        // The driver halves and retries; 2 divides 6.
        let flat = vectorize(flat, 2);
        assert_eq!(flat.agg_vec, 2);
    }

    #[test]
    fn broadcast_accesses_keep_scalar_width() {
        let mut flat = elementwise(&[4, 8]);
        let mut bias = FlatTensorAccess::new(ElemType::Float32, 8);
        bias.strides = vec![0, 1];
        flat.post_op_inputs.insert("bias".into(), bias);
        let mut scalar = FlatTensorAccess::new(ElemType::Float32, 4);
        scalar.strides = vec![1, 0];
        flat.post_op_inputs.insert("col".into(), scalar);

        let flat = vectorize(flat, 4);
        assert_eq!(flat.agg_vec, 4);
        assert_eq!(flat.post_op_inputs["bias"].vector, 4);
        assert_eq!(flat.post_op_inputs["col"].vector, 1);
    }

    #[test]
    fn strided_access_blocks_vectorization() {
        let mut flat = elementwise(&[4, 8]);
        let mut strided = FlatTensorAccess::new(ElemType::Float32, 64);
        strided.strides = vec![16, 2];
        flat.access.push(strided);
        let flat = vectorize(flat, 4);
        assert_eq!(flat.agg_vec, 1);
    }
}
