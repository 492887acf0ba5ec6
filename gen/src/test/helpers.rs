//! Builders for the program patterns the planner tests exercise.

use mosaic_ir::binding::ShapeMap;
use mosaic_ir::{
    AggregateOp, CombineOp, Contraction, ElemType, Op, Polynomial, TensorShape, TensorSpec,
};

pub fn shape(sizes: &[u64]) -> TensorShape {
    TensorShape::contiguous(ElemType::Float32, sizes)
}

pub fn shapes(entries: &[(&str, &[u64])]) -> ShapeMap {
    entries.iter().map(|(name, sizes)| (name.to_string(), shape(sizes))).collect()
}

/// `out[i, j] = Σ_k a[i, k] · b[k, j]`
pub fn matmul(out: &str, a: &str, b: &str, m: u64, n: u64) -> Op {
    Op::contraction(
        out,
        Contraction {
            agg_op: AggregateOp::Sum,
            comb_op: CombineOp::Mul,
            specs: vec![
                TensorSpec::new(out, vec![Polynomial::index("i"), Polynomial::index("j")]),
                TensorSpec::new(a, vec![Polynomial::index("i"), Polynomial::index("k")]),
                TensorSpec::new(b, vec![Polynomial::index("k"), Polynomial::index("j")]),
            ],
            output_sizes: vec![m, n],
            use_default: None,
            constraints: Vec::new(),
        },
    )
}

/// `out[i] = Σ_j a[i, j]`, with a declared output extent that may exceed
/// the range the reduction actually covers.
pub fn sum_reduce(out: &str, a: &str, out_size: u64, use_default: Option<&str>) -> Op {
    Op::contraction(
        out,
        Contraction {
            agg_op: AggregateOp::Sum,
            comb_op: CombineOp::Mul,
            specs: vec![
                TensorSpec::new(out, vec![Polynomial::index("i")]),
                TensorSpec::new(a, vec![Polynomial::index("i"), Polynomial::index("j")]),
            ],
            output_sizes: vec![out_size],
            use_default: use_default.map(str::to_owned),
            constraints: Vec::new(),
        },
    )
}
