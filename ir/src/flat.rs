//! The flat contraction: a loop nest with named indices, per-tensor
//! strides, and affine guard constraints.
//!
//! This is the form the planner fuses into, simplifies, vectorizes, and
//! tiles. Slot 0 of `access` is always the output tensor; slots ≥ 1 are the
//! contraction inputs. Post-op inputs (tensors read only by fused
//! elementwise ops) carry their own accesses keyed by variable name.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use itertools::Itertools;

use crate::op::{AggregateOp, CombineOp, Op};
use crate::poly::Polynomial;
use crate::shape::{ElemType, TensorShape};

/// How one tensor is addressed from the kernel's index space.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTensorAccess {
    pub elem_type: ElemType,
    /// SIMD width applied to this access.
    pub vector: u64,
    /// Constant element offset into the buffer.
    pub offset: i64,
    /// One signed element stride per kernel index.
    pub strides: Vec<i64>,
    /// Every generated address must stay below this element count.
    pub global_index_limit: u64,
}

impl FlatTensorAccess {
    pub fn new(elem_type: ElemType, global_index_limit: u64) -> Self {
        Self { elem_type, vector: 1, offset: 0, strides: Vec::new(), global_index_limit }
    }
}

/// An affine guard `Σ lhs[i] · idx[i] < rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatConstraint {
    pub lhs: Vec<i64>,
    pub rhs: i64,
}

/// The lowered, loop-nest representation of one kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatContraction {
    /// Symbolic index names, one per loop dimension.
    pub names: Vec<String>,
    /// Iteration range per index; always positive.
    pub ranges: Vec<u64>,
    /// Slot 0 = output, slots ≥ 1 = contraction inputs.
    pub access: Vec<FlatTensorAccess>,
    pub constraints: Vec<FlatConstraint>,
    pub agg_op: AggregateOp,
    pub comb_op: CombineOp,
    /// Aggregate vectorization factor; 1 until vectorization succeeds.
    pub agg_vec: u64,
    /// Kernel-wide vectorization factor.
    pub vector: u64,
    /// False for pure-elementwise pseudo-kernels.
    pub generate_contraction: bool,
    /// Fused elementwise ops in execution order.
    pub post_ops: Vec<Op>,
    /// Extra tensors the post-ops read, addressed in this kernel's index
    /// space. Ordered by name so kernel parameter order is stable.
    pub post_op_inputs: BTreeMap<String, FlatTensorAccess>,
    /// Variables this kernel writes.
    pub kernel_outputs: Vec<String>,
    /// The contraction's own output variable.
    pub output: String,
}

impl FlatContraction {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            names: Vec::new(),
            ranges: Vec::new(),
            access: Vec::new(),
            constraints: Vec::new(),
            agg_op: AggregateOp::default(),
            comb_op: CombineOp::default(),
            agg_vec: 1,
            vector: 1,
            generate_contraction: true,
            post_ops: Vec::new(),
            post_op_inputs: BTreeMap::new(),
            kernel_outputs: Vec::new(),
            output: output.into(),
        }
    }

    /// Pseudo-kernel for a pure elementwise op, shaped like its output.
    ///
    /// One index per output dimension, strides straight from the shape, and
    /// no contraction body. Also returns the output index polynomials, which
    /// post-op stride derivation consumes.
    pub fn elementwise(output: impl Into<String>, shape: &TensorShape) -> (Self, Vec<Polynomial>) {
        let mut flat = Self::new(output);
        flat.generate_contraction = false;

        let mut access = FlatTensorAccess::new(shape.elem_type, shape.elem_size());
        let mut out_poly = Vec::with_capacity(shape.ndims());
        for (idx, dim) in shape.dims.iter().enumerate() {
            let name = format!("i{}", idx + 1);
            out_poly.push(Polynomial::index(name.clone()));
            flat.names.push(name);
            flat.ranges.push(dim.size);
            access.strides.push(dim.stride);
        }
        flat.access.push(access);
        (flat, out_poly)
    }

    /// Stable key of the flat shape and access pattern.
    ///
    /// Two kernels with the same key generate identical device code up to
    /// buffer names, so the key excludes every variable name and includes
    /// everything else: ranges, accesses, constraints, vector widths, and
    /// the post-op function spine.
    pub fn key(&self) -> String {
        let mut key = String::new();
        let _ = write!(key, "{:?}/{:?}:", self.agg_op, self.comb_op);
        if !self.generate_contraction {
            key.push('E');
        }
        let _ = write!(key, "[{}]", self.ranges.iter().join(","));
        for access in self.access.iter().chain(self.post_op_inputs.values()) {
            let _ = write!(
                key,
                " {:?}o{}v{}l{}({})",
                access.elem_type,
                access.offset,
                access.vector,
                access.global_index_limit,
                access.strides.iter().join(","),
            );
        }
        for constraint in &self.constraints {
            let _ = write!(key, " c({})<{}", constraint.lhs.iter().join(","), constraint.rhs);
        }
        for op in &self.post_ops {
            if let Some(f) = op.function_body() {
                let _ = write!(key, " +{}", f.name);
            }
        }
        key
    }
}
