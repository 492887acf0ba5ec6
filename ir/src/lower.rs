//! Lowering from a source-form contraction to a flat loop nest.
//!
//! Handles the affine subset the planner consumes: every index must appear
//! as a bare `1·v` against at least one tensor dimension (that dimension
//! bounds its range); any richer polynomial on a dimension turns into an
//! affine guard constraint instead of a bound.

use snafu::ensure;
use tracing::debug;

use crate::error::{Result, SpecArityMismatchSnafu, UnresolvedIndexRangeSnafu};
use crate::flat::{FlatConstraint, FlatContraction, FlatTensorAccess};
use crate::op::Contraction;
use crate::poly::{Polynomial, Rational};
use crate::shape::TensorShape;

/// Lower `c` against the shapes of its operands (`tshapes[0]` is the
/// output). Returns the flat contraction plus the output spec's index
/// polynomials, which post-op stride derivation consumes.
pub fn lower_contraction(c: &Contraction, tshapes: &[TensorShape]) -> Result<(FlatContraction, Vec<Polynomial>)> {
    debug_assert_eq!(c.specs.len(), tshapes.len());
    for (spec, shape) in c.specs.iter().zip(tshapes) {
        ensure!(
            spec.index.len() == shape.ndims(),
            SpecArityMismatchSnafu { id: spec.id.as_str(), spec_dims: spec.index.len(), shape_dims: shape.ndims() }
        );
    }

    // Index names in first-appearance order, output spec first.
    let mut names: Vec<String> = Vec::new();
    for spec in &c.specs {
        for poly in &spec.index {
            for (name, _) in poly.var_terms() {
                if !names.iter().any(|n| n.as_str() == name) {
                    names.push(name.to_string());
                }
            }
        }
    }

    // An index ranges over the tightest dimension it addresses alone.
    let mut ranges = Vec::with_capacity(names.len());
    for name in &names {
        let mut range: Option<u64> = None;
        for (spec, shape) in c.specs.iter().zip(tshapes) {
            for (poly, dim) in spec.index.iter().zip(&shape.dims) {
                if poly.as_single_index() == Some(name.as_str()) {
                    range = Some(range.map_or(dim.size, |r| r.min(dim.size)));
                }
            }
        }
        let Some(range) = range else {
            return UnresolvedIndexRangeSnafu { index: name.as_str() }.fail();
        };
        ranges.push(range);
    }

    let mut flat = FlatContraction::new(String::new());
    flat.agg_op = c.agg_op;
    flat.comb_op = c.comb_op;
    flat.names = names;
    flat.ranges = ranges;

    for (spec, shape) in c.specs.iter().zip(tshapes) {
        let mut access = FlatTensorAccess::new(shape.elem_type, shape.elem_size());
        for (poly, dim) in spec.index.iter().zip(&shape.dims) {
            access.offset += poly.constant_term().floor() * dim.stride;

            // A dimension addressed by anything richer than a bare index
            // needs a guard: the enclosing ranges may overrun it.
            if poly.num_vars() > 0 && poly.as_single_index().is_none() {
                let lhs: Vec<i64> = flat.names.iter().map(|n| poly.coeff(n).floor()).collect();
                let rhs = dim.size as i64 - poly.constant_term().floor();
                let guard = FlatConstraint { lhs, rhs };
                if !flat.constraints.contains(&guard) {
                    flat.constraints.push(guard);
                }
            }
        }
        for name in &flat.names {
            let stride = spec
                .index
                .iter()
                .zip(&shape.dims)
                .fold(Rational::zero(), |acc, (poly, dim)| acc + poly.coeff(name) * Rational::from(dim.stride));
            access.strides.push(stride.floor());
        }
        flat.access.push(access);
    }

    // User-written bounds come in on top of the derived guards.
    for sc in &c.constraints {
        let lhs: Vec<i64> = flat.names.iter().map(|n| sc.poly.coeff(n).floor()).collect();
        let rhs = sc.bound as i64 - sc.poly.constant_term().floor();
        let guard = FlatConstraint { lhs, rhs };
        if !flat.constraints.contains(&guard) {
            flat.constraints.push(guard);
        }
    }

    let out_poly = c.specs[0].index.clone();
    debug!(indices = flat.names.len(), constraints = flat.constraints.len(), "lowered contraction");
    Ok((flat, out_poly))
}
