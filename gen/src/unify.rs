//! Unification: fuse downstream elementwise ops into a producer kernel.
//!
//! During a contraction's output phase the kernel has values in hand,
//! starting with the contraction's own output. Any downstream elementwise
//! op depending only on values the kernel already has — earlier program
//! results, constants, or outputs of ops already fused — can run in the
//! same kernel as a post-op. Fused ops contribute their own outputs, which
//! lets further ops fuse in turn.
//!
//! Candidates are committed atomically: when a consumer needs a chain of
//! parent ops to become fusable, either the whole chain joins or none of
//! it does.

use std::collections::{BTreeSet, HashMap};

use snafu::ensure;
use tracing::{debug, trace};

use mosaic_ir::binding::{Binding, Bindings, ShapeMap};
use mosaic_ir::{FlatContraction, FlatTensorAccess, Polynomial, Program, Rational, UseDef};

use crate::error::{
    InvalidReshapeSnafu, ReshapeMissingOperandSnafu, ReshapeNonTensorSnafu, Result,
};
use crate::kernel::VarRewrites;

/// Everything the planner consults but never mutates.
pub struct PlanContext<'a> {
    pub prog: &'a Program,
    pub vars: &'a Bindings,
    pub ud: &'a UseDef,
    pub inputs: &'a ShapeMap,
    pub outputs: &'a ShapeMap,
}

fn different_size(a: &Binding, b: &Binding) -> bool {
    match (a.shape(), b.shape()) {
        (Some(a), Some(b)) => a.elem_size() != b.elem_size(),
        _ => true,
    }
}

/// Either the same element count, or fewer dims that right-align under
/// broadcasting against the output.
fn broadcast_compatible(input: &Binding, output: &Binding) -> bool {
    let (Some(input), Some(output)) = (input.shape(), output.shape()) else {
        return false;
    };
    if input.elem_size() == output.elem_size() {
        return true;
    }
    if output.ndims() < input.ndims() {
        return false;
    }
    let off = output.ndims() - input.ndims();
    input.dims.iter().zip(&output.dims[off..]).all(|(i, o)| i.size == 1 || i.size == o.size)
}

/// Whether `test_opidx` may fuse into the kernel rooted at `root_opidx`.
pub fn op_can_be_unified(ctx: &PlanContext<'_>, root_opidx: usize, test_opidx: usize) -> bool {
    let root_op = &ctx.prog.ops[root_opidx];
    let test_op = &ctx.prog.ops[test_opidx];

    let Some(f) = test_op.function_body() else {
        trace!(op = %test_op.output, "not a simple elementwise operation");
        return false;
    };
    if f.is_special() {
        trace!(op = %test_op.output, "special functions never fuse");
        return false;
    }

    let (Some(root_out), Some(test_out)) = (ctx.vars.get(&root_op.output), ctx.vars.get(&test_op.output))
    else {
        return false;
    };
    if different_size(root_out, test_out) {
        trace!(root = %root_op.output, op = %test_op.output, "output sizes differ");
        return false;
    }

    for input in &test_op.inputs {
        let Some(binding) = ctx.vars.get(input) else {
            return false;
        };
        if !binding.is_tensor() {
            continue;
        }
        // An input that needs a genuine reshape (not a broadcast) cannot be
        // read from inside the kernel's output loop.
        if !broadcast_compatible(binding, root_out) {
            trace!(op = %test_op.output, %input, "input incompatible with the kernel output shape");
            return false;
        }
    }
    true
}

/// The maximal fusable set rooted at `root_opidx`, in ascending op order.
///
/// DFS over consumers of already-fused outputs. Each consumer pulls in a
/// candidate closure: the transitive parents (at or after the root, not yet
/// fused, not constants) it needs available. A closure containing any
/// unfusable op is discarded whole.
pub fn connected_components(
    ctx: &PlanContext<'_>,
    root_opidx: usize,
    previously_computed: &BTreeSet<usize>,
) -> BTreeSet<usize> {
    let mut unified = BTreeSet::from([root_opidx]);
    let mut frontier = vec![root_opidx];

    while let Some(u) = frontier.pop() {
        let consumers: Vec<usize> = ctx.ud.uses(&ctx.prog.ops[u].output).collect();
        for c_start in consumers {
            if unified.contains(&c_start)
                || previously_computed.contains(&c_start)
                || !op_can_be_unified(ctx, root_opidx, c_start)
            {
                continue;
            }

            let mut candidates = BTreeSet::from([c_start]);
            let mut candidate_frontier = vec![c_start];
            let mut discard = false;

            'closure: while let Some(c) = candidate_frontier.pop() {
                for input in &ctx.prog.ops[c].inputs {
                    let Some(i) = ctx.ud.op_def(input) else {
                        continue;
                    };
                    if i < root_opidx
                        || unified.contains(&i)
                        || candidates.contains(&i)
                        || previously_computed.contains(&i)
                        || ctx.prog.ops[i].is_constant()
                    {
                        continue;
                    }
                    if !op_can_be_unified(ctx, root_opidx, i) {
                        discard = true;
                        break 'closure;
                    }
                    candidates.insert(i);
                    candidate_frontier.push(i);
                }
            }

            if !discard {
                frontier.extend(candidates.iter().copied());
                unified.append(&mut candidates);
            }
        }
    }
    unified
}

/// Fuse the unifiable set rooted at `opidx` into `flat`.
///
/// Walks the set in program order, eliding reshape/ident ops where their
/// output is not observable, rewriting fused-op inputs through the local
/// renames, collecting the kernel's external post-op inputs (with strides
/// derived in the kernel's index space), and deciding which fused outputs
/// the kernel must actually write.
pub fn integrate_post_ops(
    ctx: &PlanContext<'_>,
    flat: &mut FlatContraction,
    computed: &mut BTreeSet<usize>,
    var_rewrites: &mut VarRewrites,
    war_safe_reads: &mut BTreeSet<String>,
    opidx: usize,
    out_poly: &[Polynomial],
) -> Result<()> {
    let op = &ctx.prog.ops[opidx];

    // Tensors the fused region reads from outside itself.
    let mut post_contraction_inputs: BTreeSet<String> = BTreeSet::new();

    // Renames local to this kernel. Kernel parameters keep their original
    // names so shape lookups stay correct; only elided reshape/ident
    // results are replaced inside the kernel body.
    let mut local_var_rewrites: HashMap<String, String> = HashMap::new();

    let kernel_inputs: BTreeSet<&str> = op.inputs.iter().map(String::as_str).collect();

    let unified = connected_components(ctx, opidx, computed);
    debug!(root = %op.output, fused = unified.len() - 1, "unification planned");

    for &u in &unified {
        let u_op = &ctx.prog.ops[u];
        let Some(func) = u_op.function_body() else {
            continue; // the root contraction itself
        };

        // Elide reshape/ident where neither name needs to be written: keep
        // the pre-variable, map the post-name onto it everywhere downstream.
        // When both are program outputs, or the source is a program
        // boundary and the result a program output, the copy is observable
        // and the op stays.
        if func.name == "reshape" || func.name == "ident" {
            ensure!(!u_op.inputs.is_empty(), ReshapeMissingOperandSnafu { output: u_op.output.as_str() });
            let in_binding = ctx.vars.get(&u_op.inputs[0]);
            ensure!(
                in_binding.is_some_and(Binding::is_tensor),
                ReshapeNonTensorSnafu { input: u_op.inputs[0].as_str() }
            );
            let in_shape = in_binding.and_then(Binding::shape);
            let out_shape = ctx.vars.get(&u_op.output).and_then(Binding::shape);
            let valid = match (in_shape, out_shape) {
                (Some(i), Some(o)) => i.byte_size() == o.byte_size() && i.elem_size() == o.elem_size(),
                _ => false,
            };
            ensure!(valid, InvalidReshapeSnafu { input: u_op.inputs[0].as_str(), output: u_op.output.as_str() });

            let input = var_rewrites.lookup(&u_op.inputs[0]).to_owned();
            if !ctx.outputs.contains_key(&u_op.output)
                || (!ctx.outputs.contains_key(&input) && !ctx.inputs.contains_key(&input))
            {
                trace!(elided = %u_op.output, replacement = %input, "eliding reshape/ident");
                var_rewrites.insert(u_op.output.clone(), &input);
                local_var_rewrites.insert(u_op.output.clone(), input);
                continue;
            }
        }

        let mut copied = u_op.clone();
        for input in &mut copied.inputs {
            if let Some(rewritten) = local_var_rewrites.get(input) {
                *input = rewritten.clone();
            }
            let defined_inside = ctx.ud.op_def(input).is_some_and(|i| unified.contains(&i));
            if ctx.vars.is_tensor(input) && !defined_inside {
                war_safe_reads.insert(input.clone());
                post_contraction_inputs.insert(input.clone());
            }
        }
        flat.post_ops.push(copied);
    }

    // A fused output becomes a kernel output when someone outside the
    // fused region observes it: the program itself, or a non-fused
    // consumer. Elided names never appear; their rewrite target is written
    // instead.
    let mut kernel_outputs: BTreeSet<String> = BTreeSet::new();
    for &u in &unified {
        let u_op = &ctx.prog.ops[u];
        let rewritten = var_rewrites.lookup(&u_op.output);
        if kernel_inputs.contains(rewritten) {
            continue;
        }
        let needed = ctx.outputs.contains_key(&u_op.output)
            || ctx.ud.uses(&u_op.output).any(|consumer| !unified.contains(&consumer));
        if needed {
            kernel_outputs.insert(rewritten.to_owned());
        }
    }
    flat.kernel_outputs.extend(kernel_outputs);

    computed.extend(unified.iter().copied());

    // Derive strides for each external post-op input by aligning its shape
    // against the output index polynomials.
    let out_shape = ctx.vars.tensor_shape(&flat.output)?.clone();
    for name in post_contraction_inputs {
        let real_shape = ctx.vars.tensor_shape(&name)?;
        let elem_type = real_shape.elem_type;
        // Same element count as the kernel output: use the output's layout.
        // The input may have an arbitrary (e.g. pre-reshape) shape that
        // cannot produce strides in this kernel's index space; with equal
        // counts the elementwise read-out is position-for-position anyway.
        // Broadcast-incompatible inputs were rejected during planning.
        let shape = if real_shape.elem_size() == out_shape.elem_size() { &out_shape } else { real_shape };

        let mut access = FlatTensorAccess::new(elem_type, shape.elem_size());
        let mut poly = Polynomial::default();
        let off = out_poly.len().saturating_sub(shape.ndims());
        for ((dim, out_p), out_dim) in shape.dims.iter().zip(&out_poly[off..]).zip(&out_shape.dims[off..]) {
            // Size-1 input dims against a larger output dim broadcast and
            // contribute nothing; 1-against-1 is a real (degenerate) dim.
            if dim.size != 1 || out_dim.size == 1 {
                poly += out_p.clone() * Rational::from(dim.stride);
            }
        }
        for idx in &flat.names {
            access.strides.push(poly.coeff(idx).floor());
        }
        trace!(input = %name, strides = ?access.strides, "post-op input strides");
        flat.post_op_inputs.insert(name, access);
    }

    Ok(())
}
