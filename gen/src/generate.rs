//! The driver: walk the program in order and plan one kernel per producer.
//!
//! Contractions lower to flat form, gate on output coverage (emitting a
//! zero/copy prelude when not fully covered), fuse their downstream
//! elementwise consumers, and go through simplification, vectorization,
//! and tile search. Elementwise ops not absorbed by an earlier producer
//! seed a pseudo-kernel shaped like their own output and take the same
//! path. Special functions dispatch directly. Constants produce nothing.

use std::collections::{BTreeMap, BTreeSet};

use snafu::ensure;
use tracing::debug;

use mosaic_device::HardwareSettings;
use mosaic_ir::binding::{Binding, Bindings, ShapeMap, bind_program};
use mosaic_ir::{Contraction, FlatContraction, OpBody, Program, TensorShape, UseDef, lower_contraction};

use crate::cover::needs_zero;
use crate::emit::{contraction_kernel, gen_copy, gen_zero, simplify_kernels};
use crate::error::{Result, ShapeLookupMissingSnafu, UnsupportedContractionAritySnafu};
use crate::kernel::{KernelInfo, KernelList};
use crate::simplify::simplify_flat;
use crate::special::plan_special;
use crate::tile::tile_optimize;
use crate::unify::{PlanContext, integrate_post_ops};
use crate::vectorize::vectorize;

/// Sequential kernel names under one sanitized base id.
#[derive(Debug)]
pub struct KernelNamer {
    base: String,
    count: usize,
}

impl KernelNamer {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into(), count: 0 }
    }

    pub fn next(&mut self) -> String {
        let name = format!("{}_{}", self.base, self.count);
        self.count += 1;
        name
    }
}

/// Turn an arbitrary caller id into a valid kernel identifier: prefix
/// `kernel_`, map every non-alphanumeric character to `_`.
fn sanitize_kernel_id(id: &str) -> String {
    let mut kid = String::with_capacity(id.len() + 7);
    kid.push_str("kernel_");
    kid.extend(id.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }));
    kid
}

fn make_tshapes(c: &Contraction, vars: &Bindings) -> Result<Vec<TensorShape>> {
    c.specs
        .iter()
        .map(|spec| match vars.get(&spec.id).and_then(Binding::shape) {
            Some(shape) => Ok(shape.clone()),
            None => ShapeLookupMissingSnafu { id: spec.id.as_str() }.fail(),
        })
        .collect()
}

/// Simplify, vectorize, tile, and emit one planned flat contraction.
///
/// `c` is `None` for pure-elementwise pseudo-kernels. A kernel that ended
/// up with neither a contraction body nor post-ops (everything elided) is
/// dropped.
fn contraction_wrap(
    list: &mut KernelList,
    c: Option<&Contraction>,
    mut flat: FlatContraction,
    kname: String,
    settings: &HardwareSettings,
    vars: &Bindings,
    tile_trials: usize,
    war_safe_reads: BTreeSet<String>,
) -> Result<()> {
    if !flat.generate_contraction && flat.post_ops.is_empty() {
        return Ok(());
    }

    let mut inputs: Vec<String> = Vec::new();
    if let Some(c) = c {
        ensure!((2..=4).contains(&c.specs.len()), UnsupportedContractionAritySnafu { arity: c.specs.len() });
        for spec in c.specs.iter().skip(1) {
            ensure!(vars.get(&spec.id).is_some(), ShapeLookupMissingSnafu { id: spec.id.as_str() });
            inputs.push(spec.id.clone());
        }
    }

    simplify_flat(&mut flat);

    let mut vec_size = settings.vec_size;
    while flat.agg_vec == 1 && vec_size > 1 {
        flat = vectorize(flat, vec_size);
        vec_size /= 2;
    }

    let candidates = tile_optimize(settings, &flat, tile_trials == 1);
    let mut primary: Option<KernelInfo> = None;
    for cand in candidates.iter().take(tile_trials) {
        let ki = contraction_kernel(&kname, settings, &flat, &cand.tile, &inputs, vars, &list.var_rewrites);
        match &mut primary {
            None => primary = Some(ki),
            Some(p) => p.candidates.push(ki),
        }
    }
    if let Some(mut primary) = primary {
        primary.war_safe_reads = war_safe_reads;
        list.kernels.push(primary);
    }
    Ok(())
}

fn compile(
    orig_prog: &Program,
    inputs: &ShapeMap,
    outputs: &ShapeMap,
    settings: &HardwareSettings,
    kid: &str,
    tile_trials: usize,
) -> Result<KernelList> {
    let mut prog = orig_prog.clone();
    let vars = bind_program(&prog, inputs, outputs)?;
    let all_types: BTreeMap<String, TensorShape> =
        vars.iter().filter_map(|(name, b)| b.shape().map(|s| (name.clone(), s.clone()))).collect();

    let ud = UseDef::new(&prog);

    // Ops already absorbed into an earlier kernel.
    let mut computed: BTreeSet<usize> = BTreeSet::new();
    let mut list = KernelList::default();
    let mut namer = KernelNamer::new(kid);

    for i in 0..prog.ops.len() {
        if computed.contains(&i) {
            continue;
        }
        let op = prog.ops[i].clone();
        match &op.body {
            OpBody::Constant(_) => {}
            OpBody::Contraction(c) => {
                let tshapes = make_tshapes(c, &vars)?;
                let (mut flat, out_poly) = lower_contraction(c, &tshapes)?;
                flat.output = op.output.clone();

                let kname = namer.next();
                let mut war_safe_reads = BTreeSet::new();
                if needs_zero(&flat) {
                    // Kernels that don't cover their whole output space
                    // never unify with later operations.
                    debug!(output = %op.output, "output not fully covered, emitting prelude");
                    let prelude = match &c.use_default {
                        Some(default) => gen_copy(&tshapes[0], &op.output, default, format!("copy_{kname}")),
                        None => gen_zero(&tshapes[0], &op.output, format!("zero_{kname}")),
                    };
                    list.kernels.push(prelude);
                    flat.kernel_outputs.push(op.output.clone());
                } else {
                    let ctx = PlanContext { prog: &prog, vars: &vars, ud: &ud, inputs, outputs };
                    integrate_post_ops(
                        &ctx,
                        &mut flat,
                        &mut computed,
                        &mut list.var_rewrites,
                        &mut war_safe_reads,
                        i,
                        &out_poly,
                    )?;
                }
                contraction_wrap(&mut list, Some(c), flat, kname, settings, &vars, tile_trials, war_safe_reads)?;
            }
            OpBody::Function(f) if f.is_special() => {
                plan_special(&mut list, &mut prog, &mut computed, i, &vars, &mut namer, settings)?;
            }
            OpBody::Function(_) => {
                // An elementwise op nobody absorbed: its output shape seeds
                // the kernel, and every op fused into it must match that
                // shape.
                let shape = vars.tensor_shape(&op.output)?.clone();
                let (mut flat, out_poly) = FlatContraction::elementwise(op.output.as_str(), &shape);
                let mut war_safe_reads = BTreeSet::new();
                let ctx = PlanContext { prog: &prog, vars: &vars, ud: &ud, inputs, outputs };
                integrate_post_ops(
                    &ctx,
                    &mut flat,
                    &mut computed,
                    &mut list.var_rewrites,
                    &mut war_safe_reads,
                    i,
                    &out_poly,
                )?;
                contraction_wrap(&mut list, None, flat, namer.next(), settings, &vars, tile_trials, war_safe_reads)?;
            }
        }
    }

    // Keep typing information only for names some kernel touches.
    for ki in &list.kernels {
        for name in ki.inputs.iter().chain(&ki.outputs) {
            if let Some(shape) = all_types.get(name) {
                list.types.insert(name.clone(), shape.clone());
            }
        }
    }
    Ok(list)
}

/// Compile a program into a list of planned kernels.
///
/// `inputs`/`outputs` declare the program boundary shapes; `id` is an
/// arbitrary caller string used (sanitized) as the base of every kernel
/// name; `tile_trials` bounds how many tile candidates each kernel keeps.
pub fn generate_program(
    prog: &Program,
    inputs: &ShapeMap,
    outputs: &ShapeMap,
    settings: &HardwareSettings,
    id: &str,
    tile_trials: usize,
) -> Result<KernelList> {
    let kid = sanitize_kernel_id(id);
    debug!(ops = prog.ops.len(), kid = %kid, "compiling program");
    let mut list = compile(prog, inputs, outputs, settings, &kid, tile_trials.max(1))?;
    simplify_kernels(&mut list.kernels);
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_ids_are_sanitized() {
        assert_eq!(sanitize_kernel_id("my model v2!"), "kernel_my_model_v2_");
        assert_eq!(sanitize_kernel_id(""), "kernel_");
        assert_eq!(sanitize_kernel_id("ok123"), "kernel_ok123");
    }

    #[test]
    fn namer_counts_up() {
        let mut namer = KernelNamer::new("kernel_x");
        assert_eq!(namer.next(), "kernel_x_0");
        assert_eq!(namer.next(), "kernel_x_1");
    }
}
