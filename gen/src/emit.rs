//! Emission of planned-kernel records.
//!
//! Nothing here renders device source; a kernel's body *is* its flat
//! contraction (or its zero/copy/special descriptor). Emission fills in the
//! bookkeeping around it: parameter lists, stable keys, and launch
//! estimates.

use itertools::Itertools;
use tracing::debug;

use mosaic_device::HardwareSettings;
use mosaic_ir::binding::Bindings;
use mosaic_ir::{FlatContraction, Op, TensorShape};

use crate::kernel::{KernelInfo, KernelKind, KernelList, VarRewrites};
use crate::tile::compute_tile_stats;

/// Build the kernel record for a planned flat contraction and one tile
/// choice.
///
/// Parameter order is contraction inputs first (original spec order, names
/// resolved through the accumulated rewrites), then post-op inputs in name
/// order.
pub fn contraction_kernel(
    kname: &str,
    settings: &HardwareSettings,
    flat: &FlatContraction,
    tile: &[u64],
    inputs: &[String],
    vars: &Bindings,
    var_rewrites: &VarRewrites,
) -> KernelInfo {
    let mut ki = KernelInfo::new(kname, KernelKind::Contraction(Box::new(flat.clone())), settings.clone());
    ki.outputs = flat.kernel_outputs.clone();
    ki.key = flat.key();
    ki.tile_size = tile.iter().copied().collect();

    for input in inputs {
        if vars.is_tensor(input) {
            ki.inputs.push(var_rewrites.lookup(input).to_owned());
        }
    }
    for name in flat.post_op_inputs.keys() {
        ki.inputs.push(var_rewrites.lookup(name).to_owned());
    }

    let perf = compute_tile_stats(flat, tile);
    ki.tot_bytes = perf.work_groups * (perf.inner_loops * perf.mem_read + perf.mem_write);
    ki.tot_flops = perf.true_ops;
    debug!(
        kernel = kname,
        post_ops = flat.post_ops.len(),
        tile = ?tile,
        tot_bytes = ki.tot_bytes,
        tot_flops = ki.tot_flops,
        "emitted contraction kernel"
    );
    ki
}

fn shape_key(prefix: &str, shape: &TensorShape) -> String {
    format!("{prefix}:{:?}[{}]", shape.elem_type, shape.sizes().join(","))
}

/// Prelude kernel writing zeros over `name`.
pub fn gen_zero(shape: &TensorShape, name: &str, kname: String) -> KernelInfo {
    let mut ki = KernelInfo::new(kname, KernelKind::Zero { shape: shape.clone() }, HardwareSettings::default());
    ki.outputs = vec![name.to_owned()];
    ki.key = shape_key("zero", shape);
    ki.tot_bytes = shape.byte_size();
    ki.tot_flops = shape.elem_size();
    ki
}

/// Prelude kernel initializing `dst` from `src`.
pub fn gen_copy(shape: &TensorShape, dst: &str, src: &str, kname: String) -> KernelInfo {
    let mut ki = KernelInfo::new(kname, KernelKind::Copy { shape: shape.clone() }, HardwareSettings::default());
    ki.outputs = vec![dst.to_owned()];
    ki.inputs = vec![src.to_owned()];
    ki.key = shape_key("copy", shape);
    ki.tot_bytes = 2 * shape.byte_size();
    ki.tot_flops = shape.elem_size();
    ki
}

/// Dispatch a special function straight to a kernel of its own.
///
/// A `prng_step` op arrives with its state/value output names appended to
/// its params; those become the kernel outputs. Everything else writes its
/// op output.
pub fn gen_special(list: &mut KernelList, op: &Op, vars: &Bindings, kname: String, settings: &HardwareSettings) {
    let Some(func) = op.function_body() else {
        return;
    };
    let mut ki = KernelInfo::new(kname, KernelKind::Special { function: func.name.clone() }, settings.clone());

    if func.name == "prng_step" && func.params.len() >= 2 {
        ki.outputs = func.params[func.params.len() - 2..].to_vec();
    } else {
        ki.outputs = vec![op.output.clone()];
    }
    for input in &op.inputs {
        if vars.is_tensor(input) {
            ki.inputs.push(list.var_rewrites.lookup(input).to_owned());
        }
    }

    ki.key = format!("special:{}", func.name);
    let mut tot_bytes = 0;
    for name in ki.inputs.iter().chain(&ki.outputs) {
        if let Ok(shape) = vars.tensor_shape(name) {
            tot_bytes += shape.byte_size();
        }
    }
    ki.tot_bytes = tot_bytes;
    ki.tot_flops = ki.outputs.iter().filter_map(|n| vars.tensor_shape(n).ok()).map(TensorShape::elem_size).sum();
    debug!(kernel = %ki.name, function = %func.name, "emitted special kernel");
    list.kernels.push(ki);
}

/// Final cleanup over the emitted kernels: collapse duplicate parameters
/// (the same tensor may feed a contraction twice) everywhere, candidates
/// included.
pub fn simplify_kernels(kernels: &mut [KernelInfo]) {
    for ki in kernels {
        let mut seen = std::collections::BTreeSet::new();
        ki.inputs.retain(|name| seen.insert(name.clone()));
        simplify_kernels(&mut ki.candidates);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_ir::ElemType;

    #[test]
    fn zero_and_copy_records() {
        let shape = TensorShape::contiguous(ElemType::Float32, &[4, 4]);
        let zero = gen_zero(&shape, "out", "zero_kernel_x_0".into());
        assert_eq!(zero.outputs, vec!["out"]);
        assert!(zero.inputs.is_empty());
        assert_eq!(zero.tot_bytes, 64);

        let copy = gen_copy(&shape, "out", "defaults", "copy_kernel_x_0".into());
        assert_eq!(copy.inputs, vec!["defaults"]);
        assert_eq!(copy.tot_bytes, 128);
        assert_ne!(zero.key, copy.key);
    }

    #[test]
    fn duplicate_parameters_collapse() {
        let shape = TensorShape::contiguous(ElemType::Float32, &[4]);
        let mut ki = gen_zero(&shape, "out", "k".into());
        ki.inputs = vec!["a".into(), "b".into(), "a".into()];
        let mut kernels = vec![ki];
        simplify_kernels(&mut kernels);
        assert_eq!(kernels[0].inputs, vec!["a", "b"]);
    }
}
