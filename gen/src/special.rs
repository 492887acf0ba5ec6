//! Special-function handling: PRNG triplet grouping and direct dispatch.
//!
//! PRNG generation is a three-op idiom: `prng_step` advances the generator
//! and yields a tuple, `prng_state` extracts the new state, `prng_value`
//! the random payload. All three must run as one kernel, so the driver
//! groups them here when it reaches the step; the other two legs are
//! marked computed and ride along as extra parameters.

use std::collections::BTreeSet;

use mosaic_device::HardwareSettings;
use mosaic_ir::binding::Bindings;
use mosaic_ir::{Function, OpBody, Program};

use crate::emit::gen_special;
use crate::error::{PrngStepMissingStateSnafu, PrngWithoutStepSnafu, Result};
use crate::generate::KernelNamer;
use crate::kernel::KernelList;

/// Plan the special op at `opidx`.
///
/// For `prng_step`, scan forward for the state/value legs consuming its
/// tuple:
///
/// - both present: mark them computed, append their output names to the
///   step's params, emit one special kernel;
/// - value unused: the "new state" is just the stepped state — rewrite the
///   state leg to an `ident` of the step's state input, emit nothing here;
/// - state unused: hard error (the generator would silently stop
///   advancing);
/// - both unused: dead code, emit nothing.
///
/// A `prng_state`/`prng_value` still unclaimed when the driver reaches it
/// has no step ahead of it: hard error.
pub fn plan_special(
    list: &mut KernelList,
    prog: &mut Program,
    computed: &mut BTreeSet<usize>,
    opidx: usize,
    vars: &Bindings,
    namer: &mut KernelNamer,
    settings: &HardwareSettings,
) -> Result<()> {
    let op = prog.ops[opidx].clone();
    let Some(func) = op.function_body() else {
        return Ok(());
    };

    match func.name.as_str() {
        "prng_state" | "prng_value" => {
            PrngWithoutStepSnafu { function: func.name.as_str(), output: op.output.as_str() }.fail()
        }
        "prng_step" => {
            let tuple = &op.output;
            let mut state_out: Option<(usize, String)> = None;
            let mut value_out: Option<String> = None;
            for j in opidx + 1..prog.ops.len() {
                let nop = &prog.ops[j];
                let Some(nf) = nop.function_body() else {
                    continue;
                };
                if nop.inputs.len() != 1 || nop.inputs[0] != *tuple {
                    continue;
                }
                if nf.name == "prng_state" {
                    state_out = Some((j, nop.output.clone()));
                    computed.insert(j);
                } else if nf.name == "prng_value" {
                    value_out = Some(nop.output.clone());
                    computed.insert(j);
                }
            }

            match (state_out, value_out) {
                // Nothing observes the step at all.
                (None, None) => Ok(()),
                (Some((state_idx, _)), None) => {
                    // Value unused: the state leg degrades to an ident of
                    // the pre-step state, handled by the normal
                    // elementwise path.
                    let state_input = op.inputs.first().cloned().unwrap_or_default();
                    let state_op = &mut prog.ops[state_idx];
                    state_op.body = OpBody::Function(Function::new("ident"));
                    state_op.inputs.clear();
                    state_op.inputs.push(state_input);
                    computed.remove(&state_idx);
                    Ok(())
                }
                (None, Some(_)) => PrngStepMissingStateSnafu { output: tuple.as_str() }.fail(),
                (Some((_, state_name)), Some(value_name)) => {
                    let mut dispatched = op.clone();
                    if let OpBody::Function(f) = &mut dispatched.body {
                        f.params.push(state_name);
                        f.params.push(value_name);
                    }
                    gen_special(list, &dispatched, vars, namer.next(), settings);
                    Ok(())
                }
            }
        }
        _ => {
            gen_special(list, &op, vars, namer.next(), settings);
            Ok(())
        }
    }
}
