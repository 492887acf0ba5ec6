//! End-to-end planning scenarios over small literal programs.

use mosaic_device::HardwareSettings;
use mosaic_ir::binding::ShapeMap;
use mosaic_ir::{Constant, ElemType, Op, Program, TensorShape};

use crate::error::Error;
use crate::generate_program;
use crate::kernel::{KernelKind, KernelList};

use super::helpers::{matmul, shapes, sum_reduce};

fn plan(prog: &Program, inputs: &ShapeMap, outputs: &ShapeMap, id: &str) -> KernelList {
    generate_program(prog, inputs, outputs, &HardwareSettings::default(), id, 1).unwrap()
}

fn flat_of(list: &KernelList, idx: usize) -> &mosaic_ir::FlatContraction {
    match &list.kernels[idx].kind {
        KernelKind::Contraction(flat) => flat.as_ref(),
        other => panic!("expected a contraction kernel, got {other:?}"),
    }
}

#[test]
fn simple_matmul_is_one_bare_kernel() {
    let prog = Program::new(vec![matmul("out", "a", "b", 4, 4)]);
    let inputs = shapes(&[("a", &[4, 4]), ("b", &[4, 4])]);
    let outputs = shapes(&[("out", &[4, 4])]);

    let list = plan(&prog, &inputs, &outputs, "mm");
    assert_eq!(list.kernels.len(), 1);

    let ki = &list.kernels[0];
    assert_eq!(ki.name, "kernel_mm_0");
    assert_eq!(ki.inputs, vec!["a", "b"]);
    assert_eq!(ki.outputs, vec!["out"]);
    assert!(!ki.tile_size.is_empty());
    assert!(ki.tot_flops > 0 && ki.tot_bytes > 0);

    let flat = flat_of(&list, 0);
    assert!(flat.generate_contraction);
    assert!(flat.post_ops.is_empty());
    assert_eq!(flat.kernel_outputs, vec!["out"]);
    assert!(list.var_rewrites.is_empty());
}

#[test]
fn matmul_bias_relu_fuses_into_one_kernel() {
    let prog = Program::new(vec![
        matmul("mm", "a", "b", 4, 4),
        Op::function("biased", "add", vec!["mm".into(), "bias".into()]),
        Op::function("act", "relu", vec!["biased".into()]),
    ]);
    let inputs = shapes(&[("a", &[4, 4]), ("b", &[4, 4]), ("bias", &[4])]);
    let outputs = shapes(&[("act", &[4, 4])]);

    let list = plan(&prog, &inputs, &outputs, "mlp");
    assert_eq!(list.kernels.len(), 1);

    let ki = &list.kernels[0];
    assert_eq!(ki.inputs, vec!["a", "b", "bias"]);
    assert_eq!(ki.outputs, vec!["act"]);
    assert!(ki.war_safe_reads.contains("bias"));

    let flat = flat_of(&list, 0);
    let fused: Vec<&str> =
        flat.post_ops.iter().filter_map(|op| op.function_body().map(|f| f.name.as_str())).collect();
    assert_eq!(fused, vec!["add", "relu"]);
    // bias[N] broadcast against the (i, j, k) kernel indices.
    assert_eq!(flat.post_op_inputs["bias"].strides, vec![0, 1, 0]);
    // The matmul intermediate lives entirely inside the kernel.
    assert_eq!(flat.kernel_outputs, vec!["act"]);
    assert!(!list.types.contains_key("mm"));
}

#[test]
fn reshape_of_an_input_elides_to_the_source() {
    let prog = Program::new(vec![
        Op::constant("four", Constant::Int(4)),
        Op::function("y", "reshape", vec!["x".into(), "four".into(), "four".into()]),
        Op::constant("c", Constant::Float(2.0)),
        Op::function("z", "mul", vec!["y".into(), "c".into()]),
    ]);
    let inputs = shapes(&[("x", &[16])]);
    let outputs = shapes(&[("z", &[4, 4])]);

    let list = plan(&prog, &inputs, &outputs, "rs");
    assert_eq!(list.kernels.len(), 1);
    assert_eq!(list.var_rewrites.lookup("y"), "x");

    let ki = &list.kernels[0];
    // The kernel reads x directly; the reshape itself was never emitted.
    assert_eq!(ki.inputs, vec!["x"]);
    assert_eq!(ki.outputs, vec!["z"]);

    let flat = flat_of(&list, 0);
    let fused: Vec<&str> =
        flat.post_ops.iter().filter_map(|op| op.function_body().map(|f| f.name.as_str())).collect();
    assert_eq!(fused, vec!["mul"]);
    assert!(flat.post_op_inputs.contains_key("x"));
    assert!(ki.war_safe_reads.contains("x"));
}

#[test]
fn under_covered_reduction_gets_a_zero_prelude() {
    // The reduction only ever writes out[0..4) of the declared 8 cells.
    let prog = Program::new(vec![
        sum_reduce("out", "a", 8, None),
        Op::function("act", "relu", vec!["out".into()]),
    ]);
    let inputs = shapes(&[("a", &[4, 4])]);
    let outputs = shapes(&[("act", &[8])]);

    let list = plan(&prog, &inputs, &outputs, "red");
    // Prelude suppresses unification, so relu becomes its own kernel.
    assert_eq!(list.kernels.len(), 3);

    let zero = &list.kernels[0];
    assert_eq!(zero.name, "zero_kernel_red_0");
    assert!(matches!(zero.kind, KernelKind::Zero { .. }));
    assert_eq!(zero.outputs, vec!["out"]);

    let reduction = &list.kernels[1];
    assert_eq!(reduction.name, "kernel_red_0");
    assert_eq!(reduction.outputs, vec!["out"]);
    assert!(flat_of(&list, 1).post_ops.is_empty());

    assert_eq!(list.kernels[2].outputs, vec!["act"]);
}

#[test]
fn use_default_swaps_the_zero_for_a_copy() {
    let prog = Program::new(vec![sum_reduce("out", "a", 8, Some("d"))]);
    let inputs = shapes(&[("a", &[4, 4]), ("d", &[8])]);
    let outputs = shapes(&[("out", &[8])]);

    let list = plan(&prog, &inputs, &outputs, "red");
    assert_eq!(list.kernels.len(), 2);

    let copy = &list.kernels[0];
    assert_eq!(copy.name, "copy_kernel_red_0");
    assert!(matches!(copy.kind, KernelKind::Copy { .. }));
    assert_eq!(copy.inputs, vec!["d"]);
    assert_eq!(copy.outputs, vec!["out"]);
}

#[test]
fn fully_covered_reduction_needs_no_prelude() {
    let prog = Program::new(vec![sum_reduce("out", "a", 4, None)]);
    let inputs = shapes(&[("a", &[4, 4])]);
    let outputs = shapes(&[("out", &[4])]);

    let list = plan(&prog, &inputs, &outputs, "red");
    assert_eq!(list.kernels.len(), 1);
    assert!(matches!(list.kernels[0].kind, KernelKind::Contraction(_)));
}

#[test]
fn prng_triplet_becomes_one_special_kernel() {
    let prog = Program::new(vec![
        Op::constant("two", Constant::Int(2)),
        Op::function("t", "prng_step", vec!["s".into(), "two".into(), "two".into()]),
        Op::function("s2", "prng_state", vec!["t".into()]),
        Op::function("v", "prng_value", vec!["t".into()]),
    ]);
    let state = TensorShape::contiguous(ElemType::UInt32, &[3, 2]);
    let inputs = ShapeMap::from([("s".to_string(), state)]);
    let outputs = ShapeMap::from([
        ("s2".to_string(), TensorShape::contiguous(ElemType::UInt32, &[3, 2])),
        ("v".to_string(), TensorShape::contiguous(ElemType::UInt32, &[2, 2])),
    ]);

    let list = plan(&prog, &inputs, &outputs, "rng");
    assert_eq!(list.kernels.len(), 1);

    let ki = &list.kernels[0];
    assert!(matches!(&ki.kind, KernelKind::Special { function } if function == "prng_step"));
    assert_eq!(ki.outputs, vec!["s2", "v"]);
    assert_eq!(ki.inputs, vec!["s"]);
}

#[test]
fn prng_with_unused_value_degrades_to_ident() {
    let prog = Program::new(vec![
        Op::constant("two", Constant::Int(2)),
        Op::function("t", "prng_step", vec!["s".into(), "two".into()]),
        Op::function("s2", "prng_state", vec!["t".into()]),
    ]);
    let state = TensorShape::contiguous(ElemType::UInt32, &[2]);
    let inputs = ShapeMap::from([("s".to_string(), state.clone())]);
    let outputs = ShapeMap::from([("s2".to_string(), state)]);

    let list = plan(&prog, &inputs, &outputs, "rng");
    // No step kernel; just the ident copy of the untouched state.
    assert_eq!(list.kernels.len(), 1);
    let flat = flat_of(&list, 0);
    assert!(!flat.generate_contraction);
    assert_eq!(list.kernels[0].outputs, vec!["s2"]);
    assert_eq!(list.kernels[0].inputs, vec!["s"]);
}

#[test]
fn prng_with_unused_state_is_fatal() {
    let prog = Program::new(vec![
        Op::constant("two", Constant::Int(2)),
        Op::function("t", "prng_step", vec!["s".into(), "two".into()]),
        Op::function("v", "prng_value", vec!["t".into()]),
    ]);
    let state = TensorShape::contiguous(ElemType::UInt32, &[2]);
    let inputs = ShapeMap::from([("s".to_string(), state)]);
    let outputs = ShapeMap::from([("v".to_string(), TensorShape::contiguous(ElemType::UInt32, &[2]))]);

    let err =
        generate_program(&prog, &inputs, &outputs, &HardwareSettings::default(), "rng", 1).unwrap_err();
    assert!(matches!(err, Error::PrngStepMissingState { .. }));
}

#[test]
fn incompatible_consumer_stays_unfused() {
    // big reads mm but its output is 8× larger; the candidate set is
    // discarded whole and big plans as its own kernel.
    let prog = Program::new(vec![
        matmul("mm", "a", "b", 4, 4),
        Op::function("big", "add", vec!["mm".into(), "w".into()]),
    ]);
    let inputs = shapes(&[("a", &[4, 4]), ("b", &[4, 4]), ("w", &[8, 1, 1])]);
    let outputs = shapes(&[("big", &[8, 4, 4])]);

    let list = plan(&prog, &inputs, &outputs, "x");
    assert_eq!(list.kernels.len(), 2);
    assert!(flat_of(&list, 0).post_ops.is_empty());
    assert_eq!(list.kernels[1].outputs, vec!["big"]);
}

#[test]
fn fused_intermediate_consumed_later_is_still_written() {
    // act is fused into the matmul kernel but also read by a later
    // contraction, so the kernel must write it.
    let prog = Program::new(vec![
        matmul("mm", "a", "b", 4, 4),
        Op::function("act", "relu", vec!["mm".into()]),
        matmul("out", "act", "b", 4, 4),
    ]);
    let inputs = shapes(&[("a", &[4, 4]), ("b", &[4, 4])]);
    let outputs = shapes(&[("out", &[4, 4])]);

    let list = plan(&prog, &inputs, &outputs, "chain");
    assert_eq!(list.kernels.len(), 2);
    assert_eq!(list.kernels[0].outputs, vec!["act"]);
    assert_eq!(list.kernels[1].inputs, vec!["act", "b"]);
    assert_eq!(list.kernels[1].outputs, vec!["out"]);
}

#[test]
fn tile_trials_keep_runner_up_candidates() {
    let prog = Program::new(vec![matmul("out", "a", "b", 64, 64)]);
    let inputs = shapes(&[("a", &[64, 64]), ("b", &[64, 64])]);
    let outputs = shapes(&[("out", &[64, 64])]);

    let list =
        generate_program(&prog, &inputs, &outputs, &HardwareSettings::default(), "mm", 3).unwrap();
    let ki = &list.kernels[0];
    assert!(ki.candidates.len() <= 2);
    assert!(!ki.candidates.is_empty());
    for cand in &ki.candidates {
        assert_eq!(cand.key, ki.key);
        assert_ne!(cand.tile_size, ki.tile_size);
    }
}

#[test]
fn missing_shape_aborts_the_compile() {
    let prog = Program::new(vec![matmul("out", "a", "ghost", 4, 4)]);
    let inputs = shapes(&[("a", &[4, 4])]);
    let outputs = shapes(&[("out", &[4, 4])]);

    let err =
        generate_program(&prog, &inputs, &outputs, &HardwareSettings::default(), "mm", 1).unwrap_err();
    assert!(matches!(err, Error::Ir { .. }));
}

#[test]
fn types_are_pruned_to_touched_names() {
    let prog = Program::new(vec![
        matmul("mm", "a", "b", 4, 4),
        Op::function("biased", "add", vec!["mm".into(), "bias".into()]),
        Op::function("act", "relu", vec!["biased".into()]),
    ]);
    let inputs = shapes(&[("a", &[4, 4]), ("b", &[4, 4]), ("bias", &[4])]);
    let outputs = shapes(&[("act", &[4, 4])]);

    let list = plan(&prog, &inputs, &outputs, "mlp");
    for name in ["a", "b", "bias", "act"] {
        assert!(list.types.contains_key(name), "missing type for {name}");
    }
    assert!(!list.types.contains_key("mm"));
    assert!(!list.types.contains_key("biased"));
}
