//! Variable binding: resolve every program variable to a tensor layout or a
//! scalar before planning starts.
//!
//! Binding only *consults* shapes (program inputs, declared contraction
//! output sizes, integer dimension arguments) and propagates them through
//! trivially: elementwise outputs take the broadcast of their tensor inputs,
//! reshapes take their integer arguments, PRNG ops take the shapes declared
//! on their step. There is no general type inference here.

use std::collections::{BTreeMap, HashMap};

use snafu::ensure;

use crate::error::{
    BroadcastMismatchSnafu, DuplicateDefinitionSnafu, MissingReshapeDimsSnafu, NotATensorSnafu,
    OutputElemMismatchSnafu, OutputSizeMismatchSnafu, PrngWithoutStepSnafu, Result,
    SpecialRankMismatchSnafu, UnboundVariableSnafu,
};
use crate::op::{Constant, Op, OpBody, Program};
use crate::shape::{ElemType, TensorShape};

/// Name → tensor shape, as supplied for program inputs and outputs.
pub type ShapeMap = BTreeMap<String, TensorShape>;

/// What a variable resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Tensor(TensorShape),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Binding {
    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor(_))
    }

    pub fn shape(&self) -> Option<&TensorShape> {
        match self {
            Self::Tensor(shape) => Some(shape),
            _ => None,
        }
    }
}

/// The variable table produced by [`bind_program`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    map: BTreeMap<String, Binding>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.map.get(name)
    }

    pub fn is_tensor(&self, name: &str) -> bool {
        self.get(name).is_some_and(Binding::is_tensor)
    }

    /// The tensor shape bound to `name`, or an error naming the variable.
    pub fn tensor_shape(&self, name: &str) -> Result<&TensorShape> {
        let binding = self.get(name);
        ensure!(binding.is_some(), UnboundVariableSnafu { name });
        match binding {
            Some(Binding::Tensor(shape)) => Ok(shape),
            _ => NotATensorSnafu { name }.fail(),
        }
    }

    pub fn insert(&mut self, name: String, binding: Binding) {
        self.map.insert(name, binding);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.map.iter()
    }
}

/// Right-aligned broadcast of tensor input shapes, row-major layout.
fn broadcast_shape(output: &str, shapes: &[&TensorShape]) -> Result<TensorShape> {
    let Some(first) = shapes.first() else {
        return Ok(TensorShape::contiguous(ElemType::Float32, &[]));
    };
    let ndims = shapes.iter().map(|s| s.ndims()).max().unwrap_or(0);
    let mut sizes = vec![1u64; ndims];
    for shape in shapes {
        let off = ndims - shape.ndims();
        for (i, dim) in shape.dims.iter().enumerate() {
            let slot = sizes[off + i];
            if slot == 1 {
                sizes[off + i] = dim.size;
            } else {
                ensure!(
                    dim.size == 1 || dim.size == slot,
                    BroadcastMismatchSnafu {
                        output,
                        lhs: sizes.clone(),
                        rhs: shape.sizes().collect::<Vec<_>>(),
                    }
                );
            }
        }
    }
    Ok(TensorShape::contiguous(first.elem_type, &sizes))
}

/// Trailing integer arguments of an op, read from `Int`-bound inputs.
fn int_dims(op: &Op, vars: &Bindings, from: usize) -> Option<Vec<u64>> {
    op.inputs[from..]
        .iter()
        .map(|name| match vars.get(name) {
            Some(&Binding::Int(v)) if v > 0 => Some(v as u64),
            _ => None,
        })
        .collect()
}

fn bind_special(op: &Op, name: &str, vars: &Bindings, steps: &mut HashMap<String, (TensorShape, TensorShape)>) -> Result<Binding> {
    match name {
        "prng_step" => {
            let state_var = op.inputs.first().map(String::as_str).unwrap_or_default();
            let state = vars.tensor_shape(state_var)?.clone();
            let dims = int_dims(op, vars, 1);
            let Some(dims) = dims else {
                return MissingReshapeDimsSnafu { output: op.output.as_str() }.fail();
            };
            let value = TensorShape::contiguous(ElemType::UInt32, &dims);
            steps.insert(op.output.clone(), (state, value.clone()));
            Ok(Binding::Tensor(value))
        }
        "prng_state" | "prng_value" => {
            let tuple = op.inputs.first().map(String::as_str).unwrap_or_default();
            let Some((state, value)) = steps.get(tuple) else {
                return PrngWithoutStepSnafu { function: name, output: op.output.as_str() }.fail();
            };
            let shape = if name == "prng_state" { state } else { value };
            Ok(Binding::Tensor(shape.clone()))
        }
        "gather" => {
            ensure!(op.inputs.len() == 2, SpecialRankMismatchSnafu { function: name, output: op.output.as_str() });
            let data = vars.tensor_shape(&op.inputs[0])?;
            let idx = vars.tensor_shape(&op.inputs[1])?;
            ensure!(data.ndims() >= 1, SpecialRankMismatchSnafu { function: name, output: op.output.as_str() });
            let sizes: Vec<u64> = idx.sizes().chain(data.sizes().skip(1)).collect();
            Ok(Binding::Tensor(TensorShape::contiguous(data.elem_type, &sizes)))
        }
        "scatter" => {
            ensure!(op.inputs.len() == 3, SpecialRankMismatchSnafu { function: name, output: op.output.as_str() });
            let data = vars.tensor_shape(&op.inputs[0])?;
            let idx = vars.tensor_shape(&op.inputs[1])?;
            let like = vars.tensor_shape(&op.inputs[2])?;
            ensure!(
                data.ndims() >= idx.ndims() && like.ndims() >= 1,
                SpecialRankMismatchSnafu { function: name, output: op.output.as_str() }
            );
            let sizes: Vec<u64> =
                std::iter::once(like.dims[0].size).chain(data.sizes().skip(idx.ndims())).collect();
            Ok(Binding::Tensor(TensorShape::contiguous(data.elem_type, &sizes)))
        }
        "shape" => {
            let input = vars.tensor_shape(op.inputs.first().map(String::as_str).unwrap_or_default())?;
            Ok(Binding::Tensor(TensorShape::contiguous(ElemType::Int32, &[input.ndims() as u64])))
        }
        _ => unreachable!("unknown special function {name}"),
    }
}

/// Build the variable table for a program.
///
/// Program inputs come from `inputs`; every other variable is bound in
/// program order. Declared program `outputs` are verified against the
/// resulting bindings (element counts must agree).
pub fn bind_program(prog: &Program, inputs: &ShapeMap, outputs: &ShapeMap) -> Result<Bindings> {
    let mut vars = Bindings::default();
    for (name, shape) in inputs {
        vars.insert(name.clone(), Binding::Tensor(shape.clone()));
    }

    // prng_step tuple → (state shape, value shape), consulted by the other
    // two legs of the triplet.
    let mut steps: HashMap<String, (TensorShape, TensorShape)> = HashMap::new();

    for op in &prog.ops {
        for input in &op.inputs {
            ensure!(vars.get(input).is_some(), UnboundVariableSnafu { name: input.as_str() });
        }
        ensure!(vars.get(&op.output).is_none(), DuplicateDefinitionSnafu { name: op.output.as_str() });

        let binding = match &op.body {
            OpBody::Constant(Constant::Int(v)) => Binding::Int(*v),
            OpBody::Constant(Constant::Float(v)) => Binding::Float(*v),
            OpBody::Contraction(c) => {
                ensure!(
                    c.specs.first().is_none_or(|s| s.index.len() == c.output_sizes.len()),
                    OutputSizeMismatchSnafu {
                        output: op.output.as_str(),
                        declared: c.output_sizes.len(),
                        spec_dims: c.specs.first().map(|s| s.index.len()).unwrap_or(0),
                    }
                );
                let elem_type = match c.specs.get(1) {
                    Some(spec) => vars.tensor_shape(&spec.id)?.elem_type,
                    None => ElemType::Float32,
                };
                Binding::Tensor(TensorShape::contiguous(elem_type, &c.output_sizes))
            }
            OpBody::Function(f) if f.is_special() => bind_special(op, &f.name, &vars, &mut steps)?,
            OpBody::Function(f) if f.name == "reshape" => {
                let input = op.inputs.first().map(String::as_str).unwrap_or_default();
                let in_shape = match vars.get(input) {
                    Some(Binding::Tensor(shape)) => shape.clone(),
                    _ => return crate::error::ReshapeNonTensorSnafu { input }.fail(),
                };
                let Some(dims) = int_dims(op, &vars, 1) else {
                    return MissingReshapeDimsSnafu { output: op.output.as_str() }.fail();
                };
                Binding::Tensor(TensorShape::contiguous(in_shape.elem_type, &dims))
            }
            OpBody::Function(f) if f.name == "ident" => {
                let input = op.inputs.first().map(String::as_str).unwrap_or_default();
                match vars.get(input) {
                    Some(Binding::Tensor(shape)) => Binding::Tensor(shape.clone()),
                    _ => return crate::error::ReshapeNonTensorSnafu { input }.fail(),
                }
            }
            OpBody::Function(_) => {
                let shapes: Vec<&TensorShape> =
                    op.inputs.iter().filter_map(|name| vars.get(name).and_then(Binding::shape)).collect();
                Binding::Tensor(broadcast_shape(&op.output, &shapes)?)
            }
        };
        vars.insert(op.output.clone(), binding);
    }

    for (name, shape) in outputs {
        let bound = vars.tensor_shape(name)?;
        ensure!(
            bound.elem_size() == shape.elem_size(),
            OutputElemMismatchSnafu { name: name.as_str(), bound: bound.elem_size(), declared: shape.elem_size() }
        );
    }

    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::op::{Constant, Op};

    fn shape(sizes: &[u64]) -> TensorShape {
        TensorShape::contiguous(ElemType::Float32, sizes)
    }

    #[test]
    fn elementwise_outputs_broadcast() {
        let prog = Program::new(vec![Op::function("y", "add", vec!["a".into(), "b".into()])]);
        let inputs = ShapeMap::from([("a".into(), shape(&[4, 4])), ("b".into(), shape(&[4]))]);
        let vars = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap();
        assert_eq!(vars.tensor_shape("y").unwrap(), &shape(&[4, 4]));
    }

    #[test]
    fn broadcast_mismatch_is_fatal() {
        let prog = Program::new(vec![Op::function("y", "add", vec!["a".into(), "b".into()])]);
        let inputs = ShapeMap::from([("a".into(), shape(&[4, 4])), ("b".into(), shape(&[3]))]);
        let err = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap_err();
        assert!(matches!(err, Error::BroadcastMismatch { .. }));
    }

    #[test]
    fn reshape_takes_integer_dims() {
        let prog = Program::new(vec![
            Op::constant("four", Constant::Int(4)),
            Op::function("y", "reshape", vec!["x".into(), "four".into(), "four".into()]),
        ]);
        let inputs = ShapeMap::from([("x".into(), shape(&[16]))]);
        let vars = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap();
        assert_eq!(vars.tensor_shape("y").unwrap(), &shape(&[4, 4]));
    }

    #[test]
    fn prng_triplet_shapes() {
        let prog = Program::new(vec![
            Op::constant("two", Constant::Int(2)),
            Op::function("t", "prng_step", vec!["s".into(), "two".into(), "two".into()]),
            Op::function("s2", "prng_state", vec!["t".into()]),
            Op::function("v", "prng_value", vec!["t".into()]),
        ]);
        let state = TensorShape::contiguous(ElemType::UInt32, &[3, 2]);
        let inputs = ShapeMap::from([("s".into(), state.clone())]);
        let vars = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap();
        assert_eq!(vars.tensor_shape("s2").unwrap(), &state);
        assert_eq!(vars.tensor_shape("v").unwrap(), &TensorShape::contiguous(ElemType::UInt32, &[2, 2]));
    }

    #[test]
    fn orphan_prng_state_is_fatal() {
        let prog = Program::new(vec![Op::function("s2", "prng_state", vec!["x".into()])]);
        let inputs = ShapeMap::from([("x".into(), shape(&[4]))]);
        let err = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap_err();
        assert!(matches!(err, Error::PrngWithoutStep { .. }));
    }

    #[test]
    fn unbound_input_is_fatal() {
        let prog = Program::new(vec![Op::function("y", "relu", vec!["ghost".into()])]);
        let err = bind_program(&prog, &ShapeMap::new(), &ShapeMap::new()).unwrap_err();
        assert!(matches!(err, Error::UnboundVariable { .. }));
    }

    #[test]
    fn redefining_a_variable_is_fatal() {
        let prog = Program::new(vec![
            Op::function("y", "relu", vec!["x".into()]),
            Op::function("y", "relu", vec!["x".into()]),
        ]);
        let inputs = ShapeMap::from([("x".into(), shape(&[4]))]);
        let err = bind_program(&prog, &inputs, &ShapeMap::new()).unwrap_err();
        assert!(matches!(err, Error::DuplicateDefinition { .. }));
    }
}
