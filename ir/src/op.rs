//! The program model: an ordered list of ops over named variables.
//!
//! Every op defines exactly one output variable and is either a
//! [`Contraction`], an elementwise/special [`Function`], or a scalar
//! [`Constant`]. The planner treats the list as immutable except for the
//! narrow PRNG rewrite in the driver.

use crate::poly::Polynomial;

/// Reduction applied across the non-output indices of a contraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AggregateOp {
    #[default]
    Sum,
    Prod,
    Max,
    Min,
}

/// Per-element combination of a contraction's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CombineOp {
    #[default]
    Mul,
    Add,
    Eq,
    Cond,
}

/// One tensor operand of a contraction: the variable it names and one
/// access polynomial per tensor dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub id: String,
    pub index: Vec<Polynomial>,
}

impl TensorSpec {
    pub fn new(id: impl Into<String>, index: Vec<Polynomial>) -> Self {
        Self { id: id.into(), index }
    }
}

/// A user-written bound on the contraction's index space: `poly < bound`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicConstraint {
    pub poly: Polynomial,
    pub bound: u64,
}

/// A general tensor reduction over an affine index space.
///
/// `specs[0]` is the output operand; the remaining specs are inputs.
/// `output_sizes` declares the extent of each output dimension (the source
/// language writes these explicitly, so binding never has to infer them).
/// `use_default` names a tensor the output is initialized from when the
/// contraction does not cover its full output space. `constraints` are
/// extra user-written bounds on top of the ones lowering derives.
#[derive(Debug, Clone, PartialEq)]
pub struct Contraction {
    pub agg_op: AggregateOp,
    pub comb_op: CombineOp,
    pub specs: Vec<TensorSpec>,
    pub output_sizes: Vec<u64>,
    pub use_default: Option<String>,
    pub constraints: Vec<SymbolicConstraint>,
}

/// Function names the planner must never fuse.
const SPECIAL_FUNCTIONS: &[&str] = &["prng_step", "prng_state", "prng_value", "gather", "scatter", "shape"];

/// An elementwise or special function application.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Extra non-variable parameters. The driver appends the state/value
    /// output names of a PRNG triplet here before dispatch.
    pub params: Vec<String>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: Vec::new() }
    }

    /// Special functions bypass unification and go to the special-op
    /// handler.
    pub fn is_special(&self) -> bool {
        SPECIAL_FUNCTIONS.contains(&self.name.as_str())
    }
}

/// A scalar literal definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
}

/// The body of an op.
#[derive(Debug, Clone, PartialEq)]
pub enum OpBody {
    Contraction(Contraction),
    Function(Function),
    Constant(Constant),
}

/// One program operation: a unique output variable, input variables, and a
/// body.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub output: String,
    pub inputs: Vec<String>,
    pub body: OpBody,
}

impl Op {
    pub fn contraction(output: impl Into<String>, c: Contraction) -> Self {
        let inputs = c.specs.iter().skip(1).map(|s| s.id.clone()).collect();
        Self { output: output.into(), inputs, body: OpBody::Contraction(c) }
    }

    pub fn function(output: impl Into<String>, name: impl Into<String>, inputs: Vec<String>) -> Self {
        Self { output: output.into(), inputs, body: OpBody::Function(Function::new(name)) }
    }

    pub fn constant(output: impl Into<String>, value: Constant) -> Self {
        Self { output: output.into(), inputs: Vec::new(), body: OpBody::Constant(value) }
    }

    pub fn function_body(&self) -> Option<&Function> {
        match &self.body {
            OpBody::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn contraction_body(&self) -> Option<&Contraction> {
        match &self.body {
            OpBody::Contraction(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.body, OpBody::Constant(_))
    }
}

/// An ordered sequence of ops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub ops: Vec<Op>,
}

impl Program {
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }
}
