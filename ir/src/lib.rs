//! Program model and flat-contraction IR for the mosaic kernel planner.
//!
//! A program is an ordered list of ops — contractions, elementwise or
//! special functions, and scalar constants — over named variables. This
//! crate resolves variables to shapes ([`bind_program`]), lowers
//! contractions to their loop-nest form ([`lower_contraction`]), and
//! indexes definitions and uses ([`UseDef`]). The planner in `mosaic-gen`
//! consumes all of it.

pub mod binding;
pub mod error;
pub mod flat;
pub mod lower;
pub mod op;
pub mod poly;
pub mod shape;
pub mod usedef;

pub use binding::{Binding, Bindings, ShapeMap, bind_program};
pub use error::{Error, Result};
pub use flat::{FlatConstraint, FlatContraction, FlatTensorAccess};
pub use lower::lower_contraction;
pub use op::{
    AggregateOp, CombineOp, Constant, Contraction, Function, Op, OpBody, Program, SymbolicConstraint,
    TensorSpec,
};
pub use poly::{Polynomial, Rational};
pub use shape::{ElemType, TensorDimension, TensorShape};
pub use usedef::UseDef;
