use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Planner failures. All are fatal: the compile aborts and no partial
/// kernel list is returned.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A contraction spec references an id with no tensor binding.
    #[snafu(display("no tensor shape bound for id {id}"))]
    ShapeLookupMissing { id: String },

    /// Contractions take one to three inputs (two to four tensor specs).
    #[snafu(display("contraction has {arity} tensor specs; only 2 to 4 are supported"))]
    UnsupportedContractionArity { arity: usize },

    /// Reshape/ident that changes byte or element count.
    #[snafu(display("invalid reshape of {input} into {output}: byte or element count changes"))]
    InvalidReshape { input: String, output: String },

    /// Reshape with no input operand at all.
    #[snafu(display("reshape {output} is missing its input operand"))]
    ReshapeMissingOperand { output: String },

    /// Reshape applied to a non-tensor input.
    #[snafu(display("reshape input {input} is not a tensor"))]
    ReshapeNonTensor { input: String },

    /// `prng_state`/`prng_value` reached the driver without a preceding
    /// `prng_step` claiming them.
    #[snafu(display("{function} for {output} has no preceding prng_step; prng functions come in threes"))]
    PrngWithoutStep { function: String, output: String },

    /// A `prng_step` whose value is consumed but whose state is not.
    #[snafu(display("prng_step {output} has a value consumer but no state consumer"))]
    PrngStepMissingState { output: String },

    /// Binding or lowering failure, forwarded from the IR layer.
    #[snafu(context(false), display("{source}"))]
    Ir { source: mosaic_ir::Error },
}
