use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// An op consumed a variable that nothing defines.
    #[snafu(display("variable {name} is referenced before any definition"))]
    UnboundVariable { name: String },

    /// Two ops claim the same output variable.
    #[snafu(display("variable {name} is defined more than once"))]
    DuplicateDefinition { name: String },

    /// A variable was expected to be a tensor.
    #[snafu(display("variable {name} is not bound to a tensor"))]
    NotATensor { name: String },

    /// Elementwise inputs whose trailing dimensions neither match nor
    /// broadcast.
    #[snafu(display("inputs of {output} do not broadcast: {lhs:?} vs {rhs:?}"))]
    BroadcastMismatch { output: String, lhs: Vec<u64>, rhs: Vec<u64> },

    /// Reshape applied to a non-tensor input.
    #[snafu(display("reshape input {input} is not a tensor"))]
    ReshapeNonTensor { input: String },

    /// Reshape without integer target dimensions.
    #[snafu(display("reshape {output} needs integer dimension arguments"))]
    MissingReshapeDims { output: String },

    /// `prng_state`/`prng_value` whose input is not a `prng_step` tuple.
    #[snafu(display("{function} for {output} does not consume a prng_step tuple"))]
    PrngWithoutStep { function: String, output: String },

    /// A special function applied to inputs of unusable rank.
    #[snafu(display("{function} for {output} has inputs of incompatible rank"))]
    SpecialRankMismatch { function: String, output: String },

    /// A tensor spec with a different dimension count than its shape.
    #[snafu(display("spec for {id} has {spec_dims} index polynomials but the tensor has {shape_dims} dimensions"))]
    SpecArityMismatch { id: String, spec_dims: usize, shape_dims: usize },

    /// A contraction index that no dimension binds with a unit coefficient.
    #[snafu(display("cannot derive an iteration range for index {index}"))]
    UnresolvedIndexRange { index: String },

    /// A contraction whose declared output sizes disagree with its output
    /// spec.
    #[snafu(display("contraction {output} declares {declared} output sizes for {spec_dims} output indices"))]
    OutputSizeMismatch { output: String, declared: usize, spec_dims: usize },

    /// A program output that the bound program never produces as a tensor
    /// of the declared element count.
    #[snafu(display("program output {name} is bound to {bound} elements but declared with {declared}"))]
    OutputElemMismatch { name: String, bound: u64, declared: u64 },
}
