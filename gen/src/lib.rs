//! Kernel-generation planner for the mosaic tensor compiler.
//!
//! [`generate_program`] consumes a program of contractions and elementwise
//! functions over named, shaped tensors and plans a list of device
//! kernels:
//!
//! - each contraction lowers to a flat loop nest and fuses its downstream
//!   elementwise consumers as post-ops ([`unify`]);
//! - redundant index dimensions fold away ([`simplify`]);
//! - outputs that are not fully covered get a zero/copy prelude kernel
//!   ([`cover`]);
//! - a SIMD width and tile size are chosen by cost-model search
//!   ([`vectorize`], [`tile`]);
//! - special functions (PRNG triplets, gather/scatter) dispatch to kernels
//!   of their own ([`special`]).
//!
//! The planner is single-threaded and synchronous; a [`KernelList`] is the
//! whole result, and every failure is fatal (no partial lists).

pub mod cover;
pub mod emit;
pub mod error;
pub mod generate;
pub mod kernel;
pub mod simplify;
pub mod special;
pub mod tile;
pub mod unify;
pub mod vectorize;

#[cfg(test)]
mod test;

pub use error::{Error, Result};
pub use generate::generate_program;
pub use kernel::{KernelInfo, KernelKind, KernelList, VarRewrites};
pub use tile::{PerfStats, TileCandidate, compute_tile_stats, tile_optimize};
