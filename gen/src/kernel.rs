//! Planned-kernel records and the result of a whole compile.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use mosaic_device::HardwareSettings;
use mosaic_ir::{FlatContraction, TensorShape};
use smallvec::SmallVec;

/// Variable renames accumulated over a compile.
///
/// A union-find without ranks or deletion: `insert` path-compresses by
/// resolving the target first, so chains built by stacked reshape elisions
/// stay one hop deep and `lookup` is amortized O(1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarRewrites {
    map: HashMap<String, String>,
}

impl VarRewrites {
    /// Resolve `name` to its final rewrite target.
    pub fn lookup<'a>(&'a self, name: &'a str) -> &'a str {
        let mut cur = name;
        while let Some(next) = self.map.get(cur) {
            cur = next;
        }
        cur
    }

    pub fn insert(&mut self, from: impl Into<String>, to: &str) {
        let target = self.lookup(to).to_owned();
        self.map.insert(from.into(), target);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// What a kernel computes.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelKind {
    /// A contraction (or pure-elementwise pseudo-contraction) with its
    /// fused post-ops; the flat form is the kernel body.
    Contraction(Box<FlatContraction>),
    /// Prelude kernel writing zeros over an output buffer.
    Zero { shape: TensorShape },
    /// Prelude kernel initializing an output buffer from another tensor.
    Copy { shape: TensorShape },
    /// A special function dispatched outside the contraction machinery.
    Special { function: String },
}

/// One planned device kernel with its performance estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelInfo {
    pub name: String,
    pub kind: KernelKind,
    /// Tensor parameters read, post-rewrite names, in parameter order.
    pub inputs: Vec<String>,
    /// Variables written.
    pub outputs: Vec<String>,
    /// Stable hash of the flat shape and access pattern; kernels sharing a
    /// key compile to the same device code up to buffer names.
    pub key: String,
    /// Chosen loop-blocking factors, one per kernel index.
    pub tile_size: SmallVec<[u64; 8]>,
    pub settings: HardwareSettings,
    /// Estimated global-memory traffic for the whole launch.
    pub tot_bytes: u64,
    /// Estimated arithmetic work for the whole launch.
    pub tot_flops: u64,
    /// Runner-up tile choices, best first.
    pub candidates: Vec<KernelInfo>,
    /// External reads guaranteed stable during execution; the runtime may
    /// overlap this kernel with a later writer of these buffers.
    pub war_safe_reads: BTreeSet<String>,
}

impl KernelInfo {
    pub fn new(name: impl Into<String>, kind: KernelKind, settings: HardwareSettings) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            key: String::new(),
            tile_size: SmallVec::new(),
            settings,
            tot_bytes: 0,
            tot_flops: 0,
            candidates: Vec::new(),
            war_safe_reads: BTreeSet::new(),
        }
    }
}

/// Everything a compile produces.
#[derive(Debug, Clone, Default)]
pub struct KernelList {
    /// Kernels in issue order.
    pub kernels: Vec<KernelInfo>,
    /// Renames later kernels and the runtime must apply when resolving
    /// variable names.
    pub var_rewrites: VarRewrites,
    /// Shapes of every variable some kernel reads or writes.
    pub types: BTreeMap<String, TensorShape>,
}
