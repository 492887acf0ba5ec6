//! Hardware descriptions for the mosaic kernel planner.
//!
//! The planner never talks to a device; it only consults a
//! [`HardwareSettings`] record when picking vectorization widths and tile
//! sizes. Settings are constructed with a builder or taken from a named
//! preset. Nothing here performs I/O.

use bon::Builder;

/// Cost-model parameters for a data-parallel accelerator.
///
/// All sizes are in bytes unless noted otherwise. The defaults describe a
/// mid-range discrete GPU and are deliberately conservative: a tile that
/// fits these budgets fits almost anything.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct HardwareSettings {
    /// Preferred SIMD width in elements. The planner halves from here until
    /// vectorization succeeds or the width reaches 1.
    #[builder(default = 4)]
    pub vec_size: u64,

    /// Local/shared memory budget per work group.
    #[builder(default = 32 * 1024)]
    pub max_mem: u64,

    /// Register-file budget per work item.
    #[builder(default = 16 * 1024)]
    pub max_regs: u64,

    /// Sustained memory bandwidth, bytes per cycle.
    #[builder(default = 32)]
    pub mem_width: u64,

    /// Work-group count needed to occupy the device.
    #[builder(default = 16)]
    pub goal_groups: u64,

    /// Peak arithmetic intensity the device can absorb, flops per byte.
    #[builder(default = 50)]
    pub goal_flops_per_byte: u64,

    /// Work items per work group.
    #[builder(default = 256)]
    pub threads: u64,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HardwareSettings {
    /// Look up a named preset.
    ///
    /// Stands in for a settings loader: callers that know their target pass
    /// one of `"cpu"`, `"gpu"`, or `"embedded"` instead of filling in the
    /// builder by hand.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "cpu" => Some(
                Self::builder()
                    .vec_size(8)
                    .max_mem(256 * 1024)
                    .max_regs(2 * 1024)
                    .mem_width(16)
                    .goal_groups(8)
                    .goal_flops_per_byte(12)
                    .threads(1)
                    .build(),
            ),
            "gpu" => Some(Self::default()),
            "embedded" => Some(
                Self::builder()
                    .vec_size(2)
                    .max_mem(8 * 1024)
                    .max_regs(1024)
                    .mem_width(8)
                    .goal_groups(4)
                    .goal_flops_per_byte(8)
                    .threads(32)
                    .build(),
            ),
            _ => None,
        }
    }
}
