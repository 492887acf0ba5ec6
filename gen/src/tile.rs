//! Tile-size selection by cost-model search.
//!
//! The search is a greedy hill climb: start from the all-ones tile and
//! repeatedly double the one axis whose doubling scores best, while the
//! tile still fits the device's local-memory and register budgets. Every
//! configuration visited along the way becomes a candidate, so the driver
//! can keep runners-up as alternate tiles.

use mosaic_device::HardwareSettings;
use mosaic_ir::{FlatContraction, FlatTensorAccess};
use smallvec::{SmallVec, smallvec};
use tracing::debug;

/// Per-tile launch estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfStats {
    /// Output tiles, i.e. launched work groups.
    pub work_groups: u64,
    /// Reduction trips each work group makes.
    pub inner_loops: u64,
    /// Bytes read per work group per inner loop.
    pub mem_read: u64,
    /// Bytes written per work group.
    pub mem_write: u64,
    /// Arithmetic work for the whole launch.
    pub true_ops: u64,
}

/// One scored tile choice.
#[derive(Debug, Clone, PartialEq)]
pub struct TileCandidate {
    pub score: f64,
    pub tile: SmallVec<[u64; 8]>,
}

/// Launch estimates for `flat` blocked by `tile`.
///
/// Indices with a nonzero output stride parallelize across work groups;
/// the rest become each group's inner reduction loops. An access's tile
/// footprint only counts the indices it actually strides over — a
/// broadcast dimension costs nothing.
pub fn compute_tile_stats(flat: &FlatContraction, tile: &[u64]) -> PerfStats {
    debug_assert_eq!(tile.len(), flat.ranges.len());
    let out = &flat.access[0];

    let mut work_groups = 1u64;
    let mut inner_loops = 1u64;
    for i in 0..flat.ranges.len() {
        let trips = flat.ranges[i].div_ceil(tile[i].max(1));
        if out.strides[i] != 0 {
            work_groups *= trips;
        } else {
            inner_loops *= trips;
        }
    }

    let footprint = |access: &FlatTensorAccess| -> u64 {
        let elems: u64 =
            (0..tile.len()).map(|i| if access.strides[i] != 0 { tile[i].max(1) } else { 1 }).product();
        elems * access.elem_type.byte_size()
    };
    let mem_read = flat.access[1..].iter().chain(flat.post_op_inputs.values()).map(footprint).sum();
    let mem_write = footprint(out);

    let combines = if flat.generate_contraction { flat.access.len().saturating_sub(1) } else { 0 };
    let ops_per_elem = (combines + flat.post_ops.len()).max(1) as u64;
    let space: u64 = flat.ranges.iter().product();

    PerfStats { work_groups, inner_loops, mem_read, mem_write, true_ops: ops_per_elem * space }
}

/// Roofline throughput estimate, discounted for under-occupancy. Higher is
/// better.
fn score(settings: &HardwareSettings, stats: &PerfStats) -> f64 {
    let total_bytes =
        stats.work_groups as f64 * (stats.inner_loops as f64 * stats.mem_read as f64 + stats.mem_write as f64);
    let mem_cycles = total_bytes / settings.mem_width.max(1) as f64;
    let peak_flops_per_cycle = (settings.mem_width * settings.goal_flops_per_byte).max(1) as f64;
    let compute_cycles = stats.true_ops as f64 / peak_flops_per_cycle;
    let occupancy = (stats.work_groups as f64 / settings.goal_groups.max(1) as f64).min(1.0);
    occupancy * stats.true_ops as f64 / mem_cycles.max(compute_cycles).max(1.0)
}

/// Whether a tile fits the device's local-memory and register budgets.
fn fits(settings: &HardwareSettings, flat: &FlatContraction, tile: &[u64]) -> bool {
    let stats = compute_tile_stats(flat, tile);
    if stats.mem_read + stats.mem_write > settings.max_mem {
        return false;
    }
    let out = &flat.access[0];
    let out_elems: u64 = (0..tile.len()).map(|i| if out.strides[i] != 0 { tile[i] } else { 1 }).product();
    let per_thread = out_elems.div_ceil(settings.threads.max(1));
    per_thread * out.elem_type.byte_size() <= settings.max_regs
}

/// Search tile sizes for `flat`, best first. Always returns at least the
/// all-ones tile. With `only_one`, the climb still runs but only the best
/// configuration is returned.
pub fn tile_optimize(settings: &HardwareSettings, flat: &FlatContraction, only_one: bool) -> Vec<TileCandidate> {
    let n = flat.ranges.len();
    let mut current: SmallVec<[u64; 8]> = smallvec![1; n];
    let mut visited = vec![TileCandidate {
        score: score(settings, &compute_tile_stats(flat, &current)),
        tile: current.clone(),
    }];

    loop {
        let mut best: Option<(usize, f64)> = None;
        for axis in 0..n {
            let doubled = current[axis] * 2;
            if doubled > flat.ranges[axis].next_power_of_two() {
                continue;
            }
            let mut tile = current.clone();
            tile[axis] = doubled;
            if !fits(settings, flat, &tile) {
                continue;
            }
            let s = score(settings, &compute_tile_stats(flat, &tile));
            if best.is_none_or(|(_, b)| s > b) {
                best = Some((axis, s));
            }
        }
        let Some((axis, s)) = best else { break };
        current[axis] *= 2;
        visited.push(TileCandidate { score: s, tile: current.clone() });
    }

    visited.sort_by(|a, b| b.score.total_cmp(&a.score));
    if only_one {
        visited.truncate(1);
    }
    debug!(candidates = visited.len(), best = ?visited[0].tile, "tile search finished");
    visited
}
