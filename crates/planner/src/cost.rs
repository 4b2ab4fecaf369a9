//! Cost model constants and formulas shared by the plan builders.
//!
//! Costs are abstract units: one random row read costs about 1.0 and one
//! row comparison `1 / TIME_FOR_COMPARE`.

use std::f64::consts::{E, LN_2, PI};

use storage::{Cursor, IO_SIZE};

/// Row evaluations per unit of cost.
pub const TIME_FOR_COMPARE: f64 = 5.0;
/// Rowid comparisons per unit of cost.
pub const TIME_FOR_COMPARE_ROWID: f64 = TIME_FOR_COMPARE * 2.0;
pub const DISK_SEEK_BASE_COST: f64 = 0.9;
pub const BLOCKS_IN_AVG_SEEK: f64 = 128.0;
pub const DISK_SEEK_PROP_COST: f64 = 0.1 / BLOCKS_IN_AVG_SEEK;
/// Sorted runs merged in one pass.
pub const MERGEBUFF: usize = 7;
/// Run count above which intermediate merge passes are needed.
pub const MERGEBUFF2: usize = 15;
/// Per-element bookkeeping of the in-memory dedup tree, in bytes.
pub const TREE_ELEMENT_OVERHEAD: u64 = 24;

/// I/O and CPU components of an access cost.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostVector {
    pub io_count: f64,
    pub avg_io_cost: f64,
    pub cpu_cost: f64,
}

impl Default for CostVector {
    fn default() -> Self {
        Self {
            io_count: 0.0,
            avg_io_cost: 1.0,
            cpu_cost: 0.0,
        }
    }
}

impl CostVector {
    pub fn total_cost(&self) -> f64 {
        self.io_count * self.avg_io_cost + self.cpu_cost
    }
}

/// Cost of fetching `rows` rows in rowid order after an index pass.
///
/// A clustered primary key turns the fetch into a primary key read. For a
/// heap, rows land in `busy_blocks` distinct blocks; when the sweep runs
/// uninterrupted, seeks between those blocks get cheaper as they get denser.
pub fn sweep_read_cost(
    cursor: &dyn Cursor,
    clustered_pk: Option<usize>,
    rows: u64,
    interrupted: bool,
) -> CostVector {
    let mut cost = CostVector::default();
    if let Some(pk) = clustered_pk {
        cost.io_count = cursor.read_time(pk, rows, rows);
        return cost;
    }
    let n_blocks = (cursor.stats().data_file_length as f64 / IO_SIZE as f64).ceil();
    let busy_blocks = if n_blocks > 0.0 {
        n_blocks * (1.0 - (1.0 - 1.0 / n_blocks).powf(rows as f64))
    } else {
        0.0
    }
    .max(1.0);
    cost.io_count = busy_blocks;
    if !interrupted {
        cost.avg_io_cost = DISK_SEEK_BASE_COST + DISK_SEEK_PROP_COST * n_blocks / busy_blocks;
    }
    cost
}

/// `log2(n!)` by Stirling's approximation.
pub fn log2_n_fact(n: f64) -> f64 {
    if n < 1.0 {
        return 0.0;
    }
    ((2.0 * PI * n).ln() / 2.0 + n * (n / E).ln()) / LN_2
}

/// Elements the dedup tree holds before spilling a run.
pub fn max_elements_in_tree(max_in_memory_size: usize, key_size: u32) -> u64 {
    let per_element = (TREE_ELEMENT_OVERHEAD + u64::from(key_size) + 7) & !7;
    (max_in_memory_size as u64 / per_element).max(1)
}

/// Cost of one merge pass over `runs`, returning the merged length.
fn merge_buffers_cost(runs: &[u64], key_size: u32) -> (f64, u64) {
    let total: u64 = runs.iter().sum();
    let cost = 2.0 * (total as f64 * f64::from(key_size)) / IO_SIZE as f64
        + total as f64 * (runs.len() as f64).ln() / (TIME_FOR_COMPARE_ROWID * LN_2);
    (cost, total)
}

/// Cost of merging sorted runs down to one, pass by pass.
fn merge_many_buffs_cost(mut runs: Vec<u64>, key_size: u32) -> f64 {
    let mut total = 0.0;
    while runs.len() > MERGEBUFF2 {
        let mut merged = Vec::with_capacity(runs.len() / MERGEBUFF + 1);
        let mut start = 0;
        while runs.len() - start > MERGEBUFF * 3 / 2 {
            let (cost, len) = merge_buffers_cost(&runs[start..start + MERGEBUFF], key_size);
            total += cost;
            merged.push(len);
            start += MERGEBUFF;
        }
        let (cost, len) = merge_buffers_cost(&runs[start..], key_size);
        total += cost;
        merged.push(len);
        runs = merged;
    }
    total + merge_buffers_cost(&runs, key_size).0
}

/// Cost of deduplicating `nkeys` keys of `key_size` bytes with a memory
/// budget of `max_in_memory_size` bytes.
pub fn unique_use_cost(nkeys: u64, key_size: u32, max_in_memory_size: usize) -> f64 {
    let per_tree = max_elements_in_tree(max_in_memory_size, key_size);
    let n_full_trees = nkeys / per_tree;
    let last_tree_elems = nkeys % per_tree;

    let mut result = 2.0 * log2_n_fact(last_tree_elems as f64 + 1.0);
    if n_full_trees > 0 {
        result += n_full_trees as f64 * log2_n_fact(per_tree as f64 + 1.0);
    }
    result /= TIME_FOR_COMPARE_ROWID;
    if n_full_trees == 0 {
        return result;
    }

    // Writing the runs out.
    let key_size_f = f64::from(key_size);
    result += DISK_SEEK_BASE_COST
        * n_full_trees as f64
        * (key_size_f * per_tree as f64 / IO_SIZE as f64).ceil();
    result += DISK_SEEK_BASE_COST * (key_size_f * last_tree_elems as f64 / IO_SIZE as f64).ceil();

    let mut runs = vec![per_tree; n_full_trees as usize];
    runs.push(last_tree_elems);
    result += merge_many_buffs_cost(runs, key_size);

    // Reading the merged sequence back.
    result + (key_size_f * nkeys as f64 / IO_SIZE as f64).ceil()
}
