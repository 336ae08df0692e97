//! Count-min sketch
//!
//! Fixed-memory frequency sketch over a stream of `u64` item labels. Counters
//! only ever increase and hash collisions only add mass, so the point
//! estimate for any item is an upper bound on its true count. An exact count
//! map is kept alongside the counters for ground-truth evaluation and audit;
//! production estimates never consult it.
use crate::errors::ConformalError;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Count-min sketch with `depth` hash rows of `width` buckets each.
///
/// Cloning produces an independent deep snapshot; the orchestrator relies on
/// this to freeze a warm-up sketch while the live sketch keeps evolving, and
/// to hand scoring strategies an immutable copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CountMinSketch {
    depth: usize,
    width: usize,
    /// Row-major counter matrix, `depth * width` entries.
    table: Vec<u64>,
    /// One hash seed per row, derived from the master seed.
    seeds: Vec<u64>,
    /// Exact per-item counts, for evaluation only.
    exact: HashMap<u64, u64>,
    total_count: u64,
}

impl CountMinSketch {
    /// Create a sketch with `depth` hash rows and `width` buckets per row.
    ///
    /// * `depth` - Number of independent hash rows.
    /// * `width` - Buckets per row; larger widths lower the collision rate.
    /// * `seed` - Master seed for the per-row hash families.
    pub fn new(depth: usize, width: usize, seed: u64) -> Self {
        assert!(depth > 0, "depth must be positive");
        assert!(width > 0, "width must be positive");
        let seeds: Vec<u64> = (0..depth)
            .map(|row| {
                seed.wrapping_add((row as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
            })
            .collect();
        CountMinSketch {
            depth,
            width,
            table: vec![0; depth * width],
            seeds,
            exact: HashMap::new(),
            total_count: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Total number of updates the sketch has absorbed.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Bucket index selected for `item` in each hash row. Pure function of
    /// `(item, row)` given the sketch's seed.
    pub fn apply_hash(&self, item: u64) -> Vec<usize> {
        self.seeds
            .iter()
            .map(|&s| (xxh3_64_with_seed(&item.to_le_bytes(), s) as usize) % self.width)
            .collect()
    }

    /// Ingest one occurrence of `item`.
    pub fn update(&mut self, item: u64) {
        for (row, col) in self.apply_hash(item).into_iter().enumerate() {
            self.table[row * self.width + col] += 1;
        }
        *self.exact.entry(item).or_insert(0) += 1;
        self.total_count += 1;
    }

    /// Ingest one occurrence of `item` with the conservative update rule:
    /// only raise buckets that sit below the new minimum estimate. This keeps
    /// the upward-bias guarantee while reducing over-counting.
    pub fn update_conservative(&mut self, item: u64) {
        let cols = self.apply_hash(item);
        let new_val = cols
            .iter()
            .enumerate()
            .map(|(row, &col)| self.table[row * self.width + col])
            .min()
            .unwrap_or(0)
            + 1;
        for (row, col) in cols.into_iter().enumerate() {
            let cell = &mut self.table[row * self.width + col];
            if *cell < new_val {
                *cell = new_val;
            }
        }
        *self.exact.entry(item).or_insert(0) += 1;
        self.total_count += 1;
    }

    /// Biased-high point estimate of the count of `item`: the minimum of the
    /// item's bucket values across rows. Always at least the true count.
    pub fn estimate_count(&self, item: u64) -> u64 {
        self.apply_hash(item)
            .into_iter()
            .enumerate()
            .map(|(row, col)| self.table[row * self.width + col])
            .min()
            .unwrap_or(0)
    }

    /// True count of `item`, from the audit map.
    pub fn exact_count(&self, item: u64) -> u64 {
        self.exact.get(&item).copied().unwrap_or(0)
    }

    /// Counter value at `(row, col)`.
    pub fn row_value(&self, row: usize, col: usize) -> u64 {
        self.table[row * self.width + col]
    }

    /// Merge `other` into `self` by element-wise counter addition and
    /// additive union of the exact count maps. Both sketches must share
    /// dimensions and hash seeds, otherwise bucket assignments disagree.
    pub fn merge(&mut self, other: &CountMinSketch) -> Result<(), ConformalError> {
        if self.depth != other.depth || self.width != other.width || self.seeds != other.seeds {
            return Err(ConformalError::IncompatibleSketch {
                expected: format!("{}x{} (seed {:#x})", self.depth, self.width, self.seeds[0]),
                found: format!("{}x{} (seed {:#x})", other.depth, other.width, other.seeds[0]),
            });
        }
        for (cell, v) in self.table.iter_mut().zip(other.table.iter()) {
            *cell += v;
        }
        for (item, count) in other.exact.iter() {
            *self.exact.entry(*item).or_insert(0) += count;
        }
        self.total_count += other.total_count;
        Ok(())
    }
}
