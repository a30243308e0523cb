//! Partitioners: split a step's input into named execution contexts.

use std::collections::BTreeMap;

use crate::core::ExecutionContext;

/// Context key of a range partition's lower bound (inclusive).
pub const RANGE_MIN_KEY: &str = "min";
/// Context key of a range partition's upper bound (inclusive).
pub const RANGE_MAX_KEY: &str = "max";

/// Produces one execution context per partition.
///
/// Must be deterministic for a given grid size: a restart calls it again and
/// matches partitions by name.
pub trait Partitioner: Send + Sync {
    /// Returns up to `grid_size` named contexts.
    fn partition(&self, grid_size: usize) -> BTreeMap<String, ExecutionContext>;
}

fn partition_name(index: usize) -> String {
    format!("partition{index}")
}

/// Creates `grid_size` empty partitions named `partition0..`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplePartitioner;

impl Partitioner for SimplePartitioner {
    fn partition(&self, grid_size: usize) -> BTreeMap<String, ExecutionContext> {
        (0..grid_size)
            .map(|i| (partition_name(i), ExecutionContext::new()))
            .collect()
    }
}

/// Splits an inclusive integer range into contiguous sub-ranges stored under
/// [`RANGE_MIN_KEY`] and [`RANGE_MAX_KEY`].
#[derive(Debug, Clone, Copy)]
pub struct RangePartitioner {
    min: i64,
    max: i64,
}

impl RangePartitioner {
    /// Covers `min..=max`.
    #[must_use]
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }
}

impl Partitioner for RangePartitioner {
    fn partition(&self, grid_size: usize) -> BTreeMap<String, ExecutionContext> {
        let mut partitions = BTreeMap::new();
        if grid_size == 0 || self.max < self.min {
            return partitions;
        }
        let total = i128::from(self.max) - i128::from(self.min) + 1;
        let grid = i128::try_from(grid_size).unwrap_or(i128::MAX);
        let size = (total + grid - 1) / grid;

        let mut start = i128::from(self.min);
        let mut index = 0;
        while start <= i128::from(self.max) {
            let end = (start + size - 1).min(i128::from(self.max));
            // start and end lie within min..=max, so they fit in i64
            let (lo, hi) = (
                i64::try_from(start).unwrap_or(self.max),
                i64::try_from(end).unwrap_or(self.max),
            );
            partitions.insert(
                partition_name(index),
                ExecutionContext::new().with(RANGE_MIN_KEY, lo).with(RANGE_MAX_KEY, hi),
            );
            start = end + 1;
            index += 1;
        }
        partitions
    }
}
