//! Tuning knobs for grouped aggregation.

use serde::Deserialize;

use crate::error::{Result, UmbralError};

/// Options shared by local tables, partitions and the final scan.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AggregateOptions {
    /// Initial directory size of a new hash table.
    pub initial_slots: usize,
    /// Minimum ratio of slots to entries; the directory doubles before it is crossed.
    pub load_factor: f64,
    /// Number of global partitions. Must be a power of two.
    pub num_partitions: usize,
    /// Right shift applied to a key hash before picking its partition.
    pub shift_for_partitioning: u32,
    /// Groups a worker's local table may hold before it is flushed to the partitions.
    pub local_flush_threshold: usize,
    /// Rows per tuple block in a partition queue.
    pub tuple_block_capacity: usize,
    /// Rows handed out per `get_next_range_to_read` call.
    pub scan_morsel_size: usize,
    /// Optional per-table memory budget in bytes.
    pub memory_limit_bytes: Option<usize>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateOptions {
    /// Defaults suitable for moderate group counts.
    pub fn new() -> Self {
        Self {
            initial_slots: 256,
            load_factor: 1.5,
            num_partitions: 4,
            shift_for_partitioning: 48,
            local_flush_threshold: 16_384,
            tuple_block_capacity: 2_048,
            scan_morsel_size: 2_048,
            memory_limit_bytes: None,
        }
    }

    /// Sets the initial directory size.
    pub fn initial_slots(mut self, slots: usize) -> Self {
        self.initial_slots = slots;
        self
    }

    /// Sets the slots-to-entries ratio.
    pub fn load_factor(mut self, load_factor: f64) -> Self {
        self.load_factor = load_factor;
        self
    }

    /// Sets the number of partitions.
    pub fn num_partitions(mut self, partitions: usize) -> Self {
        self.num_partitions = partitions;
        self
    }

    /// Sets the partitioning shift.
    pub fn shift_for_partitioning(mut self, shift: u32) -> Self {
        self.shift_for_partitioning = shift;
        self
    }

    /// Sets the local flush threshold.
    pub fn local_flush_threshold(mut self, groups: usize) -> Self {
        self.local_flush_threshold = groups;
        self
    }

    /// Sets the tuple block capacity.
    pub fn tuple_block_capacity(mut self, rows: usize) -> Self {
        self.tuple_block_capacity = rows;
        self
    }

    /// Sets the scan morsel size.
    pub fn scan_morsel_size(mut self, rows: usize) -> Self {
        self.scan_morsel_size = rows;
        self
    }

    /// Sets or clears the memory budget.
    pub fn memory_limit_bytes(mut self, limit: Option<usize>) -> Self {
        self.memory_limit_bytes = limit;
        self
    }

    /// Checks that every option is usable.
    pub fn validate(&self) -> Result<()> {
        if self.initial_slots == 0 {
            return Err(UmbralError::Config("initial_slots must be positive".into()));
        }
        if !(self.load_factor > 1.0 && self.load_factor.is_finite()) {
            return Err(UmbralError::Config(format!(
                "load_factor must be a finite value above 1.0, got {}",
                self.load_factor
            )));
        }
        if !self.num_partitions.is_power_of_two() {
            return Err(UmbralError::Config(format!(
                "num_partitions must be a power of two, got {}",
                self.num_partitions
            )));
        }
        if self.shift_for_partitioning >= u64::BITS {
            return Err(UmbralError::Config(format!(
                "shift_for_partitioning must be below 64, got {}",
                self.shift_for_partitioning
            )));
        }
        for (name, value) in [
            ("local_flush_threshold", self.local_flush_threshold),
            ("tuple_block_capacity", self.tuple_block_capacity),
            ("scan_morsel_size", self.scan_morsel_size),
        ] {
            if value == 0 {
                return Err(UmbralError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}
