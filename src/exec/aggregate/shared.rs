//! Partitioned aggregation state shared by all workers of one query.
//!
//! Workers aggregate into private [`HashAggregateLocalState`]s and move full
//! groups into one of `num_partitions` partitions chosen by
//! `(hash >> shift_for_partitioning) % num_partitions`, so every group lands in
//! the same partition whichever worker produced it. Each partition is then
//! finalized exactly once by whichever thread wins its lock.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, UmbralError};
use crate::exec::aggregate::function::AggregateFunction;
use crate::exec::aggregate::hash_table::{AggregateHashTable, AggregateInput, OwnedEntry};
use crate::exec::aggregate::options::AggregateOptions;
use crate::exec::aggregate::tuple_block::TupleBlockQueue;
use crate::exec::aggregate::vector::{DataChunkState, ValueVector};
use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::query::value::Value;

struct PartitionInner {
    table: AggregateHashTable,
    finalized: bool,
}

struct Partition {
    queue: TupleBlockQueue,
    inner: Mutex<PartitionInner>,
    // Lock-free hint; the flag under `inner` is authoritative.
    finalized: AtomicBool,
}

/// Shared state of one parallel hash aggregation.
pub struct HashAggregateSharedState {
    partitions: Vec<Partition>,
    functions: Vec<Arc<dyn AggregateFunction>>,
    num_keys: usize,
    num_dependent: usize,
    options: AggregateOptions,
    scan_cursor: Mutex<usize>,
}

impl HashAggregateSharedState {
    /// Creates the partitions for a table layout.
    pub fn new(
        num_keys: usize,
        num_dependent: usize,
        functions: Vec<Arc<dyn AggregateFunction>>,
        options: AggregateOptions,
    ) -> Result<Self> {
        options.validate()?;
        let partitions = (0..options.num_partitions)
            .map(|_| {
                let table =
                    AggregateHashTable::new(num_keys, num_dependent, functions.clone(), &options)?;
                Ok(Partition {
                    queue: TupleBlockQueue::new(options.tuple_block_capacity),
                    inner: Mutex::new(PartitionInner {
                        table,
                        finalized: false,
                    }),
                    finalized: AtomicBool::new(false),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            partitions = options.num_partitions,
            shift = options.shift_for_partitioning,
            "aggregate.shared.init"
        );
        Ok(Self {
            partitions,
            functions,
            num_keys,
            num_dependent,
            options,
            scan_cursor: Mutex::new(0),
        })
    }

    /// Options the state was built with.
    pub fn options(&self) -> &AggregateOptions {
        &self.options
    }

    /// Aggregate functions in column order.
    pub fn functions(&self) -> &[Arc<dyn AggregateFunction>] {
        &self.functions
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Number of output columns: keys, dependent keys, then aggregates.
    pub fn num_columns(&self) -> usize {
        self.num_keys + self.num_dependent + self.functions.len()
    }

    /// Partition receiving groups with key hash `hash`.
    pub fn partition_index(&self, hash: u64) -> usize {
        ((hash >> self.options.shift_for_partitioning) % self.partitions.len() as u64) as usize
    }

    /// Queues one group for its partition.
    pub fn append_entry(&self, entry: OwnedEntry) -> Result<()> {
        let partition = &self.partitions[self.partition_index(entry.hash)];
        if partition.finalized.load(Ordering::Acquire) {
            return Err(UmbralError::Invalid("append to a finalized partition"));
        }
        partition.queue.push(entry);
        Ok(())
    }

    /// Queues a batch of groups.
    pub fn append_entries(&self, entries: Vec<OwnedEntry>) -> Result<()> {
        entries.into_iter().try_for_each(|entry| self.append_entry(entry))
    }

    /// Finalizes every partition no other thread has claimed and returns how
    /// many this caller finalized.
    ///
    /// A partition whose lock is held elsewhere is skipped, not waited for.
    /// Call this from every worker once all producers have finished.
    pub fn finalize_partitions(&self) -> Result<usize> {
        let mut finalized = 0;
        for (idx, partition) in self.partitions.iter().enumerate() {
            if partition.finalized.load(Ordering::Acquire) {
                continue;
            }
            let Some(mut inner) = partition.inner.try_lock() else {
                continue;
            };
            // Another thread may have finished between the hint and the lock.
            if inner.finalized {
                continue;
            }
            let start = profile_timer();
            let entries = partition.queue.drain()?;
            let queued = entries.len();
            inner.table.merge_entries(entries)?;
            debug_assert!(!partition.finalized.load(Ordering::Acquire));
            inner.finalized = true;
            partition.finalized.store(true, Ordering::Release);
            record_profile_timer(ProfileKind::PartitionFinalize, start);
            debug!(
                partition = idx,
                queued,
                groups = inner.table.num_entries(),
                "aggregate.shared.partition_finalized"
            );
            finalized += 1;
        }
        Ok(finalized)
    }

    /// `true` once every partition has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.partitions
            .iter()
            .all(|partition| partition.finalized.load(Ordering::Acquire))
    }

    /// Groups per partition, in partition order.
    pub fn partition_sizes(&self) -> Vec<usize> {
        self.partitions
            .iter()
            .map(|partition| partition.inner.lock().table.num_entries())
            .collect()
    }

    /// Total number of finalized groups.
    pub fn num_rows(&self) -> usize {
        self.partition_sizes().iter().sum()
    }

    /// Next morsel `[start, end)` of the global row space, or `None` when
    /// the scan is exhausted.
    pub fn get_next_range_to_read(&self) -> Option<Range<usize>> {
        let total = self.num_rows();
        let mut cursor = self.scan_cursor.lock();
        if *cursor >= total {
            return None;
        }
        let start = *cursor;
        let end = (start + self.options.scan_morsel_size).min(total);
        *cursor = end;
        Some(start..end)
    }

    /// Output rows `[start, start + count)` in partition order, then row
    /// order within each partition. Rows are
    /// `[keys.., dependent keys.., aggregates..]`.
    pub fn scan_rows(&self, start: usize, count: usize) -> Result<Vec<Vec<Value>>> {
        if !self.is_finalized() {
            return Err(UmbralError::Invalid("scan before every partition is finalized"));
        }
        let mut rows = Vec::new();
        let end = start.saturating_add(count);
        let mut offset = 0;
        for partition in &self.partitions {
            if rows.len() == count {
                break;
            }
            let inner = partition.inner.lock();
            let size = inner.table.num_entries();
            let from = start.max(offset);
            let to = end.min(offset + size);
            for global in from..to {
                rows.push(inner.table.scan_row(global - offset));
            }
            offset += size;
        }
        Ok(rows)
    }

    /// Materializes `column_indices` of rows `[start, start + count)` into
    /// vectors sharing one unflat chunk state.
    pub fn scan(
        &self,
        start: usize,
        count: usize,
        column_indices: &[usize],
    ) -> Result<Vec<ValueVector>> {
        if let Some(&bad) = column_indices.iter().find(|&&col| col >= self.num_columns()) {
            return Err(UmbralError::InvalidArgument(format!(
                "column {bad} out of range for {} output columns",
                self.num_columns()
            )));
        }
        let rows = self.scan_rows(start, count)?;
        let state = Arc::new(DataChunkState::unflat(rows.len()));
        let mut columns: Vec<Vec<Value>> = column_indices
            .iter()
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        for row in rows {
            for (column, &idx) in columns.iter_mut().zip(column_indices) {
                column.push(row[idx].clone());
            }
        }
        Ok(columns
            .into_iter()
            .map(|values| ValueVector::new(values, Arc::clone(&state)))
            .collect())
    }
}

/// Per-worker aggregation state feeding a [`HashAggregateSharedState`].
pub struct HashAggregateLocalState {
    table: AggregateHashTable,
    shared: Arc<HashAggregateSharedState>,
    flushed: usize,
}

impl HashAggregateLocalState {
    /// Creates a private table with the shared state's layout.
    pub fn new(shared: Arc<HashAggregateSharedState>) -> Result<Self> {
        let table = AggregateHashTable::new(
            shared.num_keys,
            shared.num_dependent,
            shared.functions.clone(),
            &shared.options,
        )?;
        Ok(Self {
            table,
            shared,
            flushed: 0,
        })
    }

    /// The private table.
    pub fn table(&self) -> &AggregateHashTable {
        &self.table
    }

    /// Groups handed to the shared state so far.
    pub fn num_flushed(&self) -> usize {
        self.flushed
    }

    /// Aggregates one chunk locally and flushes once the table reaches
    /// `local_flush_threshold` groups. See [`AggregateHashTable::append`].
    pub fn append(
        &mut self,
        flat_keys: &[&ValueVector],
        unflat_keys: &[&ValueVector],
        dependent: &[&ValueVector],
        leading: &DataChunkState,
        inputs: &[AggregateInput<'_>],
        multiplicity: u64,
    ) -> Result<usize> {
        let created = self
            .table
            .append(flat_keys, unflat_keys, dependent, leading, inputs, multiplicity)?;
        if self.table.num_entries() >= self.shared.options.local_flush_threshold {
            self.flush()?;
        }
        Ok(created)
    }

    /// Moves every local group into the partitions.
    pub fn flush(&mut self) -> Result<usize> {
        let entries = self.table.drain_entries();
        let moved = entries.len();
        self.shared.append_entries(entries)?;
        self.flushed += moved;
        debug!(moved, total = self.flushed, "aggregate.local.flush");
        Ok(moved)
    }

    /// Flushes the remaining groups; the worker is done producing.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        if self.flushed > 0 {
            info!(groups = self.flushed, "aggregate.local.finished");
        }
        Ok(self.flushed)
    }
}
