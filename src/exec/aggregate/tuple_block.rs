//! Fixed-capacity tuple blocks and the multi-producer queue that hands them
//! to a partition's finalizer.
//!
//! Producers reserve a slot in the current head block with an atomic
//! fetch-add on `num_tuples_reserved`. A producer whose reservation lands past
//! the block's capacity seals the block, installs a fresh head and retries.
//! The single consumer takes blocks only once every producer is done.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam::queue::SegQueue;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::{Result, UmbralError};
use crate::exec::aggregate::hash_table::OwnedEntry;

/// A batch of rows written concurrently by several producers.
#[derive(Debug)]
pub struct TupleBlock {
    slots: Box<[OnceLock<OwnedEntry>]>,
    num_tuples_reserved: AtomicUsize,
    num_tuples_written: AtomicUsize,
}

impl TupleBlock {
    /// Empty block with room for `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.max(1)).map(|_| OnceLock::new()).collect(),
            num_tuples_reserved: AtomicUsize::new(0),
            num_tuples_written: AtomicUsize::new(0),
        }
    }

    /// Maximum number of rows.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Rows whose write has completed.
    pub fn num_tuples_written(&self) -> usize {
        self.num_tuples_written.load(Ordering::Acquire)
    }

    /// `true` when every reserved slot has been written.
    pub fn is_complete(&self) -> bool {
        let reserved = self.num_tuples_reserved.load(Ordering::Acquire).min(self.capacity());
        self.num_tuples_written() == reserved
    }

    fn try_reserve(&self) -> Option<usize> {
        let idx = self.num_tuples_reserved.fetch_add(1, Ordering::AcqRel);
        (idx < self.capacity()).then_some(idx)
    }

    fn write(&self, idx: usize, entry: OwnedEntry) {
        let stored = self.slots[idx].set(entry).is_ok();
        debug_assert!(stored, "tuple block slot {idx} written twice");
        self.num_tuples_written.fetch_add(1, Ordering::Release);
    }

    fn into_entries(self) -> Vec<OwnedEntry> {
        self.slots
            .into_vec()
            .into_iter()
            .filter_map(OnceLock::into_inner)
            .collect()
    }
}

/// Multi-producer, single-consumer queue of [`TupleBlock`]s.
#[derive(Debug)]
pub struct TupleBlockQueue {
    head: RwLock<Arc<TupleBlock>>,
    sealed: SegQueue<Arc<TupleBlock>>,
    block_capacity: usize,
    num_appended: AtomicUsize,
}

impl TupleBlockQueue {
    /// Empty queue whose blocks hold `block_capacity` rows.
    pub fn new(block_capacity: usize) -> Self {
        Self {
            head: RwLock::new(Arc::new(TupleBlock::new(block_capacity))),
            sealed: SegQueue::new(),
            block_capacity,
            num_appended: AtomicUsize::new(0),
        }
    }

    /// Rows appended so far.
    pub fn num_appended(&self) -> usize {
        self.num_appended.load(Ordering::Acquire)
    }

    /// Number of sealed blocks waiting for the consumer.
    pub fn num_sealed_blocks(&self) -> usize {
        self.sealed.len()
    }

    /// Appends one row. Safe to call from any number of threads.
    pub fn push(&self, entry: OwnedEntry) {
        loop {
            let block = Arc::clone(&self.head.read());
            if let Some(idx) = block.try_reserve() {
                block.write(idx, entry);
                self.num_appended.fetch_add(1, Ordering::AcqRel);
                return;
            }
            let mut head = self.head.write();
            // Another producer may already have replaced the full block.
            if Arc::ptr_eq(&head, &block) {
                let full = mem::replace(&mut *head, Arc::new(TupleBlock::new(self.block_capacity)));
                self.sealed.push(full);
                trace!(capacity = self.block_capacity, "aggregate.tuple_block.sealed");
            }
        }
    }

    /// Takes every queued row, sealed blocks first and then the head.
    ///
    /// Must only run once producers have stopped. A block still referenced
    /// by a producer is reported as [`UmbralError::Invalid`].
    pub fn drain(&self) -> Result<Vec<OwnedEntry>> {
        let mut blocks = Vec::with_capacity(self.sealed.len() + 1);
        while let Some(block) = self.sealed.pop() {
            blocks.push(block);
        }
        blocks.push(mem::replace(
            &mut *self.head.write(),
            Arc::new(TupleBlock::new(self.block_capacity)),
        ));
        let mut entries = Vec::new();
        for block in blocks {
            let block = Arc::try_unwrap(block)
                .map_err(|_| UmbralError::Invalid("tuple block drained while a producer holds it"))?;
            debug_assert!(block.is_complete());
            entries.extend(block.into_entries());
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::query::value::Value;

    fn entry(key: i64) -> OwnedEntry {
        OwnedEntry {
            hash: key as u64,
            keys: vec![Value::Int(key)],
            dependent: Vec::new(),
            states: Vec::new(),
            distinct_values: Vec::new(),
        }
    }

    #[test]
    fn single_producer_keeps_block_order() {
        let queue = TupleBlockQueue::new(2);
        for key in 0..5 {
            queue.push(entry(key));
        }
        assert_eq!(queue.num_sealed_blocks(), 2);
        let keys: Vec<_> = queue
            .drain()
            .expect("drain")
            .into_iter()
            .map(|e| e.keys[0].clone())
            .collect();
        assert_eq!(keys, (0..5).map(Value::Int).collect::<Vec<_>>());
        assert!(queue.drain().expect("empty drain").is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(TupleBlockQueue::new(7));
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..250 {
                        queue.push(entry(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("producer");
        }
        assert_eq!(queue.num_appended(), 1_000);
        let mut keys: Vec<i64> = queue
            .drain()
            .expect("drain")
            .into_iter()
            .map(|e| match e.keys[0] {
                Value::Int(v) => v,
                ref other => panic!("unexpected key: {other:?}"),
            })
            .collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 1_000);
    }
}
