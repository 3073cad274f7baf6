//! Slot directory and vectorized key hashing shared by aggregate tables.

use tracing::debug;

use crate::error::{out_of_memory, Result};
use crate::exec::aggregate::factorized::{EntryId, FactorizedTable};
use crate::exec::aggregate::hash::{combine_hash, hash_value, EMPTY_KEY_HASH};
use crate::exec::aggregate::vector::{DataChunkState, ValueVector};
use crate::query::value::Value;

/// One directory slot. `entry == None` marks an empty slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HashSlot {
    /// Full hash of the entry's keys.
    pub hash: u64,
    /// Row of the entry in the backing table.
    pub entry: Option<EntryId>,
}

/// Power-of-two slot directory addressed by `hash & bitmask`.
#[derive(Debug)]
pub struct BaseHashTable {
    slots: Vec<HashSlot>,
    bitmask: u64,
}

impl BaseHashTable {
    /// Directory with at least `num_slots` slots, rounded up to a power of two.
    pub fn new(num_slots: usize) -> Result<Self> {
        let num_slots = num_slots.max(1).next_power_of_two();
        Ok(Self {
            slots: allocate_slots(num_slots)?,
            bitmask: (num_slots - 1) as u64,
        })
    }

    /// Number of slots.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// `num_slots - 1`.
    pub fn bitmask(&self) -> u64 {
        self.bitmask
    }

    /// Home slot of `hash`.
    pub fn slot_index_for_hash(&self, hash: u64) -> usize {
        (hash & self.bitmask) as usize
    }

    /// Next slot in probe order, wrapping at the end of the directory.
    pub fn next_slot(&self, idx: usize) -> usize {
        (idx + 1) & self.bitmask as usize
    }

    /// Slot at `idx`.
    pub fn slot(&self, idx: usize) -> &HashSlot {
        &self.slots[idx]
    }

    /// Occupies `idx` with `entry`.
    pub fn fill_slot(&mut self, idx: usize, hash: u64, entry: EntryId) {
        debug_assert!(self.slots[idx].entry.is_none());
        self.slots[idx] = HashSlot {
            hash,
            entry: Some(entry),
        };
    }

    /// First empty slot on the probe path of `hash`.
    pub fn find_empty_slot(&self, hash: u64) -> usize {
        let mut idx = self.slot_index_for_hash(hash);
        while self.slots[idx].entry.is_some() {
            idx = self.next_slot(idx);
        }
        idx
    }

    /// Grows the directory to `new_size` slots (rounded up to a power of two)
    /// and re-buckets every occupied slot from its stored hash. Entries are
    /// relocated, never copied.
    pub fn set_max_num_hash_slots(&mut self, new_size: usize) -> Result<()> {
        let new_size = new_size.max(1).next_power_of_two();
        if new_size == self.slots.len() {
            return Ok(());
        }
        let old = std::mem::replace(&mut self.slots, allocate_slots(new_size)?);
        self.bitmask = (new_size - 1) as u64;
        for slot in old.into_iter().filter(|slot| slot.entry.is_some()) {
            let idx = self.find_empty_slot(slot.hash);
            self.slots[idx] = slot;
        }
        debug!(slots = new_size, "aggregate.hash_table.rehash");
        Ok(())
    }

    /// Empties every slot, keeping the size.
    pub fn clear(&mut self) {
        self.slots.fill(HashSlot::default());
    }

    /// Approximate bytes held by the directory.
    pub fn memory_usage(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<HashSlot>()
    }
}

fn allocate_slots(num_slots: usize) -> Result<Vec<HashSlot>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(num_slots)
        .map_err(|_| out_of_memory("hash directory", num_slots * std::mem::size_of::<HashSlot>()))?;
    slots.resize(num_slots, HashSlot::default());
    Ok(slots)
}

/// Computes one combined key hash per selected row of `leading`.
///
/// Keys are combined in `[flat.., unflat..]` order. Flat columns are hashed
/// once and broadcast to every row, so a tuple hashes identically whether a
/// column arrives flat or batched.
pub fn compute_vector_hashes(
    flat_keys: &[&ValueVector],
    unflat_keys: &[&ValueVector],
    leading: &DataChunkState,
    out: &mut Vec<u64>,
) {
    out.clear();
    debug_assert!(flat_keys.iter().all(|key| key.is_flat()));
    let flat_hash = flat_keys
        .iter()
        .map(|key| hash_value(key.flat_value().unwrap_or(&Value::Null)))
        .reduce(combine_hash);
    for &pos in leading.selected_positions() {
        let hash = unflat_keys
            .iter()
            .map(|key| hash_value(key.value(pos)))
            .fold(flat_hash, |acc, next| {
                Some(acc.map_or(next, |acc| combine_hash(acc, next)))
            });
        out.push(hash.unwrap_or(EMPTY_KEY_HASH));
    }
}

/// Compares the current values of fully flat `keys` with the stored keys of
/// `entry`. This is the fast path for a batch that repeats one key tuple.
pub fn match_flat_vec_with_entry(
    keys: &[&ValueVector],
    table: &FactorizedTable,
    entry: EntryId,
) -> bool {
    keys.len() == table.num_key_columns()
        && keys.iter().enumerate().all(|(col, key)| match key.flat_value() {
            Some(value) => table.key_equals(entry, col, value),
            None => false,
        })
}
