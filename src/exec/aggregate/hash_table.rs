//! Linear-probing hash table mapping group keys to aggregate states.

use std::mem;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{out_of_memory, Result, UmbralError};
use crate::exec::aggregate::base::{compute_vector_hashes, match_flat_vec_with_entry, BaseHashTable};
use crate::exec::aggregate::factorized::{EntryId, FactorizedTable};
use crate::exec::aggregate::function::{AggregateFunction, AggregateState};
use crate::exec::aggregate::hash::{combine_hash, hash_key_tuple, hash_value};
use crate::exec::aggregate::options::AggregateOptions;
use crate::exec::aggregate::vector::{DataChunkState, ValueVector};
use crate::profile::{profile_timer, record_profile_timer, ProfileKind};
use crate::query::value::Value;

const NULL: &Value = &Value::Null;

/// Input column of one aggregate. `None` for `COUNT(*)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AggregateInput<'a> {
    /// Argument vector.
    pub vector: Option<&'a ValueVector>,
}

impl<'a> AggregateInput<'a> {
    /// Input without an argument column.
    pub fn none() -> Self {
        Self { vector: None }
    }

    /// Input reading `vector`.
    pub fn vector(vector: &'a ValueVector) -> Self {
        Self {
            vector: Some(vector),
        }
    }
}

/// A group moved out of a table, together with the values its DISTINCT
/// aggregates have already seen.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedEntry {
    /// Stored key hash.
    pub hash: u64,
    /// Group-by keys.
    pub keys: Vec<Value>,
    /// Dependent keys.
    pub dependent: Vec<Value>,
    /// Aggregate states in function order.
    pub states: Vec<AggregateState>,
    /// Per function, the distinct inputs seen for this group. Empty for
    /// non-distinct functions.
    pub distinct_values: Vec<Vec<Value>>,
}

/// Single-threaded aggregate hash table.
///
/// Entries live in a [`FactorizedTable`]; the [`BaseHashTable`] directory
/// only stores `(hash, row)` pairs. Collisions are resolved by linear
/// probing and entries are never deleted, so a probe ends at the first
/// empty slot.
#[derive(Debug)]
pub struct AggregateHashTable {
    directory: BaseHashTable,
    rows: FactorizedTable,
    functions: Vec<Arc<dyn AggregateFunction>>,
    distinct: Vec<Option<AggregateHashTable>>,
    load_factor: f64,
    memory_limit: Option<usize>,
    hash_buffer: Vec<u64>,
}

impl AggregateHashTable {
    /// Creates a table over `num_keys` group-by columns and `num_dependent`
    /// carried columns computing `functions`.
    pub fn new(
        num_keys: usize,
        num_dependent: usize,
        functions: Vec<Arc<dyn AggregateFunction>>,
        options: &AggregateOptions,
    ) -> Result<Self> {
        let distinct = functions
            .iter()
            .map(|function| {
                function
                    .is_distinct()
                    .then(|| Self::distinct_set(num_keys + 1, options))
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            directory: BaseHashTable::new(options.initial_slots)?,
            rows: FactorizedTable::new(num_keys, num_dependent),
            functions,
            distinct,
            load_factor: options.load_factor.max(1.0),
            memory_limit: options.memory_limit_bytes,
            hash_buffer: Vec::new(),
        })
    }

    fn distinct_set(num_keys: usize, options: &AggregateOptions) -> Result<Self> {
        Ok(Self {
            directory: BaseHashTable::new(options.initial_slots)?,
            rows: FactorizedTable::new(num_keys, 0),
            functions: Vec::new(),
            distinct: Vec::new(),
            load_factor: options.load_factor.max(1.0),
            memory_limit: None,
            hash_buffer: Vec::new(),
        })
    }

    /// Number of groups.
    pub fn num_entries(&self) -> usize {
        self.rows.num_rows()
    }

    /// `true` when the table holds no groups.
    pub fn is_empty(&self) -> bool {
        self.num_entries() == 0
    }

    /// Directory size.
    pub fn num_slots(&self) -> usize {
        self.directory.num_slots()
    }

    /// Aggregate functions in column order.
    pub fn functions(&self) -> &[Arc<dyn AggregateFunction>] {
        &self.functions
    }

    /// Number of group-by key columns.
    pub fn num_key_columns(&self) -> usize {
        self.rows.num_key_columns()
    }

    /// Number of dependent key columns.
    pub fn num_dependent_columns(&self) -> usize {
        self.rows.num_dependent_columns()
    }

    /// Approximate bytes held by the table and its distinct sets.
    pub fn memory_usage(&self) -> usize {
        self.directory.memory_usage()
            + self.rows.memory_usage()
            + self
                .distinct
                .iter()
                .flatten()
                .map(AggregateHashTable::memory_usage)
                .sum::<usize>()
    }

    /// Folds one data chunk into the table and returns the number of groups
    /// it created.
    ///
    /// Rows are driven by `leading`'s selection. Every flat key contributes
    /// its current value to every row. `inputs` holds one entry per aggregate
    /// function; an unflat input that does not share `leading`'s state is
    /// combined with each row as a cross product.
    pub fn append(
        &mut self,
        flat_keys: &[&ValueVector],
        unflat_keys: &[&ValueVector],
        dependent: &[&ValueVector],
        leading: &DataChunkState,
        inputs: &[AggregateInput<'_>],
        multiplicity: u64,
    ) -> Result<usize> {
        if flat_keys.len() + unflat_keys.len() != self.num_key_columns()
            || dependent.len() != self.num_dependent_columns()
        {
            return Err(UmbralError::InvalidArgument(format!(
                "expected {} key and {} dependent columns",
                self.num_key_columns(),
                self.num_dependent_columns()
            )));
        }
        if let Some(col) = flat_keys.iter().position(|key| !key.is_flat()) {
            return Err(UmbralError::InvalidArgument(format!(
                "flat key column {col} has an unflat chunk state"
            )));
        }
        if inputs.len() != self.functions.len() {
            return Err(UmbralError::InvalidArgument(format!(
                "expected {} aggregate inputs, got {}",
                self.functions.len(),
                inputs.len()
            )));
        }
        let start = profile_timer();
        let mut hashes = mem::take(&mut self.hash_buffer);
        compute_vector_hashes(flat_keys, unflat_keys, leading, &mut hashes);
        let result = self.append_hashed(
            flat_keys,
            unflat_keys,
            dependent,
            leading,
            inputs,
            multiplicity,
            &hashes,
        );
        self.hash_buffer = hashes;
        record_profile_timer(ProfileKind::AggregateAppend, start);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn append_hashed(
        &mut self,
        flat_keys: &[&ValueVector],
        unflat_keys: &[&ValueVector],
        dependent: &[&ValueVector],
        leading: &DataChunkState,
        inputs: &[AggregateInput<'_>],
        multiplicity: u64,
        hashes: &[u64],
    ) -> Result<usize> {
        self.reserve(hashes.len())?;
        let fully_flat = unflat_keys.is_empty() && !flat_keys.is_empty();
        let mut created = 0;
        for (&pos, &hash) in leading.selected_positions().iter().zip(hashes) {
            let keys: SmallVec<[&Value; 8]> = flat_keys
                .iter()
                .map(|key| key.flat_value().unwrap_or(NULL))
                .chain(unflat_keys.iter().map(|key| key.value(pos)))
                .collect();
            let found = if fully_flat {
                self.find_entry_by(hash, |rows, entry| {
                    match_flat_vec_with_entry(flat_keys, rows, entry)
                })
            } else {
                self.find_entry(hash, &keys)
            };
            let entry = match found {
                Some(entry) => entry,
                None => {
                    let dependent_values: SmallVec<[&Value; 4]> = dependent
                        .iter()
                        .map(|vector| value_at(vector, pos))
                        .collect();
                    created += 1;
                    self.insert_new(hash, &keys, &dependent_values)?
                }
            };
            self.update_aggregates(entry, hash, &keys, leading, pos, inputs, multiplicity)?;
        }
        self.check_memory()?;
        trace!(rows = hashes.len(), created, "aggregate.hash_table.append");
        Ok(created)
    }

    #[allow(clippy::too_many_arguments)]
    fn update_aggregates(
        &mut self,
        entry: EntryId,
        hash: u64,
        keys: &[&Value],
        leading: &DataChunkState,
        pos: usize,
        inputs: &[AggregateInput<'_>],
        multiplicity: u64,
    ) -> Result<()> {
        for (idx, input) in inputs.iter().enumerate() {
            let function = self.functions[idx].as_ref();
            let state = &mut self.rows.states_mut(entry)[idx];
            let mut seen = self.distinct[idx].as_mut();
            match input.vector {
                None => update_state(function, state, seen, hash, keys, None, multiplicity)?,
                Some(vector) if vector.is_flat() => {
                    update_state(function, state, seen, hash, keys, vector.flat_value(), multiplicity)?
                }
                Some(vector) if vector.same_state(leading) => update_state(
                    function,
                    state,
                    seen,
                    hash,
                    keys,
                    Some(vector.value(pos)),
                    multiplicity,
                )?,
                Some(vector) => {
                    for value in vector.selected_values() {
                        update_state(
                            function,
                            state,
                            seen.as_deref_mut(),
                            hash,
                            keys,
                            Some(value),
                            multiplicity,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up the states of the group `keys`.
    pub fn get(&self, keys: &[Value]) -> Option<&[AggregateState]> {
        let refs: SmallVec<[&Value; 8]> = keys.iter().collect();
        self.find_entry(hash_key_tuple(keys), &refs)
            .map(|entry| self.rows.states(entry))
    }

    fn find_entry(&self, hash: u64, keys: &[&Value]) -> Option<EntryId> {
        self.find_entry_by(hash, |rows, entry| rows.keys_equal(entry, keys))
    }

    fn find_entry_by<F>(&self, hash: u64, mut matches: F) -> Option<EntryId>
    where
        F: FnMut(&FactorizedTable, EntryId) -> bool,
    {
        let mut idx = self.directory.slot_index_for_hash(hash);
        for _ in 0..self.directory.num_slots() {
            let slot = self.directory.slot(idx);
            match slot.entry {
                None => return None,
                Some(entry) if slot.hash == hash && matches(&self.rows, entry) => {
                    return Some(entry)
                }
                Some(_) => idx = self.directory.next_slot(idx),
            }
        }
        None
    }

    fn insert_new(&mut self, hash: u64, keys: &[&Value], dependent: &[&Value]) -> Result<EntryId> {
        let states = self.functions.iter().map(|f| f.init_state()).collect();
        self.insert_with_states(hash, keys, dependent, states)
    }

    fn insert_with_states(
        &mut self,
        hash: u64,
        keys: &[&Value],
        dependent: &[&Value],
        states: Vec<AggregateState>,
    ) -> Result<EntryId> {
        let idx = self.directory.find_empty_slot(hash);
        let entry = self.rows.append_row(hash, keys, dependent, states)?;
        self.directory.fill_slot(idx, hash, entry);
        Ok(entry)
    }

    /// Inserts `(group keys, value)` into a distinct set; `true` if unseen.
    fn insert_distinct(&mut self, group_hash: u64, keys: &[&Value], value: &Value) -> Result<bool> {
        let hash = combine_hash(group_hash, hash_value(value));
        let mut tuple: SmallVec<[&Value; 8]> = keys.iter().copied().collect();
        tuple.push(value);
        if self.find_entry(hash, &tuple).is_some() {
            return Ok(false);
        }
        self.reserve(1)?;
        self.insert_with_states(hash, &tuple, &[], Vec::new())?;
        Ok(true)
    }

    /// Grows the directory so that `additional` more groups fit under the
    /// load factor.
    fn reserve(&mut self, additional: usize) -> Result<()> {
        let needed = self.num_entries().saturating_add(additional);
        let mut slots = self.directory.num_slots();
        while needed >= slots || needed as f64 * self.load_factor > slots as f64 {
            slots = slots
                .checked_mul(2)
                .ok_or_else(|| out_of_memory("hash directory", usize::MAX))?;
        }
        if slots != self.directory.num_slots() {
            self.directory.set_max_num_hash_slots(slots)?;
        }
        Ok(())
    }

    /// Resizes the directory to `new_size` slots, rounded up to a power of two.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size < self.num_entries() {
            return Err(UmbralError::InvalidArgument(format!(
                "cannot resize to {new_size} slots with {} entries",
                self.num_entries()
            )));
        }
        self.directory.set_max_num_hash_slots(new_size)
    }

    fn check_memory(&self) -> Result<()> {
        match self.memory_limit {
            Some(limit) => {
                let usage = self.memory_usage();
                if usage > limit {
                    return Err(out_of_memory("aggregate hash table", usage));
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Moves every group out, leaving the table empty but reusable.
    pub fn drain_entries(&mut self) -> Vec<OwnedEntry> {
        let num_keys = self.num_key_columns();
        let mut distinct_values = vec![vec![Vec::new(); self.functions.len()]; self.num_entries()];
        for idx in 0..self.distinct.len() {
            let Some(seen) = self.distinct[idx].as_mut() else {
                continue;
            };
            for mut row in seen.rows.drain_rows() {
                let Some(value) = row.keys.pop() else {
                    continue;
                };
                let group: SmallVec<[&Value; 8]> = row.keys.iter().take(num_keys).collect();
                if let Some(entry) = self.find_entry(hash_key_tuple(group.iter().copied()), &group) {
                    distinct_values[entry][idx].push(value);
                }
            }
            if let Some(seen) = self.distinct[idx].as_mut() {
                seen.directory.clear();
            }
        }
        let entries = self
            .rows
            .drain_rows()
            .into_iter()
            .zip(distinct_values)
            .map(|(row, distinct_values)| OwnedEntry {
                hash: row.hash,
                keys: row.keys,
                dependent: row.dependent,
                states: row.states,
                distinct_values,
            })
            .collect();
        self.directory.clear();
        entries
    }

    /// Merges one owned group into the table and returns `true` if it was new.
    ///
    /// Matching groups combine their states; DISTINCT aggregates instead
    /// replay the incoming values they have not seen yet. A new group is
    /// moved in as is.
    pub fn merge_entry(&mut self, entry: OwnedEntry) -> Result<bool> {
        let OwnedEntry {
            hash,
            keys,
            dependent,
            states,
            mut distinct_values,
        } = entry;
        if keys.len() != self.num_key_columns()
            || dependent.len() != self.num_dependent_columns()
            || states.len() != self.functions.len()
        {
            return Err(UmbralError::Invalid("merging an entry with a different layout"));
        }
        distinct_values.resize_with(self.functions.len(), Vec::new);
        let key_refs: SmallVec<[&Value; 8]> = keys.iter().collect();
        if let Some(existing) = self.find_entry(hash, &key_refs) {
            for (idx, (other, values)) in states.into_iter().zip(distinct_values).enumerate() {
                let function = self.functions[idx].as_ref();
                let state = &mut self.rows.states_mut(existing)[idx];
                match self.distinct[idx].as_mut() {
                    Some(seen) => {
                        for value in &values {
                            if seen.insert_distinct(hash, &key_refs, value)? {
                                function.update(state, Some(value), 1);
                            }
                        }
                    }
                    None => function.combine(state, other),
                }
            }
            return Ok(false);
        }
        self.reserve(1)?;
        let dependent_refs: SmallVec<[&Value; 4]> = dependent.iter().collect();
        self.insert_with_states(hash, &key_refs, &dependent_refs, states)?;
        for (idx, values) in distinct_values.iter().enumerate() {
            if let Some(seen) = self.distinct[idx].as_mut() {
                for value in values {
                    seen.insert_distinct(hash, &key_refs, value)?;
                }
            }
        }
        Ok(true)
    }

    /// Moves every group of `other` into this table and returns the number
    /// of groups that were new here. `other` is left empty.
    pub fn merge(&mut self, other: &mut AggregateHashTable) -> Result<usize> {
        if other.num_key_columns() != self.num_key_columns()
            || other.functions.len() != self.functions.len()
        {
            return Err(UmbralError::Invalid("merging tables with different layouts"));
        }
        let start = profile_timer();
        let created = self.merge_entries(other.drain_entries());
        record_profile_timer(ProfileKind::AggregateMerge, start);
        created
    }

    /// Merges a batch of owned groups and returns how many were new.
    pub fn merge_entries(&mut self, entries: Vec<OwnedEntry>) -> Result<usize> {
        let incoming = entries.len();
        self.reserve(incoming)?;
        let mut created = 0;
        for entry in entries {
            if self.merge_entry(entry)? {
                created += 1;
            }
        }
        self.check_memory()?;
        debug!(incoming, created, groups = self.num_entries(), "aggregate.hash_table.merge");
        Ok(created)
    }

    /// Iterates `(keys, states)` in row order.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<Value>, &[AggregateState])> + '_ {
        (0..self.num_entries()).map(move |row| (self.rows.read_keys(row), self.rows.states(row)))
    }

    /// Output row `row` as `[keys.., dependent.., finalized aggregates..]`.
    pub fn scan_row(&self, row: EntryId) -> Vec<Value> {
        let mut out = self.rows.read_keys(row);
        out.extend(self.rows.read_dependent(row));
        out.extend(
            self.functions
                .iter()
                .zip(self.rows.states(row))
                .map(|(function, state)| function.finalize(state)),
        );
        out
    }

    /// Every output row in row order.
    pub fn finalize_aggregate_states(&self) -> Vec<Vec<Value>> {
        (0..self.num_entries()).map(|row| self.scan_row(row)).collect()
    }

    /// Drops every group.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.directory.clear();
        for seen in self.distinct.iter_mut().flatten() {
            seen.clear();
        }
    }
}

fn value_at(vector: &ValueVector, pos: usize) -> &Value {
    if vector.is_flat() {
        vector.flat_value().unwrap_or(NULL)
    } else {
        vector.value(pos)
    }
}

fn update_state(
    function: &dyn AggregateFunction,
    state: &mut AggregateState,
    seen: Option<&mut AggregateHashTable>,
    group_hash: u64,
    keys: &[&Value],
    value: Option<&Value>,
    multiplicity: u64,
) -> Result<()> {
    match seen {
        None => function.update(state, value, multiplicity),
        Some(seen) => {
            // Duplicates are ignored, so multiplicity never matters here.
            if let Some(value) = value.filter(|v| !v.is_null()) {
                if seen.insert_distinct(group_hash, keys, value)? {
                    function.update(state, Some(value), 1);
                }
            }
        }
    }
    Ok(())
}
