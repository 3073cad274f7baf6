//! Row storage for aggregate groups.
//!
//! Each row is laid out as `[keys.., dependent keys.., states.., hash]`. Key
//! columns use a fixed 9-byte encoding (one type tag plus an 8-byte payload);
//! strings and byte arrays store `(offset, len)` into a shared overflow
//! buffer. Rows are append-only and are only ever moved out wholesale.

use std::mem;

use crate::error::{out_of_memory, Result};
use crate::exec::aggregate::function::AggregateState;
use crate::query::value::{normalized_float_bits, Value};

/// Row index inside a [`FactorizedTable`].
pub type EntryId = usize;

const KEY_WIDTH: usize = 9;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_DATETIME: u8 = 6;

/// A row moved out of a table.
#[derive(Clone, Debug, PartialEq)]
pub struct FactorizedRow {
    /// Stored key hash.
    pub hash: u64,
    /// Group-by key values.
    pub keys: Vec<Value>,
    /// Dependent key values, carried but not compared.
    pub dependent: Vec<Value>,
    /// Aggregate states in function order.
    pub states: Vec<AggregateState>,
}

/// Append-only row store backing an aggregate hash table.
#[derive(Debug, Default)]
pub struct FactorizedTable {
    num_keys: usize,
    num_dependent: usize,
    key_data: Vec<u8>,
    overflow: Vec<u8>,
    states: Vec<Vec<AggregateState>>,
    hashes: Vec<u64>,
}

impl FactorizedTable {
    /// Empty table for `num_keys` group-by columns and `num_dependent` carried columns.
    pub fn new(num_keys: usize, num_dependent: usize) -> Self {
        Self {
            num_keys,
            num_dependent,
            ..Self::default()
        }
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.hashes.len()
    }

    /// Number of group-by key columns.
    pub fn num_key_columns(&self) -> usize {
        self.num_keys
    }

    /// Number of dependent key columns.
    pub fn num_dependent_columns(&self) -> usize {
        self.num_dependent
    }

    fn row_width(&self) -> usize {
        (self.num_keys + self.num_dependent) * KEY_WIDTH
    }

    /// Appends a row and returns its id.
    pub fn append_row(
        &mut self,
        hash: u64,
        keys: &[&Value],
        dependent: &[&Value],
        states: Vec<AggregateState>,
    ) -> Result<EntryId> {
        debug_assert_eq!(keys.len(), self.num_keys);
        debug_assert_eq!(dependent.len(), self.num_dependent);
        let width = self.row_width();
        self.key_data
            .try_reserve(width)
            .map_err(|_| out_of_memory("factorized table", width))?;
        self.hashes
            .try_reserve(1)
            .map_err(|_| out_of_memory("factorized table", mem::size_of::<u64>()))?;
        self.states
            .try_reserve(1)
            .map_err(|_| out_of_memory("factorized table", mem::size_of::<Vec<AggregateState>>()))?;
        let start = self.key_data.len();
        for value in keys.iter().chain(dependent) {
            if let Err(err) = self.encode(value) {
                self.key_data.truncate(start);
                return Err(err);
            }
        }
        self.hashes.push(hash);
        self.states.push(states);
        Ok(self.hashes.len() - 1)
    }

    fn encode(&mut self, value: &Value) -> Result<()> {
        let (tag, payload) = match value {
            Value::Null => (TAG_NULL, 0),
            Value::Bool(v) => (TAG_BOOL, u64::from(*v)),
            Value::Int(v) => (TAG_INT, *v as u64),
            Value::Float(v) => (TAG_FLOAT, v.to_bits()),
            Value::String(s) => (TAG_STRING, self.push_overflow(s.as_bytes())?),
            Value::Bytes(b) => (TAG_BYTES, self.push_overflow(b)?),
            Value::DateTime(v) => (TAG_DATETIME, *v as u64),
        };
        self.key_data.push(tag);
        self.key_data.extend_from_slice(&payload.to_le_bytes());
        Ok(())
    }

    fn push_overflow(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = u32::try_from(self.overflow.len())
            .map_err(|_| out_of_memory("overflow buffer", bytes.len()))?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| out_of_memory("overflow buffer", bytes.len()))?;
        self.overflow
            .try_reserve(bytes.len())
            .map_err(|_| out_of_memory("overflow buffer", bytes.len()))?;
        self.overflow.extend_from_slice(bytes);
        Ok(u64::from(offset) | (u64::from(len) << 32))
    }

    fn cell(&self, row: EntryId, col: usize) -> (u8, u64) {
        let at = row * self.row_width() + col * KEY_WIDTH;
        let tag = self.key_data[at];
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&self.key_data[at + 1..at + KEY_WIDTH]);
        (tag, u64::from_le_bytes(payload))
    }

    fn overflow_slice(&self, payload: u64) -> &[u8] {
        let offset = (payload & u64::from(u32::MAX)) as usize;
        let len = (payload >> 32) as usize;
        &self.overflow[offset..offset + len]
    }

    /// Typed comparison of stored column `col` of `row` against `value`,
    /// with grouping semantics (NULL matches NULL).
    pub fn key_equals(&self, row: EntryId, col: usize, value: &Value) -> bool {
        let (tag, payload) = self.cell(row, col);
        match (tag, value) {
            (TAG_NULL, Value::Null) => true,
            (TAG_BOOL, Value::Bool(v)) => payload == u64::from(*v),
            (TAG_INT, Value::Int(v)) => payload == *v as u64,
            (TAG_FLOAT, Value::Float(v)) => {
                normalized_float_bits(f64::from_bits(payload)) == normalized_float_bits(*v)
            }
            (TAG_STRING, Value::String(s)) => self.overflow_slice(payload) == s.as_bytes(),
            (TAG_BYTES, Value::Bytes(b)) => self.overflow_slice(payload) == b.as_slice(),
            (TAG_DATETIME, Value::DateTime(v)) => payload == *v as u64,
            _ => false,
        }
    }

    /// `true` if every group-by key of `row` matches `keys`.
    pub fn keys_equal(&self, row: EntryId, keys: &[&Value]) -> bool {
        keys.len() == self.num_keys
            && keys
                .iter()
                .enumerate()
                .all(|(col, value)| self.key_equals(row, col, value))
    }

    fn decode(&self, row: EntryId, col: usize) -> Value {
        let (tag, payload) = self.cell(row, col);
        match tag {
            TAG_BOOL => Value::Bool(payload != 0),
            TAG_INT => Value::Int(payload as i64),
            TAG_FLOAT => Value::Float(f64::from_bits(payload)),
            TAG_STRING => {
                Value::String(String::from_utf8_lossy(self.overflow_slice(payload)).into_owned())
            }
            TAG_BYTES => Value::Bytes(self.overflow_slice(payload).to_vec()),
            TAG_DATETIME => Value::DateTime(payload as i64),
            _ => Value::Null,
        }
    }

    /// Decoded group-by keys of `row`.
    pub fn read_keys(&self, row: EntryId) -> Vec<Value> {
        (0..self.num_keys).map(|col| self.decode(row, col)).collect()
    }

    /// Decoded dependent keys of `row`.
    pub fn read_dependent(&self, row: EntryId) -> Vec<Value> {
        (self.num_keys..self.num_keys + self.num_dependent)
            .map(|col| self.decode(row, col))
            .collect()
    }

    /// Stored hash of `row`.
    pub fn hash_at(&self, row: EntryId) -> u64 {
        self.hashes[row]
    }

    /// Aggregate states of `row`.
    pub fn states(&self, row: EntryId) -> &[AggregateState] {
        &self.states[row]
    }

    /// Mutable aggregate states of `row`.
    pub fn states_mut(&mut self, row: EntryId) -> &mut [AggregateState] {
        &mut self.states[row]
    }

    /// Moves every row out in row order, leaving the table empty.
    pub fn drain_rows(&mut self) -> Vec<FactorizedRow> {
        let states = mem::take(&mut self.states);
        let rows = states
            .into_iter()
            .enumerate()
            .map(|(row, states)| FactorizedRow {
                hash: self.hashes[row],
                keys: self.read_keys(row),
                dependent: self.read_dependent(row),
                states,
            })
            .collect();
        self.clear();
        rows
    }

    /// Drops every row.
    pub fn clear(&mut self) {
        self.key_data.clear();
        self.overflow.clear();
        self.states.clear();
        self.hashes.clear();
    }

    /// Approximate bytes held by the table.
    pub fn memory_usage(&self) -> usize {
        let heap_states: usize = self
            .states
            .iter()
            .flatten()
            .map(|state| match state {
                AggregateState::Collect(values) => values.capacity() * mem::size_of::<Value>(),
                _ => 0,
            })
            .sum();
        self.key_data.capacity()
            + self.overflow.capacity()
            + self.hashes.capacity() * mem::size_of::<u64>()
            + self.states.iter().map(Vec::capacity).sum::<usize>()
                * mem::size_of::<AggregateState>()
            + heap_states
    }
}
