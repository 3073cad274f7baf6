//! Columnar value vectors and the selection state they share.

use std::sync::Arc;

use crate::query::value::Value;

/// Selection descriptor shared by every vector of one data chunk.
///
/// A flat state points at exactly one current position and the chunk
/// represents a single tuple. An unflat state selects a batch of positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataChunkState {
    positions: Vec<usize>,
    flat: bool,
}

impl DataChunkState {
    /// Unflat state selecting positions `0..len`.
    pub fn unflat(len: usize) -> Self {
        Self {
            positions: (0..len).collect(),
            flat: false,
        }
    }

    /// Unflat state with an explicit selection vector.
    pub fn selected(positions: Vec<usize>) -> Self {
        Self {
            positions,
            flat: false,
        }
    }

    /// Flat state positioned at `current`.
    pub fn flat(current: usize) -> Self {
        Self {
            positions: vec![current],
            flat: true,
        }
    }

    /// `true` when the chunk currently represents a single tuple.
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Current position of a flat state.
    pub fn current_position(&self) -> Option<usize> {
        if self.flat {
            self.positions.first().copied()
        } else {
            None
        }
    }

    /// Selected positions; a flat state yields its single current position.
    pub fn selected_positions(&self) -> &[usize] {
        &self.positions
    }

    /// Number of selected tuples.
    pub fn num_selected(&self) -> usize {
        self.positions.len()
    }
}

/// One column of a data chunk.
#[derive(Clone, Debug)]
pub struct ValueVector {
    values: Vec<Value>,
    state: Arc<DataChunkState>,
}

impl ValueVector {
    /// Wraps `values` under an existing chunk state.
    pub fn new(values: Vec<Value>, state: Arc<DataChunkState>) -> Self {
        Self { values, state }
    }

    /// Vector with its own unflat state selecting every value.
    pub fn unflat(values: Vec<Value>) -> Self {
        let state = Arc::new(DataChunkState::unflat(values.len()));
        Self { values, state }
    }

    /// Single-value vector with its own flat state.
    pub fn flat(value: Value) -> Self {
        Self {
            values: vec![value],
            state: Arc::new(DataChunkState::flat(0)),
        }
    }

    /// Value at physical position `pos`; out-of-range positions read as NULL.
    pub fn value(&self, pos: usize) -> &Value {
        const NULL: &Value = &Value::Null;
        self.values.get(pos).unwrap_or(NULL)
    }

    /// Value at the current position of a flat vector.
    pub fn flat_value(&self) -> Option<&Value> {
        self.state.current_position().map(|pos| self.value(pos))
    }

    /// Shared chunk state.
    pub fn state(&self) -> &Arc<DataChunkState> {
        &self.state
    }

    /// `true` when the vector's state is flat.
    pub fn is_flat(&self) -> bool {
        self.state.is_flat()
    }

    /// `true` when both vectors belong to the same data chunk.
    pub fn same_state(&self, other: &DataChunkState) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.state), other)
    }

    /// Physical length.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` for a vector without physical values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Physical values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Selected values in selection order.
    pub fn selected_values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.state
            .selected_positions()
            .iter()
            .map(move |&pos| self.value(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_vector_exposes_current_value() {
        let state = Arc::new(DataChunkState::flat(1));
        let vector = ValueVector::new(vec![Value::Int(1), Value::Int(2)], Arc::clone(&state));
        assert!(vector.is_flat());
        assert_eq!(vector.flat_value(), Some(&Value::Int(2)));
        assert!(vector.same_state(&state));
        assert!(!vector.same_state(&DataChunkState::flat(1)));
    }

    #[test]
    fn selection_vector_drives_iteration() {
        let state = Arc::new(DataChunkState::selected(vec![2, 0]));
        let vector = ValueVector::new(
            vec![Value::Int(10), Value::Int(11), Value::Int(12)],
            state,
        );
        let selected: Vec<_> = vector.selected_values().cloned().collect();
        assert_eq!(selected, vec![Value::Int(12), Value::Int(10)]);
        assert_eq!(vector.value(7), &Value::Null);
    }
}
