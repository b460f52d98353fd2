//! Row storage for a single table.

use std::collections::BTreeMap;

use crate::types::Value;

/// Identifier of a stored row. Never reused after delete.
pub type RowId = u64;

/// One value per column, in column storage order.
pub type Row = Vec<Value>;

/// Append/scan/delete store for fixed-schema rows.
#[derive(Debug, Clone)]
pub struct RowStore {
    rows: BTreeMap<RowId, Row>,
    next_row_id: RowId,
}

impl Default for RowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_row_id: 1,
        }
    }

    /// Append a row and return its id.
    pub fn append(&mut self, row: Row) -> RowId {
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row);
        id
    }

    /// Get a row.
    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    /// Replace a row in place, returning the previous contents.
    pub fn replace(&mut self, id: RowId, row: Row) -> Option<Row> {
        self.rows.get_mut(&id).map(|slot| std::mem::replace(slot, row))
    }

    /// Remove a row.
    pub fn remove(&mut self, id: RowId) -> Option<Row> {
        self.rows.remove(&id)
    }

    /// Iterate rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &Row)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one value per row, in row id order.
    pub fn push_column(&mut self, values: impl IntoIterator<Item = Value>) {
        for (row, value) in self.rows.values_mut().zip(values) {
            row.push(value);
        }
    }

    /// Remove the value at `position` from every row.
    pub fn remove_column(&mut self, position: usize) {
        for row in self.rows.values_mut() {
            if position < row.len() {
                row.remove(position);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_not_reused() {
        let mut store = RowStore::new();
        let a = store.append(vec![Value::Int(1)]);
        store.remove(a);
        let b = store.append(vec![Value::Int(2)]);
        assert_ne!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_default_store_starts_at_first_id() {
        let mut store = RowStore::default();
        assert_eq!(store.append(vec![Value::Int(1)]), 1);
    }

    #[test]
    fn test_column_reshape() {
        let mut store = RowStore::new();
        store.append(vec![Value::Int(1), Value::text("a")]);
        store.append(vec![Value::Int(2), Value::text("b")]);

        store.push_column([Value::Bool(true), Value::Bool(false)]);
        store.remove_column(1);

        let rows: Vec<_> = store.iter().map(|(_, r)| r.clone()).collect();
        assert_eq!(rows[0], vec![Value::Int(1), Value::Bool(true)]);
        assert_eq!(rows[1], vec![Value::Int(2), Value::Bool(false)]);
    }

    #[test]
    fn test_replace() {
        let mut store = RowStore::new();
        let id = store.append(vec![Value::Int(1)]);
        let old = store.replace(id, vec![Value::Int(5)]).unwrap();
        assert_eq!(old, vec![Value::Int(1)]);
        assert_eq!(store.get(id), Some(&vec![Value::Int(5)]));
        assert!(store.replace(99, vec![]).is_none());
    }
}
