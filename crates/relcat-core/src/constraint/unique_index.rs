//! Index backing a PRIMARY KEY or UNIQUE constraint.
//!
//! Maps a non-null key to the row holding it. Rows whose key has a NULL part
//! are not indexed, which is what makes NULLs exempt from uniqueness.

use std::collections::HashMap;

use crate::storage::RowId;
use crate::types::Value;

/// Key -> row map for one key constraint.
#[derive(Debug, Clone, Default)]
pub struct UniqueIndex {
    entries: HashMap<Vec<Value>, RowId>,
}

impl UniqueIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from `(row, key)` pairs. Returns the first duplicated
    /// key on failure.
    pub fn build(
        keys: impl IntoIterator<Item = (RowId, Option<Vec<Value>>)>,
    ) -> Result<Self, Vec<Value>> {
        let mut index = Self::new();
        for (row_id, key) in keys {
            if let Some(key) = key {
                if let Err(existing) = index.insert(key.clone(), row_id) {
                    if existing != row_id {
                        return Err(key);
                    }
                }
            }
        }
        Ok(index)
    }

    /// Insert an entry. Fails with the holder's row id if another row
    /// already owns the key.
    pub fn insert(&mut self, key: Vec<Value>, row_id: RowId) -> Result<(), RowId> {
        match self.entries.get(&key) {
            Some(existing) if *existing != row_id => Err(*existing),
            _ => {
                self.entries.insert(key, row_id);
                Ok(())
            }
        }
    }

    /// Remove an entry if it belongs to `row_id`.
    pub fn remove(&mut self, key: &[Value], row_id: RowId) {
        if self.entries.get(key) == Some(&row_id) {
            self.entries.remove(key);
        }
    }

    /// Row owning `key`.
    pub fn lookup(&self, key: &[Value]) -> Option<RowId> {
        self.entries.get(key).copied()
    }

    /// Whether any row owns `key`.
    pub fn contains(&self, key: &[Value]) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i64) -> Vec<Value> {
        vec![Value::Int(v)]
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut index = UniqueIndex::new();
        index.insert(key(1), 10).unwrap();
        assert_eq!(index.lookup(&key(1)), Some(10));
        assert_eq!(index.lookup(&key(2)), None);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut index = UniqueIndex::new();
        index.insert(key(1), 10).unwrap();
        assert_eq!(index.insert(key(1), 11), Err(10));
        // Same row re-inserting its own key is fine.
        assert!(index.insert(key(1), 10).is_ok());
    }

    #[test]
    fn test_remove_only_own_entry() {
        let mut index = UniqueIndex::new();
        index.insert(key(1), 10).unwrap();
        index.remove(&key(1), 11);
        assert!(index.contains(&key(1)));
        index.remove(&key(1), 10);
        assert!(index.is_empty());
    }

    #[test]
    fn test_build_skips_null_keys_and_reports_duplicates() {
        let ok = UniqueIndex::build([(1, Some(key(1))), (2, None), (3, None)]).unwrap();
        assert_eq!(ok.len(), 1);

        let dup = UniqueIndex::build([(1, Some(key(7))), (2, Some(key(7)))]).unwrap_err();
        assert_eq!(dup, key(7));
    }
}
