//! A live table: definition, rows, key indexes and sequences.

use std::collections::{BTreeSet, HashMap};

use crate::catalog::{ColumnId, QualifiedName, TableDef};
use crate::constraint::UniqueIndex;
use crate::types::Value;

use super::row_store::{Row, RowId, RowStore};

/// A table together with everything the constraint engine keeps for it.
///
/// Lives behind its own lock; see [`super::LockPlan`].
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) def: TableDef,
    pub(crate) rows: RowStore,
    /// One index per PRIMARY KEY/UNIQUE constraint, keyed by constraint name.
    pub(crate) indexes: HashMap<String, UniqueIndex>,
    /// Last value issued per sequence-backed column.
    pub(crate) sequences: HashMap<ColumnId, i64>,
    /// Foreign keys elsewhere pointing at this table: (owning table, constraint).
    pub(crate) referenced_by: BTreeSet<(QualifiedName, String)>,
    /// Bumped by every catalog change touching this table.
    pub(crate) version: u64,
    /// Set once the table has been dropped; holders of a stale handle see it.
    pub(crate) dropped: bool,
}

impl Table {
    /// Wrap a definition with an empty row store.
    pub fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: RowStore::new(),
            indexes: HashMap::new(),
            sequences: HashMap::new(),
            referenced_by: BTreeSet::new(),
            version: 1,
            dropped: false,
        }
    }

    /// The table definition.
    pub fn def(&self) -> &TableDef {
        &self.def
    }

    /// Table name.
    pub fn name(&self) -> &QualifiedName {
        &self.def.name
    }

    /// The row store.
    pub fn rows(&self) -> &RowStore {
        &self.rows
    }

    /// Number of live rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Last value issued by the sequence of column `id` (0 if none yet).
    pub fn sequence_value(&self, id: ColumnId) -> i64 {
        self.sequences.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Key of `row` under every key constraint: (constraint, key or None for NULLs).
    pub(crate) fn index_keys(&self, row: &[Value]) -> Vec<(String, Option<Vec<Value>>)> {
        self.def
            .key_constraints()
            .map(|c| (c.name().to_string(), self.def.key_of(row, c.columns())))
            .collect()
    }

    /// Append an already-validated row and index it.
    pub(crate) fn commit_insert(&mut self, row: Row) -> RowId {
        let keys = self.index_keys(&row);
        let row_id = self.rows.append(row);
        for (name, key) in keys {
            if let (Some(key), Some(index)) = (key, self.indexes.get_mut(&name)) {
                // Validated under the same write lock, so the slot is free.
                let _ = index.insert(key, row_id);
            }
        }
        row_id
    }

    /// Remove a row and its index entries.
    pub(crate) fn commit_delete(&mut self, row_id: RowId) -> Option<Row> {
        let row = self.rows.remove(row_id)?;
        for (name, key) in self.index_keys(&row) {
            if let (Some(key), Some(index)) = (key, self.indexes.get_mut(&name)) {
                index.remove(&key, row_id);
            }
        }
        Some(row)
    }

    /// Replace several rows at once, moving their index entries.
    ///
    /// All old keys are unindexed before any new key is indexed, so rows in
    /// one batch may swap keys.
    pub(crate) fn commit_replace_many(&mut self, updates: Vec<(RowId, Row)>) {
        let mut staged = Vec::with_capacity(updates.len());
        for (row_id, new_row) in updates {
            if let Some(old) = self.rows.get(row_id) {
                for (name, key) in self.index_keys(old) {
                    if let (Some(key), Some(index)) = (key, self.indexes.get_mut(&name)) {
                        index.remove(&key, row_id);
                    }
                }
                staged.push((row_id, new_row));
            }
        }
        for (row_id, new_row) in staged {
            for (name, key) in self.index_keys(&new_row) {
                if let (Some(key), Some(index)) = (key, self.indexes.get_mut(&name)) {
                    let _ = index.insert(key, row_id);
                }
            }
            self.rows.replace(row_id, new_row);
        }
    }

    /// Build a key index over `columns` from the current rows.
    ///
    /// Returns the first duplicate key if the rows already violate it.
    pub(crate) fn build_index(&self, columns: &[ColumnId]) -> Result<UniqueIndex, Vec<Value>> {
        UniqueIndex::build(
            self.rows
                .iter()
                .map(|(row_id, row)| (row_id, self.def.key_of(row, columns))),
        )
    }

    /// Row ids whose `columns` equal `key`.
    pub(crate) fn rows_matching(&self, columns: &[ColumnId], key: &[Value]) -> Vec<RowId> {
        self.rows
            .iter()
            .filter(|(_, row)| self.def.key_of(row, columns).as_deref() == Some(key))
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ConstraintDef};
    use crate::types::DataType;

    fn keyed_table() -> Table {
        let mut def = TableDef::new(QualifiedName::new("public", "t"));
        let id = def.add_column(ColumnDef::new("id", DataType::Integer)).unwrap();
        def.add_column(ColumnDef::new("v", DataType::Text)).unwrap();
        def.constraints.push(ConstraintDef::PrimaryKey {
            name: "t_pkey".into(),
            columns: vec![id],
        });
        let mut table = Table::new(def);
        table.indexes.insert("t_pkey".into(), UniqueIndex::new());
        table
    }

    #[test]
    fn test_commit_insert_indexes_row() {
        let mut table = keyed_table();
        let row_id = table.commit_insert(vec![Value::Int(7), Value::text("x")]);
        assert_eq!(table.indexes["t_pkey"].lookup(&[Value::Int(7)]), Some(row_id));
    }

    #[test]
    fn test_commit_delete_unindexes_row() {
        let mut table = keyed_table();
        let row_id = table.commit_insert(vec![Value::Int(7), Value::text("x")]);
        table.commit_delete(row_id).unwrap();
        assert!(table.indexes["t_pkey"].is_empty());
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_replace_many_swaps_keys() {
        let mut table = keyed_table();
        let a = table.commit_insert(vec![Value::Int(1), Value::text("a")]);
        let b = table.commit_insert(vec![Value::Int(2), Value::text("b")]);

        table.commit_replace_many(vec![
            (a, vec![Value::Int(2), Value::text("a")]),
            (b, vec![Value::Int(1), Value::text("b")]),
        ]);

        let index = &table.indexes["t_pkey"];
        assert_eq!(index.lookup(&[Value::Int(2)]), Some(a));
        assert_eq!(index.lookup(&[Value::Int(1)]), Some(b));
    }

    #[test]
    fn test_build_index_detects_duplicates() {
        let mut table = keyed_table();
        table.indexes.clear();
        table.commit_insert(vec![Value::Int(1), Value::text("a")]);
        table.commit_insert(vec![Value::Int(1), Value::text("b")]);
        let id = table.def.column("id").unwrap().id;
        assert_eq!(table.build_index(&[id]).unwrap_err(), vec![Value::Int(1)]);
    }
}
