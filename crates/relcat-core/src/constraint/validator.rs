//! Constraint validation logic.
//!
//! The ConstraintValidator checks NOT NULL, PRIMARY KEY/UNIQUE and FOREIGN
//! KEY constraints for inserts, updates and bulk batches. It only reads: the
//! caller holds the lock set for every table involved and applies the
//! mutation afterwards, so a passing check and its mutation are one unit.

use std::collections::{HashMap, HashSet};

use crate::catalog::{ColumnId, ConstraintDef, DefaultRule, QualifiedName, TableDef};
use crate::error::{ConstraintError, Error, Result};
use crate::storage::{LockedTables, Row, RowId, Table};
use crate::types::Value;

/// Render `(a, b)=(1, 2)` for error messages.
pub(crate) fn describe_key(def: &TableDef, columns: &[ColumnId], key: &[Value]) -> String {
    format!("({})=({})", def.column_names(columns).join(", "), {
        let parts: Vec<String> = key.iter().map(|v| v.to_string()).collect();
        parts.join(", ")
    })
}

/// Assemble a full row from supplied values.
///
/// `positions[i]` is the storage position `values[i]` goes to. Omitted
/// columns take their default (drawing from `sequences` for sequence
/// defaults) or NULL. Every value is coerced to its column type.
pub(crate) fn build_row(
    def: &TableDef,
    positions: &[usize],
    values: Vec<Value>,
    sequences: &mut HashMap<ColumnId, i64>,
) -> Result<Row> {
    if values.len() != positions.len() {
        return Err(Error::ArityMismatch {
            expected: positions.len(),
            found: values.len(),
        });
    }

    let mut slots: Vec<Option<Value>> = vec![None; def.columns.len()];
    for (position, value) in positions.iter().zip(values) {
        let column = &def.columns[*position];
        slots[*position] = Some(column.coerce(value)?);
    }

    let mut row = Vec::with_capacity(slots.len());
    for (column, slot) in def.columns.iter().zip(slots) {
        let value = match slot {
            Some(v) => v,
            None => match &column.default {
                Some(DefaultRule::Value(v)) => v.clone(),
                Some(DefaultRule::Sequence) => {
                    let next = sequences.entry(column.id).or_insert(0);
                    *next += 1;
                    Value::Int(*next)
                }
                None => Value::Null,
            },
        };
        row.push(value);
    }
    Ok(row)
}

/// Keys staged by earlier rows of the same statement or batch, per key
/// constraint.
#[derive(Debug, Default)]
pub(crate) struct PendingKeys {
    keys: HashMap<String, HashMap<Vec<Value>, RowId>>,
}

impl PendingKeys {
    pub(crate) fn holder(&self, constraint: &str, key: &[Value]) -> Option<RowId> {
        self.keys.get(constraint).and_then(|m| m.get(key)).copied()
    }

    pub(crate) fn contains(&self, constraint: &str, key: &[Value]) -> bool {
        self.holder(constraint, key).is_some()
    }

    pub(crate) fn stage(&mut self, constraint: &str, key: Vec<Value>, row_id: RowId) {
        self.keys
            .entry(constraint.to_string())
            .or_default()
            .insert(key, row_id);
    }
}

/// Constraint validator over a held lock set.
pub struct ConstraintValidator<'v, 'l> {
    locked: &'v LockedTables<'l>,
}

impl<'v, 'l> ConstraintValidator<'v, 'l> {
    /// Create a validator over `locked`.
    pub fn new(locked: &'v LockedTables<'l>) -> Self {
        Self { locked }
    }

    /// Validate a single-row insert.
    pub fn validate_insert(&self, table: &QualifiedName, row: &Row) -> Result<()> {
        let target = self.locked.table(table)?;
        self.validate_staged(target, row, NEW_ROW, &mut PendingKeys::default())
    }

    /// Validate one row of a multi-row insert, staging its keys on success.
    ///
    /// `slot` is a placeholder id distinct for every row of the batch.
    pub(crate) fn validate_staged(
        &self,
        target: &Table,
        row: &Row,
        slot: RowId,
        pending: &mut PendingKeys,
    ) -> Result<()> {
        self.check_not_null(&target.def, row)?;

        let mut staged = Vec::new();
        for constraint in target.def.key_constraints() {
            let Some(key) = target.def.key_of(row, constraint.columns()) else {
                continue;
            };
            let taken = target
                .indexes
                .get(constraint.name())
                .map_or(false, |index| index.contains(&key))
                || pending.contains(constraint.name(), &key);
            if taken {
                return Err(uniqueness(&target.def, constraint, &key));
            }
            staged.push((constraint.name().to_string(), key));
        }

        for fk in target.def.foreign_keys() {
            self.check_reference(target, fk, row, |constraint, key| {
                staged.iter().any(|(n, k)| n == constraint && k.as_slice() == key)
                    || pending.contains(constraint, key)
            })?;
        }

        for (name, key) in staged {
            pending.stage(&name, key, slot);
        }
        Ok(())
    }

    /// Validate an update of several rows of one table.
    ///
    /// `updates` holds the full new contents per row id. Uniqueness is judged
    /// against the final state of the statement, so rows may swap keys.
    pub fn validate_update(&self, table: &QualifiedName, updates: &[(RowId, Row)]) -> Result<()> {
        let target = self.locked.table(table)?;
        let def = &target.def;
        let updated: HashSet<RowId> = updates.iter().map(|(id, _)| *id).collect();

        for (_, new_row) in updates {
            self.check_not_null(def, new_row)?;
        }

        // Keys held after the update by the updated rows.
        let mut final_keys = PendingKeys::default();
        for constraint in def.key_constraints() {
            for (row_id, new_row) in updates {
                let Some(key) = def.key_of(new_row, constraint.columns()) else {
                    continue;
                };
                if let Some(other) = final_keys.holder(constraint.name(), &key) {
                    if other != *row_id {
                        return Err(uniqueness(def, constraint, &key));
                    }
                }
                let holder = target
                    .indexes
                    .get(constraint.name())
                    .and_then(|index| index.lookup(&key));
                if let Some(holder) = holder {
                    if holder != *row_id && !updated.contains(&holder) {
                        return Err(uniqueness(def, constraint, &key));
                    }
                }
                final_keys.stage(constraint.name(), key, *row_id);
            }
        }

        // Whether `key` is held by some row once the statement completes.
        let present_after = |constraint: &str, key: &[Value]| -> bool {
            if final_keys.contains(constraint, key) {
                return true;
            }
            target
                .indexes
                .get(constraint)
                .and_then(|index| index.lookup(key))
                .map_or(false, |holder| !updated.contains(&holder))
        };

        for (row_id, new_row) in updates {
            let Some(old_row) = target.rows.get(*row_id) else {
                continue;
            };
            for fk in def.foreign_keys() {
                if def.key_of(old_row, fk.columns()) == def.key_of(new_row, fk.columns()) {
                    continue;
                }
                self.check_reference(target, fk, new_row, |c, k| present_after(c, k))?;
            }
        }

        // Referenced keys that disappear must not be referenced any more.
        for (child_name, fk_name) in &target.referenced_by {
            let child = self.locked.table(child_name)?;
            let Some(ConstraintDef::ForeignKey {
                name,
                columns,
                references_key,
                references_columns,
                ..
            }) = child.def.constraint(fk_name)
            else {
                continue;
            };
            for (row_id, new_row) in updates {
                let Some(old_row) = target.rows.get(*row_id) else {
                    continue;
                };
                let Some(old_key) = def.key_of(old_row, references_columns) else {
                    continue;
                };
                if def.key_of(new_row, references_columns).as_ref() == Some(&old_key)
                    || present_after(references_key, &old_key)
                {
                    continue;
                }
                let still_referenced = child.rows.iter().any(|(child_row_id, child_row)| {
                    let effective = if child_name == table {
                        updates
                            .iter()
                            .find(|(id, _)| *id == child_row_id)
                            .map(|(_, r)| r)
                            .unwrap_or(child_row)
                    } else {
                        child_row
                    };
                    child.def.key_of(effective, columns).as_ref() == Some(&old_key)
                });
                if still_referenced {
                    return Err(ConstraintError::ForeignKeyViolation {
                        constraint: name.clone(),
                        table: table.to_string(),
                        value: describe_key(def, references_columns, &old_key),
                        detail: format!("is still referenced from table \"{}\"", child_name),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Fail on NULL in a NOT NULL column.
    pub(crate) fn check_not_null(&self, def: &TableDef, row: &Row) -> Result<()> {
        for (column, value) in def.columns.iter().zip(row) {
            if !column.nullable && value.is_null() {
                return Err(ConstraintError::NullConstraintViolation {
                    table: def.name.to_string(),
                    column: column.name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Fail unless the row's foreign key value exists in the referenced key.
    ///
    /// `local` answers whether a self-referencing key is satisfied by rows
    /// of the current statement that are not in the index yet.
    fn check_reference(
        &self,
        target: &Table,
        fk: &ConstraintDef,
        row: &Row,
        local: impl Fn(&str, &[Value]) -> bool,
    ) -> Result<()> {
        let ConstraintDef::ForeignKey {
            name,
            columns,
            references_table,
            references_key,
            ..
        } = fk
        else {
            return Ok(());
        };
        let Some(key) = target.def.key_of(row, columns) else {
            return Ok(());
        };

        let found = if references_table == target.name() {
            local(references_key, &key)
                || target
                    .indexes
                    .get(references_key)
                    .map_or(false, |index| index.contains(&key))
        } else {
            self.locked
                .table(references_table)?
                .indexes
                .get(references_key)
                .map_or(false, |index| index.contains(&key))
        };

        if found {
            Ok(())
        } else {
            Err(ConstraintError::ForeignKeyViolation {
                constraint: name.clone(),
                table: target.name().to_string(),
                value: describe_key(&target.def, columns, &key),
                detail: format!("is not present in table \"{}\"", references_table),
            }
            .into())
        }
    }
}

/// Placeholder id for a row that has not been appended yet.
const NEW_ROW: RowId = 0;

fn uniqueness(def: &TableDef, constraint: &ConstraintDef, key: &[Value]) -> Error {
    ConstraintError::UniquenessViolation {
        constraint: constraint.name().to_string(),
        table: def.name.to_string(),
        value: describe_key(def, constraint.columns(), key),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;
    use crate::catalog::{ColumnDef, DeleteBehavior};
    use crate::constraint::UniqueIndex;
    use crate::error::ErrorKind;
    use crate::storage::{LockMode, LockPlan, TableHandle};
    use crate::types::DataType;

    /// parent(id pk, code unique) and child(id pk, parent_id fk -> parent.id)
    fn fixture() -> (QualifiedName, TableHandle, QualifiedName, TableHandle) {
        let parent_name = QualifiedName::new("public", "parent");
        let mut parent_def = TableDef::new(parent_name.clone());
        let pid = parent_def
            .add_column(ColumnDef::new("id", DataType::Integer).not_null())
            .unwrap();
        let code = parent_def.add_column(ColumnDef::new("code", DataType::Text)).unwrap();
        parent_def.constraints.push(ConstraintDef::PrimaryKey {
            name: "parent_pkey".into(),
            columns: vec![pid],
        });
        parent_def.constraints.push(ConstraintDef::Unique {
            name: "parent_code_key".into(),
            columns: vec![code],
        });
        let mut parent = Table::new(parent_def);
        parent.indexes.insert("parent_pkey".into(), UniqueIndex::new());
        parent.indexes.insert("parent_code_key".into(), UniqueIndex::new());
        parent.commit_insert(vec![Value::Int(1), Value::text("a")]);
        parent.commit_insert(vec![Value::Int(2), Value::text("b")]);

        let child_name = QualifiedName::new("public", "child");
        let mut child_def = TableDef::new(child_name.clone());
        let cid = child_def
            .add_column(ColumnDef::new("id", DataType::Integer).not_null())
            .unwrap();
        let fk_col = child_def
            .add_column(ColumnDef::new("parent_id", DataType::Integer))
            .unwrap();
        child_def.constraints.push(ConstraintDef::PrimaryKey {
            name: "child_pkey".into(),
            columns: vec![cid],
        });
        child_def.constraints.push(ConstraintDef::ForeignKey {
            name: "child_parent_id_fkey".into(),
            columns: vec![fk_col],
            references_table: parent_name.clone(),
            references_key: "parent_pkey".into(),
            references_columns: vec![pid],
            on_delete: DeleteBehavior::Restrict,
        });
        let mut child = Table::new(child_def);
        child.indexes.insert("child_pkey".into(), UniqueIndex::new());
        child.commit_insert(vec![Value::Int(10), Value::Int(1)]);
        parent
            .referenced_by
            .insert((child_name.clone(), "child_parent_id_fkey".into()));

        (
            parent_name,
            Arc::new(RwLock::new(parent)),
            child_name,
            Arc::new(RwLock::new(child)),
        )
    }

    fn plan(p: &QualifiedName, ph: &TableHandle, c: &QualifiedName, ch: &TableHandle) -> LockPlan {
        let mut plan = LockPlan::new();
        plan.add(p.clone(), ph.clone(), LockMode::Read, 1);
        plan.add(c.clone(), ch.clone(), LockMode::Read, 1);
        plan
    }

    #[test]
    fn test_build_row_defaults_and_sequences() {
        let mut def = TableDef::new(QualifiedName::new("public", "t"));
        def.add_column(ColumnDef::new("id", DataType::Serial)).unwrap();
        def.add_column(
            ColumnDef::new("status", DataType::Text)
                .with_default(DefaultRule::Value(Value::text("new"))),
        )
        .unwrap();
        def.add_column(ColumnDef::new("note", DataType::Text)).unwrap();

        let mut sequences = HashMap::new();
        let row = build_row(&def, &[2], vec![Value::text("hi")], &mut sequences).unwrap();
        assert_eq!(row, vec![Value::Int(1), Value::text("new"), Value::text("hi")]);
        let row = build_row(&def, &[], vec![], &mut sequences).unwrap();
        assert_eq!(row[0], Value::Int(2));

        let err = build_row(&def, &[0, 1], vec![Value::Int(1)], &mut sequences).unwrap_err();
        assert!(matches!(err, Error::ArityMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn test_insert_duplicate_primary_key() {
        let (p, ph, c, ch) = fixture();
        let plan = plan(&p, &ph, &c, &ch);
        let locked = plan.acquire().unwrap();
        let validator = ConstraintValidator::new(&locked);

        let err = validator
            .validate_insert(&p, &vec![Value::Int(1), Value::text("z")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UniquenessViolation);
        assert!(validator
            .validate_insert(&p, &vec![Value::Int(3), Value::text("c")])
            .is_ok());
    }

    #[test]
    fn test_unique_allows_multiple_nulls() {
        let (p, ph, c, ch) = fixture();
        ph.write().commit_insert(vec![Value::Int(5), Value::Null]);
        let plan = plan(&p, &ph, &c, &ch);
        let locked = plan.acquire().unwrap();
        let validator = ConstraintValidator::new(&locked);
        assert!(validator
            .validate_insert(&p, &vec![Value::Int(6), Value::Null])
            .is_ok());
    }

    #[test]
    fn test_not_null_violation() {
        let (p, ph, c, ch) = fixture();
        let plan = plan(&p, &ph, &c, &ch);
        let locked = plan.acquire().unwrap();
        let validator = ConstraintValidator::new(&locked);
        let err = validator
            .validate_insert(&p, &vec![Value::Null, Value::text("x")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullConstraintViolation);
    }

    #[test]
    fn test_foreign_key_insert() {
        let (p, ph, c, ch) = fixture();
        let plan = plan(&p, &ph, &c, &ch);
        let locked = plan.acquire().unwrap();
        let validator = ConstraintValidator::new(&locked);

        let err = validator
            .validate_insert(&c, &vec![Value::Int(11), Value::Int(9)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
        assert!(validator
            .validate_insert(&c, &vec![Value::Int(11), Value::Int(2)])
            .is_ok());
        // NULL foreign key is exempt.
        assert!(validator
            .validate_insert(&c, &vec![Value::Int(12), Value::Null])
            .is_ok());
    }

    #[test]
    fn test_update_swapping_keys_is_allowed() {
        let (p, ph, c, ch) = fixture();
        // Drop the child reference so key 1 is free to move.
        ph.write().referenced_by.clear();
        let plan = plan(&p, &ph, &c, &ch);
        let locked = plan.acquire().unwrap();
        let validator = ConstraintValidator::new(&locked);

        let updates = vec![
            (1, vec![Value::Int(2), Value::text("a")]),
            (2, vec![Value::Int(1), Value::text("b")]),
        ];
        assert!(validator.validate_update(&p, &updates).is_ok());

        let clash = vec![(1, vec![Value::Int(2), Value::text("a")])];
        assert_eq!(
            validator.validate_update(&p, &clash).unwrap_err().kind(),
            ErrorKind::UniquenessViolation
        );
    }

    #[test]
    fn test_update_of_referenced_key_rejected() {
        let (p, ph, c, ch) = fixture();
        let plan = plan(&p, &ph, &c, &ch);
        let locked = plan.acquire().unwrap();
        let validator = ConstraintValidator::new(&locked);

        let updates = vec![(1, vec![Value::Int(100), Value::text("a")])];
        let err = validator.validate_update(&p, &updates).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);

        // Row 2 is not referenced and may change key.
        let updates = vec![(2, vec![Value::Int(200), Value::text("b")])];
        assert!(validator.validate_update(&p, &updates).is_ok());
    }

    #[test]
    fn test_staged_batch_detects_intra_batch_duplicates() {
        let (p, ph, c, ch) = fixture();
        let plan = plan(&p, &ph, &c, &ch);
        let locked = plan.acquire().unwrap();
        let validator = ConstraintValidator::new(&locked);
        let parent = locked.table(&p).unwrap();

        let mut pending = PendingKeys::default();
        validator
            .validate_staged(parent, &vec![Value::Int(3), Value::text("c")], 1, &mut pending)
            .unwrap();
        let err = validator
            .validate_staged(parent, &vec![Value::Int(3), Value::text("d")], 2, &mut pending)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UniquenessViolation);
    }
}
