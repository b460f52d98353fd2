//! Row mutations and scans.
//!
//! Each statement runs under the lock set its access pattern needs, checks
//! every constraint against the locked state, then applies. A rejected
//! statement leaves rows, indexes and sequences untouched.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::catalog::{Access, Catalog};
use super::table::TableDef;
use super::view::Predicate;
use crate::constraint::{build_row, ConstraintValidator, DeleteOutcome, DeletePlan};
use crate::error::{Error, Result};
use crate::metrics::MutationType;
use crate::query::{ResultSet, RowFilter};
use crate::storage::{Row, RowId};
use crate::types::Value;

/// `column = value` in an UPDATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Target column.
    pub column: String,
    /// New value.
    pub value: Value,
}

impl Assignment {
    /// Create an assignment.
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl Catalog {
    /// Insert one row given a value for every column, in column order.
    ///
    /// Returns the stored row, with defaults and coercions applied.
    pub fn insert(&self, table: &str, values: Vec<Value>) -> Result<Row> {
        let result = self.insert_inner(table, None, values);
        self.observe(result)
    }

    /// Insert one row given values for the named columns only. Omitted
    /// columns take their default, a fresh sequence value, or NULL.
    pub fn insert_columns(&self, table: &str, columns: &[&str], values: Vec<Value>) -> Result<Row> {
        let result = self.insert_inner(table, Some(columns), values);
        self.observe(result)
    }

    fn insert_inner(&self, table: &str, columns: Option<&[&str]>, values: Vec<Value>) -> Result<Row> {
        let name = self.qualify(table)?;
        let row = self.with_locked(&name, Access::Insert, |locked| {
            let target = locked.table(&name)?;
            let positions = match columns {
                None => (0..target.def.columns.len()).collect(),
                Some(columns) => column_positions(&target.def, columns)?,
            };
            // Sequences only advance once the row is committed.
            let mut sequences = target.sequences.clone();
            let row = build_row(&target.def, &positions, values, &mut sequences)?;
            ConstraintValidator::new(locked).validate_insert(&name, &row)?;

            let target = locked.table_mut(&name)?;
            target.sequences = sequences;
            let row_id = target.commit_insert(row.clone());
            debug!(table = %name, row_id, "Inserted row");
            Ok(row)
        })?;
        self.metrics.record_mutation(MutationType::Insert, 1);
        Ok(row)
    }

    /// Set columns on every row matching `filter`. Returns the number of
    /// rows updated.
    ///
    /// Constraints are checked against the state after the whole statement,
    /// so an update may swap key values between rows.
    pub fn update_where(
        &self,
        table: &str,
        assignments: Vec<Assignment>,
        filter: &[Predicate],
    ) -> Result<usize> {
        let result = self.update_inner(table, assignments, filter);
        self.observe(result)
    }

    fn update_inner(
        &self,
        table: &str,
        assignments: Vec<Assignment>,
        filter: &[Predicate],
    ) -> Result<usize> {
        let name = self.qualify(table)?;
        if assignments.is_empty() {
            return Err(Error::InvalidDefinition("UPDATE without assignments".into()));
        }
        let updated = self.with_locked(&name, Access::Update, |locked| {
            let target = locked.table(&name)?;
            let def = &target.def;

            let mut seen = HashSet::new();
            let mut sets = Vec::with_capacity(assignments.len());
            for assignment in assignments {
                let column = def.require_column(&assignment.column)?;
                if !seen.insert(column.id) {
                    return Err(Error::InvalidDefinition(format!(
                        "multiple assignments to same column \"{}\"",
                        column.name
                    )));
                }
                let position = def.position(column.id).ok_or_else(|| Error::ColumnNotFound {
                    table: name.to_string(),
                    column: column.name.clone(),
                })?;
                sets.push((position, column.coerce(assignment.value)?));
            }

            let filter = RowFilter::bind(def, filter)?;
            let updates: Vec<(RowId, Row)> = target
                .rows
                .iter()
                .filter(|(_, row)| filter.matches(row))
                .map(|(row_id, row)| {
                    let mut new_row = row.clone();
                    for (position, value) in &sets {
                        new_row[*position] = value.clone();
                    }
                    (row_id, new_row)
                })
                .collect();
            if updates.is_empty() {
                return Ok(0);
            }

            ConstraintValidator::new(locked).validate_update(&name, &updates)?;
            let count = updates.len();
            locked.table_mut(&name)?.commit_replace_many(updates);
            Ok(count)
        })?;

        self.metrics.record_mutation(MutationType::Update, updated as u64);
        debug!(table = %name, rows = updated, "Updated rows");
        Ok(updated)
    }

    /// Delete every row matching `filter`, applying the on-delete behavior
    /// of every foreign key that references a deleted row.
    pub fn delete_where(&self, table: &str, filter: &[Predicate]) -> Result<DeleteOutcome> {
        let result = self.delete_inner(table, filter);
        self.observe(result)
    }

    fn delete_inner(&self, table: &str, filter: &[Predicate]) -> Result<DeleteOutcome> {
        let name = self.qualify(table)?;
        let outcome = self.with_locked(&name, Access::Delete, |locked| {
            let target = locked.table(&name)?;
            let filter = RowFilter::bind(&target.def, filter)?;
            let row_ids: Vec<RowId> = target
                .rows
                .iter()
                .filter(|(_, row)| filter.matches(row))
                .map(|(row_id, _)| row_id)
                .collect();
            if row_ids.is_empty() {
                return Ok(DeleteOutcome::default());
            }
            let plan = DeletePlan::build(locked, &name, row_ids, self.config.max_cascade_depth)?;
            plan.apply(locked)
        })?;

        self.metrics.record_mutation(
            MutationType::Delete,
            (outcome.deleted + outcome.cascaded) as u64,
        );
        debug!(
            table = %name,
            deleted = outcome.deleted,
            cascaded = outcome.cascaded,
            nullified = outcome.nullified,
            "Deleted rows"
        );
        Ok(outcome)
    }

    /// Rows of a table matching `filter`, in insertion order.
    pub fn scan(&self, table: &str, filter: &[Predicate]) -> Result<ResultSet> {
        let result = self.qualify(table).and_then(|name| {
            self.with_locked(&name, Access::Read, |locked| {
                let target = locked.table(&name)?;
                let filter = RowFilter::bind(&target.def, filter)?;
                let rows = target
                    .rows
                    .iter()
                    .filter(|(_, row)| filter.matches(row))
                    .map(|(_, row)| row.clone())
                    .collect();
                let columns = target.def.columns.iter().map(|c| c.name.clone()).collect();
                Ok(ResultSet::new(columns, rows))
            })
        });
        self.observe(result)
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        let name = self.qualify(table)?;
        let handle = self.table_handle(&name)?;
        let count = handle.read().row_count();
        Ok(count)
    }
}

/// Storage positions of the named columns, rejecting repeats.
fn column_positions(def: &TableDef, columns: &[&str]) -> Result<Vec<usize>> {
    let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    def.resolve_columns(&names)?
        .into_iter()
        .map(|id| {
            def.position(id).ok_or_else(|| Error::ColumnNotFound {
                table: def.name.to_string(),
                column: format!("#{}", id),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, CompareOp, DeleteBehavior, ForeignKeyTarget};
    use crate::error::ErrorKind;
    use crate::types::DataType;

    fn accounts() -> Catalog {
        let catalog = Catalog::default();
        catalog
            .create_table(
                "accounts",
                vec![
                    ColumnDef::new("id", DataType::Serial).primary_key(),
                    ColumnDef::new("email", DataType::Varchar(20)).unique(),
                    ColumnDef::new("balance", DataType::Integer)
                        .not_null()
                        .with_default(crate::catalog::DefaultRule::Value(Value::Int(0))),
                ],
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_insert_applies_defaults_and_sequence() {
        let catalog = accounts();
        let row = catalog
            .insert_columns("accounts", &["email"], vec![Value::text("a@x")])
            .unwrap();
        assert_eq!(row, vec![Value::Int(1), Value::text("a@x"), Value::Int(0)]);
        let row = catalog
            .insert_columns("accounts", &["email"], vec![Value::text("b@x")])
            .unwrap();
        assert_eq!(row[0], Value::Int(2));
        assert_eq!(catalog.metrics().snapshot().inserts, 2);
    }

    #[test]
    fn test_rejected_insert_does_not_consume_sequence() {
        let catalog = accounts();
        catalog
            .insert_columns("accounts", &["email"], vec![Value::text("a@x")])
            .unwrap();
        let err = catalog
            .insert_columns("accounts", &["email"], vec![Value::text("a@x")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UniquenessViolation);

        let row = catalog
            .insert_columns("accounts", &["email"], vec![Value::text("c@x")])
            .unwrap();
        assert_eq!(row[0], Value::Int(2));
        assert_eq!(catalog.row_count("accounts").unwrap(), 2);
        assert_eq!(catalog.metrics().rejections(ErrorKind::UniquenessViolation), 1);
    }

    #[test]
    fn test_insert_errors() {
        let catalog = accounts();
        let err = catalog.insert("accounts", vec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);

        let err = catalog
            .insert_columns("accounts", &["email"], vec![Value::text("much-too-long@example.com")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueTooLong);

        let err = catalog
            .insert_columns("accounts", &["nope"], vec![Value::Int(1)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);

        let err = catalog.insert("missing", vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TableNotFound);
    }

    #[test]
    fn test_update_where() {
        let catalog = accounts();
        for email in ["a@x", "b@x", "c@x"] {
            catalog
                .insert_columns("accounts", &["email"], vec![Value::text(email)])
                .unwrap();
        }
        let updated = catalog
            .update_where(
                "accounts",
                vec![Assignment::new("balance", 10)],
                &[Predicate::compare("id", CompareOp::GtEq, 2)],
            )
            .unwrap();
        assert_eq!(updated, 2);

        let rs = catalog
            .scan("accounts", &[Predicate::equals("balance", 10)])
            .unwrap();
        assert_eq!(rs.column("email").unwrap(), vec![&Value::text("b@x"), &Value::text("c@x")]);
    }

    #[test]
    fn test_update_rejections() {
        let catalog = accounts();
        for email in ["a@x", "b@x"] {
            catalog
                .insert_columns("accounts", &["email"], vec![Value::text(email)])
                .unwrap();
        }
        let err = catalog
            .update_where("accounts", vec![Assignment::new("email", "same@x")], &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UniquenessViolation);

        let err = catalog
            .update_where(
                "accounts",
                vec![Assignment::new("balance", 1), Assignment::new("BALANCE", 2)],
                &[],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);

        let err = catalog
            .update_where("accounts", vec![Assignment::new("balance", Value::Null)], &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NullConstraintViolation);

        let rs = catalog.scan("accounts", &[]).unwrap();
        assert_eq!(rs.column("email").unwrap(), vec![&Value::text("a@x"), &Value::text("b@x")]);
    }

    #[test]
    fn test_delete_where_cascades() {
        let catalog = accounts();
        catalog
            .create_table(
                "sessions",
                vec![
                    ColumnDef::new("id", DataType::Serial).primary_key(),
                    ColumnDef::new("account_id", DataType::BigInt).references(
                        ForeignKeyTarget::primary_key_of("accounts")
                            .with_on_delete(DeleteBehavior::Cascade),
                    ),
                ],
            )
            .unwrap();
        catalog
            .insert_columns("accounts", &["email"], vec![Value::text("a@x")])
            .unwrap();
        catalog
            .insert_columns("sessions", &["account_id"], vec![Value::Int(1)])
            .unwrap();
        catalog
            .insert_columns("sessions", &["account_id"], vec![Value::Int(1)])
            .unwrap();

        let outcome = catalog
            .delete_where("accounts", &[Predicate::equals("id", 1)])
            .unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome {
                deleted: 1,
                cascaded: 2,
                nullified: 0
            }
        );
        assert_eq!(catalog.row_count("sessions").unwrap(), 0);
    }

    #[test]
    fn test_scan_filter_unknown_column() {
        let catalog = accounts();
        let err = catalog
            .scan("accounts", &[Predicate::equals("nope", 1)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
    }
}
