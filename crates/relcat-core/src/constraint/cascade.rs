//! Referential actions on delete.
//!
//! Deleting a referenced row triggers the referencing foreign key's
//! on-delete behavior: RESTRICT rejects the delete, CASCADE deletes the
//! referencing rows (recursively) and SET NULL clears the referencing
//! columns. The whole closure is computed before anything is touched, so a
//! delete either applies completely or not at all.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::catalog::{ConstraintDef, DeleteBehavior, QualifiedName};
use crate::error::{ConstraintError, Error, Result};
use crate::storage::{LockedTables, Row, RowId};
use crate::types::Value;

use super::validator::describe_key;

/// A RESTRICT reference found while walking the closure. It only fails the
/// delete if the referencing row survives.
struct RestrictHit {
    child: QualifiedName,
    row_id: RowId,
    constraint: String,
    parent: QualifiedName,
    value: String,
}

/// Everything a delete will do, computed up front.
#[derive(Debug, Default)]
pub struct DeletePlan {
    target: Option<QualifiedName>,
    deletions: BTreeMap<QualifiedName, BTreeSet<RowId>>,
    nullify: BTreeMap<QualifiedName, BTreeMap<RowId, Row>>,
}

/// Row counts of an applied delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Rows removed from the target table.
    pub deleted: usize,
    /// Rows removed from other tables by CASCADE.
    pub cascaded: usize,
    /// Rows whose referencing columns were set to NULL.
    pub nullified: usize,
}

impl DeletePlan {
    /// Compute the closure of deleting `row_ids` from `table`.
    ///
    /// Every table reachable through referencing foreign keys must be in
    /// `locked`; tables touched by CASCADE or SET NULL must be write-locked.
    pub fn build(
        locked: &LockedTables<'_>,
        table: &QualifiedName,
        row_ids: impl IntoIterator<Item = RowId>,
        max_depth: usize,
    ) -> Result<Self> {
        let mut plan = DeletePlan {
            target: Some(table.clone()),
            ..Default::default()
        };
        let mut restrict = Vec::new();
        let mut queue = VecDeque::new();

        for row_id in row_ids {
            if plan.mark_deleted(table, row_id) {
                queue.push_back((table.clone(), row_id, 0usize));
            }
        }

        while let Some((parent_name, row_id, depth)) = queue.pop_front() {
            let parent = locked.table(&parent_name)?;
            let Some(row) = parent.rows.get(row_id) else {
                continue;
            };

            for (child_name, fk_name) in &parent.referenced_by {
                let child = locked.table(child_name)?;
                let Some(ConstraintDef::ForeignKey {
                    name,
                    columns,
                    references_columns,
                    on_delete,
                    ..
                }) = child.def.constraint(fk_name)
                else {
                    continue;
                };
                let Some(key) = parent.def.key_of(row, references_columns) else {
                    continue;
                };

                for child_row_id in child.rows_matching(columns, &key) {
                    if plan.is_deleted(child_name, child_row_id) {
                        continue;
                    }
                    match on_delete {
                        DeleteBehavior::Restrict => restrict.push(RestrictHit {
                            child: child_name.clone(),
                            row_id: child_row_id,
                            constraint: name.clone(),
                            parent: parent_name.clone(),
                            value: describe_key(&parent.def, references_columns, &key),
                        }),
                        DeleteBehavior::Cascade => {
                            if depth + 1 > max_depth {
                                return Err(Error::CascadeDepthExceeded { depth: max_depth });
                            }
                            plan.mark_deleted(child_name, child_row_id);
                            queue.push_back((child_name.clone(), child_row_id, depth + 1));
                        }
                        DeleteBehavior::SetNull => {
                            let base = match plan
                                .nullify
                                .get(child_name)
                                .and_then(|rows| rows.get(&child_row_id))
                            {
                                Some(staged) => staged.clone(),
                                None => match child.rows.get(child_row_id) {
                                    Some(r) => r.clone(),
                                    None => continue,
                                },
                            };
                            let mut cleared = base;
                            for id in columns {
                                let Some(column) = child.def.column_by_id(*id) else {
                                    continue;
                                };
                                if !column.nullable {
                                    return Err(ConstraintError::NullConstraintViolation {
                                        table: child_name.to_string(),
                                        column: column.name.clone(),
                                    }
                                    .into());
                                }
                                if let Some(position) = child.def.position(*id) {
                                    cleared[position] = Value::Null;
                                }
                            }
                            plan.nullify
                                .entry(child_name.clone())
                                .or_default()
                                .insert(child_row_id, cleared);
                        }
                    }
                }
            }
        }

        // Rows that end up deleted need no SET NULL.
        for (table_name, rows) in plan.nullify.iter_mut() {
            if let Some(deleted) = plan.deletions.get(table_name) {
                rows.retain(|row_id, _| !deleted.contains(row_id));
            }
        }
        plan.nullify.retain(|_, rows| !rows.is_empty());

        for hit in restrict {
            if !plan.is_deleted(&hit.child, hit.row_id) {
                return Err(ConstraintError::ForeignKeyViolation {
                    constraint: hit.constraint,
                    table: hit.parent.to_string(),
                    value: hit.value,
                    detail: format!("is still referenced from table \"{}\"", hit.child),
                }
                .into());
            }
        }

        plan.check_nullified_keys(locked)?;
        Ok(plan)
    }

    /// A nullified row may itself be referenced through the key it loses.
    fn check_nullified_keys(&self, locked: &LockedTables<'_>) -> Result<()> {
        for (table_name, rows) in &self.nullify {
            let table = locked.table(table_name)?;
            for (grandchild_name, fk_name) in &table.referenced_by {
                let Ok(grandchild) = locked.table(grandchild_name) else {
                    continue;
                };
                let Some(ConstraintDef::ForeignKey {
                    name,
                    columns,
                    references_columns,
                    ..
                }) = grandchild.def.constraint(fk_name)
                else {
                    continue;
                };
                for (row_id, cleared) in rows {
                    let Some(old_row) = table.rows.get(*row_id) else {
                        continue;
                    };
                    let Some(old_key) = table.def.key_of(old_row, references_columns) else {
                        continue;
                    };
                    if table.def.key_of(cleared, references_columns).as_ref() == Some(&old_key) {
                        continue;
                    }
                    let survivors: HashSet<RowId> = grandchild
                        .rows_matching(columns, &old_key)
                        .into_iter()
                        .filter(|id| !self.is_deleted(grandchild_name, *id))
                        .collect();
                    if !survivors.is_empty() {
                        return Err(ConstraintError::ForeignKeyViolation {
                            constraint: name.clone(),
                            table: table_name.to_string(),
                            value: describe_key(&table.def, references_columns, &old_key),
                            detail: format!(
                                "is still referenced from table \"{}\"",
                                grandchild_name
                            ),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    fn mark_deleted(&mut self, table: &QualifiedName, row_id: RowId) -> bool {
        self.deletions.entry(table.clone()).or_default().insert(row_id)
    }

    fn is_deleted(&self, table: &QualifiedName, row_id: RowId) -> bool {
        self.deletions
            .get(table)
            .map_or(false, |rows| rows.contains(&row_id))
    }

    /// Total number of rows to delete across all tables.
    pub fn deletion_count(&self) -> usize {
        self.deletions.values().map(|rows| rows.len()).sum()
    }

    /// Apply the plan. Every touched table must be write-locked.
    pub fn apply(self, locked: &mut LockedTables<'_>) -> Result<DeleteOutcome> {
        let mut outcome = DeleteOutcome::default();

        for (table_name, rows) in self.nullify {
            let table = locked.table_mut(&table_name)?;
            outcome.nullified += rows.len();
            table.commit_replace_many(rows.into_iter().collect());
        }

        for (table_name, rows) in self.deletions {
            let is_target = self.target.as_ref() == Some(&table_name);
            let table = locked.table_mut(&table_name)?;
            for row_id in rows {
                if table.commit_delete(row_id).is_some() {
                    if is_target {
                        outcome.deleted += 1;
                    } else {
                        outcome.cascaded += 1;
                    }
                }
            }
        }

        if outcome.cascaded > 0 || outcome.nullified > 0 {
            debug!(
                deleted = outcome.deleted,
                cascaded = outcome.cascaded,
                nullified = outcome.nullified,
                "Applied referential actions"
            );
        }
        Ok(outcome)
    }
}
