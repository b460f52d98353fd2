//! Bulk loading.
//!
//! Rows are taken from the source in batches of `bulk_batch_size`. Each batch
//! is built, validated against the table and against the earlier rows of the
//! same batch, and committed under a single lock acquisition. A batch that
//! hits any violation, or is aborted, commits nothing; batches committed
//! before it stay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{Access, Catalog, QualifiedName};
use crate::constraint::{build_row, ConstraintValidator, PendingKeys};
use crate::error::{Error, Result};
use crate::storage::{LockedTables, RowId};
use crate::types::Value;

/// Cancels an in-flight bulk load from another thread.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a handle that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the load to stop. The batch in flight commits nothing.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Whether `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// Summary of a completed load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Rows committed.
    pub rows_loaded: u64,
    /// Batches committed.
    pub batches: u64,
}

/// Loads many rows into one table.
pub struct BulkLoader<'a> {
    catalog: &'a Catalog,
}

impl<'a> BulkLoader<'a> {
    /// Create a loader over `catalog`.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Load rows that carry a value for every column, in column order.
    pub fn load<I>(&self, table: &str, rows: I, abort: &AbortHandle) -> Result<LoadReport>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let result = self.load_inner(table, None, rows.into_iter(), abort);
        self.catalog.observe(result)
    }

    /// Load rows carrying values for `columns` only; other columns take
    /// their defaults.
    pub fn load_columns<I>(
        &self,
        table: &str,
        columns: &[&str],
        rows: I,
        abort: &AbortHandle,
    ) -> Result<LoadReport>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let result = self.load_inner(table, Some(columns), rows.into_iter(), abort);
        self.catalog.observe(result)
    }

    fn load_inner(
        &self,
        table: &str,
        columns: Option<&[&str]>,
        mut rows: impl Iterator<Item = Vec<Value>>,
        abort: &AbortHandle,
    ) -> Result<LoadReport> {
        let name = self.catalog.qualify(table)?;
        self.catalog.table_handle(&name)?;
        let batch_size = self.catalog.config.bulk_batch_size;
        let mut report = LoadReport::default();

        loop {
            let batch: Vec<Vec<Value>> = rows.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let outcome = self.catalog.with_locked(&name, Access::Insert, |locked| {
                self.load_batch(locked, &name, columns, batch, abort, report.rows_loaded)
            });
            match outcome {
                Ok(committed) => {
                    report.rows_loaded += committed;
                    report.batches += 1;
                    self.catalog.metrics.record_bulk_batch(committed);
                    debug!(table = %name, batch = report.batches, rows = committed, "Committed bulk batch");
                }
                Err(err) => {
                    self.catalog.metrics.record_bulk_rejected();
                    if matches!(err, Error::Aborted { .. }) {
                        warn!(table = %name, rows_committed = report.rows_loaded, "Bulk load aborted");
                    } else {
                        warn!(
                            table = %name,
                            rows_committed = report.rows_loaded,
                            error = %err,
                            "Bulk batch rejected"
                        );
                    }
                    return Err(err);
                }
            }
        }

        info!(
            table = %name,
            rows = report.rows_loaded,
            batches = report.batches,
            "Bulk load complete"
        );
        Ok(report)
    }

    /// Validate and commit one batch. Nothing is written unless every row
    /// passes and no abort was requested.
    fn load_batch(
        &self,
        locked: &mut LockedTables<'_>,
        name: &QualifiedName,
        columns: Option<&[&str]>,
        batch: Vec<Vec<Value>>,
        abort: &AbortHandle,
        rows_committed: u64,
    ) -> Result<u64> {
        let aborted = || Error::Aborted { rows_committed };
        let interval = self.catalog.config.abort_check_interval;

        let target = locked.table(name)?;
        let positions: Vec<usize> = match columns {
            None => (0..target.def.columns.len()).collect(),
            Some(columns) => {
                let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
                let mut positions = Vec::with_capacity(names.len());
                for id in target.def.resolve_columns(&names)? {
                    positions.push(target.def.position(id).ok_or_else(|| Error::ColumnNotFound {
                        table: name.to_string(),
                        column: format!("#{}", id),
                    })?);
                }
                positions
            }
        };

        let validator = ConstraintValidator::new(locked);
        let mut sequences = target.sequences.clone();
        let mut pending = PendingKeys::default();
        let mut staged = Vec::with_capacity(batch.len());
        for (i, values) in batch.into_iter().enumerate() {
            if i % interval == 0 && abort.is_aborted() {
                return Err(aborted());
            }
            let row = build_row(&target.def, &positions, values, &mut sequences)?;
            validator.validate_staged(target, &row, i as RowId, &mut pending)?;
            staged.push(row);
        }
        if abort.is_aborted() {
            return Err(aborted());
        }

        let count = staged.len() as u64;
        let target = locked.table_mut(name)?;
        target.sequences = sequences;
        for row in staged {
            target.commit_insert(row);
        }
        Ok(count)
    }
}
