//! Multi-table lock sets.
//!
//! A row mutation that checks constraints across tables needs all of them
//! locked at once. Locks are always taken in table-name order, which rules
//! out deadlocks between any two lock sets. Each planned lock records the
//! table version seen while planning; if any version moved (or the table was
//! dropped) by the time the locks are held, the plan is stale and the caller
//! replans.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::QualifiedName;
use crate::error::{Error, Result};

use super::table::Table;

/// Shared handle to a table.
pub type TableHandle = Arc<RwLock<Table>>;

/// Lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    /// Shared.
    Read,
    /// Exclusive.
    Write,
}

struct PlannedLock {
    handle: TableHandle,
    mode: LockMode,
    version: u64,
}

/// Tables to lock, with the mode and version each was planned against.
#[derive(Default)]
pub struct LockPlan {
    entries: BTreeMap<QualifiedName, PlannedLock>,
}

impl LockPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. Adding the same table twice keeps the stronger mode and
    /// the first observed version.
    pub fn add(&mut self, name: QualifiedName, handle: TableHandle, mode: LockMode, version: u64) {
        self.entries
            .entry(name)
            .and_modify(|p| p.mode = p.mode.max(mode))
            .or_insert(PlannedLock {
                handle,
                mode,
                version,
            });
    }

    /// Whether `name` is already planned.
    pub fn contains(&self, name: &QualifiedName) -> bool {
        self.entries.contains_key(name)
    }

    /// Planned mode for `name`.
    pub fn mode(&self, name: &QualifiedName) -> Option<LockMode> {
        self.entries.get(name).map(|p| p.mode)
    }

    /// Number of planned tables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every lock in name order. Returns `None` when the plan turned
    /// out to be stale.
    pub fn acquire(&self) -> Option<LockedTables<'_>> {
        let mut guards = BTreeMap::new();
        for (name, planned) in &self.entries {
            let guard = match planned.mode {
                LockMode::Read => TableGuard::Read(planned.handle.read()),
                LockMode::Write => TableGuard::Write(planned.handle.write()),
            };
            let table = guard.table();
            if table.dropped || table.version != planned.version {
                return None;
            }
            guards.insert(name.clone(), guard);
        }
        Some(LockedTables { guards })
    }
}

enum TableGuard<'a> {
    Read(RwLockReadGuard<'a, Table>),
    Write(RwLockWriteGuard<'a, Table>),
}

impl TableGuard<'_> {
    fn table(&self) -> &Table {
        match self {
            TableGuard::Read(g) => g,
            TableGuard::Write(g) => g,
        }
    }
}

/// A held lock set.
pub struct LockedTables<'a> {
    guards: BTreeMap<QualifiedName, TableGuard<'a>>,
}

impl<'a> LockedTables<'a> {
    /// Read access to a locked table.
    pub fn table(&self, name: &QualifiedName) -> Result<&Table> {
        self.guards
            .get(name)
            .map(|g| g.table())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Write access to a table locked in write mode.
    pub fn table_mut(&mut self, name: &QualifiedName) -> Result<&mut Table> {
        match self.guards.get_mut(name) {
            Some(TableGuard::Write(g)) => Ok(&mut **g),
            _ => Err(Error::TableNotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableDef;

    fn handle(name: &str) -> (QualifiedName, TableHandle) {
        let qn = QualifiedName::new("public", name);
        let table = Table::new(TableDef::new(qn.clone()));
        (qn, Arc::new(RwLock::new(table)))
    }

    #[test]
    fn test_acquire_and_access() {
        let (a, ha) = handle("a");
        let (b, hb) = handle("b");
        let mut plan = LockPlan::new();
        plan.add(a.clone(), ha, LockMode::Write, 1);
        plan.add(b.clone(), hb, LockMode::Read, 1);

        let mut locked = plan.acquire().unwrap();
        assert!(locked.table(&b).is_ok());
        assert!(locked.table_mut(&a).is_ok());
        assert!(locked.table_mut(&b).is_err());
    }

    #[test]
    fn test_mode_upgrades() {
        let (a, ha) = handle("a");
        let mut plan = LockPlan::new();
        plan.add(a.clone(), ha.clone(), LockMode::Read, 1);
        plan.add(a.clone(), ha, LockMode::Write, 1);
        assert_eq!(plan.mode(&a), Some(LockMode::Write));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_stale_version_detected() {
        let (a, ha) = handle("a");
        let mut plan = LockPlan::new();
        plan.add(a, ha.clone(), LockMode::Read, 1);
        ha.write().bump_version();
        assert!(plan.acquire().is_none());
    }

    #[test]
    fn test_dropped_table_detected() {
        let (a, ha) = handle("a");
        let mut plan = LockPlan::new();
        plan.add(a, ha.clone(), LockMode::Write, 1);
        ha.write().dropped = true;
        assert!(plan.acquire().is_none());
    }
}
