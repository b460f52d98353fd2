//! Catalog state and lock-set management.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::constraint::{ConstraintDef, DeleteBehavior};
use super::name::QualifiedName;
use super::view::{RelationRef, ViewDef};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::metrics::{EngineMetrics, SharedMetrics};
use crate::storage::{LockMode, LockPlan, LockedTables, TableHandle};

/// What a row operation is about to do with its target table. Decides which
/// neighbouring tables join the lock set, and in which mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Read the target only.
    Read,
    /// Insert into the target; parents of its foreign keys are read.
    Insert,
    /// Update the target; parents and referencing children are read.
    Update,
    /// Delete from the target; referencing tables join per their on-delete
    /// behavior, recursively through CASCADE.
    Delete,
}

/// The schema catalog.
///
/// Tables live behind their own locks in a concurrent map, so row operations
/// on unrelated tables never contend. Catalog mutations serialize on a DDL
/// mutex and only write-lock the tables they alter.
pub struct Catalog {
    pub(crate) config: EngineConfig,
    pub(crate) tables: DashMap<QualifiedName, TableHandle>,
    pub(crate) views: DashMap<QualifiedName, Arc<ViewDef>>,
    pub(crate) graph: RwLock<DependencyGraph>,
    pub(crate) ddl: Mutex<()>,
    pub(crate) metrics: SharedMetrics,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tables: DashMap::new(),
            views: DashMap::new(),
            graph: RwLock::new(DependencyGraph::new()),
            ddl: Mutex::new(()),
            metrics: Arc::new(EngineMetrics::new()),
        })
    }

    /// The configuration this catalog runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine counters.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// A copy of the dependency graph.
    pub fn dependency_graph(&self) -> DependencyGraph {
        self.graph.read().clone()
    }

    /// Resolve a possibly unqualified name against the default schema.
    pub fn qualify(&self, raw: &str) -> Result<QualifiedName> {
        QualifiedName::parse(raw, &self.config.default_schema)
    }

    /// Whether a table exists.
    pub fn has_table(&self, name: &str) -> bool {
        self.qualify(name)
            .map(|qn| self.tables.contains_key(&qn))
            .unwrap_or(false)
    }

    /// Whether a view exists.
    pub fn has_view(&self, name: &str) -> bool {
        self.qualify(name)
            .map(|qn| self.views.contains_key(&qn))
            .unwrap_or(false)
    }

    /// Remove every table, view and constraint.
    pub fn drop_all(&self) {
        let _ddl = self.ddl.lock();
        let names: Vec<QualifiedName> = self.tables.iter().map(|e| e.key().clone()).collect();
        for name in &names {
            if let Some((_, handle)) = self.tables.remove(name) {
                handle.write().dropped = true;
            }
        }
        let views = self.views.len();
        self.views.clear();
        self.graph.write().clear();
        self.metrics.record_ddl(false);
        info!(tables = names.len(), views, "Dropped all catalog objects");
    }

    pub(crate) fn table_handle(&self, name: &QualifiedName) -> Result<TableHandle> {
        self.tables
            .get(name)
            .map(|h| h.value().clone())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub(crate) fn view_def(&self, name: &QualifiedName) -> Result<Arc<ViewDef>> {
        self.views
            .get(name)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::ViewNotFound(name.to_string()))
    }

    /// Record a rejected operation before handing the error back.
    pub(crate) fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.metrics.record_rejection(err.kind());
        }
        result
    }

    /// Run `f` with the lock set `access` needs on `target`.
    ///
    /// The set is planned from table metadata, taken in name order, then
    /// revalidated against the versions seen while planning. A concurrent
    /// catalog change in between makes the attempt start over.
    pub(crate) fn with_locked<T>(
        &self,
        target: &QualifiedName,
        access: Access,
        f: impl FnOnce(&mut LockedTables<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_planned(target, || self.plan_access(target, access), f)
    }

    /// Run `f` with read locks on every base table `view` reads from.
    pub(crate) fn with_view_locked<T>(
        &self,
        view: &ViewDef,
        f: impl FnOnce(&mut LockedTables<'_>) -> Result<T>,
    ) -> Result<T> {
        self.with_planned(&view.name, || self.plan_view(view), f)
    }

    /// Run `f` holding explicit locks. Used by catalog mutations, which
    /// already hold the DDL mutex, so versions cannot move underneath.
    pub(crate) fn with_tables<T>(
        &self,
        tables: &BTreeMap<QualifiedName, LockMode>,
        f: impl FnOnce(&mut LockedTables<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut plan = LockPlan::new();
        for (name, mode) in tables {
            let (handle, version) = self
                .snapshot(name)
                .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
            plan.add(name.clone(), handle, *mode, version);
        }
        let mut locked = plan
            .acquire()
            .ok_or_else(|| Error::ConcurrentSchemaChange(format_names(tables.keys())))?;
        f(&mut locked)
    }

    fn with_planned<T>(
        &self,
        label: &QualifiedName,
        planner: impl Fn() -> Result<Option<LockPlan>>,
        f: impl FnOnce(&mut LockedTables<'_>) -> Result<T>,
    ) -> Result<T> {
        for attempt in 0..self.config.lock_retry_limit {
            let Some(plan) = planner()? else {
                debug!(relation = %label, attempt, "Lock plan raced a catalog change");
                continue;
            };
            if let Some(mut locked) = plan.acquire() {
                return f(&mut locked);
            }
            debug!(relation = %label, attempt, "Lock set went stale, replanning");
        }
        Err(Error::ConcurrentSchemaChange(label.to_string()))
    }

    /// Handle and current version of a table. Takes the table's lock only
    /// briefly, never while holding another one.
    fn snapshot(&self, name: &QualifiedName) -> Option<(TableHandle, u64)> {
        let handle = self.tables.get(name)?.value().clone();
        let version = handle.read().version;
        Some((handle, version))
    }

    fn plan_access(&self, target: &QualifiedName, access: Access) -> Result<Option<LockPlan>> {
        let handle = self.table_handle(target)?;
        let mut plan = LockPlan::new();

        let (version, parents, children) = {
            let table = handle.read();
            let parents: Vec<QualifiedName> = table
                .def
                .foreign_keys()
                .filter_map(|fk| match fk {
                    ConstraintDef::ForeignKey {
                        references_table, ..
                    } => Some(references_table.clone()),
                    _ => None,
                })
                .collect();
            let children: Vec<QualifiedName> =
                table.referenced_by.iter().map(|(c, _)| c.clone()).collect();
            (table.version, parents, children)
        };

        match access {
            Access::Read => {
                plan.add(target.clone(), handle, LockMode::Read, version);
                return Ok(Some(plan));
            }
            Access::Insert | Access::Update => {
                plan.add(target.clone(), handle, LockMode::Write, version);
                let mut neighbours = parents;
                if access == Access::Update {
                    neighbours.extend(children);
                }
                for name in neighbours {
                    if plan.contains(&name) {
                        continue;
                    }
                    let Some((h, v)) = self.snapshot(&name) else {
                        return Ok(None);
                    };
                    plan.add(name, h, LockMode::Read, v);
                }
            }
            Access::Delete => {
                plan.add(target.clone(), handle, LockMode::Write, version);
                let mut expanded = HashSet::new();
                let mut queue = vec![target.clone()];
                while let Some(name) = queue.pop() {
                    if !expanded.insert(name.clone()) {
                        continue;
                    }
                    let Some((h, _)) = self.snapshot(&name) else {
                        return Ok(None);
                    };
                    let referencing: Vec<(QualifiedName, String)> =
                        h.read().referenced_by.iter().cloned().collect();

                    for (child, fk_name) in referencing {
                        let Some((ch, cv)) = self.snapshot(&child) else {
                            return Ok(None);
                        };
                        let (on_delete, grandchildren) = {
                            let c = ch.read();
                            let on_delete = match c.def.constraint(&fk_name) {
                                Some(ConstraintDef::ForeignKey { on_delete, .. }) => *on_delete,
                                _ => return Ok(None),
                            };
                            let grandchildren: BTreeSet<QualifiedName> =
                                c.referenced_by.iter().map(|(g, _)| g.clone()).collect();
                            (on_delete, grandchildren)
                        };
                        match on_delete {
                            DeleteBehavior::Restrict => {
                                plan.add(child, ch, LockMode::Read, cv);
                            }
                            DeleteBehavior::Cascade => {
                                plan.add(child.clone(), ch, LockMode::Write, cv);
                                queue.push(child);
                            }
                            DeleteBehavior::SetNull => {
                                plan.add(child, ch, LockMode::Write, cv);
                                for grandchild in grandchildren {
                                    if plan.contains(&grandchild) {
                                        continue;
                                    }
                                    let Some((gh, gv)) = self.snapshot(&grandchild) else {
                                        return Ok(None);
                                    };
                                    plan.add(grandchild, gh, LockMode::Read, gv);
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(Some(plan))
    }

    fn plan_view(&self, view: &ViewDef) -> Result<Option<LockPlan>> {
        let mut plan = LockPlan::new();
        for name in self.base_tables(view)? {
            let Some((handle, version)) = self.snapshot(&name) else {
                return Ok(None);
            };
            plan.add(name, handle, LockMode::Read, version);
        }
        Ok(Some(plan))
    }

    /// Every table a view reads from, directly or through other views.
    pub(crate) fn base_tables(&self, view: &ViewDef) -> Result<BTreeSet<QualifiedName>> {
        let mut tables = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut pending: Vec<RelationRef> = view.relations().into_iter().cloned().collect();
        while let Some(relation) = pending.pop() {
            match relation {
                RelationRef::Table(name) => {
                    tables.insert(name);
                }
                RelationRef::View(name) => {
                    if seen.insert(name.clone()) {
                        let inner = self.view_def(&name)?;
                        pending.extend(inner.relations().into_iter().cloned());
                    }
                }
            }
        }
        Ok(tables)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            tables: DashMap::new(),
            views: DashMap::new(),
            graph: RwLock::new(DependencyGraph::new()),
            ddl: Mutex::new(()),
            metrics: Arc::new(EngineMetrics::new()),
        }
    }
}

fn format_names<'a>(names: impl Iterator<Item = &'a QualifiedName>) -> String {
    names.map(|n| n.to_string()).collect::<Vec<_>>().join(", ")
}
