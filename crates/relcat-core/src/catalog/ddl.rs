//! Table and constraint DDL.
//!
//! Every operation here holds the DDL mutex for its whole duration, resolves
//! and validates against current state first, and only then mutates, so a
//! rejected operation leaves the catalog exactly as it was.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::catalog::Catalog;
use super::column::{ColumnDef, ColumnId, DefaultRule};
use super::constraint::{ConstraintDef, ConstraintKind, NewConstraint};
use super::name::{normalize_ident, QualifiedName};
use super::table::TableDef;
use crate::constraint::{describe_key, UniqueIndex};
use crate::error::{ConstraintError, Error, Result};
use crate::graph::{DependencyEdge, DependencyGraph, DependencyKind, ObjectRef};
use crate::storage::{LockMode, Table};
use crate::types::Value;

impl Catalog {
    /// Create an empty table.
    ///
    /// Inline `primary_key`/`unique`/`references` markers on the columns are
    /// turned into constraints.
    pub fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<QualifiedName> {
        self.create_table_with(name, columns, Vec::new())
    }

    /// Create an empty table with additional table-level constraints.
    pub fn create_table_with(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
        constraints: Vec<NewConstraint>,
    ) -> Result<QualifiedName> {
        let result = self.create_table_inner(name, columns, constraints);
        self.observe(result)
    }

    fn create_table_inner(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
        constraints: Vec<NewConstraint>,
    ) -> Result<QualifiedName> {
        let name = self.qualify(name)?;
        let _ddl = self.ddl.lock();
        self.ensure_name_free(&name)?;

        let mut def = TableDef::new(name.clone());
        let mut requested = Vec::new();
        for column in columns {
            requested.extend(inline_constraints(&column)?);
            def.add_column(column.without_inline_constraints())?;
        }
        requested.extend(constraints);
        // Keys first so foreign keys into this very table can find them.
        requested.sort_by_key(|c| c.kind == ConstraintKind::ForeignKey);

        let mut table = Table::new(def);
        let mut taken = self.constraint_names_in(&name.schema);
        let mut foreign_keys = Vec::new();
        for request in requested {
            let constraint = self.resolve_constraint(&table.def, request, &taken)?;
            taken.insert(constraint.name().to_string());
            if constraint.is_key() {
                let index = prepare_key(&table, &constraint)?;
                install_key(&mut table, constraint, index);
            } else {
                foreign_keys.push(constraint);
            }
        }

        let mut graph = self.graph.read().clone();
        let mut parents = BTreeMap::new();
        for fk in &foreign_keys {
            if let ConstraintDef::ForeignKey {
                references_table, ..
            } = fk
            {
                add_fk_edge(&mut graph, &name, fk)?;
                if references_table == &name {
                    table
                        .referenced_by
                        .insert((name.clone(), fk.name().to_string()));
                } else {
                    parents.insert(references_table.clone(), LockMode::Write);
                }
            }
        }
        table.def.constraints.extend(foreign_keys.iter().cloned());

        self.with_tables(&parents, |locked| {
            for fk in &foreign_keys {
                if let ConstraintDef::ForeignKey {
                    references_table, ..
                } = fk
                {
                    if references_table != &name {
                        let parent = locked.table_mut(references_table)?;
                        parent
                            .referenced_by
                            .insert((name.clone(), fk.name().to_string()));
                        parent.bump_version();
                    }
                }
            }
            self.tables
                .insert(name.clone(), Arc::new(RwLock::new(table)));
            Ok(())
        })?;
        *self.graph.write() = graph;

        self.metrics.record_ddl(false);
        info!(table = %name, foreign_keys = foreign_keys.len(), "Created table");
        Ok(name)
    }

    /// Append a column to a table.
    ///
    /// Existing rows are backfilled with the column default (or fresh
    /// sequence values). `constraint` attaches a PRIMARY KEY, UNIQUE or
    /// FOREIGN KEY (target taken from the column's `references`) over the
    /// new column.
    pub fn alter_table_add_column(
        &self,
        table: &str,
        column: ColumnDef,
        constraint: Option<ConstraintKind>,
    ) -> Result<()> {
        let result = self.add_column_inner(table, column, constraint);
        self.observe(result)
    }

    fn add_column_inner(
        &self,
        table: &str,
        column: ColumnDef,
        constraint: Option<ConstraintKind>,
    ) -> Result<()> {
        let name = self.qualify(table)?;
        let _ddl = self.ddl.lock();
        let handle = self.table_handle(&name)?;
        let current = handle.read().def.clone();

        let mut column = column;
        match constraint {
            Some(ConstraintKind::PrimaryKey) => column = column.primary_key(),
            Some(ConstraintKind::Unique) => column = column.unique(),
            Some(ConstraintKind::ForeignKey) if column.references.is_none() => {
                return Err(Error::InvalidDefinition(format!(
                    "foreign key column \"{}\" needs a referenced table",
                    column.name
                )));
            }
            _ => {}
        }
        if column.primary_key && current.primary_key().is_some() {
            return Err(Error::MultiplePrimaryKeys(name.to_string()));
        }

        let column_name = normalize_ident(&column.name);
        let mut requested = inline_constraints(&column)?;
        requested.sort_by_key(|c| c.kind == ConstraintKind::ForeignKey);
        let mut def = current;
        let id = def.add_column(column.without_inline_constraints())?;

        let mut taken = self.constraint_names_in(&name.schema);
        let mut resolved = Vec::new();
        for request in requested {
            let constraint = self.resolve_constraint(&def, request, &taken)?;
            taken.insert(constraint.name().to_string());
            resolved.push(constraint);
        }

        let mut locks = BTreeMap::from([(name.clone(), LockMode::Write)]);
        for fk in resolved.iter().filter(|c| c.is_foreign_key()) {
            if let ConstraintDef::ForeignKey {
                references_table, ..
            } = fk
            {
                locks.insert(references_table.clone(), LockMode::Write);
            }
        }

        let mut graph = self.graph.read().clone();
        for fk in resolved.iter().filter(|c| c.is_foreign_key()) {
            add_fk_edge(&mut graph, &name, fk)?;
        }

        self.with_tables(&locks, |locked| {
            let existing = locked.table(&name)?;
            let mut staged = existing.clone();
            staged.def = def;
            backfill_column(&mut staged, id)?;

            for constraint in &resolved {
                if constraint.is_key() {
                    let index = prepare_key(&staged, constraint)?;
                    install_key(&mut staged, constraint.clone(), index);
                }
            }
            for fk in resolved.iter().filter(|c| c.is_foreign_key()) {
                if let ConstraintDef::ForeignKey {
                    references_table, ..
                } = fk
                {
                    if references_table == &name {
                        check_orphans(&staged, &staged, fk)?;
                        staged
                            .referenced_by
                            .insert((name.clone(), fk.name().to_string()));
                    } else {
                        check_orphans(&staged, locked.table(references_table)?, fk)?;
                    }
                    staged.def.constraints.push(fk.clone());
                }
            }

            staged.bump_version();
            *locked.table_mut(&name)? = staged;
            for fk in resolved.iter().filter(|c| c.is_foreign_key()) {
                if let ConstraintDef::ForeignKey {
                    references_table, ..
                } = fk
                {
                    if references_table != &name {
                        let parent = locked.table_mut(references_table)?;
                        parent
                            .referenced_by
                            .insert((name.clone(), fk.name().to_string()));
                        parent.bump_version();
                    }
                }
            }
            Ok(())
        })?;
        *self.graph.write() = graph;

        self.metrics.record_ddl(false);
        info!(table = %name, column = %column_name, "Added column");
        Ok(())
    }

    /// Remove a column.
    ///
    /// Constraints covering the column go with it, as do foreign keys that
    /// referenced a key that goes. Views bound to the column keep their
    /// definition; reads of that one column fail from now on.
    pub fn alter_table_drop_column(&self, table: &str, column: &str) -> Result<()> {
        let result = self.drop_column_inner(table, column);
        self.observe(result)
    }

    fn drop_column_inner(&self, table: &str, column: &str) -> Result<()> {
        let name = self.qualify(table)?;
        let _ddl = self.ddl.lock();
        let handle = self.table_handle(&name)?;
        let (def, referenced_by) = {
            let t = handle.read();
            (t.def.clone(), t.referenced_by.clone())
        };
        let id = def.require_column(column)?.id;

        let removed: Vec<ConstraintDef> = def
            .constraints
            .iter()
            .filter(|c| c.covers(id))
            .cloned()
            .collect();
        let removed_keys: HashSet<&str> = removed
            .iter()
            .filter(|c| c.is_key())
            .map(|c| c.name())
            .collect();
        let removed_own: HashSet<&str> = removed.iter().map(|c| c.name()).collect();
        let orphaned = self.foreign_keys_on(&name, &referenced_by, &removed_keys)?
            .into_iter()
            .filter(|(child, fk)| !(child == &name && removed_own.contains(fk.as_str())))
            .collect::<Vec<_>>();

        let mut locks = BTreeMap::from([(name.clone(), LockMode::Write)]);
        for (child, _) in &orphaned {
            locks.insert(child.clone(), LockMode::Write);
        }
        for fk in removed.iter().filter(|c| c.is_foreign_key()) {
            if let ConstraintDef::ForeignKey {
                references_table, ..
            } = fk
            {
                locks.insert(references_table.clone(), LockMode::Write);
            }
        }

        let mut graph = self.graph.read().clone();
        for fk in removed.iter().filter(|c| c.is_foreign_key()) {
            graph.remove_object(&ObjectRef::constraint(name.clone(), fk.name()));
        }
        for (child, fk) in &orphaned {
            graph.remove_object(&ObjectRef::constraint(child.clone(), fk.as_str()));
        }

        self.with_tables(&locks, |locked| {
            {
                let t = locked.table_mut(&name)?;
                if let Some((position, constraints)) = t.def.remove_column(id) {
                    t.rows.remove_column(position);
                    for c in &constraints {
                        t.indexes.remove(c.name());
                    }
                }
                t.sequences.remove(&id);
                t.bump_version();
            }
            for fk in removed.iter().filter(|c| c.is_foreign_key()) {
                if let ConstraintDef::ForeignKey {
                    references_table, ..
                } = fk
                {
                    let parent = locked.table_mut(references_table)?;
                    parent
                        .referenced_by
                        .remove(&(name.clone(), fk.name().to_string()));
                    parent.bump_version();
                }
            }
            for (child_name, fk) in &orphaned {
                let child = locked.table_mut(child_name)?;
                child.def.constraints.retain(|c| c.name() != fk);
                child.bump_version();
                locked
                    .table_mut(&name)?
                    .referenced_by
                    .remove(&(child_name.clone(), fk.clone()));
            }
            Ok(())
        })?;
        *self.graph.write() = graph;

        self.metrics.record_ddl(!orphaned.is_empty());
        info!(
            table = %name,
            column = %normalize_ident(column),
            constraints_removed = removed.len() + orphaned.len(),
            "Dropped column"
        );
        Ok(())
    }

    /// Attach a constraint to an existing table and return its name.
    ///
    /// PRIMARY KEY and UNIQUE are checked against the rows already present;
    /// a PRIMARY KEY also makes its columns NOT NULL. A FOREIGN KEY needs a
    /// PRIMARY KEY or UNIQUE on the referenced columns and no orphaned rows.
    pub fn add_constraint(&self, table: &str, constraint: NewConstraint) -> Result<String> {
        let result = self.add_constraint_inner(table, constraint);
        self.observe(result)
    }

    fn add_constraint_inner(&self, table: &str, request: NewConstraint) -> Result<String> {
        let name = self.qualify(table)?;
        let _ddl = self.ddl.lock();
        let handle = self.table_handle(&name)?;
        let def = handle.read().def.clone();

        let taken = self.constraint_names_in(&name.schema);
        let constraint = self.resolve_constraint(&def, request, &taken)?;
        let constraint_name = constraint.name().to_string();

        let mut locks = BTreeMap::from([(name.clone(), LockMode::Write)]);
        let mut graph = None;
        if let ConstraintDef::ForeignKey {
            references_table, ..
        } = &constraint
        {
            locks.insert(references_table.clone(), LockMode::Write);
            let mut g = self.graph.read().clone();
            add_fk_edge(&mut g, &name, &constraint)?;
            graph = Some(g);
        }

        self.with_tables(&locks, |locked| {
            match &constraint {
                ConstraintDef::ForeignKey {
                    references_table, ..
                } => {
                    let child = locked.table(&name)?;
                    check_orphans(child, locked.table(references_table)?, &constraint)?;

                    let child = locked.table_mut(&name)?;
                    child.def.constraints.push(constraint.clone());
                    child.bump_version();
                    let parent = locked.table_mut(references_table)?;
                    parent
                        .referenced_by
                        .insert((name.clone(), constraint_name.clone()));
                    if references_table != &name {
                        parent.bump_version();
                    }
                }
                _ => {
                    let t = locked.table_mut(&name)?;
                    let index = prepare_key(t, &constraint)?;
                    install_key(t, constraint.clone(), index);
                    t.bump_version();
                }
            }
            Ok(())
        })?;
        if let Some(graph) = graph {
            *self.graph.write() = graph;
        }

        self.metrics.record_ddl(false);
        info!(table = %name, constraint = %constraint_name, "Added constraint");
        Ok(constraint_name)
    }

    /// Remove a constraint and return the removed objects.
    ///
    /// A PRIMARY KEY or UNIQUE constraint that foreign keys reference can
    /// only be dropped with `cascade`, which drops those foreign keys too.
    pub fn drop_constraint(
        &self,
        table: &str,
        constraint: &str,
        cascade: bool,
    ) -> Result<Vec<ObjectRef>> {
        let result = self.drop_constraint_inner(table, constraint, cascade);
        self.observe(result)
    }

    fn drop_constraint_inner(
        &self,
        table: &str,
        constraint: &str,
        cascade: bool,
    ) -> Result<Vec<ObjectRef>> {
        let name = self.qualify(table)?;
        let constraint = normalize_ident(constraint);
        let _ddl = self.ddl.lock();
        let handle = self.table_handle(&name)?;
        let (target, referenced_by) = {
            let t = handle.read();
            let target = t
                .def
                .constraint(&constraint)
                .cloned()
                .ok_or_else(|| Error::ConstraintNotFound {
                    table: name.to_string(),
                    name: constraint.clone(),
                })?;
            (target, t.referenced_by.clone())
        };

        let dependents = if target.is_key() {
            self.foreign_keys_on(&name, &referenced_by, &HashSet::from([constraint.as_str()]))?
        } else {
            Vec::new()
        };
        if !dependents.is_empty() && !cascade {
            warn!(table = %name, constraint = %constraint, "Refusing to drop referenced key");
            return Err(Error::DependencyExists {
                object: format!("constraint {} on table {}", constraint, name),
                dependents: dependents
                    .iter()
                    .map(|(c, fk)| format!("constraint {} on table {}", fk, c))
                    .collect(),
            });
        }

        let mut locks = BTreeMap::from([(name.clone(), LockMode::Write)]);
        for (child, _) in &dependents {
            locks.insert(child.clone(), LockMode::Write);
        }
        if let ConstraintDef::ForeignKey {
            references_table, ..
        } = &target
        {
            locks.insert(references_table.clone(), LockMode::Write);
        }

        let mut removed: Vec<ObjectRef> = dependents
            .iter()
            .map(|(c, fk)| ObjectRef::constraint(c.clone(), fk.as_str()))
            .collect();
        removed.push(ObjectRef::constraint(name.clone(), constraint.as_str()));
        let mut graph = self.graph.read().clone();
        for object in &removed {
            graph.remove_object(object);
        }

        self.with_tables(&locks, |locked| {
            for (child_name, fk) in &dependents {
                let child = locked.table_mut(child_name)?;
                child.def.constraints.retain(|c| c.name() != fk);
                child.bump_version();
                locked
                    .table_mut(&name)?
                    .referenced_by
                    .remove(&(child_name.clone(), fk.clone()));
            }
            if let ConstraintDef::ForeignKey {
                references_table, ..
            } = &target
            {
                let parent = locked.table_mut(references_table)?;
                parent
                    .referenced_by
                    .remove(&(name.clone(), constraint.clone()));
                parent.bump_version();
            }
            let t = locked.table_mut(&name)?;
            t.def.constraints.retain(|c| c.name() != constraint);
            t.indexes.remove(&constraint);
            t.bump_version();
            Ok(())
        })?;
        *self.graph.write() = graph;

        self.metrics.record_ddl(!dependents.is_empty());
        info!(table = %name, constraint = %constraint, cascaded = dependents.len(), "Dropped constraint");
        Ok(removed)
    }

    /// Drop a table and return every removed object.
    ///
    /// Without `cascade` the drop fails while any view or foreign key of
    /// another table depends on it. With `cascade` those views (and views
    /// on them) are dropped and the foreign keys are removed from their
    /// tables; the referencing tables themselves survive.
    pub fn drop_table(&self, name: &str, cascade: bool) -> Result<Vec<ObjectRef>> {
        let result = self.drop_table_inner(name, cascade);
        self.observe(result)
    }

    fn drop_table_inner(&self, name: &str, cascade: bool) -> Result<Vec<ObjectRef>> {
        let name = self.qualify(name)?;
        let _ddl = self.ddl.lock();
        let handle = self.table_handle(&name)?;
        let def = handle.read().def.clone();

        let object = ObjectRef::table(name.clone());
        let mut graph = self.graph.read().clone();
        let external: Vec<ObjectRef> = graph
            .dependents_of(&object)
            .into_iter()
            .map(|(dependent, _)| dependent)
            .filter(|dependent| !dependent.is_part_of(&name))
            .collect();
        if !external.is_empty() && !cascade {
            warn!(table = %name, dependents = external.len(), "Refusing to drop table with dependents");
            return Err(Error::DependencyExists {
                object: format!("table {}", name),
                dependents: external.iter().map(|d| d.to_string()).collect(),
            });
        }

        let closure = graph.cascade_closure(&object);
        let mut views = Vec::new();
        let mut foreign_keys = Vec::new();
        for dependent in &closure {
            match dependent {
                ObjectRef::View { name: view } => views.push(view.clone()),
                ObjectRef::Constraint { table, name: fk } if table != &name => {
                    foreign_keys.push((table.clone(), fk.clone()))
                }
                _ => {}
            }
        }
        let parents: BTreeSet<QualifiedName> = def
            .foreign_keys()
            .filter_map(|fk| match fk {
                ConstraintDef::ForeignKey {
                    references_table, ..
                } if references_table != &name => Some(references_table.clone()),
                _ => None,
            })
            .collect();

        let mut locks = BTreeMap::from([(name.clone(), LockMode::Write)]);
        for (child, _) in &foreign_keys {
            locks.insert(child.clone(), LockMode::Write);
        }
        for parent in &parents {
            locks.insert(parent.clone(), LockMode::Write);
        }

        for dependent in &closure {
            graph.remove_object(dependent);
        }
        for fk in def.foreign_keys() {
            graph.remove_object(&ObjectRef::constraint(name.clone(), fk.name()));
        }

        self.with_tables(&locks, |locked| {
            for (child_name, fk) in &foreign_keys {
                let child = locked.table_mut(child_name)?;
                child.def.constraints.retain(|c| c.name() != fk);
                child.bump_version();
            }
            for parent_name in &parents {
                let parent = locked.table_mut(parent_name)?;
                parent.referenced_by.retain(|(child, _)| child != &name);
                parent.bump_version();
            }
            let t = locked.table_mut(&name)?;
            t.dropped = true;
            t.bump_version();
            self.tables.remove(&name);
            for view in &views {
                self.views.remove(view);
            }
            Ok(())
        })?;
        *self.graph.write() = graph;

        let removed: Vec<ObjectRef> = closure
            .into_iter()
            .filter(|o| !matches!(o, ObjectRef::Constraint { table, .. } if table == &name))
            .collect();
        self.metrics.record_ddl(removed.len() > 1);
        info!(
            table = %name,
            cascade,
            removed = ?removed.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
            "Dropped table"
        );
        Ok(removed)
    }

    /// Fail if a table or view already uses `name`.
    pub(crate) fn ensure_name_free(&self, name: &QualifiedName) -> Result<()> {
        if self.tables.contains_key(name) || self.views.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Every constraint (and so index) name in a schema. Takes each table's
    /// lock briefly; callers must not hold table locks.
    fn constraint_names_in(&self, schema: &str) -> HashSet<String> {
        let handles: Vec<_> = self
            .tables
            .iter()
            .filter(|e| e.key().schema == schema)
            .map(|e| e.value().clone())
            .collect();
        let mut names = HashSet::new();
        for handle in handles {
            let t = handle.read();
            names.extend(t.def.constraints.iter().map(|c| c.name().to_string()));
        }
        names
    }

    /// Foreign keys pointing at any of `keys` on `table`.
    fn foreign_keys_on(
        &self,
        table: &QualifiedName,
        referenced_by: &BTreeSet<(QualifiedName, String)>,
        keys: &HashSet<&str>,
    ) -> Result<Vec<(QualifiedName, String)>> {
        let mut found = Vec::new();
        for (child_name, fk_name) in referenced_by {
            let child = self.table_handle(child_name)?;
            let child = child.read();
            if let Some(ConstraintDef::ForeignKey {
                references_table,
                references_key,
                ..
            }) = child.def.constraint(fk_name)
            {
                if references_table == table && keys.contains(references_key.as_str()) {
                    found.push((child_name.clone(), fk_name.clone()));
                }
            }
        }
        Ok(found)
    }

    /// Turn a by-name constraint request into a definition on `def`.
    fn resolve_constraint(
        &self,
        def: &TableDef,
        request: NewConstraint,
        taken: &HashSet<String>,
    ) -> Result<ConstraintDef> {
        let columns = def.resolve_columns(&request.columns)?;
        let explicit = request.name.as_deref().map(normalize_ident);
        let column_names = def.column_names(&columns);

        let constraint = match request.kind {
            ConstraintKind::PrimaryKey => {
                if def.primary_key().is_some() {
                    return Err(Error::MultiplePrimaryKeys(def.name.to_string()));
                }
                let name = pick_name(explicit, format!("{}_pkey", def.name.name), taken)?;
                ConstraintDef::PrimaryKey { name, columns }
            }
            ConstraintKind::Unique => {
                let base = format!("{}_{}_key", def.name.name, column_names.join("_"));
                let name = pick_name(explicit, base, taken)?;
                ConstraintDef::Unique { name, columns }
            }
            ConstraintKind::ForeignKey => {
                let target = request.target.ok_or_else(|| {
                    Error::InvalidDefinition("foreign key needs a referenced table".into())
                })?;
                let parent_name = self.qualify(&target.table)?;
                if self.views.contains_key(&parent_name) {
                    return Err(Error::InvalidDefinition(format!(
                        "referenced relation \"{}\" is a view",
                        parent_name
                    )));
                }
                let parent_def = if parent_name == def.name {
                    def.clone()
                } else {
                    let handle = self.table_handle(&parent_name).map_err(|_| {
                        Error::UnresolvedReference(format!("relation \"{}\"", target.table))
                    })?;
                    let parent = handle.read();
                    parent.def.clone()
                };

                let (key_name, key_columns, referencing) =
                    match_target_key(def, &parent_def, &target.columns, &columns)?;
                let base = format!("{}_{}_fkey", def.name.name, column_names.join("_"));
                let name = pick_name(explicit, base, taken)?;
                ConstraintDef::ForeignKey {
                    name,
                    columns: referencing,
                    references_table: parent_name,
                    references_key: key_name,
                    references_columns: key_columns,
                    on_delete: target.on_delete,
                }
            }
        };
        debug!(table = %def.name, constraint = %constraint.name(), "Resolved constraint");
        Ok(constraint)
    }
}

/// Constraint requests carried by inline column markers.
fn inline_constraints(column: &ColumnDef) -> Result<Vec<NewConstraint>> {
    let mut requests = Vec::new();
    let name = normalize_ident(&column.name);
    if column.primary_key {
        requests.push(NewConstraint::primary_key([name.clone()]));
    }
    if column.unique {
        requests.push(NewConstraint::unique([name.clone()]));
    }
    if let Some(target) = &column.references {
        if target.columns.len() > 1 {
            return Err(Error::InvalidDefinition(format!(
                "column \"{}\" cannot reference {} columns",
                name,
                target.columns.len()
            )));
        }
        requests.push(NewConstraint::foreign_key([name], target.clone()));
    }
    Ok(requests)
}

/// Explicit names must be free; generated names get a numeric suffix.
fn pick_name(explicit: Option<String>, base: String, taken: &HashSet<String>) -> Result<String> {
    match explicit {
        Some(name) if taken.contains(&name) => Err(Error::DuplicateName(name)),
        Some(name) => Ok(name),
        None => {
            if !taken.contains(&base) {
                return Ok(base);
            }
            let mut n = 1;
            loop {
                let candidate = format!("{}{}", base, n);
                if !taken.contains(&candidate) {
                    return Ok(candidate);
                }
                n += 1;
            }
        }
    }
}

/// Find the referenced key and line the referencing columns up with it.
///
/// Returns (key name, key columns, referencing columns in key order).
/// Column pairs whose stored values would never compare equal are refused.
fn match_target_key(
    child: &TableDef,
    parent: &TableDef,
    target_columns: &[String],
    referencing: &[ColumnId],
) -> Result<(String, Vec<ColumnId>, Vec<ColumnId>)> {
    let target_ids = if target_columns.is_empty() {
        match parent.primary_key() {
            Some(pk) => pk.columns().to_vec(),
            None => {
                return Err(Error::NoTargetKey {
                    table: parent.name.to_string(),
                    columns: Vec::new(),
                })
            }
        }
    } else {
        parent.resolve_columns(target_columns)?
    };

    if target_ids.len() != referencing.len() {
        return Err(Error::InvalidDefinition(format!(
            "foreign key has {} referencing and {} referenced columns",
            referencing.len(),
            target_ids.len()
        )));
    }

    let key = parent
        .key_matching(&target_ids)
        .ok_or_else(|| Error::NoTargetKey {
            table: parent.name.to_string(),
            columns: parent.column_names(&target_ids),
        })?;

    let mut aligned = Vec::with_capacity(referencing.len());
    for key_column in key.columns() {
        if let Some(i) = target_ids.iter().position(|id| id == key_column) {
            let from = child.column_by_id(referencing[i]);
            let to = parent.column_by_id(*key_column);
            if let (Some(from), Some(to)) = (from, to) {
                if !from.data_type.key_comparable(&to.data_type) {
                    return Err(Error::InvalidDefinition(format!(
                        "foreign key column \"{}\" of type {} cannot reference \"{}\" of type {}",
                        from.name, from.data_type, to.name, to.data_type
                    )));
                }
            }
            aligned.push(referencing[i]);
        }
    }
    Ok((key.name().to_string(), key.columns().to_vec(), aligned))
}

fn add_fk_edge(graph: &mut DependencyGraph, table: &QualifiedName, fk: &ConstraintDef) -> Result<()> {
    if let ConstraintDef::ForeignKey {
        references_table, ..
    } = fk
    {
        graph.add_edge(DependencyEdge::new(
            ObjectRef::constraint(table.clone(), fk.name()),
            ObjectRef::table(references_table.clone()),
            DependencyKind::ForeignKeyOnTable,
        ))?;
    }
    Ok(())
}

/// Build the index a key constraint needs over the current rows.
///
/// A PRIMARY KEY additionally refuses existing NULLs in its columns.
fn prepare_key(table: &Table, constraint: &ConstraintDef) -> Result<UniqueIndex> {
    if let ConstraintDef::PrimaryKey { columns, .. } = constraint {
        let positions: Vec<(usize, &str)> = columns
            .iter()
            .filter_map(|id| {
                let column = table.def.column_by_id(*id)?;
                Some((table.def.position(*id)?, column.name.as_str()))
            })
            .collect();
        for (_, row) in table.rows.iter() {
            if let Some((_, column)) = positions.iter().find(|(p, _)| row[*p].is_null()) {
                return Err(ConstraintError::NullConstraintViolation {
                    table: table.name().to_string(),
                    column: column.to_string(),
                }
                .into());
            }
        }
    }

    table.build_index(constraint.columns()).map_err(|duplicate| {
        ConstraintError::UniquenessViolation {
            constraint: constraint.name().to_string(),
            table: table.name().to_string(),
            value: describe_key(&table.def, constraint.columns(), &duplicate),
        }
        .into()
    })
}

fn install_key(table: &mut Table, constraint: ConstraintDef, index: UniqueIndex) {
    if let ConstraintDef::PrimaryKey { columns, .. } = &constraint {
        for id in columns {
            if let Some(column) = table.def.column_mut(*id) {
                column.nullable = false;
            }
        }
    }
    table.indexes.insert(constraint.name().to_string(), index);
    table.def.constraints.push(constraint);
}

/// Fail if some row of `child` has a key missing from `parent`.
fn check_orphans(child: &Table, parent: &Table, fk: &ConstraintDef) -> Result<()> {
    let ConstraintDef::ForeignKey {
        name,
        columns,
        references_key,
        ..
    } = fk
    else {
        return Ok(());
    };
    let index = parent.indexes.get(references_key);
    for (_, row) in child.rows.iter() {
        let Some(key) = child.def.key_of(row, columns) else {
            continue;
        };
        if !index.map_or(false, |i| i.contains(&key)) {
            return Err(ConstraintError::OrphanReference {
                constraint: name.clone(),
                table: child.name().to_string(),
                value: describe_key(&child.def, columns, &key),
            }
            .into());
        }
    }
    Ok(())
}

/// Fill a freshly appended column in every existing row.
fn backfill_column(table: &mut Table, id: ColumnId) -> Result<()> {
    let Some(column) = table.def.column_by_id(id).cloned() else {
        return Ok(());
    };
    let mut next = table.sequence_value(id);
    let mut values = Vec::with_capacity(table.rows.len());
    for _ in 0..table.rows.len() {
        let value = match &column.default {
            Some(DefaultRule::Value(v)) => v.clone(),
            Some(DefaultRule::Sequence) => {
                next += 1;
                Value::Int(next)
            }
            None => Value::Null,
        };
        if value.is_null() && !column.nullable {
            return Err(ConstraintError::NullConstraintViolation {
                table: table.name().to_string(),
                column: column.name.clone(),
            }
            .into());
        }
        values.push(value);
    }
    if column.uses_sequence() && next > 0 {
        table.sequences.insert(id, next);
    }
    table.rows.push_column(values);
    Ok(())
}
