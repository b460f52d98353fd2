//! View DDL and reads.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::catalog::Catalog;
use super::name::{normalize_ident, QualifiedName};
use super::view::{
    BoundColumn, BoundOperand, BoundPredicate, BoundSource, ColumnBinding, ColumnRef, Operand,
    RelationRef, ViewDef, ViewQuery,
};
use crate::error::{Error, Result};
use crate::graph::{DependencyEdge, DependencyKind, ObjectRef};
use crate::query::{ResultSet, ViewReader};

/// Columns a source offers at binding time: (name, stable key).
struct SourceColumns {
    alias: String,
    qualified: String,
    columns: Vec<(String, u32)>,
}

impl Catalog {
    /// Create a view.
    ///
    /// Every source and column reference is resolved now and the resolved
    /// bindings are stored; later column additions to the sources are not
    /// picked up.
    pub fn create_view(&self, name: &str, query: ViewQuery) -> Result<QualifiedName> {
        let result = self.create_view_inner(name, query);
        self.observe(result)
    }

    fn create_view_inner(&self, name: &str, query: ViewQuery) -> Result<QualifiedName> {
        let name = self.qualify(name)?;
        let _ddl = self.ddl.lock();
        self.ensure_name_free(&name)?;
        if query.sources.is_empty() {
            return Err(Error::InvalidDefinition(format!(
                "view \"{}\" has no source relation",
                name
            )));
        }

        let mut sources = Vec::with_capacity(query.sources.len());
        let mut offered = Vec::with_capacity(query.sources.len());
        let mut aliases = HashSet::new();
        for source in &query.sources {
            let relation_name = self.qualify(&source.relation)?;
            let (relation, columns) = if let Ok(handle) = self.table_handle(&relation_name) {
                let table = handle.read();
                let columns = table
                    .def
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.id))
                    .collect();
                (RelationRef::Table(relation_name.clone()), columns)
            } else if let Ok(view) = self.view_def(&relation_name) {
                let columns = view
                    .bindings
                    .iter()
                    .enumerate()
                    .map(|(i, b)| (b.output.clone(), i as u32))
                    .collect();
                (RelationRef::View(relation_name.clone()), columns)
            } else {
                return Err(Error::UnresolvedReference(format!(
                    "relation \"{}\"",
                    source.relation
                )));
            };

            let alias = source
                .alias
                .as_deref()
                .map(normalize_ident)
                .unwrap_or_else(|| relation_name.name.clone());
            if !aliases.insert(alias.clone()) {
                return Err(Error::InvalidDefinition(format!(
                    "relation name \"{}\" specified more than once",
                    alias
                )));
            }
            offered.push(SourceColumns {
                alias: alias.clone(),
                qualified: relation_name.to_string(),
                columns,
            });
            sources.push(BoundSource { alias, relation });
        }

        let mut bindings = Vec::new();
        if query.columns.is_empty() {
            for (index, source) in offered.iter().enumerate() {
                for (column, key) in &source.columns {
                    bindings.push(ColumnBinding {
                        output: column.clone(),
                        column: BoundColumn {
                            source: index,
                            key: *key,
                            name: column.clone(),
                        },
                    });
                }
            }
        } else {
            for item in &query.columns {
                let column = bind_column(&offered, &item.column)?;
                let output = item
                    .alias
                    .as_deref()
                    .map(normalize_ident)
                    .unwrap_or_else(|| column.name.clone());
                bindings.push(ColumnBinding { output, column });
            }
        }
        let mut outputs = HashSet::new();
        for binding in &bindings {
            if !outputs.insert(binding.output.as_str()) {
                return Err(Error::DuplicateName(format!(
                    "column \"{}\" of view {}",
                    binding.output, name
                )));
            }
        }

        let mut filter = Vec::with_capacity(query.filter.len());
        for predicate in &query.filter {
            let left = bind_column(&offered, &predicate.left)?;
            let right = match &predicate.right {
                Operand::Column(c) => BoundOperand::Column(bind_column(&offered, c)?),
                Operand::Value(v) => BoundOperand::Value(v.clone()),
            };
            filter.push(BoundPredicate {
                left,
                op: predicate.op,
                right,
            });
        }

        let view = ViewDef {
            name: name.clone(),
            query,
            sources,
            bindings,
            filter,
        };

        let object = ObjectRef::view(name.clone());
        let mut graph = self.graph.read().clone();
        for relation in view.relations() {
            let (depends_on, kind) = match relation {
                RelationRef::Table(t) => (ObjectRef::table(t.clone()), DependencyKind::ViewOnTable),
                RelationRef::View(v) => (ObjectRef::view(v.clone()), DependencyKind::ViewOnView),
            };
            graph.add_edge(DependencyEdge::new(object.clone(), depends_on, kind))?;
        }

        let columns = view.bindings.len();
        self.views.insert(name.clone(), Arc::new(view));
        *self.graph.write() = graph;

        self.metrics.record_ddl(false);
        info!(view = %name, columns, "Created view");
        Ok(name)
    }

    /// Drop a view and return every removed object.
    ///
    /// Without `cascade` the drop fails while other views read from it.
    pub fn drop_view(&self, name: &str, cascade: bool) -> Result<Vec<ObjectRef>> {
        let result = self.drop_view_inner(name, cascade);
        self.observe(result)
    }

    fn drop_view_inner(&self, name: &str, cascade: bool) -> Result<Vec<ObjectRef>> {
        let name = self.qualify(name)?;
        let _ddl = self.ddl.lock();
        if !self.views.contains_key(&name) {
            return Err(Error::ViewNotFound(name.to_string()));
        }

        let object = ObjectRef::view(name.clone());
        let mut graph = self.graph.read().clone();
        if !cascade && !graph.can_drop_without_cascade(&object) {
            let dependents: Vec<String> = graph
                .dependents_of(&object)
                .into_iter()
                .map(|(d, _)| d.to_string())
                .collect();
            warn!(view = %name, dependents = dependents.len(), "Refusing to drop view with dependents");
            return Err(Error::DependencyExists {
                object: format!("view {}", name),
                dependents,
            });
        }

        let closure = graph.cascade_closure(&object);
        for removed in &closure {
            graph.remove_object(removed);
            if let ObjectRef::View { name: view } = removed {
                self.views.remove(view);
            }
        }
        *self.graph.write() = graph;

        self.metrics.record_ddl(closure.len() > 1);
        info!(
            view = %name,
            cascade,
            removed = ?closure.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
            "Dropped view"
        );
        Ok(closure)
    }

    /// Read every column of a view.
    ///
    /// Fails with `StaleViewBinding` naming the first bound column whose
    /// underlying column has been dropped.
    pub fn read_view(&self, name: &str) -> Result<ResultSet> {
        let result = self.qualify(name).and_then(|qn| {
            let view = self.view_def(&qn)?;
            let positions: Vec<usize> = (0..view.bindings.len()).collect();
            self.read_view_positions(view, positions)
        });
        self.observe(result)
    }

    /// Read selected columns of a view. Succeeds as long as neither the
    /// selected columns nor the view's filter columns are stale.
    pub fn read_view_columns(&self, name: &str, columns: &[&str]) -> Result<ResultSet> {
        let result = self.qualify(name).and_then(|qn| {
            let view = self.view_def(&qn)?;
            let mut positions = Vec::with_capacity(columns.len());
            for column in columns {
                let position = view.output_position(column).ok_or_else(|| Error::ColumnNotFound {
                    table: qn.to_string(),
                    column: normalize_ident(column),
                })?;
                positions.push(position);
            }
            self.read_view_positions(view, positions)
        });
        self.observe(result)
    }

    fn read_view_positions(&self, view: Arc<ViewDef>, positions: Vec<usize>) -> Result<ResultSet> {
        let rows = self.with_view_locked(&view, |locked| {
            ViewReader::new(self, locked).read(&view, &positions)
        })?;
        debug!(view = %view.name, rows = rows.len(), "Read view");
        let columns = positions
            .iter()
            .map(|p| view.bindings[*p].output.clone())
            .collect();
        Ok(ResultSet::new(columns, rows))
    }
}

fn bind_column(offered: &[SourceColumns], column: &ColumnRef) -> Result<BoundColumn> {
    let unresolved = || Error::UnresolvedReference(format!("column {}", column));
    let lookup = |index: usize| {
        offered[index]
            .columns
            .iter()
            .find(|(name, _)| name == &column.column)
            .map(|(name, key)| BoundColumn {
                source: index,
                key: *key,
                name: name.clone(),
            })
    };

    match &column.relation {
        Some(relation) => {
            let index = offered
                .iter()
                .position(|s| &s.alias == relation || &s.qualified == relation)
                .ok_or_else(unresolved)?;
            lookup(index).ok_or_else(unresolved)
        }
        None => {
            let mut found = (0..offered.len()).filter_map(lookup);
            let first = found.next().ok_or_else(unresolved)?;
            if found.next().is_some() {
                return Err(Error::InvalidDefinition(format!(
                    "column reference \"{}\" is ambiguous",
                    column.column
                )));
            }
            Ok(first)
        }
    }
}
