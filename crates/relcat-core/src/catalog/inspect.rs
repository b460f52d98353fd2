//! Read-only catalog metadata for administration and tooling.
//!
//! Every call takes table read locks one at a time and never holds two at
//! once, so inspection cannot deadlock against row operations.

use std::collections::BTreeMap;

use serde::Serialize;

use super::catalog::Catalog;
use super::column::{ColumnDef, ColumnId, DefaultRule};
use super::constraint::{ConstraintDef, ConstraintKind, DeleteBehavior};
use super::name::QualifiedName;
use super::table::TableDef;
use super::view::{BoundColumn, RelationRef, ViewDef};
use crate::error::{Error, Result};
use crate::graph::{DependencyEdge, ObjectRef};
use crate::storage::Table;

/// A column as shown by `describe_table`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

/// Referenced side of a foreign key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceInfo {
    pub table: String,
    pub columns: Vec<String>,
    pub on_delete: DeleteBehavior,
}

/// A table constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintInfo {
    pub name: String,
    pub table: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<ReferenceInfo>,
}

/// The unique index backing a PRIMARY KEY or UNIQUE constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub primary: bool,
    /// Number of indexed (non-NULL) keys.
    pub entries: usize,
}

/// Full description of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub constraints: Vec<ConstraintInfo>,
    pub indexes: Vec<IndexInfo>,
    /// Foreign keys elsewhere that reference this table, as `table.constraint`.
    pub referenced_by: Vec<String>,
    pub row_count: usize,
}

impl TableInfo {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        let name = super::normalize_ident(name);
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One output column of a view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewColumnInfo {
    pub name: String,
    /// Bound source column, as `relation.column`.
    pub source: String,
    /// Whether the bound column has been dropped.
    pub stale: bool,
}

/// Description of a view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewInfo {
    pub name: String,
    pub definition: String,
    pub columns: Vec<ViewColumnInfo>,
    pub depends_on: Vec<String>,
}

/// Direct dependency edges around one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyInfo {
    pub object: ObjectRef,
    /// Edges from `object` to what it depends on.
    pub depends_on: Vec<DependencyEdge>,
    /// Edges from objects that depend on `object`.
    pub dependents: Vec<DependencyEdge>,
}

/// Foreign key target columns still to be named once the owning table's
/// lock is released.
struct PendingReference {
    slot: usize,
    table: QualifiedName,
    columns: Vec<ColumnId>,
}

impl Catalog {
    /// Describe a table: columns, constraints, indexes and incoming
    /// references.
    pub fn describe_table(&self, name: &str) -> Result<TableInfo> {
        let name = self.qualify(name)?;
        let handle = self.table_handle(&name)?;
        let (mut info, pending) = {
            let table = handle.read();
            let (constraints, pending) = constraint_infos(&table.def);
            let info = TableInfo {
                name: name.to_string(),
                columns: table.def.columns.iter().map(column_info).collect(),
                constraints,
                indexes: index_infos(&table),
                referenced_by: table
                    .referenced_by
                    .iter()
                    .map(|(t, c)| format!("{}.{}", t, c))
                    .collect(),
                row_count: table.row_count(),
            };
            (info, pending)
        };
        self.name_references(&mut info.constraints, pending);
        Ok(info)
    }

    /// Constraints of one table.
    pub fn list_constraints(&self, table: &str) -> Result<Vec<ConstraintInfo>> {
        let name = self.qualify(table)?;
        let handle = self.table_handle(&name)?;
        let (mut constraints, pending) = constraint_infos(&handle.read().def);
        self.name_references(&mut constraints, pending);
        Ok(constraints)
    }

    /// Every table name, sorted.
    pub fn list_tables(&self) -> Vec<QualifiedName> {
        let mut names: Vec<QualifiedName> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Every view with its definition and bound columns, sorted by name.
    pub fn list_views(&self) -> Vec<ViewInfo> {
        let mut views: Vec<_> = self.views.iter().map(|e| e.value().clone()).collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views.iter().map(|v| self.view_info(v)).collect()
    }

    /// Describe a single view.
    pub fn describe_view(&self, name: &str) -> Result<ViewInfo> {
        let name = self.qualify(name)?;
        let view = self.view_def(&name)?;
        Ok(self.view_info(&view))
    }

    /// Every unique index across all tables, sorted by table then name.
    pub fn list_indexes(&self) -> Vec<IndexInfo> {
        let mut indexes = Vec::new();
        for name in self.list_tables() {
            if let Ok(handle) = self.table_handle(&name) {
                indexes.extend(index_infos(&handle.read()));
            }
        }
        indexes
    }

    /// Direct dependencies and dependents of a table or view.
    pub fn dependencies_of(&self, name: &str) -> Result<DependencyInfo> {
        let qn = self.qualify(name)?;
        let object = if self.tables.contains_key(&qn) {
            ObjectRef::table(qn)
        } else if self.views.contains_key(&qn) {
            ObjectRef::view(qn)
        } else {
            return Err(Error::UnresolvedReference(format!("relation \"{}\"", name)));
        };

        let graph = self.graph.read();
        let mut depends_on: Vec<DependencyEdge> = graph
            .dependencies_of(&object)
            .into_iter()
            .map(|(o, kind)| DependencyEdge::new(object.clone(), o, kind))
            .collect();
        let mut dependents: Vec<DependencyEdge> = graph
            .dependents_of(&object)
            .into_iter()
            .map(|(o, kind)| DependencyEdge::new(o, object.clone(), kind))
            .collect();

        // A table's foreign keys are graph nodes of their own.
        if let ObjectRef::Table { name } = &object {
            for edge in graph.edges() {
                if edge.dependent.is_part_of(name) && edge.dependent != object {
                    depends_on.push(edge);
                }
            }
            dependents.retain(|e| !e.dependent.is_part_of(name));
        }
        Ok(DependencyInfo {
            object,
            depends_on,
            dependents,
        })
    }

    fn view_info(&self, view: &ViewDef) -> ViewInfo {
        let columns = view
            .bindings
            .iter()
            .map(|binding| ViewColumnInfo {
                name: binding.output.clone(),
                source: format!(
                    "{}.{}",
                    view.sources
                        .get(binding.column.source)
                        .map(|s| s.alias.as_str())
                        .unwrap_or("?"),
                    binding.column.name
                ),
                stale: self.binding_stale(view, &binding.column),
            })
            .collect();
        ViewInfo {
            name: view.name.to_string(),
            definition: view.query.to_string(),
            columns,
            depends_on: view.relations().iter().map(|r| r.name().to_string()).collect(),
        }
    }

    /// Whether a bound column is gone, following nested views. A vanished
    /// source counts as stale.
    fn binding_stale(&self, view: &ViewDef, column: &BoundColumn) -> bool {
        let Some(source) = view.sources.get(column.source) else {
            return true;
        };
        match &source.relation {
            RelationRef::Table(name) => match self.table_handle(name) {
                Ok(handle) => handle.read().def.column_by_id(column.key).is_none(),
                Err(_) => true,
            },
            RelationRef::View(name) => match self.view_def(name) {
                Ok(inner) => match inner.bindings.get(column.key as usize) {
                    Some(binding) => self.binding_stale(&inner, &binding.column),
                    None => true,
                },
                Err(_) => true,
            },
        }
    }

    /// Fill in referenced column names, reading each parent table on its own.
    fn name_references(&self, constraints: &mut [ConstraintInfo], pending: Vec<PendingReference>) {
        let mut parents: BTreeMap<QualifiedName, Option<TableDef>> = BTreeMap::new();
        for reference in pending {
            let parent = parents.entry(reference.table.clone()).or_insert_with(|| {
                self.table_handle(&reference.table)
                    .ok()
                    .map(|h| h.read().def.clone())
            });
            let names = match parent {
                Some(def) => def.column_names(&reference.columns),
                None => reference.columns.iter().map(|id| format!("#{}", id)).collect(),
            };
            if let Some(info) = constraints
                .get_mut(reference.slot)
                .and_then(|c| c.references.as_mut())
            {
                info.columns = names;
            }
        }
    }
}

fn column_info(column: &ColumnDef) -> ColumnInfo {
    ColumnInfo {
        name: column.name.clone(),
        data_type: column.data_type.to_string(),
        nullable: column.nullable,
        default: column.default.as_ref().map(|d| match d {
            DefaultRule::Sequence => "nextval".to_string(),
            DefaultRule::Value(v) => v.to_string(),
        }),
    }
}

fn constraint_infos(def: &TableDef) -> (Vec<ConstraintInfo>, Vec<PendingReference>) {
    let mut infos = Vec::with_capacity(def.constraints.len());
    let mut pending = Vec::new();
    for (slot, constraint) in def.constraints.iter().enumerate() {
        let references = match constraint {
            ConstraintDef::ForeignKey {
                references_table,
                references_columns,
                on_delete,
                ..
            } => {
                let columns = if references_table == &def.name {
                    def.column_names(references_columns)
                } else {
                    pending.push(PendingReference {
                        slot,
                        table: references_table.clone(),
                        columns: references_columns.clone(),
                    });
                    Vec::new()
                };
                Some(ReferenceInfo {
                    table: references_table.to_string(),
                    columns,
                    on_delete: *on_delete,
                })
            }
            _ => None,
        };
        infos.push(ConstraintInfo {
            name: constraint.name().to_string(),
            table: def.name.to_string(),
            kind: constraint.kind(),
            columns: def.column_names(constraint.columns()),
            references,
        });
    }
    (infos, pending)
}

fn index_infos(table: &Table) -> Vec<IndexInfo> {
    let mut indexes: Vec<IndexInfo> = table
        .def
        .key_constraints()
        .map(|c| IndexInfo {
            name: c.name().to_string(),
            table: table.def.name.to_string(),
            columns: table.def.column_names(c.columns()),
            primary: c.kind() == ConstraintKind::PrimaryKey,
            entries: table.indexes.get(c.name()).map_or(0, |i| i.len()),
        })
        .collect();
    indexes.sort_by(|a, b| a.name.cmp(&b.name));
    indexes
}
