//! Dependency graph between catalog objects.
//!
//! Nodes are references to catalog objects (tables, views and constraints);
//! an edge `A -> B` means "A depends on B": A cannot exist, or loses its
//! meaning, once B is removed. The graph never owns the objects, it only
//! names them. Plain drops, cascade closures and cycle rejection all run on
//! the same adjacency maps.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::catalog::QualifiedName;
use crate::error::{Error, Result};

/// A catalog object as seen by the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectRef {
    /// A table.
    Table {
        /// Table name.
        name: QualifiedName,
    },
    /// A view.
    View {
        /// View name.
        name: QualifiedName,
    },
    /// A constraint owned by a table.
    Constraint {
        /// Owning table.
        table: QualifiedName,
        /// Constraint name.
        name: String,
    },
}

impl ObjectRef {
    /// Reference a table.
    pub fn table(name: QualifiedName) -> Self {
        ObjectRef::Table { name }
    }

    /// Reference a view.
    pub fn view(name: QualifiedName) -> Self {
        ObjectRef::View { name }
    }

    /// Reference a constraint.
    pub fn constraint(table: QualifiedName, name: impl Into<String>) -> Self {
        ObjectRef::Constraint {
            table,
            name: name.into(),
        }
    }

    /// Whether this object belongs to (or is) table `table`.
    pub fn is_part_of(&self, table: &QualifiedName) -> bool {
        match self {
            ObjectRef::Table { name } => name == table,
            ObjectRef::Constraint { table: owner, .. } => owner == table,
            ObjectRef::View { .. } => false,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Table { name } => write!(f, "table {}", name),
            ObjectRef::View { name } => write!(f, "view {}", name),
            ObjectRef::Constraint { table, name } => write!(f, "constraint {} on {}", name, table),
        }
    }
}

/// Why one object depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// A view reads from a table.
    ViewOnTable,
    /// A view reads from another view.
    ViewOnView,
    /// A foreign key references a table's key.
    ForeignKeyOnTable,
}

/// A single `dependent -> depends_on` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    /// The dependent object.
    pub dependent: ObjectRef,
    /// The object it depends on.
    pub depends_on: ObjectRef,
    /// Edge kind.
    pub kind: DependencyKind,
}

impl DependencyEdge {
    /// Create an edge.
    pub fn new(dependent: ObjectRef, depends_on: ObjectRef, kind: DependencyKind) -> Self {
        Self {
            dependent,
            depends_on,
            kind,
        }
    }
}

/// Directed acyclic graph of catalog dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// dependent -> (dependency -> kind)
    outgoing: BTreeMap<ObjectRef, BTreeMap<ObjectRef, DependencyKind>>,
    /// dependency -> (dependent -> kind)
    incoming: BTreeMap<ObjectRef, BTreeMap<ObjectRef, DependencyKind>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a set of edges, rejecting cycles.
    pub fn from_edges(edges: impl IntoIterator<Item = DependencyEdge>) -> Result<Self> {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }

    /// Insert an edge. Fails with `CyclicDependency` if `depends_on` already
    /// (transitively) depends on `dependent`.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> Result<()> {
        if edge.dependent == edge.depends_on || self.reaches(&edge.depends_on, &edge.dependent) {
            return Err(Error::CyclicDependency {
                from: edge.dependent.to_string(),
                to: edge.depends_on.to_string(),
            });
        }
        self.outgoing
            .entry(edge.dependent.clone())
            .or_default()
            .insert(edge.depends_on.clone(), edge.kind);
        self.incoming
            .entry(edge.depends_on)
            .or_default()
            .insert(edge.dependent, edge.kind);
        Ok(())
    }

    /// Remove an object and every edge touching it.
    pub fn remove_object(&mut self, object: &ObjectRef) {
        if let Some(deps) = self.outgoing.remove(object) {
            for dep in deps.keys() {
                if let Some(set) = self.incoming.get_mut(dep) {
                    set.remove(object);
                    if set.is_empty() {
                        self.incoming.remove(dep);
                    }
                }
            }
        }
        if let Some(dependents) = self.incoming.remove(object) {
            for dependent in dependents.keys() {
                if let Some(set) = self.outgoing.get_mut(dependent) {
                    set.remove(object);
                    if set.is_empty() {
                        self.outgoing.remove(dependent);
                    }
                }
            }
        }
    }

    /// Objects that directly depend on `object`.
    pub fn dependents_of(&self, object: &ObjectRef) -> Vec<(ObjectRef, DependencyKind)> {
        self.incoming
            .get(object)
            .map(|m| m.iter().map(|(o, k)| (o.clone(), *k)).collect())
            .unwrap_or_default()
    }

    /// Objects `object` directly depends on.
    pub fn dependencies_of(&self, object: &ObjectRef) -> Vec<(ObjectRef, DependencyKind)> {
        self.outgoing
            .get(object)
            .map(|m| m.iter().map(|(o, k)| (o.clone(), *k)).collect())
            .unwrap_or_default()
    }

    /// True iff no edge targets `object`.
    pub fn can_drop_without_cascade(&self, object: &ObjectRef) -> bool {
        self.incoming.get(object).map_or(true, |m| m.is_empty())
    }

    /// Every object that would have to go if `object` were dropped, in
    /// reverse topological order: each object appears after everything that
    /// depends on it, and `object` itself comes last.
    pub fn cascade_closure(&self, object: &ObjectRef) -> Vec<ObjectRef> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        self.visit_dependents(object, &mut visited, &mut order);
        order
    }

    fn visit_dependents(
        &self,
        object: &ObjectRef,
        visited: &mut BTreeSet<ObjectRef>,
        order: &mut Vec<ObjectRef>,
    ) {
        if !visited.insert(object.clone()) {
            return;
        }
        if let Some(dependents) = self.incoming.get(object) {
            for dependent in dependents.keys() {
                self.visit_dependents(dependent, visited, order);
            }
        }
        order.push(object.clone());
    }

    /// Whether `to` is reachable from `from` along dependency edges.
    fn reaches(&self, from: &ObjectRef, to: &ObjectRef) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(deps) = self.outgoing.get(node) {
                stack.extend(deps.keys());
            }
        }
        false
    }

    /// All edges, ordered by dependent.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.outgoing
            .iter()
            .flat_map(|(dependent, deps)| {
                deps.iter().map(move |(dep, kind)| {
                    DependencyEdge::new(dependent.clone(), dep.clone(), *kind)
                })
            })
            .collect()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(|m| m.len()).sum()
    }

    /// Drop every node and edge.
    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }
}
