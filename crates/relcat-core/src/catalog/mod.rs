//! Schema catalog for relcat.
//!
//! The catalog maps schema-qualified names to tables, views and their
//! constraints, owns the dependency graph between them, and is the only way
//! row mutations reach the row store.

mod catalog;
mod column;
mod constraint;
mod ddl;
mod dml;
mod inspect;
mod name;
mod table;
mod view;
mod views;

pub use catalog::Catalog;
pub use column::{ColumnDef, ColumnId, DefaultRule};
pub use constraint::{ConstraintDef, ConstraintKind, DeleteBehavior, ForeignKeyTarget, NewConstraint};
pub use dml::Assignment;
pub use inspect::{
    ColumnInfo, ConstraintInfo, DependencyInfo, IndexInfo, ReferenceInfo, TableInfo, ViewColumnInfo,
    ViewInfo,
};
pub use name::QualifiedName;
pub use table::TableDef;
pub use view::{
    BoundColumn, BoundOperand, BoundPredicate, BoundSource, ColumnBinding, ColumnRef, CompareOp,
    Operand, Predicate, RelationRef, SelectItem, SourceRef, ViewDef, ViewQuery,
};

pub(crate) use catalog::Access;
pub(crate) use name::normalize_ident;
