//! relcat core - relational catalog, constraint engine and bulk loader.
//!
//! This crate holds the schema catalog of a small relational engine: tables,
//! views and constraints, the dependency graph between them, and the
//! in-memory row store every mutation goes through.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod bulk;
pub mod catalog;
pub mod config;
pub mod constraint;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod query;
pub mod storage;
pub mod types;

pub use bulk::{AbortHandle, BulkLoader, LoadReport};
pub use catalog::{
    Assignment, Catalog, ColumnDef, ColumnInfo, ColumnRef, CompareOp, ConstraintDef,
    ConstraintInfo, ConstraintKind, DefaultRule, DeleteBehavior, DependencyInfo, ForeignKeyTarget,
    IndexInfo, NewConstraint, Predicate, QualifiedName, TableInfo, ViewInfo, ViewQuery,
};
pub use config::EngineConfig;
pub use constraint::{ConstraintValidator, DeleteOutcome, DeletePlan, UniqueIndex};
pub use error::{ConstraintError, Error, ErrorKind, Result};
pub use graph::{DependencyEdge, DependencyGraph, DependencyKind, ObjectRef};
pub use metrics::{EngineMetrics, MetricsSnapshot, MutationType, SharedMetrics};
pub use query::ResultSet;
pub use storage::{Row, RowId};
pub use types::{DataType, Value};
