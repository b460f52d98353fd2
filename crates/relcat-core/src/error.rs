//! Core error types.

use thiserror::Error;

use crate::types::DataType;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Catalog and engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// An object with this name already exists.
    #[error("object \"{0}\" already exists")]
    DuplicateName(String),

    /// A view or constraint refers to something that does not exist.
    #[error("unresolved reference: {0}")]
    UnresolvedReference(String),

    /// Column does not exist on the table.
    #[error("column \"{column}\" of relation \"{table}\" does not exist")]
    ColumnNotFound {
        /// Table name.
        table: String,
        /// Missing column.
        column: String,
    },

    /// Table does not exist.
    #[error("table \"{0}\" does not exist")]
    TableNotFound(String),

    /// View does not exist.
    #[error("view \"{0}\" does not exist")]
    ViewNotFound(String),

    /// Named constraint does not exist on the table.
    #[error("constraint \"{name}\" of relation \"{table}\" does not exist")]
    ConstraintNotFound {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },

    /// The table already has a primary key.
    #[error("multiple primary keys for table \"{0}\" are not allowed")]
    MultiplePrimaryKeys(String),

    /// Drop without cascade refused because other objects depend on the target.
    #[error("cannot drop {object} because other objects depend on it: {}", dependents.join(", "))]
    DependencyExists {
        /// Object that was to be dropped.
        object: String,
        /// Objects depending on it.
        dependents: Vec<String>,
    },

    /// Adding the dependency edge would close a cycle.
    #[error("dependency from {from} to {to} would create a cycle")]
    CyclicDependency {
        /// Dependent object.
        from: String,
        /// Depended-upon object.
        to: String,
    },

    /// Foreign key target columns carry no PRIMARY KEY or UNIQUE constraint.
    #[error("there is no unique constraint matching given keys for referenced table \"{table}\" ({})", columns.join(", "))]
    NoTargetKey {
        /// Referenced table.
        table: String,
        /// Referenced columns.
        columns: Vec<String>,
    },

    /// A view column binding points at a column that has since been dropped.
    #[error("view \"{view}\" column \"{column}\" refers to a dropped column")]
    StaleViewBinding {
        /// View name.
        view: String,
        /// Stale output column.
        column: String,
    },

    /// Value does not fit the declared column type.
    #[error("column \"{column}\" is of type {expected} but value is {found}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Declared type.
        expected: DataType,
        /// What was supplied.
        found: String,
    },

    /// Text value exceeds the column's length bound.
    #[error("value too long for column \"{column}\" (max {max} characters)")]
    ValueTooLong {
        /// Column name.
        column: String,
        /// Length bound.
        max: u32,
    },

    /// Row has the wrong number of values.
    #[error("expected {expected} values, got {found}")]
    ArityMismatch {
        /// Expected count.
        expected: usize,
        /// Supplied count.
        found: usize,
    },

    /// Malformed definition (column list, type, query shape).
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    /// Referential action recursion went deeper than configured.
    #[error("cascade depth {depth} exceeds configured maximum")]
    CascadeDepthExceeded {
        /// Depth reached.
        depth: usize,
    },

    /// Bulk load was aborted by its caller.
    #[error("bulk load aborted after {rows_committed} committed rows")]
    Aborted {
        /// Rows committed by earlier batches.
        rows_committed: u64,
    },

    /// A table's lock set kept changing under concurrent DDL.
    #[error("relation \"{0}\" changed concurrently, retry limit reached")]
    ConcurrentSchemaChange(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Row-level constraint violation.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[from] ConstraintError),
}

/// Row-level constraint violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintError {
    /// Duplicate value for a PRIMARY KEY or UNIQUE constraint.
    #[error("duplicate key value violates unique constraint \"{constraint}\" on \"{table}\": {value}")]
    UniquenessViolation {
        /// Constraint name.
        constraint: String,
        /// Table name.
        table: String,
        /// Offending key.
        value: String,
    },

    /// NULL supplied for a NOT NULL column.
    #[error("null value in column \"{column}\" of relation \"{table}\" violates not-null constraint")]
    NullConstraintViolation {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// Row references a missing key, or a referenced key would disappear.
    #[error("{table} violates foreign key constraint \"{constraint}\": key {value} {detail}")]
    ForeignKeyViolation {
        /// Constraint name.
        constraint: String,
        /// Table the mutation targeted.
        table: String,
        /// Key involved.
        value: String,
        /// What went wrong.
        detail: String,
    },

    /// Existing rows would be orphaned by a new foreign key.
    #[error("existing row in \"{table}\" with key {value} has no match for foreign key \"{constraint}\"")]
    OrphanReference {
        /// Constraint name.
        constraint: String,
        /// Referencing table.
        table: String,
        /// First orphaned key.
        value: String,
    },
}

/// Fieldless view of the error taxonomy, for callers that branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    /// An object with this name already exists.
    DuplicateName,
    /// A definition names a relation or column that does not exist.
    UnresolvedReference,
    /// The column does not exist.
    ColumnNotFound,
    /// The table does not exist.
    TableNotFound,
    /// The view does not exist.
    ViewNotFound,
    /// The constraint does not exist.
    ConstraintNotFound,
    /// The table already has a primary key.
    MultiplePrimaryKeys,
    /// Other objects depend on the target; retry with cascade.
    DependencyExists,
    /// The new edge would close a dependency cycle.
    CyclicDependency,
    /// Foreign key target is not covered by a primary key or unique constraint.
    NoTargetKey,
    /// A view column whose source column was dropped.
    StaleViewBinding,
    /// Value does not fit the column type.
    TypeMismatch,
    /// Text exceeds the column's length bound.
    ValueTooLong,
    /// Wrong number of values for the column list.
    ArityMismatch,
    /// Malformed table, view or constraint definition.
    InvalidDefinition,
    /// Referential actions nested deeper than allowed.
    CascadeDepthExceeded,
    /// A bulk load was aborted.
    Aborted,
    /// Schema kept changing while locks were being taken.
    ConcurrentSchemaChange,
    /// Invalid engine configuration.
    Config,
    /// Duplicate key in a unique or primary key index.
    UniquenessViolation,
    /// NULL in a NOT NULL or primary key column.
    NullConstraintViolation,
    /// Referencing value missing from, or still referenced in, the target.
    ForeignKeyViolation,
    /// Existing rows would violate a new foreign key.
    OrphanReference,
}

impl Error {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateName(_) => ErrorKind::DuplicateName,
            Error::UnresolvedReference(_) => ErrorKind::UnresolvedReference,
            Error::ColumnNotFound { .. } => ErrorKind::ColumnNotFound,
            Error::TableNotFound(_) => ErrorKind::TableNotFound,
            Error::ViewNotFound(_) => ErrorKind::ViewNotFound,
            Error::ConstraintNotFound { .. } => ErrorKind::ConstraintNotFound,
            Error::MultiplePrimaryKeys(_) => ErrorKind::MultiplePrimaryKeys,
            Error::DependencyExists { .. } => ErrorKind::DependencyExists,
            Error::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Error::NoTargetKey { .. } => ErrorKind::NoTargetKey,
            Error::StaleViewBinding { .. } => ErrorKind::StaleViewBinding,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::ValueTooLong { .. } => ErrorKind::ValueTooLong,
            Error::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            Error::InvalidDefinition(_) => ErrorKind::InvalidDefinition,
            Error::CascadeDepthExceeded { .. } => ErrorKind::CascadeDepthExceeded,
            Error::Aborted { .. } => ErrorKind::Aborted,
            Error::ConcurrentSchemaChange(_) => ErrorKind::ConcurrentSchemaChange,
            Error::Config(_) => ErrorKind::Config,
            Error::ConstraintViolation(c) => c.kind(),
        }
    }
}

impl ConstraintError {
    /// The taxonomy kind of this violation.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConstraintError::UniquenessViolation { .. } => ErrorKind::UniquenessViolation,
            ConstraintError::NullConstraintViolation { .. } => ErrorKind::NullConstraintViolation,
            ConstraintError::ForeignKeyViolation { .. } => ErrorKind::ForeignKeyViolation,
            ConstraintError::OrphanReference { .. } => ErrorKind::OrphanReference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_passes_through_constraint_errors() {
        let err: Error = ConstraintError::NullConstraintViolation {
            table: "public.t".into(),
            column: "c".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NullConstraintViolation);
    }

    #[test]
    fn test_dependency_message_lists_dependents() {
        let err = Error::DependencyExists {
            object: "table public.a".into(),
            dependents: vec!["view public.v".into(), "constraint b_a_fkey on public.b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("view public.v"));
        assert!(msg.contains("b_a_fkey"));
    }
}
