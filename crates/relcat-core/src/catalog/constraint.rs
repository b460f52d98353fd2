//! Constraint definitions for tables.

use serde::{Deserialize, Serialize};

use super::column::ColumnId;
use super::name::QualifiedName;

/// Kind of a table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// UNIQUE + NOT NULL, at most one per table.
    PrimaryKey,
    /// Uniqueness over non-null keys.
    Unique,
    /// Values must exist in a referenced key.
    ForeignKey,
}

/// Behavior when a referenced row is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBehavior {
    /// Prevent deletion while referencing rows exist.
    #[default]
    Restrict,
    /// Delete referencing rows.
    Cascade,
    /// Set the referencing columns to NULL.
    SetNull,
}

/// Target of a foreign key, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyTarget {
    /// Referenced table.
    pub table: String,
    /// Referenced columns. Empty means the referenced table's primary key.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Action on delete of a referenced row.
    #[serde(default)]
    pub on_delete: DeleteBehavior,
}

impl ForeignKeyTarget {
    /// Reference the primary key of `table`.
    pub fn primary_key_of(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            on_delete: DeleteBehavior::Restrict,
        }
    }

    /// Reference specific columns of `table`.
    pub fn columns_of(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            on_delete: DeleteBehavior::Restrict,
        }
    }

    /// Set the delete behavior.
    pub fn with_on_delete(mut self, on_delete: DeleteBehavior) -> Self {
        self.on_delete = on_delete;
        self
    }
}

/// A constraint to attach to a table, by column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConstraint {
    /// Explicit name; generated when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Covered columns.
    pub columns: Vec<String>,
    /// Referenced key, for foreign keys only.
    #[serde(default)]
    pub target: Option<ForeignKeyTarget>,
}

impl NewConstraint {
    /// A primary key over `columns`.
    pub fn primary_key(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: None,
            kind: ConstraintKind::PrimaryKey,
            columns: columns.into_iter().map(Into::into).collect(),
            target: None,
        }
    }

    /// A unique constraint over `columns`.
    pub fn unique(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: None,
            kind: ConstraintKind::Unique,
            columns: columns.into_iter().map(Into::into).collect(),
            target: None,
        }
    }

    /// A foreign key from `columns` to `target`.
    pub fn foreign_key(
        columns: impl IntoIterator<Item = impl Into<String>>,
        target: ForeignKeyTarget,
    ) -> Self {
        Self {
            name: None,
            kind: ConstraintKind::ForeignKey,
            columns: columns.into_iter().map(Into::into).collect(),
            target: Some(target),
        }
    }

    /// Give the constraint an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A constraint attached to a table, resolved to column ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintDef {
    /// Primary key.
    PrimaryKey {
        /// Constraint (and index) name.
        name: String,
        /// Key columns.
        columns: Vec<ColumnId>,
    },
    /// Uniqueness constraint (single or composite).
    Unique {
        /// Constraint (and index) name.
        name: String,
        /// Key columns.
        columns: Vec<ColumnId>,
    },
    /// Foreign key constraint.
    ForeignKey {
        /// Constraint name.
        name: String,
        /// Referencing columns, ordered to line up with the referenced key.
        columns: Vec<ColumnId>,
        /// Referenced table.
        references_table: QualifiedName,
        /// Name of the PRIMARY KEY/UNIQUE constraint on the referenced table.
        references_key: String,
        /// Referenced columns, in the referenced key's order.
        references_columns: Vec<ColumnId>,
        /// Action on delete of a referenced row.
        on_delete: DeleteBehavior,
    },
}

impl ConstraintDef {
    /// Get the constraint name.
    pub fn name(&self) -> &str {
        match self {
            ConstraintDef::PrimaryKey { name, .. } => name,
            ConstraintDef::Unique { name, .. } => name,
            ConstraintDef::ForeignKey { name, .. } => name,
        }
    }

    /// Get the constraint kind.
    pub fn kind(&self) -> ConstraintKind {
        match self {
            ConstraintDef::PrimaryKey { .. } => ConstraintKind::PrimaryKey,
            ConstraintDef::Unique { .. } => ConstraintKind::Unique,
            ConstraintDef::ForeignKey { .. } => ConstraintKind::ForeignKey,
        }
    }

    /// Columns of the owning table covered by this constraint.
    pub fn columns(&self) -> &[ColumnId] {
        match self {
            ConstraintDef::PrimaryKey { columns, .. } => columns,
            ConstraintDef::Unique { columns, .. } => columns,
            ConstraintDef::ForeignKey { columns, .. } => columns,
        }
    }

    /// Whether this is a PRIMARY KEY or UNIQUE constraint (owns an index).
    pub fn is_key(&self) -> bool {
        !self.is_foreign_key()
    }

    /// Check if this is a foreign key constraint.
    pub fn is_foreign_key(&self) -> bool {
        matches!(self, ConstraintDef::ForeignKey { .. })
    }

    /// Whether the constraint covers column `id`.
    pub fn covers(&self, id: ColumnId) -> bool {
        self.columns().contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_constraint_builders() {
        let pk = NewConstraint::primary_key(["id"]).named("users_pk");
        assert_eq!(pk.kind, ConstraintKind::PrimaryKey);
        assert_eq!(pk.name.as_deref(), Some("users_pk"));

        let fk = NewConstraint::foreign_key(
            ["user_id"],
            ForeignKeyTarget::primary_key_of("users").with_on_delete(DeleteBehavior::Cascade),
        );
        let target = fk.target.unwrap();
        assert_eq!(target.on_delete, DeleteBehavior::Cascade);
        assert!(target.columns.is_empty());
    }

    #[test]
    fn test_constraint_def_accessors() {
        let fk = ConstraintDef::ForeignKey {
            name: "orders_user_fkey".into(),
            columns: vec![2],
            references_table: QualifiedName::new("public", "users"),
            references_key: "users_pkey".into(),
            references_columns: vec![0],
            on_delete: DeleteBehavior::Restrict,
        };
        assert!(fk.is_foreign_key());
        assert!(!fk.is_key());
        assert!(fk.covers(2));
        assert_eq!(fk.kind(), ConstraintKind::ForeignKey);
    }

    #[test]
    fn test_deserialize_foreign_key_script() {
        let c: NewConstraint = serde_json::from_str(
            r#"{"kind": "foreign_key", "columns": ["author"],
                "target": {"table": "people", "columns": ["name"], "on_delete": "set_null"}}"#,
        )
        .unwrap();
        assert_eq!(c.kind, ConstraintKind::ForeignKey);
        assert_eq!(c.target.unwrap().on_delete, DeleteBehavior::SetNull);
    }
}
