//! Table definitions.

use std::collections::HashSet;

use super::column::{ColumnDef, ColumnId, DefaultRule};
use super::constraint::ConstraintDef;
use super::name::{normalize_ident, QualifiedName};
use crate::error::{Error, Result};
use crate::types::Value;

/// A table definition: ordered columns plus attached constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    /// Table name.
    pub name: QualifiedName,
    /// Columns in storage order.
    pub columns: Vec<ColumnDef>,
    /// Attached constraints.
    pub constraints: Vec<ConstraintDef>,
    next_column_id: ColumnId,
}

impl TableDef {
    /// Create an empty table definition.
    pub fn new(name: QualifiedName) -> Self {
        Self {
            name,
            columns: Vec::new(),
            constraints: Vec::new(),
            next_column_id: 1,
        }
    }

    /// Append a column, assigning it a fresh id.
    pub fn add_column(&mut self, mut column: ColumnDef) -> Result<ColumnId> {
        column.name = normalize_ident(&column.name);
        if column.name.is_empty() {
            return Err(Error::InvalidDefinition("empty column name".into()));
        }
        if self.column(&column.name).is_some() {
            return Err(Error::DuplicateName(format!(
                "column {} of relation {}",
                column.name, self.name
            )));
        }
        if column.data_type.is_serial() && column.default.is_none() {
            column.default = Some(DefaultRule::Sequence);
            column.nullable = false;
        }
        if let Some(DefaultRule::Value(v)) = &column.default {
            let coerced = column.coerce(v.clone())?;
            column.default = Some(DefaultRule::Value(coerced));
        }

        column.id = self.next_column_id;
        self.next_column_id += 1;
        let id = column.id;
        self.columns.push(column);
        Ok(id)
    }

    /// Remove a column and every constraint covering it.
    ///
    /// Returns the column's former position and the removed constraints.
    pub fn remove_column(&mut self, id: ColumnId) -> Option<(usize, Vec<ConstraintDef>)> {
        let position = self.position(id)?;
        self.columns.remove(position);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.constraints)
            .into_iter()
            .partition(|c| c.covers(id));
        self.constraints = kept;
        Some((position, removed))
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        let name = normalize_ident(name);
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get a column by name or fail with `ColumnNotFound`.
    pub fn require_column(&self, name: &str) -> Result<&ColumnDef> {
        self.column(name).ok_or_else(|| Error::ColumnNotFound {
            table: self.name.to_string(),
            column: normalize_ident(name),
        })
    }

    /// Get a column by id.
    pub fn column_by_id(&self, id: ColumnId) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub(crate) fn column_mut(&mut self, id: ColumnId) -> Option<&mut ColumnDef> {
        self.columns.iter_mut().find(|c| c.id == id)
    }

    /// Storage position of column `id`.
    pub fn position(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    /// Resolve a list of column names to ids, rejecting repeats.
    pub fn resolve_columns(&self, names: &[String]) -> Result<Vec<ColumnId>> {
        if names.is_empty() {
            return Err(Error::InvalidDefinition("empty column list".into()));
        }
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let column = self.require_column(name)?;
            if !seen.insert(column.id) {
                return Err(Error::InvalidDefinition(format!(
                    "column {} listed more than once",
                    column.name
                )));
            }
            ids.push(column.id);
        }
        Ok(ids)
    }

    /// Names of the given column ids, in order.
    pub fn column_names(&self, ids: &[ColumnId]) -> Vec<String> {
        ids.iter()
            .map(|id| {
                self.column_by_id(*id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| format!("#{}", id))
            })
            .collect()
    }

    /// The primary key constraint, if any.
    pub fn primary_key(&self) -> Option<&ConstraintDef> {
        self.constraints
            .iter()
            .find(|c| matches!(c, ConstraintDef::PrimaryKey { .. }))
    }

    /// PRIMARY KEY and UNIQUE constraints.
    pub fn key_constraints(&self) -> impl Iterator<Item = &ConstraintDef> {
        self.constraints.iter().filter(|c| c.is_key())
    }

    /// FOREIGN KEY constraints.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &ConstraintDef> {
        self.constraints.iter().filter(|c| c.is_foreign_key())
    }

    /// Get a constraint by name.
    pub fn constraint(&self, name: &str) -> Option<&ConstraintDef> {
        self.constraints.iter().find(|c| c.name() == name)
    }

    /// A PRIMARY KEY or UNIQUE constraint covering exactly `columns`, in any order.
    pub fn key_matching(&self, columns: &[ColumnId]) -> Option<&ConstraintDef> {
        let wanted: HashSet<_> = columns.iter().collect();
        self.key_constraints().find(|c| {
            c.columns().len() == columns.len() && c.columns().iter().all(|id| wanted.contains(id))
        })
    }

    /// Extract the key for `ids` from a row; `None` if any part is NULL.
    pub fn key_of(&self, row: &[Value], ids: &[ColumnId]) -> Option<Vec<Value>> {
        let mut key = Vec::with_capacity(ids.len());
        for id in ids {
            let value = self.position(*id).and_then(|p| row.get(p))?;
            if value.is_null() {
                return None;
            }
            key.push(value.clone());
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn users() -> TableDef {
        let mut def = TableDef::new(QualifiedName::new("public", "users"));
        def.add_column(ColumnDef::new("id", DataType::Serial)).unwrap();
        def.add_column(ColumnDef::new("email", DataType::Text)).unwrap();
        def.add_column(ColumnDef::new("name", DataType::Varchar(10))).unwrap();
        def
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut def = users();
        let err = def.add_column(ColumnDef::new("EMAIL", DataType::Text)).unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
    }

    #[test]
    fn test_column_ids_not_reused() {
        let mut def = users();
        let email = def.column("email").unwrap().id;
        def.remove_column(email).unwrap();
        let again = def.add_column(ColumnDef::new("email", DataType::Text)).unwrap();
        assert_ne!(email, again);
    }

    #[test]
    fn test_remove_column_drops_covering_constraints() {
        let mut def = users();
        let id = def.column("id").unwrap().id;
        let email = def.column("email").unwrap().id;
        def.constraints.push(ConstraintDef::PrimaryKey {
            name: "users_pkey".into(),
            columns: vec![id],
        });
        def.constraints.push(ConstraintDef::Unique {
            name: "users_email_key".into(),
            columns: vec![email],
        });

        let (position, removed) = def.remove_column(email).unwrap();
        assert_eq!(position, 1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name(), "users_email_key");
        assert!(def.primary_key().is_some());
    }

    #[test]
    fn test_key_of_skips_nulls() {
        let def = users();
        let ids = def.resolve_columns(&["email".to_string()]).unwrap();
        assert_eq!(
            def.key_of(&[Value::Int(1), Value::text("a@b"), Value::Null], &ids),
            Some(vec![Value::text("a@b")])
        );
        assert_eq!(
            def.key_of(&[Value::Int(1), Value::Null, Value::Null], &ids),
            None
        );
    }

    #[test]
    fn test_resolve_columns_errors() {
        let def = users();
        assert!(matches!(
            def.resolve_columns(&["missing".to_string()]),
            Err(Error::ColumnNotFound { .. })
        ));
        assert!(matches!(
            def.resolve_columns(&["id".to_string(), "id".to_string()]),
            Err(Error::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_default_is_coerced() {
        let mut def = users();
        let err = def
            .add_column(
                ColumnDef::new("code", DataType::Varchar(2))
                    .with_default(DefaultRule::Value(Value::text("toolong"))),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ValueTooLong { .. }));
    }
}
