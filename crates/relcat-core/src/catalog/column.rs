//! Column definitions.

use serde::{Deserialize, Serialize};

use super::constraint::ForeignKeyTarget;
use crate::error::Result;
use crate::types::{DataType, Value};

/// Stable identifier of a column within its table.
///
/// Ids are never reused, so a view bound to a dropped column stays stale even
/// if a column of the same name is added later.
pub type ColumnId = u32;

/// How a column is filled when an insert omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultRule {
    /// Next value of the column's sequence.
    Sequence,
    /// A constant.
    Value(Value),
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Assigned by the owning table.
    #[serde(skip)]
    pub id: ColumnId,
    /// Column name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether NULL is accepted.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Default used when the value is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultRule>,
    /// Inline PRIMARY KEY, honoured at table creation.
    #[serde(default, skip_serializing)]
    pub primary_key: bool,
    /// Inline UNIQUE, honoured at table creation.
    #[serde(default, skip_serializing)]
    pub unique: bool,
    /// Inline REFERENCES, honoured at table creation.
    #[serde(default, skip_serializing)]
    pub references: Option<ForeignKeyTarget>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Create a nullable column. Serial columns come out NOT NULL with a
    /// sequence default.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let serial = data_type.is_serial();
        Self {
            id: 0,
            name: name.into(),
            data_type,
            nullable: !serial,
            default: serial.then_some(DefaultRule::Sequence),
            primary_key: false,
            unique: false,
            references: None,
        }
    }

    /// Mark NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default rule.
    pub fn with_default(mut self, default: DefaultRule) -> Self {
        self.default = Some(default);
        self
    }

    /// Declare as the table's primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Declare a single-column UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Declare a single-column foreign key.
    pub fn references(mut self, target: ForeignKeyTarget) -> Self {
        self.references = Some(target);
        self
    }

    /// Coerce a supplied value to this column's stored form.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        self.data_type.coerce(&self.name, value)
    }

    /// Whether the column draws from a sequence when omitted.
    pub fn uses_sequence(&self) -> bool {
        matches!(self.default, Some(DefaultRule::Sequence))
    }

    /// Strip creation-time hints once they have been turned into constraints.
    pub(crate) fn without_inline_constraints(mut self) -> Self {
        self.primary_key = false;
        self.unique = false;
        self.references = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_implies_not_null_sequence() {
        let col = ColumnDef::new("id", DataType::Serial);
        assert!(!col.nullable);
        assert!(col.uses_sequence());
    }

    #[test]
    fn test_builder() {
        let col = ColumnDef::new("email", DataType::Varchar(40))
            .not_null()
            .unique()
            .with_default(DefaultRule::Value(Value::text("nobody")));
        assert!(!col.nullable);
        assert!(col.unique);
        assert_eq!(col.default, Some(DefaultRule::Value(Value::text("nobody"))));
    }

    #[test]
    fn test_deserialize_script_column() {
        let col: ColumnDef = serde_json::from_str(
            r#"{"name": "code", "type": "char(3)", "nullable": false, "default": {"value": "abc"}}"#,
        )
        .unwrap();
        assert_eq!(col.data_type, DataType::Char(3));
        assert!(!col.nullable);
        assert_eq!(col.default, Some(DefaultRule::Value(Value::text("abc"))));
    }
}
