//! Schema-qualified object names.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// A `schema.name` pair identifying a table or view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    /// Schema part.
    pub schema: String,
    /// Object name within the schema.
    pub name: String,
}

impl QualifiedName {
    /// Create a qualified name from its parts.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.name` or `name`, filling in `default_schema` for the latter.
    ///
    /// Names are folded to lower case, as unquoted SQL identifiers are.
    pub fn parse(raw: &str, default_schema: &str) -> Result<Self> {
        let raw = raw.trim();
        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (schema.trim(), name.trim()),
            None => (default_schema, raw),
        };
        if schema.is_empty() || name.is_empty() || name.contains('.') {
            return Err(Error::InvalidDefinition(format!("invalid name: {:?}", raw)));
        }
        Ok(Self::new(schema.to_ascii_lowercase(), name.to_ascii_lowercase()))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl Serialize for QualifiedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Fold an identifier the way unquoted identifiers are folded.
pub(crate) fn normalize_ident(ident: &str) -> String {
    ident.trim().to_ascii_lowercase()
}
