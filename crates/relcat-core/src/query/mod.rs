//! Row filtering and view evaluation.
//!
//! Nothing here plans or optimizes: filters are conjunctions of simple
//! comparisons, and view sources are combined as a filtered cross product.

mod filter;
mod view_reader;

use serde::Serialize;

use crate::types::Value;

pub(crate) use filter::RowFilter;
pub(crate) use view_reader::ViewReader;

/// Rows returned by a scan or a view read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Column names, in row order.
    pub columns: Vec<String>,
    /// Rows.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Create a result set.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let position = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[position]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup() {
        let rs = ResultSet::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::text("a")],
                vec![Value::Int(2), Value::text("b")],
            ],
        );
        assert_eq!(rs.len(), 2);
        assert_eq!(
            rs.column("name").unwrap(),
            vec![&Value::text("a"), &Value::text("b")]
        );
        assert!(rs.column("missing").is_none());
    }
}
