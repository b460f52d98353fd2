//! View definitions and the structural queries they store.
//!
//! A view stores its query in two forms: the query as given, and the column
//! bindings resolved when the view was created. Reads go through the
//! bindings, so a view never picks up columns added to its sources later.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::name::{normalize_ident, QualifiedName};
use crate::types::Value;

/// Reference to a column, optionally qualified by a source name or alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Source name or alias.
    pub relation: Option<String>,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Parse `column` or `relation.column`.
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once('.') {
            Some((relation, column)) => Self {
                relation: Some(normalize_ident(relation)),
                column: normalize_ident(column),
            },
            None => Self {
                relation: None,
                column: normalize_ident(raw),
            },
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}.{}", relation, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(raw: &str) -> Self {
        ColumnRef::parse(raw)
    }
}

impl Serialize for ColumnRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColumnRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ColumnRef::parse(&raw))
    }
}

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    #[serde(rename = "=")]
    Eq,
    /// `<>`
    #[serde(rename = "<>")]
    NotEq,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    LtEq,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    GtEq,
}

impl CompareOp {
    /// Apply the operator to two values with SQL NULL semantics.
    pub fn eval(&self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering::*;
        match left.compare(right) {
            None => false,
            Some(ord) => match self {
                CompareOp::Eq => ord == Equal,
                CompareOp::NotEq => ord != Equal,
                CompareOp::Lt => ord == Less,
                CompareOp::LtEq => ord != Greater,
                CompareOp::Gt => ord == Greater,
                CompareOp::GtEq => ord != Less,
            },
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Another column.
    Column(ColumnRef),
    /// A constant.
    Value(Value),
}

/// `column op operand`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Left column.
    pub left: ColumnRef,
    /// Operator.
    pub op: CompareOp,
    /// Right side.
    pub right: Operand,
}

impl Predicate {
    /// `column op value`.
    pub fn compare(column: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            left: ColumnRef::parse(column),
            op,
            right: Operand::Value(value.into()),
        }
    }

    /// `column = value`.
    pub fn equals(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `left = right` over two columns.
    pub fn columns_eq(left: &str, right: &str) -> Self {
        Self {
            left: ColumnRef::parse(left),
            op: CompareOp::Eq,
            right: Operand::Column(ColumnRef::parse(right)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.right {
            Operand::Column(c) => write!(f, "{} {} {}", self.left, self.op.symbol(), c),
            Operand::Value(Value::Text(s)) => {
                write!(f, "{} {} '{}'", self.left, self.op.symbol(), s.replace('\'', "''"))
            }
            Operand::Value(v) => write!(f, "{} {} {}", self.left, self.op.symbol(), v),
        }
    }
}

/// A source relation in a view's FROM list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Table or view name.
    pub relation: String,
    /// Alias used to qualify its columns.
    #[serde(default)]
    pub alias: Option<String>,
}

/// One projected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectItem {
    /// Source column.
    pub column: ColumnRef,
    /// Output name; defaults to the column name.
    #[serde(default)]
    pub alias: Option<String>,
}

/// A structural SELECT: filtered cross product of sources, then projection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewQuery {
    /// FROM list.
    pub sources: Vec<SourceRef>,
    /// Projection. Empty selects every column of every source (`*`).
    #[serde(default)]
    pub columns: Vec<SelectItem>,
    /// Conjunction of predicates.
    #[serde(default)]
    pub filter: Vec<Predicate>,
}

impl ViewQuery {
    /// `SELECT * FROM relation`.
    pub fn select_all_from(relation: impl Into<String>) -> Self {
        Self::source(relation)
    }

    /// Start a query over one source.
    pub fn source(relation: impl Into<String>) -> Self {
        Self {
            sources: vec![SourceRef {
                relation: relation.into(),
                alias: None,
            }],
            columns: Vec::new(),
            filter: Vec::new(),
        }
    }

    /// Add another source (cross product, narrowed by the filter).
    pub fn join(mut self, relation: impl Into<String>) -> Self {
        self.sources.push(SourceRef {
            relation: relation.into(),
            alias: None,
        });
        self
    }

    /// Add another source under an alias.
    pub fn join_as(mut self, relation: impl Into<String>, alias: impl Into<String>) -> Self {
        self.sources.push(SourceRef {
            relation: relation.into(),
            alias: Some(alias.into()),
        });
        self
    }

    /// Project a column.
    pub fn column(mut self, column: &str) -> Self {
        self.columns.push(SelectItem {
            column: ColumnRef::parse(column),
            alias: None,
        });
        self
    }

    /// Project a column under another name.
    pub fn column_as(mut self, column: &str, alias: impl Into<String>) -> Self {
        self.columns.push(SelectItem {
            column: ColumnRef::parse(column),
            alias: Some(alias.into()),
        });
        self
    }

    /// Add a predicate.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }
}

impl fmt::Display for ViewQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.columns.is_empty() {
            write!(f, "*")?;
        } else {
            for (i, item) in self.columns.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item.column)?;
                if let Some(alias) = &item.alias {
                    write!(f, " AS {}", alias)?;
                }
            }
        }
        write!(f, " FROM ")?;
        for (i, source) in self.sources.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", source.relation)?;
            if let Some(alias) = &source.alias {
                write!(f, " {}", alias)?;
            }
        }
        for (i, predicate) in self.filter.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { " WHERE " } else { " AND " }, predicate)?;
        }
        Ok(())
    }
}

/// What a view source resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationRef {
    /// A base table.
    Table(QualifiedName),
    /// Another view.
    View(QualifiedName),
}

impl RelationRef {
    /// The referenced name.
    pub fn name(&self) -> &QualifiedName {
        match self {
            RelationRef::Table(name) | RelationRef::View(name) => name,
        }
    }
}

/// A resolved FROM entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSource {
    /// Name used to qualify columns of this source.
    pub alias: String,
    /// Resolved relation.
    pub relation: RelationRef,
}

/// A column pinned at view creation.
///
/// `key` is the column id for table sources and the output position for
/// view sources; both are stable for the lifetime of the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundColumn {
    /// Index into the view's sources.
    pub source: usize,
    /// Stable key within the source.
    pub key: u32,
    /// Column name at binding time.
    pub name: String,
}

/// One output column of a view.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    /// Output column name.
    pub output: String,
    /// Bound source column.
    pub column: BoundColumn,
}

/// Right side of a bound predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundOperand {
    /// Another bound column.
    Column(BoundColumn),
    /// A constant.
    Value(Value),
}

/// A predicate with its columns bound.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundPredicate {
    /// Left column.
    pub left: BoundColumn,
    /// Operator.
    pub op: CompareOp,
    /// Right side.
    pub right: BoundOperand,
}

/// A stored view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDef {
    /// View name.
    pub name: QualifiedName,
    /// Query as supplied.
    pub query: ViewQuery,
    /// Resolved sources.
    pub sources: Vec<BoundSource>,
    /// Output columns, frozen at creation.
    pub bindings: Vec<ColumnBinding>,
    /// Resolved filter.
    pub filter: Vec<BoundPredicate>,
}

impl ViewDef {
    /// Output column names.
    pub fn column_names(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.output.clone()).collect()
    }

    /// Position of an output column.
    pub fn output_position(&self, name: &str) -> Option<usize> {
        let name = normalize_ident(name);
        self.bindings.iter().position(|b| b.output == name)
    }

    /// Distinct relations this view reads from.
    pub fn relations(&self) -> Vec<&RelationRef> {
        let mut out: Vec<&RelationRef> = Vec::new();
        for source in &self.sources {
            if !out.contains(&&source.relation) {
                out.push(&source.relation);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_ref_parse() {
        let c = ColumnRef::parse("Orders.Total");
        assert_eq!(c.relation.as_deref(), Some("orders"));
        assert_eq!(c.column, "total");
        assert_eq!(ColumnRef::parse("id").relation, None);
    }

    #[test]
    fn test_compare_op_null_is_false() {
        assert!(!CompareOp::Eq.eval(&Value::Null, &Value::Null));
        assert!(!CompareOp::NotEq.eval(&Value::Int(1), &Value::Null));
        assert!(CompareOp::GtEq.eval(&Value::Int(2), &Value::Float(2.0)));
    }

    #[test]
    fn test_query_display() {
        let q = ViewQuery::source("orders")
            .join_as("users", "u")
            .column("orders.id")
            .column_as("u.name", "customer")
            .filter(Predicate::columns_eq("orders.user_id", "u.id"))
            .filter(Predicate::equals("u.name", "O'Hara"));
        assert_eq!(
            q.to_string(),
            "SELECT orders.id, u.name AS customer FROM orders, users u \
             WHERE orders.user_id = u.id AND u.name = 'O''Hara'"
        );
        assert_eq!(ViewQuery::select_all_from("t").to_string(), "SELECT * FROM t");
    }

    #[test]
    fn test_query_from_json() {
        let q: ViewQuery = serde_json::from_str(
            r#"{"sources": [{"relation": "items"}],
                "columns": [{"column": "name"}],
                "filter": [{"left": "price", "op": ">", "right": {"value": 10}}]}"#,
        )
        .unwrap();
        assert_eq!(q.filter[0].op, CompareOp::Gt);
        assert_eq!(q.filter[0].right, Operand::Value(Value::Int(10)));
    }
}
