//! Predicates bound to a single table's column positions.

use crate::catalog::{normalize_ident, ColumnRef, CompareOp, Operand, Predicate, TableDef};
use crate::error::{Error, Result};
use crate::types::Value;

#[derive(Debug, Clone)]
enum Right {
    Column(usize),
    Value(Value),
}

#[derive(Debug, Clone)]
struct Term {
    left: usize,
    op: CompareOp,
    right: Right,
}

/// A conjunction of comparisons over one table's rows.
///
/// Bound under the table's lock; positions are only valid for the table
/// version it was bound against.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowFilter {
    terms: Vec<Term>,
}

impl RowFilter {
    /// Bind `predicates` to `def`. Column qualifiers must name the table.
    pub(crate) fn bind(def: &TableDef, predicates: &[Predicate]) -> Result<Self> {
        let mut terms = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            let left = position(def, &predicate.left)?;
            let right = match &predicate.right {
                Operand::Column(column) => Right::Column(position(def, column)?),
                Operand::Value(value) => Right::Value(value.clone()),
            };
            terms.push(Term {
                left,
                op: predicate.op,
                right,
            });
        }
        Ok(Self { terms })
    }

    /// Whether `row` satisfies every term. NULL never satisfies a comparison.
    pub(crate) fn matches(&self, row: &[Value]) -> bool {
        self.terms.iter().all(|term| {
            let right = match &term.right {
                Right::Column(p) => &row[*p],
                Right::Value(v) => v,
            };
            term.op.eval(&row[term.left], right)
        })
    }
}

fn position(def: &TableDef, column: &ColumnRef) -> Result<usize> {
    if let Some(relation) = &column.relation {
        let relation = normalize_ident(relation);
        if relation != def.name.name && relation != def.name.to_string() {
            return Err(Error::UnresolvedReference(format!(
                "missing FROM-clause entry for \"{}\"",
                relation
            )));
        }
    }
    let id = def.require_column(&column.column)?.id;
    def.position(id).ok_or_else(|| Error::ColumnNotFound {
        table: def.name.to_string(),
        column: column.column.clone(),
    })
}
