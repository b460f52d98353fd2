//! Evaluation of stored views.
//!
//! A view is read through the column bindings captured when it was created.
//! Table sources are looked up by column id and view sources by output
//! position, so a binding only fails once the exact column it captured is
//! gone; every other binding of the same view keeps working.

use crate::catalog::{BoundColumn, BoundOperand, Catalog, RelationRef, ViewDef};
use crate::error::{Error, Result};
use crate::storage::LockedTables;
use crate::types::Value;

/// Reads views against a held set of table read locks.
pub(crate) struct ViewReader<'c, 'v, 'l> {
    catalog: &'c Catalog,
    locked: &'v LockedTables<'l>,
}

/// Values of one source, restricted to the columns the read needs.
struct SourceRows {
    keys: Vec<u32>,
    rows: Vec<Vec<Value>>,
}

impl SourceRows {
    fn value(&self, row: usize, key: u32) -> &Value {
        let slot = self.keys.iter().position(|k| *k == key).unwrap_or(0);
        &self.rows[row][slot]
    }
}

impl<'c, 'v, 'l> ViewReader<'c, 'v, 'l> {
    pub(crate) fn new(catalog: &'c Catalog, locked: &'v LockedTables<'l>) -> Self {
        Self { catalog, locked }
    }

    /// Rows of `view` restricted to the bindings at `wanted`, in that order.
    ///
    /// Fails with `StaleViewBinding` for the first wanted binding whose
    /// column is gone, then for any stale filter column.
    pub(crate) fn read(&self, view: &ViewDef, wanted: &[usize]) -> Result<Vec<Vec<Value>>> {
        for &position in wanted {
            let binding = view.bindings.get(position).ok_or_else(|| Error::ColumnNotFound {
                table: view.name.to_string(),
                column: format!("#{}", position),
            })?;
            if self.is_stale(view, &binding.column)? {
                return Err(Error::StaleViewBinding {
                    view: view.name.to_string(),
                    column: binding.output.clone(),
                });
            }
        }
        for predicate in &view.filter {
            let mut columns = vec![&predicate.left];
            if let BoundOperand::Column(right) = &predicate.right {
                columns.push(right);
            }
            for column in columns {
                if self.is_stale(view, column)? {
                    return Err(Error::StaleViewBinding {
                        view: view.name.to_string(),
                        column: column.name.clone(),
                    });
                }
            }
        }

        let mut needed: Vec<Vec<u32>> = vec![Vec::new(); view.sources.len()];
        let mut need = |column: &BoundColumn| {
            let keys = &mut needed[column.source];
            if !keys.contains(&column.key) {
                keys.push(column.key);
            }
        };
        for &position in wanted {
            need(&view.bindings[position].column);
        }
        for predicate in &view.filter {
            need(&predicate.left);
            if let BoundOperand::Column(right) = &predicate.right {
                need(right);
            }
        }

        let mut sources = Vec::with_capacity(view.sources.len());
        for (index, source) in view.sources.iter().enumerate() {
            let keys = std::mem::take(&mut needed[index]);
            sources.push(self.source_rows(&source.relation, keys)?);
        }

        // Each predicate is applied as soon as its last source is joined in.
        let stage = |column: &BoundColumn| column.source;
        let predicate_stage: Vec<usize> = view
            .filter
            .iter()
            .map(|p| match &p.right {
                BoundOperand::Column(right) => stage(&p.left).max(stage(right)),
                BoundOperand::Value(_) => stage(&p.left),
            })
            .collect();

        let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
        for (index, source) in sources.iter().enumerate() {
            let mut next = Vec::new();
            for combo in &combos {
                for row in 0..source.rows.len() {
                    let mut candidate = combo.clone();
                    candidate.push(row);
                    let passes = view
                        .filter
                        .iter()
                        .zip(&predicate_stage)
                        .filter(|(_, s)| **s == index)
                        .all(|(p, _)| {
                            let left = resolve(&sources, &candidate, &p.left);
                            match &p.right {
                                BoundOperand::Column(c) => {
                                    p.op.eval(left, resolve(&sources, &candidate, c))
                                }
                                BoundOperand::Value(v) => p.op.eval(left, v),
                            }
                        });
                    if passes {
                        next.push(candidate);
                    }
                }
            }
            combos = next;
        }

        Ok(combos
            .iter()
            .map(|combo| {
                wanted
                    .iter()
                    .map(|&position| {
                        resolve(&sources, combo, &view.bindings[position].column).clone()
                    })
                    .collect()
            })
            .collect())
    }

    fn source_rows(&self, relation: &RelationRef, keys: Vec<u32>) -> Result<SourceRows> {
        match relation {
            RelationRef::Table(name) => {
                let table = self.locked.table(name)?;
                let mut positions = Vec::with_capacity(keys.len());
                for key in &keys {
                    let position = table.def.position(*key).ok_or_else(|| Error::ColumnNotFound {
                        table: name.to_string(),
                        column: format!("#{}", key),
                    })?;
                    positions.push(position);
                }
                let rows = table
                    .rows
                    .iter()
                    .map(|(_, row)| positions.iter().map(|p| row[*p].clone()).collect())
                    .collect();
                Ok(SourceRows { keys, rows })
            }
            RelationRef::View(name) => {
                let inner = self.catalog.view_def(name)?;
                let positions: Vec<usize> = keys.iter().map(|k| *k as usize).collect();
                let rows = self.read(&inner, &positions)?;
                Ok(SourceRows { keys, rows })
            }
        }
    }

    /// Whether the column behind a binding has been dropped, looking through
    /// nested views.
    fn is_stale(&self, view: &ViewDef, column: &BoundColumn) -> Result<bool> {
        let Some(source) = view.sources.get(column.source) else {
            return Ok(true);
        };
        match &source.relation {
            RelationRef::Table(name) => {
                Ok(self.locked.table(name)?.def.column_by_id(column.key).is_none())
            }
            RelationRef::View(name) => {
                let inner = self.catalog.view_def(name)?;
                match inner.bindings.get(column.key as usize) {
                    Some(binding) => self.is_stale(&inner, &binding.column),
                    None => Ok(true),
                }
            }
        }
    }
}

fn resolve<'a>(sources: &'a [SourceRows], combo: &[usize], column: &BoundColumn) -> &'a Value {
    sources[column.source].value(combo[column.source], column.key)
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, ColumnDef, CompareOp, Predicate, ViewQuery};
    use crate::error::ErrorKind;
    use crate::types::{DataType, Value};

    fn shop() -> Catalog {
        let catalog = Catalog::default();
        catalog
            .create_table(
                "customers",
                vec![
                    ColumnDef::new("id", DataType::Integer).primary_key(),
                    ColumnDef::new("name", DataType::Text),
                ],
            )
            .unwrap();
        catalog
            .create_table(
                "orders",
                vec![
                    ColumnDef::new("id", DataType::Integer).primary_key(),
                    ColumnDef::new("customer_id", DataType::Integer),
                    ColumnDef::new("total", DataType::Float),
                ],
            )
            .unwrap();
        catalog.insert("customers", vec![Value::Int(1), Value::text("ann")]).unwrap();
        catalog.insert("customers", vec![Value::Int(2), Value::text("bob")]).unwrap();
        catalog
            .insert("orders", vec![Value::Int(10), Value::Int(1), Value::Float(5.0)])
            .unwrap();
        catalog
            .insert("orders", vec![Value::Int(11), Value::Int(1), Value::Float(50.0)])
            .unwrap();
        catalog
            .insert("orders", vec![Value::Int(12), Value::Int(2), Value::Float(20.0)])
            .unwrap();
        catalog
    }

    #[test]
    fn test_join_view() {
        let catalog = shop();
        catalog
            .create_view(
                "big_orders",
                ViewQuery::source("customers")
                    .join_as("orders", "o")
                    .column("customers.name")
                    .column_as("o.total", "amount")
                    .filter(Predicate::columns_eq("customers.id", "o.customer_id"))
                    .filter(Predicate::compare("o.total", CompareOp::GtEq, 20)),
            )
            .unwrap();

        let rs = catalog.read_view("big_orders").unwrap();
        assert_eq!(rs.columns, vec!["name", "amount"]);
        assert_eq!(
            rs.rows,
            vec![
                vec![Value::text("ann"), Value::Float(50.0)],
                vec![Value::text("bob"), Value::Float(20.0)],
            ]
        );
    }

    #[test]
    fn test_view_over_view_sees_dropped_column_as_stale() {
        let catalog = shop();
        catalog
            .create_view("all_orders", ViewQuery::select_all_from("orders"))
            .unwrap();
        catalog
            .create_view(
                "totals",
                ViewQuery::source("all_orders").column("id").column("total"),
            )
            .unwrap();

        catalog.alter_table_drop_column("orders", "total").unwrap();
        let err = catalog.read_view("totals").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleViewBinding);

        let rs = catalog.read_view_columns("totals", &["id"]).unwrap();
        assert_eq!(rs.len(), 3);
    }

    #[test]
    fn test_stale_filter_column_fails_every_read() {
        let catalog = shop();
        catalog
            .create_view(
                "cheap",
                ViewQuery::source("orders")
                    .column("id")
                    .filter(Predicate::compare("total", CompareOp::Lt, 10)),
            )
            .unwrap();
        assert_eq!(catalog.read_view("cheap").unwrap().len(), 1);

        catalog.alter_table_drop_column("orders", "total").unwrap();
        let err = catalog.read_view_columns("cheap", &["id"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleViewBinding);
    }
}
