//! Command execution.

use relcat_core::{AbortHandle, BulkLoader, Catalog, ResultSet};
use thiserror::Error;
use tracing::debug;

use crate::formatter::Formatter;
use crate::script::Command;

/// Execution errors.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Script could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Script is not valid JSON or names an unknown operation.
    #[error("invalid script: {0}")]
    Parse(#[from] serde_json::Error),

    /// The engine rejected the operation.
    #[error("{0}")]
    Engine(#[from] relcat_core::Error),
}

/// A titled block of rows in a metadata listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Heading printed above the block.
    pub title: Option<String>,
    /// Column headers.
    pub headers: Vec<String>,
    /// Cells, already rendered.
    pub rows: Vec<Vec<String>>,
}

impl Section {
    fn new(title: Option<String>, headers: &[&str], rows: Vec<Vec<String>>) -> Self {
        Self {
            title,
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }
}

/// What a command produced, before formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Rows from a scan or a view read.
    Rows(ResultSet),
    /// A mutation's row count.
    Affected { count: u64, message: String },
    /// A plain acknowledgement.
    Message(String),
    /// Catalog metadata, tabulated and in its serialized form.
    Listing {
        sections: Vec<Section>,
        json: serde_json::Value,
    },
}

/// Execute one command and format its output.
pub fn execute(
    catalog: &Catalog,
    command: Command,
    formatter: &dyn Formatter,
) -> Result<String, ExecuteError> {
    let label = command.label();
    let output = run(catalog, command)?;
    debug!(command = label, "Executed command");
    Ok(formatter.format_output(&output))
}

/// Execute one command.
pub fn run(catalog: &Catalog, command: Command) -> Result<Output, ExecuteError> {
    let output = match command {
        Command::CreateTable {
            name,
            columns,
            constraints,
        } => {
            let name = catalog.create_table_with(&name, columns, constraints)?;
            Output::Message(format!("CREATE TABLE {}", name))
        }
        Command::CreateView { name, query } => {
            let name = catalog.create_view(&name, query)?;
            Output::Message(format!("CREATE VIEW {}", name))
        }
        Command::AddColumn {
            table,
            column,
            constraint,
        } => {
            let column_name = column.name.clone();
            catalog.alter_table_add_column(&table, column, constraint)?;
            Output::Message(format!("ALTER TABLE {} ADD COLUMN {}", table, column_name))
        }
        Command::DropColumn { table, column } => {
            catalog.alter_table_drop_column(&table, &column)?;
            Output::Message(format!("ALTER TABLE {} DROP COLUMN {}", table, column))
        }
        Command::AddConstraint { table, constraint } => {
            let name = catalog.add_constraint(&table, constraint)?;
            Output::Message(format!("ALTER TABLE {} ADD CONSTRAINT {}", table, name))
        }
        Command::DropConstraint {
            table,
            name,
            cascade,
        } => dropped(catalog.drop_constraint(&table, &name, cascade)?),
        Command::DropTable { name, cascade } => dropped(catalog.drop_table(&name, cascade)?),
        Command::DropView { name, cascade } => dropped(catalog.drop_view(&name, cascade)?),
        Command::DropAll => {
            catalog.drop_all();
            Output::Message("DROP ALL".to_string())
        }
        Command::Insert {
            table,
            columns,
            values,
        } => {
            if columns.is_empty() {
                catalog.insert(&table, values)?;
            } else {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                catalog.insert_columns(&table, &columns, values)?;
            }
            Output::Affected {
                count: 1,
                message: format!("INSERT INTO {}", table),
            }
        }
        Command::Update { table, set, filter } => {
            let count = catalog.update_where(&table, set, &filter)?;
            Output::Affected {
                count: count as u64,
                message: format!("UPDATE {}", table),
            }
        }
        Command::Delete { table, filter } => {
            let outcome = catalog.delete_where(&table, &filter)?;
            Output::Affected {
                count: outcome.deleted as u64,
                message: format!(
                    "DELETE FROM {} ({} cascaded, {} set null)",
                    table, outcome.cascaded, outcome.nullified
                ),
            }
        }
        Command::Select { table, filter } => Output::Rows(catalog.scan(&table, &filter)?),
        Command::ReadView { name, columns } => {
            if columns.is_empty() {
                Output::Rows(catalog.read_view(&name)?)
            } else {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                Output::Rows(catalog.read_view_columns(&name, &columns)?)
            }
        }
        Command::BulkLoad {
            table,
            columns,
            rows,
        } => {
            let loader = BulkLoader::new(catalog);
            let abort = AbortHandle::new();
            let report = if columns.is_empty() {
                loader.load(&table, rows, &abort)?
            } else {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                loader.load_columns(&table, &columns, rows, &abort)?
            };
            Output::Affected {
                count: report.rows_loaded,
                message: format!("COPY {} ({} batches)", table, report.batches),
            }
        }
        Command::DescribeTable { name } => describe_table(catalog, &name)?,
        Command::DescribeView { name } => {
            let view = catalog.describe_view(&name)?;
            let rows = view
                .columns
                .iter()
                .map(|c| vec![c.name.clone(), c.source.clone(), yes_no(c.stale)])
                .collect();
            Output::Listing {
                sections: vec![Section::new(
                    Some(format!("View \"{}\": {}", view.name, view.definition)),
                    &["Column", "Source", "Stale"],
                    rows,
                )],
                json: serde_json::to_value(&view)?,
            }
        }
        Command::ListTables => {
            let tables = catalog.list_tables();
            let rows = tables
                .iter()
                .map(|t| {
                    let count = catalog.row_count(&t.to_string()).unwrap_or(0);
                    vec![t.schema.clone(), t.name.clone(), count.to_string()]
                })
                .collect();
            Output::Listing {
                sections: vec![Section::new(None, &["Schema", "Name", "Rows"], rows)],
                json: serde_json::to_value(&tables)?,
            }
        }
        Command::ListViews => {
            let views = catalog.list_views();
            let rows = views
                .iter()
                .map(|v| vec![v.name.clone(), v.definition.clone()])
                .collect();
            Output::Listing {
                sections: vec![Section::new(None, &["Name", "Definition"], rows)],
                json: serde_json::to_value(&views)?,
            }
        }
        Command::ListIndexes => {
            let indexes = catalog.list_indexes();
            let rows = indexes
                .iter()
                .map(|i| {
                    vec![
                        i.name.clone(),
                        i.table.clone(),
                        i.columns.join(", "),
                        yes_no(i.primary),
                        i.entries.to_string(),
                    ]
                })
                .collect();
            Output::Listing {
                sections: vec![Section::new(
                    None,
                    &["Name", "Table", "Columns", "Primary", "Entries"],
                    rows,
                )],
                json: serde_json::to_value(&indexes)?,
            }
        }
        Command::ListConstraints { table } => {
            let constraints = catalog.list_constraints(&table)?;
            Output::Listing {
                sections: vec![constraint_section(&constraints)],
                json: serde_json::to_value(&constraints)?,
            }
        }
        Command::Dependencies { name } => {
            let info = catalog.dependencies_of(&name)?;
            let mut rows: Vec<Vec<String>> = info
                .depends_on
                .iter()
                .map(|e| vec!["depends on".into(), e.depends_on.to_string(), format!("{:?}", e.kind)])
                .collect();
            rows.extend(info.dependents.iter().map(|e| {
                vec!["required by".into(), e.dependent.to_string(), format!("{:?}", e.kind)]
            }));
            Output::Listing {
                sections: vec![Section::new(
                    Some(info.object.to_string()),
                    &["Direction", "Object", "Kind"],
                    rows,
                )],
                json: serde_json::to_value(&info)?,
            }
        }
        Command::Metrics => {
            let snapshot = catalog.metrics().snapshot();
            let json = serde_json::to_value(&snapshot)?;
            let rows = match &json {
                serde_json::Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| vec![k.clone(), v.to_string()])
                    .collect(),
                _ => Vec::new(),
            };
            Output::Listing {
                sections: vec![Section::new(None, &["Counter", "Value"], rows)],
                json,
            }
        }
    };
    Ok(output)
}

fn dropped(removed: Vec<relcat_core::ObjectRef>) -> Output {
    let names: Vec<String> = removed.iter().map(|o| o.to_string()).collect();
    Output::Message(format!("DROP {}", names.join(", ")))
}

fn describe_table(catalog: &Catalog, name: &str) -> Result<Output, ExecuteError> {
    let info = catalog.describe_table(name)?;
    let columns = info
        .columns
        .iter()
        .map(|c| {
            vec![
                c.name.clone(),
                c.data_type.clone(),
                yes_no(c.nullable),
                c.default.clone().unwrap_or_default(),
            ]
        })
        .collect();
    let mut sections = vec![
        Section::new(
            Some(format!("Table \"{}\" ({} rows)", info.name, info.row_count)),
            &["Column", "Type", "Nullable", "Default"],
            columns,
        ),
        constraint_section(&info.constraints),
    ];
    if !info.referenced_by.is_empty() {
        sections.push(Section::new(
            Some("Referenced by".to_string()),
            &["Constraint"],
            info.referenced_by.iter().map(|r| vec![r.clone()]).collect(),
        ));
    }
    Ok(Output::Listing {
        sections,
        json: serde_json::to_value(&info)?,
    })
}

fn constraint_section(constraints: &[relcat_core::ConstraintInfo]) -> Section {
    let rows = constraints
        .iter()
        .map(|c| {
            let references = c
                .references
                .as_ref()
                .map(|r| format!("{}({}) on delete {:?}", r.table, r.columns.join(", "), r.on_delete))
                .unwrap_or_default();
            vec![
                c.name.clone(),
                format!("{:?}", c.kind),
                c.columns.join(", "),
                references,
            ]
        })
        .collect();
    Section::new(
        Some("Constraints".to_string()),
        &["Name", "Kind", "Columns", "References"],
        rows,
    )
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use relcat_core::Value;

    fn run_script(catalog: &Catalog, text: &str) -> Vec<Result<Output, ExecuteError>> {
        Script::parse(text)
            .unwrap()
            .commands
            .into_iter()
            .map(|c| run(catalog, c))
            .collect()
    }

    #[test]
    fn test_run_create_insert_select() {
        let catalog = Catalog::default();
        let results = run_script(
            &catalog,
            r#"[
                {"op": "create_table", "name": "t", "columns": [
                    {"name": "id", "type": "serial", "primary_key": true},
                    {"name": "v", "type": "text"}]},
                {"op": "insert", "table": "t", "columns": ["v"], "values": ["a"]},
                {"op": "select", "table": "t"}
            ]"#,
        );
        assert!(matches!(&results[0], Ok(Output::Message(m)) if m == "CREATE TABLE public.t"));
        match &results[2] {
            Ok(Output::Rows(rs)) => {
                assert_eq!(rs.rows, vec![vec![Value::Int(1), Value::text("a")]]);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_engine_errors_surface() {
        let catalog = Catalog::default();
        let results = run_script(&catalog, r#"[{"op": "drop_table", "name": "ghost"}]"#);
        match &results[0] {
            Err(ExecuteError::Engine(err)) => {
                assert_eq!(err.kind(), relcat_core::ErrorKind::TableNotFound)
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_describe_table_sections() {
        let catalog = Catalog::default();
        run_script(
            &catalog,
            r#"[{"op": "create_table", "name": "t", "columns": [
                {"name": "id", "type": "integer", "primary_key": true}]}]"#,
        );
        match run(&catalog, Command::DescribeTable { name: "t".into() }).unwrap() {
            Output::Listing { sections, json } => {
                assert_eq!(sections.len(), 2);
                assert_eq!(sections[1].rows[0][0], "t_pkey");
                assert_eq!(json["row_count"], 0);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
