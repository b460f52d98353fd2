//! Rendering of command output as tables, JSON or CSV.

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use relcat_core::{ResultSet, Value};

use crate::executor::{Output, Section};

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Boxed text tables
    Table,
    /// One JSON document per command
    Json,
    /// Comma-separated values
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        };
        f.write_str(name)
    }
}

/// Renders command output and errors in one format.
pub trait Formatter: Send + Sync {
    fn format_output(&self, output: &Output) -> String;

    fn format_error(&self, error: &str) -> String;
}

/// Build the formatter for `format`.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// Header plus string cells, the shape both text formats render.
struct Grid<'a> {
    title: Option<&'a str>,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl<'a> Grid<'a> {
    fn from_result(result: &ResultSet, render: fn(&Value) -> String) -> Self {
        Grid {
            title: None,
            headers: result.columns.clone(),
            rows: result
                .rows
                .iter()
                .map(|row| row.iter().map(render).collect())
                .collect(),
        }
    }

    fn from_section(section: &'a Section, render: fn(&str) -> String) -> Self {
        Grid {
            title: section.title.as_deref(),
            headers: section.headers.clone(),
            rows: section
                .rows
                .iter()
                .map(|row| row.iter().map(|cell| render(cell)).collect())
                .collect(),
        }
    }
}

/// Text tables drawn with comfy-table.
pub struct TableFormatter;

impl TableFormatter {
    fn draw(grid: &Grid<'_>) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(grid.headers.iter().map(Cell::new));
        for row in &grid.rows {
            table.add_row(row.iter().map(Cell::new));
        }
        table.to_string()
    }
}

impl Formatter for TableFormatter {
    fn format_output(&self, output: &Output) -> String {
        match output {
            Output::Rows(result) => {
                let grid = Grid::from_result(result, Value::to_string);
                format!("{}\n{} row(s)", Self::draw(&grid), result.len())
            }
            Output::Affected { count, message } if message.is_empty() => {
                format!("{} row(s) affected", count)
            }
            Output::Affected { count, message } => format!("{} ({} row(s))", message, count),
            Output::Message(message) => message.clone(),
            Output::Listing { sections, .. } => {
                let blocks: Vec<String> = sections
                    .iter()
                    .map(|section| {
                        let grid = Grid::from_section(section, str::to_string);
                        let body = if grid.rows.is_empty() {
                            "(none)".to_string()
                        } else {
                            Self::draw(&grid)
                        };
                        match grid.title {
                            Some(title) => format!("{}\n{}", title, body),
                            None => body,
                        }
                    })
                    .collect();
                blocks.join("\n\n")
            }
        }
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// Pretty-printed JSON documents.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_output(&self, output: &Output) -> String {
        let document = match output {
            Output::Rows(result) => serde_json::Value::Array(
                result
                    .rows
                    .iter()
                    .map(|row| {
                        result
                            .columns
                            .iter()
                            .cloned()
                            .zip(row.iter().map(json_value))
                            .collect::<serde_json::Map<_, _>>()
                            .into()
                    })
                    .collect(),
            ),
            Output::Affected { count, message } => {
                serde_json::json!({ "affected": count, "message": message })
            }
            Output::Message(message) => serde_json::json!({ "message": message }),
            Output::Listing { json, .. } => json.clone(),
        };
        serde_json::to_string_pretty(&document).unwrap_or_default()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({ "error": error }).to_string()
    }
}

/// RFC 4180 style CSV. NULL is an empty field.
pub struct CsvFormatter;

impl CsvFormatter {
    fn write(grid: &Grid<'_>) -> String {
        let mut out = String::new();
        for line in std::iter::once(&grid.headers).chain(&grid.rows) {
            let fields: Vec<String> = line.iter().map(|f| csv_field(f)).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

impl Formatter for CsvFormatter {
    fn format_output(&self, output: &Output) -> String {
        match output {
            Output::Rows(result) => Self::write(&Grid::from_result(result, |value| match value {
                Value::Null => String::new(),
                other => other.to_string(),
            })),
            Output::Affected { count, message } => Self::write(&Grid {
                title: None,
                headers: vec!["affected".into(), "message".into()],
                rows: vec![vec![count.to_string(), message.clone()]],
            }),
            Output::Message(message) => message.clone(),
            // Only the first section has a tabular shape worth emitting.
            Output::Listing { sections, .. } => sections
                .first()
                .map(|section| Self::write(&Grid::from_section(section, str::to_string)))
                .unwrap_or_default(),
        }
    }

    fn format_error(&self, error: &str) -> String {
        format!("error\n{}", csv_field(error))
    }
}

/// Quote a CSV field when it contains a separator, quote or line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        // Non-finite floats have no JSON spelling.
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or_default(),
        Value::Text(s) => s.as_str().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Output {
        Output::Rows(ResultSet::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::text("say \"hi\"")],
                vec![Value::Int(2), Value::Null],
            ],
        ))
    }

    #[test]
    fn test_csv_rows_quote_only_when_needed() {
        let out = CsvFormatter.format_output(&sample());
        assert_eq!(out, "id,name\n1,\"say \"\"hi\"\"\"\n2,\n");
    }

    #[test]
    fn test_json_rows_are_objects() {
        let out = JsonFormatter.format_output(&sample());
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["id"], 1);
        assert_eq!(parsed[0]["name"], "say \"hi\"");
        assert_eq!(parsed[1]["name"], serde_json::Value::Null);
    }

    #[test]
    fn test_table_rows_report_count() {
        let out = TableFormatter.format_output(&sample());
        assert!(out.contains("NULL"));
        assert!(out.ends_with("2 row(s)"));
    }

    #[test]
    fn test_empty_listing_section() {
        let output = Output::Listing {
            sections: vec![Section {
                title: Some("Constraints".into()),
                headers: vec!["Name".into()],
                rows: Vec::new(),
            }],
            json: serde_json::Value::Null,
        };
        assert_eq!(TableFormatter.format_output(&output), "Constraints\n(none)");
    }

    #[test]
    fn test_affected_message() {
        let output = Output::Affected {
            count: 3,
            message: "DELETE FROM t".into(),
        };
        assert_eq!(TableFormatter.format_output(&output), "DELETE FROM t (3 row(s))");
        assert_eq!(
            CsvFormatter.format_output(&output),
            "affected,message\n3,DELETE FROM t\n"
        );
    }

    #[test]
    fn test_format_display() {
        assert_eq!(OutputFormat::Csv.to_string(), "csv");
    }
}
