//! Script format.
//!
//! A script is JSON: either a bare array of commands, or an object with an
//! optional `config` header and a `commands` array. Commands carry structural
//! operations only; there is no SQL text to parse.

use relcat_core::{
    Assignment, ColumnDef, ConstraintKind, EngineConfig, NewConstraint, Predicate, Value, ViewQuery,
};
use serde::Deserialize;

use crate::executor::ExecuteError;

/// One structural operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Create a table with inline and table-level constraints.
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
        #[serde(default)]
        constraints: Vec<NewConstraint>,
    },
    /// Create a view over tables or other views.
    CreateView {
        name: String,
        query: ViewQuery,
    },
    /// Append a column, optionally constrained.
    AddColumn {
        table: String,
        column: ColumnDef,
        #[serde(default)]
        constraint: Option<ConstraintKind>,
    },
    /// Drop a column and the constraints over it.
    DropColumn {
        table: String,
        column: String,
    },
    /// Add a constraint, validated against existing rows.
    AddConstraint {
        table: String,
        constraint: NewConstraint,
    },
    /// Drop a named constraint.
    DropConstraint {
        table: String,
        name: String,
        #[serde(default)]
        cascade: bool,
    },
    /// Drop a table.
    DropTable {
        name: String,
        #[serde(default)]
        cascade: bool,
    },
    /// Drop a view.
    DropView {
        name: String,
        #[serde(default)]
        cascade: bool,
    },
    /// Drop every object in the catalog.
    DropAll,
    /// Insert one row.
    Insert {
        table: String,
        /// Empty means every column, in order.
        #[serde(default)]
        columns: Vec<String>,
        values: Vec<Value>,
    },
    /// Update rows matching the filter.
    Update {
        table: String,
        set: Vec<Assignment>,
        #[serde(default)]
        filter: Vec<Predicate>,
    },
    /// Delete rows matching the filter, applying referential actions.
    Delete {
        table: String,
        #[serde(default)]
        filter: Vec<Predicate>,
    },
    /// Scan a table.
    Select {
        table: String,
        #[serde(default)]
        filter: Vec<Predicate>,
    },
    /// Read a view's bound columns.
    ReadView {
        name: String,
        /// Empty means every bound column.
        #[serde(default)]
        columns: Vec<String>,
    },
    /// Load rows in all-or-nothing batches.
    BulkLoad {
        table: String,
        #[serde(default)]
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Columns, constraints, indexes and referencing constraints of a table.
    DescribeTable {
        name: String,
    },
    /// Definition and bound columns of a view.
    DescribeView {
        name: String,
    },
    /// Every table.
    ListTables,
    /// Every view.
    ListViews,
    /// Every index.
    ListIndexes,
    /// Constraints of one table.
    ListConstraints {
        table: String,
    },
    /// Dependency edges into and out of an object.
    Dependencies {
        name: String,
    },
    /// Engine counters.
    Metrics,
}

impl Command {
    /// Short label for log lines and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Command::CreateTable { .. } => "create_table",
            Command::CreateView { .. } => "create_view",
            Command::AddColumn { .. } => "add_column",
            Command::DropColumn { .. } => "drop_column",
            Command::AddConstraint { .. } => "add_constraint",
            Command::DropConstraint { .. } => "drop_constraint",
            Command::DropTable { .. } => "drop_table",
            Command::DropView { .. } => "drop_view",
            Command::DropAll => "drop_all",
            Command::Insert { .. } => "insert",
            Command::Update { .. } => "update",
            Command::Delete { .. } => "delete",
            Command::Select { .. } => "select",
            Command::ReadView { .. } => "read_view",
            Command::BulkLoad { .. } => "bulk_load",
            Command::DescribeTable { .. } => "describe_table",
            Command::DescribeView { .. } => "describe_view",
            Command::ListTables => "list_tables",
            Command::ListViews => "list_views",
            Command::ListIndexes => "list_indexes",
            Command::ListConstraints { .. } => "list_constraints",
            Command::Dependencies { .. } => "dependencies",
            Command::Metrics => "metrics",
        }
    }
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    /// Engine configuration from the script header, if any.
    pub config: Option<EngineConfig>,
    /// Commands in execution order.
    pub commands: Vec<Command>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScript {
    Bare(Vec<Command>),
    WithHeader {
        #[serde(default)]
        config: Option<EngineConfig>,
        commands: Vec<Command>,
    },
}

impl Script {
    /// Parse script text.
    pub fn parse(text: &str) -> Result<Self, ExecuteError> {
        let raw: RawScript = serde_json::from_str(text)?;
        Ok(match raw {
            RawScript::Bare(commands) => Script {
                config: None,
                commands,
            },
            RawScript::WithHeader { config, commands } => Script { config, commands },
        })
    }
}
