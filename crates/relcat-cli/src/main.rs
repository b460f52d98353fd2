//! relcat script runner
//!
//! Executes a JSON script of catalog and row operations against a fresh
//! in-memory catalog and prints each result.

use std::path::PathBuf;

use clap::Parser;
use relcat_cli::executor::{self, ExecuteError};
use relcat_cli::formatter::{self, OutputFormat};
use relcat_cli::script::Script;
use relcat_core::{Catalog, EngineConfig};
use tracing::{info, warn};

/// relcat script runner
#[derive(Parser, Debug)]
#[command(name = "relcat")]
#[command(version, about = "Run a relcat script against an in-memory catalog")]
pub struct Args {
    /// Script file (JSON)
    pub script: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Schema for unqualified names
    #[arg(long)]
    pub default_schema: Option<String>,

    /// Rows per all-or-nothing bulk load batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Rows between abort checks during bulk load
    #[arg(long)]
    pub abort_check_interval: Option<usize>,

    /// Maximum ON DELETE CASCADE depth
    #[arg(long)]
    pub max_cascade_depth: Option<usize>,

    /// Attempts at taking a consistent lock set
    #[arg(long)]
    pub lock_retry_limit: Option<usize>,

    /// Stop at the first failing command
    #[arg(long)]
    pub stop_on_error: bool,
}

impl Args {
    /// Apply command-line overrides on top of a base configuration.
    pub fn into_config(&self, base: EngineConfig) -> EngineConfig {
        let mut config = base;
        if let Some(schema) = &self.default_schema {
            config = config.with_default_schema(schema.clone());
        }
        if let Some(rows) = self.batch_size {
            config = config.with_bulk_batch_size(rows);
        }
        if let Some(rows) = self.abort_check_interval {
            config = config.with_abort_check_interval(rows);
        }
        if let Some(depth) = self.max_cascade_depth {
            config = config.with_max_cascade_depth(depth);
        }
        if let Some(attempts) = self.lock_retry_limit {
            config = config.with_lock_retry_limit(attempts);
        }
        config
    }
}

fn main() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "relcat=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(0) => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run the script, returning the number of failed commands.
fn run(args: &Args) -> Result<usize, ExecuteError> {
    let text = std::fs::read_to_string(&args.script)?;
    let script = Script::parse(&text)?;
    let config = args.into_config(script.config.unwrap_or_default());
    let catalog = Catalog::new(config)?;
    let formatter = formatter::create_formatter(args.format);

    info!(
        script = %args.script.display(),
        commands = script.commands.len(),
        "Running script"
    );

    let mut failures = 0;
    for (index, command) in script.commands.into_iter().enumerate() {
        let label = command.label();
        match executor::execute(&catalog, command, &*formatter) {
            Ok(output) => {
                if !output.is_empty() {
                    println!("{}", output);
                }
            }
            Err(e) => {
                failures += 1;
                warn!(index, command = label, error = %e, "Command failed");
                eprintln!(
                    "{}",
                    formatter.format_error(&format!("command {} ({}): {}", index + 1, label, e))
                );
                if args.stop_on_error {
                    break;
                }
            }
        }
    }
    Ok(failures)
}
