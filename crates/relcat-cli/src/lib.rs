//! relcat command-line support: script parsing, execution and output formatting.

pub mod executor;
pub mod formatter;
pub mod script;
