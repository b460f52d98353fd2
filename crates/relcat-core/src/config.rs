//! Engine configuration.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default schema for unqualified names.
pub const DEFAULT_SCHEMA: &str = "public";

/// Default rows per all-or-nothing bulk load batch.
pub const DEFAULT_BULK_BATCH_SIZE: usize = 10_000;

/// Default number of rows between abort-flag polls during bulk load.
pub const DEFAULT_ABORT_CHECK_INTERVAL: usize = 1024;

/// Default maximum depth for ON DELETE CASCADE recursion.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 64;

/// Default number of attempts to take a consistent lock set.
pub const DEFAULT_LOCK_RETRY_LIMIT: usize = 16;

/// Configuration for the catalog and its row-mutation paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema applied to names given without a `schema.` prefix.
    pub default_schema: String,

    /// Rows per bulk load batch. Each batch commits all-or-nothing.
    pub bulk_batch_size: usize,

    /// Rows between checks of a bulk load's abort handle.
    pub abort_check_interval: usize,

    /// Maximum recursion depth for referential actions on delete.
    pub max_cascade_depth: usize,

    /// Attempts at taking a lock set before giving up under schema churn.
    pub lock_retry_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_schema: DEFAULT_SCHEMA.to_string(),
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
            abort_check_interval: DEFAULT_ABORT_CHECK_INTERVAL,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            lock_retry_limit: DEFAULT_LOCK_RETRY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default schema.
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    /// Set the bulk load batch size.
    pub fn with_bulk_batch_size(mut self, rows: usize) -> Self {
        self.bulk_batch_size = rows;
        self
    }

    /// Set the abort check interval.
    pub fn with_abort_check_interval(mut self, rows: usize) -> Self {
        self.abort_check_interval = rows;
        self
    }

    /// Set the maximum cascade depth.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Set the lock retry limit.
    pub fn with_lock_retry_limit(mut self, attempts: usize) -> Self {
        self.lock_retry_limit = attempts;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_schema.is_empty() || self.default_schema.contains('.') {
            return Err(Error::Config(format!(
                "invalid default schema: {:?}",
                self.default_schema
            )));
        }
        if self.bulk_batch_size == 0 {
            return Err(Error::Config("bulk_batch_size must be at least 1".into()));
        }
        if self.abort_check_interval == 0 {
            return Err(Error::Config("abort_check_interval must be at least 1".into()));
        }
        if self.max_cascade_depth == 0 {
            return Err(Error::Config("max_cascade_depth must be at least 1".into()));
        }
        if self.lock_retry_limit == 0 {
            return Err(Error::Config("lock_retry_limit must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.default_schema, "public");
        assert_eq!(config.bulk_batch_size, DEFAULT_BULK_BATCH_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = EngineConfig::new().with_bulk_batch_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"bulk_batch_size": 500}"#).unwrap();
        assert_eq!(config.bulk_batch_size, 500);
        assert_eq!(config.max_cascade_depth, DEFAULT_MAX_CASCADE_DEPTH);
    }
}
