//! Engine counters.
//!
//! Tracks row mutations, bulk load throughput, DDL activity and rejected
//! mutations by error kind. Counters are relaxed atomics; a snapshot is not a
//! consistent cut across counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::ErrorKind;

/// Row mutation type for metrics tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    /// Single-row insert.
    Insert,
    /// Update statement.
    Update,
    /// Delete statement (including cascaded rows).
    Delete,
}

/// Counters for one catalog instance.
pub struct EngineMetrics {
    started_at: Instant,

    insert_count: AtomicU64,
    update_count: AtomicU64,
    delete_count: AtomicU64,
    rows_affected: AtomicU64,

    bulk_rows_loaded: AtomicU64,
    bulk_batches_committed: AtomicU64,
    bulk_batches_rejected: AtomicU64,

    ddl_count: AtomicU64,
    cascade_drops: AtomicU64,

    rejections: DashMap<ErrorKind, AtomicU64>,
}

/// Shared handle to engine metrics.
pub type SharedMetrics = Arc<EngineMetrics>;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since the catalog was created.
    pub uptime_secs: u64,
    /// Single-row inserts committed.
    pub inserts: u64,
    /// Update statements committed.
    pub updates: u64,
    /// Delete statements committed.
    pub deletes: u64,
    /// Rows touched by committed mutations.
    pub rows_affected: u64,
    /// Rows committed through the bulk loader.
    pub bulk_rows_loaded: u64,
    /// Bulk batches committed.
    pub bulk_batches_committed: u64,
    /// Bulk batches discarded by a violation or abort.
    pub bulk_batches_rejected: u64,
    /// Catalog mutations applied.
    pub ddl_operations: u64,
    /// Drops that removed dependents.
    pub cascade_drops: u64,
    /// Rejected operations by error kind.
    pub rejections: BTreeMap<String, u64>,
}

impl EngineMetrics {
    /// Create a new, zeroed registry.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            insert_count: AtomicU64::new(0),
            update_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
            rows_affected: AtomicU64::new(0),
            bulk_rows_loaded: AtomicU64::new(0),
            bulk_batches_committed: AtomicU64::new(0),
            bulk_batches_rejected: AtomicU64::new(0),
            ddl_count: AtomicU64::new(0),
            cascade_drops: AtomicU64::new(0),
            rejections: DashMap::new(),
        }
    }

    /// Record a committed row mutation.
    pub fn record_mutation(&self, op_type: MutationType, affected_rows: u64) {
        self.rows_affected.fetch_add(affected_rows, Ordering::Relaxed);
        match op_type {
            MutationType::Insert => self.insert_count.fetch_add(1, Ordering::Relaxed),
            MutationType::Update => self.update_count.fetch_add(1, Ordering::Relaxed),
            MutationType::Delete => self.delete_count.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a committed bulk batch.
    pub fn record_bulk_batch(&self, rows: u64) {
        self.bulk_rows_loaded.fetch_add(rows, Ordering::Relaxed);
        self.bulk_batches_committed.fetch_add(1, Ordering::Relaxed);
        self.rows_affected.fetch_add(rows, Ordering::Relaxed);
    }

    /// Record a discarded bulk batch.
    pub fn record_bulk_rejected(&self) {
        self.bulk_batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a catalog mutation.
    pub fn record_ddl(&self, cascaded: bool) {
        self.ddl_count.fetch_add(1, Ordering::Relaxed);
        if cascaded {
            self.cascade_drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a rejected operation.
    pub fn record_rejection(&self, kind: ErrorKind) {
        self.rejections
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Number of rejections recorded for one error kind.
    pub fn rejections(&self, kind: ErrorKind) -> u64 {
        self.rejections
            .get(&kind)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Copy all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            inserts: self.insert_count.load(Ordering::Relaxed),
            updates: self.update_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
            rows_affected: self.rows_affected.load(Ordering::Relaxed),
            bulk_rows_loaded: self.bulk_rows_loaded.load(Ordering::Relaxed),
            bulk_batches_committed: self.bulk_batches_committed.load(Ordering::Relaxed),
            bulk_batches_rejected: self.bulk_batches_rejected.load(Ordering::Relaxed),
            ddl_operations: self.ddl_count.load(Ordering::Relaxed),
            cascade_drops: self.cascade_drops.load(Ordering::Relaxed),
            rejections: self
                .rejections
                .iter()
                .map(|entry| (format!("{:?}", entry.key()), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
