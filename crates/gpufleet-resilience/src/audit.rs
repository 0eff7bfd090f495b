//! Deletion audit log.
//!
//! Records the outcome of every resource deletion the cleanup journal or the
//! snapshot retention sweep performs. Bounded FIFO, same shape as
//! `tower-resilience-core`'s event system but append-and-read rather than
//! fan-out-to-listeners, since this log is queried after the fact rather than
//! observed live.

use crate::cleanup_journal::JournaledResource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionAuditRecord {
    pub failover_id: String,
    pub resource: JournaledResource,
    pub deleted: bool,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only, bounded to `capacity` entries. Once full, the oldest record
/// is evicted to make room for the newest — this is a diagnostic trail, not
/// a durable ledger, so unbounded growth is not acceptable.
pub struct DeletionAuditLog {
    capacity: usize,
    records: Mutex<VecDeque<DeletionAuditRecord>>,
}

impl Default for DeletionAuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DeletionAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn record(
        &self,
        failover_id: impl Into<String>,
        resource: JournaledResource,
        deleted: bool,
        error: Option<String>,
    ) {
        let entry = DeletionAuditRecord {
            failover_id: failover_id.into(),
            resource,
            deleted,
            error,
            recorded_at: Utc::now(),
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            failover_id = %entry.failover_id,
            deleted,
            error = entry.error.as_deref(),
            "cleanup outcome recorded"
        );

        let mut records = self.records.lock().unwrap();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn for_failover(&self, failover_id: &str) -> Vec<DeletionAuditRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.failover_id == failover_id)
            .cloned()
            .collect()
    }
}
