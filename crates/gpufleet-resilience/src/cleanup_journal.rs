//! Resource-cleanup journal.
//!
//! For each failover attempt, tracks resources "provisionally owned" so a
//! failed attempt can be unwound without leaking rented GPUs or uploaded
//! blobs. Grounded on the bulkhead/retry crates' pattern of a small
//! `Mutex`-guarded registry keyed by an opaque id, adapted here to hold
//! cleanup intents rather than concurrency permits.

use gpufleet_core::model::InstanceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournaledResource {
    Instance(InstanceId),
    BlobKey(String),
}

#[derive(Debug, Clone)]
pub struct CleanupOutcome {
    pub resource: JournaledResource,
    pub deleted: bool,
    pub error: Option<String>,
}

pub struct CleanupJournal {
    entries: Mutex<HashMap<String, Vec<JournaledResource>>>,
}

impl Default for CleanupJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupJournal {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, failover_id: &str, resource: JournaledResource) {
        self.entries
            .lock()
            .unwrap()
            .entry(failover_id.to_string())
            .or_default()
            .push(resource);
    }

    /// Drops the journal entry for a successful failover without touching
    /// the underlying resources — they are now owned by the winning path.
    pub fn commit(&self, failover_id: &str) {
        self.entries.lock().unwrap().remove(failover_id);
    }

    /// Takes the resource list for `failover_id` so the caller can perform
    /// best-effort deletion (which requires `InstanceProvider`/`BlobStore`
    /// handles this crate does not hold) and report outcomes back via
    /// [`crate::audit::DeletionAuditLog`].
    pub fn take(&self, failover_id: &str) -> Vec<JournaledResource> {
        self.entries
            .lock()
            .unwrap()
            .remove(failover_id)
            .unwrap_or_default()
    }

    pub fn pending_count(&self, failover_id: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(failover_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_drops_without_reporting_resources() {
        let journal = CleanupJournal::new();
        journal.register("fo-1", JournaledResource::Instance("i-1".into()));
        journal.commit("fo-1");
        assert_eq!(journal.pending_count("fo-1"), 0);
        assert!(journal.take("fo-1").is_empty());
    }

    #[test]
    fn take_drains_registered_resources() {
        let journal = CleanupJournal::new();
        journal.register("fo-1", JournaledResource::Instance("i-1".into()));
        journal.register("fo-1", JournaledResource::BlobKey("chunks/abc".into()));
        assert_eq!(journal.pending_count("fo-1"), 2);

        let taken = journal.take("fo-1");
        assert_eq!(taken.len(), 2);
        assert_eq!(journal.pending_count("fo-1"), 0);
    }

    #[test]
    fn failovers_are_journaled_independently() {
        let journal = CleanupJournal::new();
        journal.register("fo-1", JournaledResource::Instance("i-1".into()));
        journal.register("fo-2", JournaledResource::Instance("i-2".into()));
        assert_eq!(journal.take("fo-1").len(), 1);
        assert_eq!(journal.pending_count("fo-2"), 1);
    }
}
