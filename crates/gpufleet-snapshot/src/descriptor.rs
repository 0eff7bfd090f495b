//! The snapshot descriptor written to `snapshots/<snapshot_id>.json`, the
//! JSON-file persistence record for a single snapshot.

use crate::manifest::{DiffSummary, Manifest};
use chrono::{DateTime, Utc};
use gpufleet_core::model::{SnapshotId, SnapshotKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    pub snapshot_id: SnapshotId,
    pub kind: SnapshotKind,
    pub parent_id: Option<SnapshotId>,
    pub manifest: Manifest,
    pub diff: Option<DiffSummary>,
    /// Set when chain-depth promotion silently ran a full
    /// snapshot instead of the requested incremental one.
    pub promoted_from_incremental: bool,
    pub created_at: DateTime<Utc>,
}

impl SnapshotDescriptor {
    pub fn blob_key(snapshot_id: &str) -> String {
        format!("snapshots/{snapshot_id}.json")
    }
}
