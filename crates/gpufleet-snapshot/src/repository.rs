//! Snapshot metadata persistence seam, mirroring the original
//! `SnapshotRepository` protocol and its in-memory test double
//! (`src/services/snapshot_cleanup_agent.py`). Kept separate from
//! `gpufleet_core::ports` since it is internal bookkeeping for this crate,
//! not a vendor integration seam the composition root injects.

use async_trait::async_trait;
use gpufleet_core::model::{InstanceId, Snapshot, SnapshotId};
use gpufleet_core::CoreResult;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn get_all_active(&self) -> CoreResult<Vec<Snapshot>>;
    async fn get_snapshots_by_instance(&self, instance_id: &InstanceId) -> CoreResult<Vec<Snapshot>>;
    async fn get(&self, snapshot_id: &SnapshotId) -> CoreResult<Option<Snapshot>>;
    async fn upsert(&self, snapshot: Snapshot) -> CoreResult<()>;
}

#[derive(Default)]
pub struct InMemorySnapshotRepository {
    snapshots: Mutex<HashMap<SnapshotId, Snapshot>>,
}

impl InMemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn get_all_active(&self) -> CoreResult<Vec<Snapshot>> {
        use gpufleet_core::model::SnapshotStatus;
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.status == SnapshotStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_snapshots_by_instance(&self, instance_id: &InstanceId) -> CoreResult<Vec<Snapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .values()
            .filter(|s| &s.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn get(&self, snapshot_id: &SnapshotId) -> CoreResult<Option<Snapshot>> {
        Ok(self.snapshots.lock().unwrap().get(snapshot_id).cloned())
    }

    async fn upsert(&self, snapshot: Snapshot) -> CoreResult<()> {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.snapshot_id.clone(), snapshot);
        Ok(())
    }
}
