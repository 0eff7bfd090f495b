//! Append-only persistence seam for `LifecycleEvent`s, mirroring
//! `gpufleet_snapshot::repository::SnapshotRepository`'s shape: a trait the
//! composition root can back with SQL or JSON files, plus an in-memory
//! default for tests and small deployments.

use async_trait::async_trait;
use gpufleet_core::model::{InstanceId, LifecycleEvent};
use gpufleet_core::CoreResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait LifecycleEventStore: Send + Sync {
    async fn append(&self, event: LifecycleEvent) -> CoreResult<()>;
    async fn for_instance(&self, instance_id: &InstanceId) -> CoreResult<Vec<LifecycleEvent>>;
    async fn all(&self) -> CoreResult<Vec<LifecycleEvent>>;
    fn next_id(&self) -> u64;
}

#[derive(Default)]
pub struct InMemoryLifecycleEventStore {
    events: Mutex<Vec<LifecycleEvent>>,
    next_id: AtomicU64,
}

impl InMemoryLifecycleEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleEventStore for InMemoryLifecycleEventStore {
    async fn append(&self, event: LifecycleEvent) -> CoreResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn for_instance(&self, instance_id: &InstanceId) -> CoreResult<Vec<LifecycleEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| &e.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> CoreResult<Vec<LifecycleEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    /// Monotonically increasing, unique per store instance. `fetch_add`
    /// returns the previous value, so ids start at 1.
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}
