//! The snapshot cleanup agent: periodically prunes
//! expired snapshots in fixed-size batches, deferring deletion for any
//! snapshot whose descendant chain would otherwise lose its reachable full.

use crate::descriptor::SnapshotDescriptor;
use crate::repository::SnapshotRepository;
use crate::retention::is_deletable;
use chrono::Utc;
use gpufleet_core::model::{Snapshot, SnapshotStatus};
use gpufleet_core::ports::BlobStore;
use gpufleet_resilience::audit::DeletionAuditLog;
use gpufleet_resilience::cleanup_journal::JournaledResource;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    pub batch_size: usize,
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
    pub examined: u64,
    /// Snapshots that passed the deletability check this cycle — in a
    /// `dry_run` this is the only field besides `examined` that reflects
    /// what *would* happen, since nothing is actually deleted.
    pub identified: u64,
    pub deleted: u64,
    pub deferred_pending_deletion: u64,
    pub failed: u64,
    /// Only accumulated on a real (non-dry-run) pass, since a dry run never
    /// calls the blobstore to learn a real size.
    pub bytes_freed: u64,
}

pub struct CleanupAgent<R: SnapshotRepository> {
    config: CleanupConfig,
    repo: Arc<R>,
    blobstore: Arc<dyn BlobStore>,
    audit_log: Arc<DeletionAuditLog>,
}

impl<R: SnapshotRepository> CleanupAgent<R> {
    pub fn new(
        config: CleanupConfig,
        repo: Arc<R>,
        blobstore: Arc<dyn BlobStore>,
        audit_log: Arc<DeletionAuditLog>,
    ) -> Self {
        Self {
            config,
            repo,
            blobstore,
            audit_log,
        }
    }

    /// One cleanup cycle: identify expired snapshots, oldest first, and
    /// process them in `batch_size` batches so one cycle never holds the
    /// repository lock for an unbounded stretch. `dry_run=true` runs the
    /// exact same deletability check but never touches the blobstore or the
    /// repository — `Snapshot.DeleteExpired`'s preview mode.
    pub async fn run_once(&self, dry_run: bool) -> gpufleet_core::CoreResult<CleanupReport> {
        let now = Utc::now();
        let mut candidates = self.repo.get_all_active().await?;
        candidates.retain(|s| !s.is_exempt_from_deletion());
        candidates.sort_by_key(|s| s.created_at);

        let mut report = CleanupReport::default();
        for batch in candidates.chunks(self.config.batch_size) {
            for snapshot in batch {
                report.examined += 1;
                self.process_one(snapshot, now, dry_run, &mut report).await;
            }
        }
        Ok(report)
    }

    async fn process_one(
        &self,
        snapshot: &Snapshot,
        now: chrono::DateTime<Utc>,
        dry_run: bool,
        report: &mut CleanupReport,
    ) {
        let has_unreachable_descendant = self.has_unreachable_incremental_child(snapshot).await;

        if !is_deletable(snapshot, now, has_unreachable_descendant) {
            if has_unreachable_descendant && crate::retention::is_expired(snapshot, now) && !dry_run {
                let mut pending = snapshot.clone();
                pending.status = SnapshotStatus::PendingDeletion;
                let _ = self.repo.upsert(pending).await;
                report.deferred_pending_deletion += 1;
            }
            return;
        }

        report.identified += 1;
        if dry_run {
            return;
        }

        match self.delete_snapshot(snapshot).await {
            Ok(()) => {
                report.deleted += 1;
                report.bytes_freed += snapshot.size_bytes;
            }
            Err(_) => report.failed += 1,
        }
    }

    /// A descendant is "unreachable" if it is an active incremental snapshot
    /// whose ancestry includes `snapshot` and no other live full snapshot
    /// would remain reachable for it once `snapshot` is gone. This crate
    /// only tracks direct parent pointers, so the conservative check is:
    /// any active incremental snapshot whose `parent_id` is `snapshot_id`.
    async fn has_unreachable_incremental_child(&self, snapshot: &Snapshot) -> bool {
        let siblings = self
            .repo
            .get_snapshots_by_instance(&snapshot.instance_id)
            .await
            .unwrap_or_default();
        siblings
            .iter()
            .any(|s| s.parent_id.as_deref() == Some(snapshot.snapshot_id.as_str()))
    }

    async fn delete_snapshot(&self, snapshot: &Snapshot) -> gpufleet_core::CoreResult<()> {
        let mut deleted_all = true;
        let mut last_error = None;

        for path in &snapshot.blob_paths {
            match self.blobstore.delete(path).await {
                Ok(_) => {
                    self.audit_log.record(
                        snapshot.snapshot_id.clone(),
                        JournaledResource::BlobKey(path.clone()),
                        true,
                        None,
                    );
                }
                Err(e) => {
                    deleted_all = false;
                    self.audit_log.record(
                        snapshot.snapshot_id.clone(),
                        JournaledResource::BlobKey(path.clone()),
                        false,
                        Some(e.to_string()),
                    );
                    last_error = Some(e);
                }
            }
        }
        let _ = self.blobstore.delete(&SnapshotDescriptor::blob_key(&snapshot.snapshot_id)).await;

        let mut updated = snapshot.clone();
        updated.status = if deleted_all {
            SnapshotStatus::Deleted
        } else {
            SnapshotStatus::Failed
        };
        self.repo.upsert(updated).await?;

        if !deleted_all {
            #[cfg(feature = "tracing")]
            tracing::warn!(snapshot_id = %snapshot.snapshot_id, "snapshot storage delete exhausted retries");
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("gpufleet_snapshot_cleanup_deleted_total").increment(1);

        Ok(())
    }
}
