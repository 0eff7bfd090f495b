//! The Snapshot Engine: full/incremental workspace capture and validated
//! restore.
//!
//! Every remote filesystem operation goes through [`SshProbe::exec`] — this
//! crate never shells out to `ssh` directly, matching the rest of the
//! workspace's "ports are the only vendor seam" rule. The exec contract used
//! here:
//! - manifest computation: `exec` returns one JSON [`ManifestEntry`] per
//!   line for files under `workspace_path`.
//! - chunk read: `exec` returns the base64-encoded bytes of one chunk.
//! - chunk write: `exec` is given the base64 payload and target path/offset
//!   and returns an empty string on success.
//! - file count: `exec` returns a single integer as text.
//! - commit/discard: a restore is assembled under a staging path and only
//!   moved onto the real workspace path once validated; `exec` is given
//!   `gpufleet-commit-restore <staging> <workspace>` or
//!   `gpufleet-discard-restage <staging>` and returns an empty string.
//!
//! A real deployment's `SshProbe` implementation owns translating these into
//! whatever remote agent or shell pipeline it actually runs.

use crate::descriptor::SnapshotDescriptor;
use crate::manifest::{hash_bytes, Manifest};
use base64::Engine as _;
use chrono::Utc;
use gpufleet_core::model::{Snapshot, SnapshotId, SnapshotKind, SnapshotStatus};
use gpufleet_core::ports::{BlobStore, SshProbe};
use gpufleet_core::{CoreError, CoreResult};
use std::sync::Arc;

/// Ancestry chains longer than this are silently promoted to a full
/// snapshot.
pub const MAX_CHAIN_DEPTH: u32 = 16;

pub struct RestoreOutcome {
    pub files_count: u64,
    pub bytes_restored: u64,
    pub duration_ms: u64,
}

pub struct SnapshotEngine {
    blobstore: Arc<dyn BlobStore>,
    ssh: Arc<dyn SshProbe>,
}

impl SnapshotEngine {
    pub fn new(blobstore: Arc<dyn BlobStore>, ssh: Arc<dyn SshProbe>) -> Self {
        Self { blobstore, ssh }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn full_snapshot(
        &self,
        instance_id: &str,
        owner_id: &str,
        ssh_host: &str,
        ssh_port: u16,
        workspace_path: &str,
        snapshot_id: SnapshotId,
        retention_days: u32,
        keep_forever: bool,
    ) -> CoreResult<Snapshot> {
        let manifest = self.compute_manifest(ssh_host, ssh_port, workspace_path).await?;
        let bytes_uploaded = self
            .upload_missing_chunks(ssh_host, ssh_port, &manifest, &Manifest::default())
            .await?;

        let descriptor = SnapshotDescriptor {
            snapshot_id: snapshot_id.clone(),
            kind: SnapshotKind::Full,
            parent_id: None,
            manifest: manifest.clone(),
            diff: None,
            promoted_from_incremental: false,
            created_at: Utc::now(),
        };
        self.save_descriptor(&descriptor).await?;

        #[cfg(feature = "metrics")]
        metrics::counter!("gpufleet_snapshot_full_total").increment(1);
        #[cfg(feature = "metrics")]
        metrics::histogram!("gpufleet_snapshot_bytes_uploaded").record(bytes_uploaded as f64);

        Ok(Snapshot {
            snapshot_id,
            instance_id: instance_id.to_string(),
            owner_id: owner_id.to_string(),
            kind: SnapshotKind::Full,
            parent_id: None,
            blob_paths: manifest.chunk_hashes().iter().map(|h| format!("chunks/{h}")).collect(),
            size_bytes: manifest.total_size(),
            file_count: manifest.file_count(),
            created_at: descriptor.created_at,
            keep_forever,
            retention_days,
            status: SnapshotStatus::Active,
            storage_provider: "blobstore".to_string(),
        })
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    #[allow(clippy::too_many_arguments)]
    pub async fn incremental_snapshot(
        &self,
        instance_id: &str,
        owner_id: &str,
        ssh_host: &str,
        ssh_port: u16,
        workspace_path: &str,
        base_snapshot_id: &SnapshotId,
        snapshot_id: SnapshotId,
        retention_days: u32,
        keep_forever: bool,
    ) -> CoreResult<Snapshot> {
        let (ancestry, depth) = self.resolve_ancestry(base_snapshot_id).await?;

        if depth + 1 > MAX_CHAIN_DEPTH {
            #[cfg(feature = "tracing")]
            tracing::info!(base_snapshot_id, depth, "chain depth exceeded, promoting to full snapshot");
            let mut promoted = self
                .full_snapshot(
                    instance_id,
                    owner_id,
                    ssh_host,
                    ssh_port,
                    workspace_path,
                    snapshot_id.clone(),
                    retention_days,
                    keep_forever,
                )
                .await?;
            let mut descriptor = self.load_descriptor(&snapshot_id).await?;
            descriptor.promoted_from_incremental = true;
            self.save_descriptor(&descriptor).await?;
            promoted.kind = SnapshotKind::Full;
            return Ok(promoted);
        }

        let base_manifest = merge_ancestry(&ancestry);
        let current_manifest = self.compute_manifest(ssh_host, ssh_port, workspace_path).await?;
        let bytes_uploaded = self
            .upload_missing_chunks(ssh_host, ssh_port, &current_manifest, &base_manifest)
            .await?;
        let diff = current_manifest.diff_against(&base_manifest);

        let descriptor = SnapshotDescriptor {
            snapshot_id: snapshot_id.clone(),
            kind: SnapshotKind::Incremental,
            parent_id: Some(base_snapshot_id.clone()),
            manifest: current_manifest.clone(),
            diff: Some(diff),
            promoted_from_incremental: false,
            created_at: Utc::now(),
        };
        self.save_descriptor(&descriptor).await?;

        #[cfg(feature = "metrics")]
        metrics::counter!("gpufleet_snapshot_incremental_total").increment(1);
        #[cfg(feature = "metrics")]
        metrics::histogram!("gpufleet_snapshot_bytes_uploaded").record(bytes_uploaded as f64);

        Ok(Snapshot {
            snapshot_id,
            instance_id: instance_id.to_string(),
            owner_id: owner_id.to_string(),
            kind: SnapshotKind::Incremental,
            parent_id: Some(base_snapshot_id.clone()),
            blob_paths: current_manifest
                .chunks_missing_from(&base_manifest)
                .iter()
                .map(|h| format!("chunks/{h}"))
                .collect(),
            size_bytes: current_manifest.total_size(),
            file_count: current_manifest.file_count(),
            created_at: descriptor.created_at,
            keep_forever,
            retention_days,
            status: SnapshotStatus::Active,
            storage_provider: "blobstore".to_string(),
        })
    }

    /// Restores into a staging directory first and only commits it onto
    /// `workspace_path` once the file-count validation passes, so a failed
    /// restore never touches whatever was already there.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn restore(
        &self,
        snapshot_id: &SnapshotId,
        ssh_host: &str,
        ssh_port: u16,
        workspace_path: &str,
    ) -> CoreResult<RestoreOutcome> {
        let start = std::time::Instant::now();
        let (ancestry, _depth) = self.resolve_ancestry(snapshot_id).await?;
        let manifest = merge_ancestry(&ancestry);
        let staging_path = format!("{workspace_path}.gpufleet-restage-{snapshot_id}");

        let result = self.restore_into_staging(&manifest, ssh_host, ssh_port, &staging_path).await;
        let bytes_restored = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                self.discard_staging(ssh_host, ssh_port, &staging_path).await;
                return Err(err);
            }
        };

        let found = self.count_remote_files(ssh_host, ssh_port, &staging_path).await?;
        let expected = manifest.file_count();
        if let Err(err) = validate_restore(expected, found) {
            self.discard_staging(ssh_host, ssh_port, &staging_path).await;
            return Err(err);
        }

        self.commit_staging(ssh_host, ssh_port, &staging_path, workspace_path).await?;

        Ok(RestoreOutcome {
            files_count: found,
            bytes_restored,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn restore_into_staging(
        &self,
        manifest: &Manifest,
        ssh_host: &str,
        ssh_port: u16,
        staging_path: &str,
    ) -> CoreResult<u64> {
        let mut bytes_restored = 0u64;
        for entry in &manifest.entries {
            for chunk_hash in &entry.chunk_hashes {
                let key = format!("chunks/{chunk_hash}");
                let bytes = self.blobstore.get(&key).await?;
                bytes_restored += bytes.len() as u64;
                self.write_chunk(ssh_host, ssh_port, staging_path, &entry.relative_path, &bytes)
                    .await?;
            }
        }
        Ok(bytes_restored)
    }

    /// Best-effort: a failed discard leaves orphaned staging bytes on the
    /// remote side rather than risk masking the original validation error.
    async fn discard_staging(&self, host: &str, port: u16, staging_path: &str) {
        let _ = self
            .ssh
            .exec(host, port, &format!("gpufleet-discard-restage {staging_path}"))
            .await;
    }

    async fn commit_staging(
        &self,
        host: &str,
        port: u16,
        staging_path: &str,
        workspace_path: &str,
    ) -> CoreResult<()> {
        self.ssh
            .exec(host, port, &format!("gpufleet-commit-restore {staging_path} {workspace_path}"))
            .await?;
        Ok(())
    }

    async fn compute_manifest(&self, host: &str, port: u16, workspace_path: &str) -> CoreResult<Manifest> {
        let output = self
            .ssh
            .exec(host, port, &format!("gpufleet-manifest {workspace_path}"))
            .await?;
        let entries = output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| CoreError::StorageFailure(format!("bad manifest line: {e}")))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Manifest { entries })
    }

    async fn upload_missing_chunks(
        &self,
        host: &str,
        port: u16,
        manifest: &Manifest,
        ancestors: &Manifest,
    ) -> CoreResult<u64> {
        let mut uploaded = 0u64;
        for hash in manifest.chunks_missing_from(ancestors) {
            let key = format!("chunks/{hash}");
            if self.blobstore.exists(&key).await? {
                continue;
            }
            let encoded = self.ssh.exec(host, port, &format!("gpufleet-read-chunk {hash}")).await?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| CoreError::StorageFailure(format!("bad chunk payload: {e}")))?;

            if hash_bytes(&bytes) != hash {
                return Err(CoreError::StorageFailure(format!(
                    "chunk {hash} payload did not hash to itself"
                )));
            }
            self.blobstore.put(&key, &bytes, None).await?;
            uploaded += bytes.len() as u64;
        }
        Ok(uploaded)
    }

    async fn write_chunk(
        &self,
        host: &str,
        port: u16,
        workspace_path: &str,
        relative_path: &str,
        bytes: &[u8],
    ) -> CoreResult<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.ssh
            .exec(
                host,
                port,
                &format!("gpufleet-write-chunk {workspace_path} {relative_path} {encoded}"),
            )
            .await?;
        Ok(())
    }

    async fn count_remote_files(&self, host: &str, port: u16, workspace_path: &str) -> CoreResult<u64> {
        let output = self
            .ssh
            .exec(host, port, &format!("gpufleet-count-files {workspace_path}"))
            .await?;
        output
            .trim()
            .parse()
            .map_err(|_| CoreError::StorageFailure("non-numeric file count".to_string()))
    }

    async fn load_descriptor(&self, snapshot_id: &SnapshotId) -> CoreResult<SnapshotDescriptor> {
        let bytes = self.blobstore.get(&SnapshotDescriptor::blob_key(snapshot_id)).await?;
        serde_json::from_slice(&bytes).map_err(|e| CoreError::StorageFailure(e.to_string()))
    }

    async fn save_descriptor(&self, descriptor: &SnapshotDescriptor) -> CoreResult<()> {
        let bytes = serde_json::to_vec(descriptor).map_err(|e| CoreError::StorageFailure(e.to_string()))?;
        self.blobstore
            .put(&SnapshotDescriptor::blob_key(&descriptor.snapshot_id), &bytes, Some("application/json"))
            .await
    }

    /// Walks parent links from `snapshot_id` down to (and including) the
    /// nearest full snapshot. Returns the chain base-first, and the
    /// incremental depth (0 for a full snapshot itself).
    async fn resolve_ancestry(&self, snapshot_id: &SnapshotId) -> CoreResult<(Vec<SnapshotDescriptor>, u32)> {
        let mut chain = Vec::new();
        let mut current = snapshot_id.clone();
        let mut depth = 0;
        loop {
            let descriptor = self.load_descriptor(&current).await?;
            let parent = descriptor.parent_id.clone();
            let kind = descriptor.kind;
            chain.push(descriptor);
            match (kind, parent) {
                (SnapshotKind::Full, _) => break,
                (SnapshotKind::Incremental, Some(parent_id)) => {
                    depth += 1;
                    current = parent_id;
                }
                (SnapshotKind::Incremental, None) => {
                    return Err(CoreError::StorageFailure(format!(
                        "incremental snapshot {current} has no parent"
                    )))
                }
            }
        }
        chain.reverse();
        Ok((chain, depth))
    }
}

fn merge_ancestry(ancestry: &[SnapshotDescriptor]) -> Manifest {
    ancestry
        .iter()
        .fold(Manifest::default(), |acc, d| acc.merged_with(&d.manifest))
}

/// Post-restore file count validation: fails if the restored file count
/// deviates from the expected count by more than 5% (or more than 1 when
/// `expected < 20`).
/// An empty restore always fails.
fn validate_restore(expected: u64, found: u64) -> CoreResult<()> {
    if found == 0 {
        return Err(CoreError::RestoreValidationFailed { expected, found });
    }
    let diff = expected.abs_diff(found);
    let tolerance = if expected < 20 {
        1
    } else {
        (expected as f64 * 0.05).ceil() as u64
    };
    if diff > tolerance {
        return Err(CoreError::RestoreValidationFailed { expected, found });
    }
    Ok(())
}
