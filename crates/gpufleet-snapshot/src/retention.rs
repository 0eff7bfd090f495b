//! Retention resolution and deletability,
//! grounded on `snapshot_lifecycle_config.py`'s precedence: a per-snapshot
//! override, else a per-instance default, else the global default.

use chrono::{DateTime, Utc};
use gpufleet_core::model::Snapshot;

#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    pub default_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { default_days: 7 }
    }
}

/// Resolved once, at snapshot creation, into `Snapshot::retention_days` —
/// there is no "unset" state to re-resolve later, matching the model's plain
/// `u32` field (see `gpufleet_core::model::Snapshot`).
pub fn resolve_retention_days(
    override_days: Option<u32>,
    instance_default_days: Option<u32>,
    global: &RetentionConfig,
) -> u32 {
    override_days
        .or(instance_default_days)
        .unwrap_or(global.default_days)
}

/// `true` once a snapshot has aged past its resolved retention, ignoring
/// the descendant-chain check (applied separately, since it requires
/// context this function doesn't have).
pub fn is_expired(snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
    if snapshot.is_exempt_from_deletion() {
        return false;
    }
    if snapshot.retention_days == 0 {
        return false;
    }
    let age_days = (now - snapshot.created_at).num_days();
    age_days >= snapshot.retention_days as i64
}

/// Full deletability check: not exempt, aged past retention, and no live
/// incremental child would be left without a reachable full ancestor.
pub fn is_deletable(
    snapshot: &Snapshot,
    now: DateTime<Utc>,
    has_unreachable_descendant: bool,
) -> bool {
    is_expired(snapshot, now) && !has_unreachable_descendant
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpufleet_core::model::SnapshotKind;
    use gpufleet_core::model::SnapshotStatus;

    fn snapshot(retention_days: u32, keep_forever: bool, age_days: i64) -> Snapshot {
        Snapshot {
            snapshot_id: "s1".into(),
            instance_id: "i1".into(),
            owner_id: "o1".into(),
            kind: SnapshotKind::Full,
            parent_id: None,
            blob_paths: vec![],
            size_bytes: 0,
            file_count: 0,
            created_at: Utc::now() - chrono::Duration::days(age_days),
            keep_forever,
            retention_days,
            status: SnapshotStatus::Active,
            storage_provider: "s3".into(),
        }
    }

    #[test]
    fn resolve_prefers_override_then_instance_then_global() {
        let global = RetentionConfig { default_days: 7 };
        assert_eq!(resolve_retention_days(Some(3), Some(14), &global), 3);
        assert_eq!(resolve_retention_days(None, Some(14), &global), 14);
        assert_eq!(resolve_retention_days(None, None, &global), 7);
    }

    #[test]
    fn zero_retention_means_keep_forever() {
        let snap = snapshot(0, false, 365);
        assert!(!is_expired(&snap, Utc::now()));
    }

    #[test]
    fn keep_forever_overrides_numeric_retention() {
        let snap = snapshot(1, true, 365);
        assert!(!is_expired(&snap, Utc::now()));
    }

    #[test]
    fn expired_once_age_reaches_retention_days() {
        let snap = snapshot(7, false, 7);
        assert!(is_expired(&snap, Utc::now()));
        let fresh = snapshot(7, false, 1);
        assert!(!is_expired(&fresh, Utc::now()));
    }

    #[test]
    fn unreachable_descendant_blocks_deletion_even_if_expired() {
        let snap = snapshot(7, false, 30);
        assert!(!is_deletable(&snap, Utc::now(), true));
        assert!(is_deletable(&snap, Utc::now(), false));
    }
}
