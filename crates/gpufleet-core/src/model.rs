//! Domain entities shared by every engine in the fleet control plane.
//!
//! These types intentionally have no persistence concerns baked in: they are
//! plain data, (de)serializable with `serde` so a caller can park them in SQL,
//! JSON files, or an in-memory store without this crate caring which.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `machine_id` identifies a physical host; a host may expose several offers.
pub type MachineId = String;
pub type OfferId = String;
pub type InstanceId = String;
pub type SnapshotId = String;
pub type VolumeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineType {
    OnDemand,
    Interruptible,
    Bid,
}

/// An advertised GPU rental slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: OfferId,
    pub machine_id: MachineId,
    pub gpu_name: String,
    pub num_gpus: u32,
    pub gpu_ram_mb: u64,
    pub price_per_hour: f64,
    /// In `[0, 1]`.
    pub reliability: f64,
    pub geolocation: String,
    pub verified: bool,
    pub machine_type: MachineType,
    pub min_bid: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntendedStatus {
    Running,
    Stopped,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActualStatus {
    Provisioning,
    Loading,
    Running,
    Stopped,
    Failed,
    Destroyed,
}

/// A live rental produced from an offer.
///
/// Created exclusively by the Lifecycle Controller. Transitions
/// `provisioning -> loading -> running -> {stopped, destroyed, failed}`.
/// Destruction is irreversible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub offer_id: OfferId,
    pub machine_id: MachineId,
    pub intended_status: IntendedStatus,
    pub actual_status: ActualStatus,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    pub price_per_hour: f64,
    pub started_at: DateTime<Utc>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    Active,
    PendingDeletion,
    Deleted,
    Failed,
}

/// An immutable workspace capture.
///
/// Invariants:
/// - `parent_id` must reference an `active` or `deleted` snapshot of the same
///   `owner_id`.
/// - an incremental snapshot cannot extend a chain past `MAX_CHAIN_DEPTH`
///   (enforced by [`gpufleet_snapshot`], not by this struct).
/// - `keep_forever ⟹ status != PendingDeletion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub instance_id: InstanceId,
    pub owner_id: String,
    pub kind: SnapshotKind,
    pub parent_id: Option<SnapshotId>,
    pub blob_paths: Vec<String>,
    pub size_bytes: u64,
    pub file_count: u64,
    pub created_at: DateTime<Utc>,
    pub keep_forever: bool,
    /// 0 means "keep forever".
    pub retention_days: u32,
    pub status: SnapshotStatus,
    pub storage_provider: String,
}

impl Snapshot {
    /// Strongest exemption first: `keep_forever` beats any numeric retention.
    pub fn is_exempt_from_deletion(&self) -> bool {
        self.keep_forever
    }
}

/// `(machine_id, reason, expires_at)`. TTL-bounded; queries filter on
/// `expires_at > now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostBlacklistEntry {
    pub machine_id: MachineId,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleAction {
    Create,
    Destroy,
    Pause,
    Resume,
    Hibernate,
    Wake,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallerSource {
    ApiUser,
    ApiDashboard,
    AutoHibernation,
    WarmPoolManager,
    WarmPoolFailover,
    RegionalVolumeFailover,
    CpuStandby,
    ScheduledTask,
    DeployWizard,
    System,
    Unknown,
}

impl CallerSource {
    /// Strategy name a [`FailoverRecord`] would use when this caller source
    /// originated the create: every successful `FailoverRecord` has a
    /// matching `create` event whose `caller_source` names the strategy that
    /// succeeded.
    pub fn as_strategy_name(&self) -> Option<&'static str> {
        match self {
            CallerSource::WarmPoolFailover => Some("warm_pool"),
            CallerSource::RegionalVolumeFailover => Some("regional_volume"),
            CallerSource::CpuStandby => Some("cpu_standby"),
            _ => None,
        }
    }
}

/// Extra, non-audit-critical context captured alongside a lifecycle event —
/// folded in from the original implementation's flattened SQL columns
/// (gpu_type, dph_total, gpu_utilization, ssh_host/port) into a nested
/// struct, since this crate has no fixed schema to mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceContext {
    pub gpu_type: Option<String>,
    pub price_per_hour: Option<f64>,
    pub gpu_utilization: Option<f64>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
}

/// Where in the caller's source a lifecycle-changing call originated,
/// captured via `#[track_caller]` at the call site rather than by walking the
/// runtime call stack (there is no portable stack-walking API in Rust; the
/// compiler-tracked caller location is the idiomatic equivalent of the
/// original's `inspect.stack()` walk, and it excludes frames inside the
/// Lifecycle Controller by construction — `#[track_caller]` always reports
/// the direct caller, never an internal frame).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerSite {
    pub function: String,
    pub file: String,
    pub line: u32,
}

impl CallerSite {
    pub fn capture(location: &'static std::panic::Location<'static>, function: &str) -> Self {
        Self {
            function: function.to_string(),
            file: location.file().to_string(),
            line: location.line(),
        }
    }
}

/// Append-only audit record for every instance state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: u64,
    pub instance_id: InstanceId,
    pub user_id: String,
    pub action: LifecycleAction,
    pub previous_status: Option<ActualStatus>,
    pub new_status: Option<ActualStatus>,
    pub success: bool,
    pub caller_source: CallerSource,
    pub caller_site: CallerSite,
    /// Mandatory, non-empty: enforced at construction time by the Lifecycle
    /// Controller, not by this struct (a plain data type has no constructor
    /// to refuse invalid input through).
    pub reason: String,
    pub reason_details: Option<String>,
    pub snapshot_id: Option<SnapshotId>,
    pub instance_context: InstanceContext,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailoverStrategyKind {
    WarmPool,
    RegionalVolume,
    CpuStandby,
    /// `warm_pool` then `cpu_standby`, skipping `regional_volume` — named
    /// separately from `All` because `FailoverRecord.strategy_attempted`
    /// must record which ordered list a policy actually selected.
    Both,
    All,
    Disabled,
}

impl FailoverStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverStrategyKind::WarmPool => "warm_pool",
            FailoverStrategyKind::RegionalVolume => "regional_volume",
            FailoverStrategyKind::CpuStandby => "cpu_standby",
            FailoverStrategyKind::Both => "both",
            FailoverStrategyKind::All => "all",
            FailoverStrategyKind::Disabled => "disabled",
        }
    }

    /// The ordered list of concrete strategy names a [`FailoverOrchestrator`]
    /// attempts for this selection, each of which is independently gated by
    /// the circuit breaker under its own name.
    ///
    /// [`FailoverOrchestrator`]: https://docs.rs/gpufleet-failover
    pub fn ordered_strategy_names(&self) -> &'static [&'static str] {
        match self {
            FailoverStrategyKind::WarmPool => &["warm_pool"],
            FailoverStrategyKind::RegionalVolume => &["regional_volume"],
            FailoverStrategyKind::CpuStandby => &["cpu_standby"],
            FailoverStrategyKind::Both => &["warm_pool", "cpu_standby"],
            FailoverStrategyKind::All => &["warm_pool", "regional_volume", "cpu_standby"],
            FailoverStrategyKind::Disabled => &[],
        }
    }
}

impl From<DefaultStrategy> for FailoverStrategyKind {
    fn from(value: DefaultStrategy) -> Self {
        match value {
            DefaultStrategy::WarmPool => FailoverStrategyKind::WarmPool,
            DefaultStrategy::RegionalVolume => FailoverStrategyKind::RegionalVolume,
            DefaultStrategy::CpuStandby => FailoverStrategyKind::CpuStandby,
            DefaultStrategy::Both => FailoverStrategyKind::Both,
            DefaultStrategy::All => FailoverStrategyKind::All,
            DefaultStrategy::Disabled => FailoverStrategyKind::Disabled,
        }
    }
}

/// A single attempt record produced by the Failover Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverRecord {
    pub id: u64,
    pub machine_id: MachineId,
    pub strategy_attempted: FailoverStrategyKind,
    pub strategy_succeeded: Option<String>,
    /// Per-phase wall-clock timings, keyed by strategy name.
    pub phase_timings_ms: HashMap<String, u64>,
    /// Ordered `(phase, timestamp)` timeline for operator debugging —
    /// supplements the timing map with the original implementation's
    /// `phase_history` (see SPEC_FULL.md).
    pub phase_history: Vec<(String, DateTime<Utc>)>,
    pub gpus_tried: u32,
    pub rounds_attempted: u32,
    pub phase_errors: HashMap<String, String>,
    pub new_instance_id: Option<InstanceId>,
    pub new_ssh_host: Option<String>,
    pub new_ssh_port: Option<u16>,
    pub total_ms: u64,
    pub error: Option<String>,
    /// Result of the cpu_standby path's optional inference smoke test
    /// (§4.8: "test inference by running a user-supplied model prompt and
    /// recording the response"). `None` when the strategy attempted wasn't
    /// `cpu_standby`, the policy has the smoke test disabled, or no
    /// `InferenceProbe`/prompt was configured.
    pub inference_check: Option<InferenceCheckResult>,
}

/// Outcome of the cpu_standby path's inference smoke test, recorded onto
/// the `FailoverRecord` rather than discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceCheckResult {
    pub success: bool,
    pub response_text: Option<String>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Configuration for one failover strategy phase; concrete per-strategy
/// blocks live in `gpufleet-failover::policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DefaultStrategy {
    #[default]
    WarmPool,
    RegionalVolume,
    CpuStandby,
    Both,
    All,
    Disabled,
}
