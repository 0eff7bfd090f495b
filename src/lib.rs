//! The composition root for the GPU fleet orchestration control plane.
//!
//! This crate wires the nine engines in `crates/` into the facade the outer
//! layers call, and owns the one genuinely composition-root concern: loading
//! [`FleetConfig`] once at startup. Every engine crate stays independently
//! usable and independently tested; `Fleet` only assembles them, the way a
//! top-level integration crate assembles a library's independent layers —
//! except here the assembly is a plain struct with facade methods, not a
//! `tower::Layer` stack, since nothing in this workspace wraps an HTTP/RPC
//! service.

pub mod config;

pub use config::FleetConfig;

use gpufleet_core::model::{
    FailoverRecord, FailoverStrategyKind, InstanceId, MachineId, Offer, OfferId, Snapshot,
    SnapshotId,
};
use gpufleet_core::ports::{
    Balance, BlobStore, CreateInstanceOptions, InferenceProbe, InstanceProvider, OfferFilter,
    SshProbe, StandbyProvider, VolumeProvider,
};
use gpufleet_core::{CoreError, CoreResult};
use gpufleet_blacklist::HostBlacklist;
use gpufleet_failover::{FailoverOrchestrator, FailoverPolicy, FailoverRequest, ReadinessReport};
use gpufleet_lifecycle::{InMemoryLifecycleEventStore, LifecycleController, LifecycleEventStore};
use gpufleet_provision::RaceProvisioner;
use gpufleet_regional::RegionalVolumeFailover;
use gpufleet_resilience::{CleanupJournal, DeletionAuditLog, ResilienceEnvelope};
use gpufleet_snapshot::{
    CleanupAgent, CleanupReport, InMemorySnapshotRepository, RestoreOutcome, SnapshotEngine,
    SnapshotRepository,
};
use gpufleet_warmpool::WarmPoolManager;

use gpufleet_core::model::{CallerSource, LifecycleEvent};
use std::sync::Arc;

/// External collaborators injected at startup. `standby` and
/// `inference` are optional — a deployment without a CPU-standby fallback or
/// without the inference smoke test simply omits them, and the CPU-standby
/// failover phase fails fast with a clear `ValidationError` instead of the
/// orchestrator silently skipping it.
pub struct FleetProviders {
    pub instance_provider: Arc<dyn InstanceProvider>,
    pub blobstore: Arc<dyn BlobStore>,
    pub volumes: Arc<dyn VolumeProvider>,
    pub ssh: Arc<dyn SshProbe>,
    pub standby: Option<Arc<dyn StandbyProvider>>,
    pub inference: Option<Arc<dyn InferenceProbe>>,
}

/// The assembled control plane. One instance per process; cheap to clone the
/// `Arc`s it hands out, expensive (and wrong) to construct twice against the
/// same provider set, since the resilience envelope and audit log are
/// process-wide state.
pub struct Fleet {
    lifecycle: Arc<LifecycleController>,
    orchestrator: Arc<FailoverOrchestrator>,
    snapshot_engine: Arc<SnapshotEngine>,
    snapshot_repo: Arc<InMemorySnapshotRepository>,
    cleanup_agent: CleanupAgent<InMemorySnapshotRepository>,
    retention_config: gpufleet_snapshot::RetentionConfig,
    resilience: Arc<ResilienceEnvelope>,
    audit_log: Arc<DeletionAuditLog>,
}

impl Fleet {
    /// Builds every engine from `providers` and `config`, in dependency
    /// order: resilience envelope and lifecycle controller first (nothing
    /// else can run without them), then the engines that call into them,
    /// then the orchestrator that composes those engines as strategies.
    pub fn new(providers: FleetProviders, config: FleetConfig) -> Self {
        let resilience = Arc::new(ResilienceEnvelope::new(config.resilience.to_resilience_config()));
        // Separate from `resilience.audit_log`/`resilience.cleanup_journal`:
        // those back the envelope's own circuit/rate bookkeeping, while this
        // pair tracks actual resource ownership for the race provisioner and
        // the snapshot cleanup agent, matching how `RaceProvisioner::new` and
        // `CleanupAgent::new` each take their own journal/log handles rather
        // than reaching into the envelope.
        let audit_log = Arc::new(DeletionAuditLog::new(config.resilience.audit_log_capacity));
        let cleanup_journal = Arc::new(CleanupJournal::new());
        let blacklist = Arc::new(HostBlacklist::new());

        let event_store: Arc<dyn LifecycleEventStore> = Arc::new(InMemoryLifecycleEventStore::new());
        let lifecycle = Arc::new(LifecycleController::new(
            providers.instance_provider.clone(),
            event_store,
        ));

        let snapshot_engine = Arc::new(SnapshotEngine::new(providers.blobstore.clone(), providers.ssh.clone()));
        let snapshot_repo = Arc::new(InMemorySnapshotRepository::new());
        let cleanup_agent = CleanupAgent::new(
            config.snapshot.to_cleanup_config(),
            snapshot_repo.clone(),
            providers.blobstore.clone(),
            audit_log.clone(),
        );

        let warm_pool = Arc::new(WarmPoolManager::new(
            lifecycle.clone(),
            providers.volumes.clone(),
            providers.ssh.clone(),
            config.warm_pool.to_warm_pool_config(),
        ));
        let regional = Arc::new(RegionalVolumeFailover::new(lifecycle.clone()));
        let race = Arc::new(RaceProvisioner::new(
            lifecycle.clone(),
            blacklist.clone(),
            providers.ssh.clone(),
            cleanup_journal,
            audit_log.clone(),
        ));

        let orchestrator = Arc::new(FailoverOrchestrator::new(
            resilience.clone(),
            lifecycle.clone(),
            Some(warm_pool),
            Some(regional),
            Some(race),
            Some(snapshot_engine.clone()),
            providers.standby,
            providers.inference,
        ));
        orchestrator.update_global_policy(config.default_policy.to_policy());
        let retention_config = config.snapshot.to_retention_config();

        Self {
            lifecycle,
            orchestrator,
            snapshot_engine,
            snapshot_repo,
            cleanup_agent,
            retention_config,
            resilience,
            audit_log,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn resilience(&self) -> &Arc<ResilienceEnvelope> {
        &self.resilience
    }

    pub fn audit_log(&self) -> &Arc<DeletionAuditLog> {
        &self.audit_log
    }

    // -- Failover.* --

    pub async fn failover_execute(&self, request: FailoverRequest) -> CoreResult<FailoverRecord> {
        self.orchestrator.execute(request).await
    }

    pub fn failover_check_readiness(&self, machine_id: &MachineId) -> ReadinessReport {
        self.orchestrator.check_readiness(machine_id)
    }

    // -- Snapshot.* --

    #[allow(clippy::too_many_arguments)]
    pub async fn snapshot_create(
        &self,
        instance_id: &InstanceId,
        owner_id: &str,
        ssh_host: &str,
        ssh_port: u16,
        workspace_path: &str,
        base_id: Option<SnapshotId>,
        retention_days: Option<u32>,
        keep_forever: bool,
    ) -> CoreResult<Snapshot> {
        let retention_days = retention_days.unwrap_or_else(|| {
            gpufleet_snapshot::retention::resolve_retention_days(None, None, &self.retention_config)
        });
        let snapshot_id = format!("snap-{}-{}", instance_id, chrono::Utc::now().timestamp_millis());

        let snapshot = match base_id {
            Some(base) => {
                self.snapshot_engine
                    .incremental_snapshot(
                        instance_id,
                        owner_id,
                        ssh_host,
                        ssh_port,
                        workspace_path,
                        &base,
                        snapshot_id,
                        retention_days,
                        keep_forever,
                    )
                    .await?
            }
            None => {
                self.snapshot_engine
                    .full_snapshot(
                        instance_id,
                        owner_id,
                        ssh_host,
                        ssh_port,
                        workspace_path,
                        snapshot_id,
                        retention_days,
                        keep_forever,
                    )
                    .await?
            }
        };

        self.snapshot_repo.upsert(snapshot.clone()).await?;
        Ok(snapshot)
    }

    pub async fn snapshot_restore(
        &self,
        snapshot_id: &SnapshotId,
        ssh_host: &str,
        ssh_port: u16,
        workspace_path: &str,
    ) -> CoreResult<RestoreOutcome> {
        self.snapshot_engine.restore(snapshot_id, ssh_host, ssh_port, workspace_path).await
    }

    pub async fn snapshot_delete_expired(&self, dry_run: bool) -> CoreResult<CleanupReport> {
        self.cleanup_agent.run_once(dry_run).await
    }

    // -- Lifecycle.* --

    pub async fn lifecycle_create(
        &self,
        offer_id: &OfferId,
        image: &str,
        opts: &CreateInstanceOptions,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<gpufleet_core::model::Instance> {
        self.lifecycle.create_instance(offer_id, image, opts, caller_source, reason).await
    }

    pub async fn lifecycle_destroy(
        &self,
        instance_id: &InstanceId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<bool> {
        self.lifecycle.destroy_instance(instance_id, caller_source, reason).await
    }

    pub async fn lifecycle_pause(
        &self,
        instance_id: &InstanceId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<bool> {
        self.lifecycle.pause_instance(instance_id, caller_source, reason).await
    }

    pub async fn lifecycle_resume(
        &self,
        instance_id: &InstanceId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<bool> {
        self.lifecycle.resume_instance(instance_id, caller_source, reason).await
    }

    pub async fn lifecycle_history(&self, instance_id: &InstanceId) -> CoreResult<Vec<LifecycleEvent>> {
        self.lifecycle.history(instance_id).await
    }

    pub async fn search_offers(&self, filter: &OfferFilter) -> CoreResult<Vec<Offer>> {
        self.lifecycle.search_offers(filter).await
    }

    pub async fn get_balance(&self) -> CoreResult<Balance> {
        self.lifecycle.get_balance().await
    }

    // -- Policy.* --

    pub fn policy_get_global(&self) -> FailoverPolicy {
        self.orchestrator.global_policy()
    }

    pub fn policy_update_global(&self, policy: FailoverPolicy) {
        self.orchestrator.update_global_policy(policy);
    }

    pub fn policy_get_for_machine(&self, machine_id: &MachineId) -> Option<FailoverPolicy> {
        self.orchestrator.policy_for_machine(machine_id)
    }

    pub fn policy_update_for_machine(&self, machine_id: MachineId, policy: FailoverPolicy) {
        self.orchestrator.update_policy_for_machine(machine_id, policy);
    }
}

/// Strategy kind this policy resolves to, exposed so operators inspecting a
/// `FailoverPolicy` don't need to know `gpufleet_core::model` is where
/// `DefaultStrategy` lives.
pub fn strategy_kind_of(policy: &FailoverPolicy) -> FailoverStrategyKind {
    policy.default_strategy.into()
}
