//! The Failover Orchestrator: the single entry point for a
//! recovery. Consults the Resilience Envelope, resolves the effective
//! policy, then walks the policy's ordered strategy list, stopping at the
//! first success.
//!
//! Grounded on `failover_orchestrator.py`'s phase-by-phase bookkeeping
//! (a timing map plus an ordered `phase_history` timeline) and on
//! `tower-resilience-core`'s pattern of gating a call through a rate
//! limiter and a circuit breaker before doing any real work.

use crate::policy::FailoverPolicy;
use gpufleet_core::model::{
    CallerSource, FailoverRecord, FailoverStrategyKind, InferenceCheckResult, InstanceId,
    MachineId, SnapshotId, VolumeId,
};
use gpufleet_core::ports::{InferenceProbe, StandbyProvider};
use gpufleet_core::{CoreError, CoreResult};
use gpufleet_lifecycle::LifecycleController;
use gpufleet_provision::{GpuRequirements, RaceConfig, RaceProvisioner};
use gpufleet_regional::RegionalVolumeFailover;
use gpufleet_resilience::ResilienceEnvelope;
use gpufleet_snapshot::SnapshotEngine;
use gpufleet_warmpool::WarmPoolManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Everything needed to attempt a recovery for one failing GPU. Fields that
/// only one strategy needs (`volume_id`/`region` for regional volume,
/// `gpu_requirements`/`race_config` for cpu standby) are optional — a
/// strategy that needs a missing field fails fast with `ValidationError`
/// rather than the orchestrator guessing defaults.
#[derive(Debug, Clone)]
pub struct FailoverRequest {
    pub machine_id: MachineId,
    pub gpu_instance_id: InstanceId,
    pub owner_id: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub workspace_path: String,
    pub volume_id: Option<VolumeId>,
    pub region: Option<String>,
    pub gpu_requirements: Option<GpuRequirements>,
    pub race_config: Option<RaceConfig>,
    pub inference_prompt: Option<String>,
    pub force_strategy: Option<FailoverStrategyKind>,
}

#[derive(Debug, Clone)]
pub struct ReadinessReport {
    pub strategy: FailoverStrategyKind,
    pub warm_pool_ready: bool,
    pub cpu_standby_ready: bool,
    pub recommended_action: String,
}

struct StrategyOutcome {
    new_instance_id: Option<InstanceId>,
    new_ssh_host: Option<String>,
    new_ssh_port: Option<u16>,
    inference_check: Option<InferenceCheckResult>,
}

pub struct FailoverOrchestrator {
    resilience: Arc<ResilienceEnvelope>,
    lifecycle: Arc<LifecycleController>,
    warm_pool: Option<Arc<WarmPoolManager>>,
    regional: Option<Arc<RegionalVolumeFailover>>,
    race: Option<Arc<RaceProvisioner>>,
    snapshot: Option<Arc<SnapshotEngine>>,
    standby: Option<Arc<dyn StandbyProvider>>,
    inference: Option<Arc<dyn InferenceProbe>>,
    global_policy: Mutex<FailoverPolicy>,
    machine_policies: Mutex<HashMap<MachineId, FailoverPolicy>>,
    next_record_id: AtomicU64,
}

impl FailoverOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resilience: Arc<ResilienceEnvelope>,
        lifecycle: Arc<LifecycleController>,
        warm_pool: Option<Arc<WarmPoolManager>>,
        regional: Option<Arc<RegionalVolumeFailover>>,
        race: Option<Arc<RaceProvisioner>>,
        snapshot: Option<Arc<SnapshotEngine>>,
        standby: Option<Arc<dyn StandbyProvider>>,
        inference: Option<Arc<dyn InferenceProbe>>,
    ) -> Self {
        Self {
            resilience,
            lifecycle,
            warm_pool,
            regional,
            race,
            snapshot,
            standby,
            inference,
            global_policy: Mutex::new(FailoverPolicy::global_default()),
            machine_policies: Mutex::new(HashMap::new()),
            next_record_id: AtomicU64::new(1),
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn global_policy(&self) -> FailoverPolicy {
        self.global_policy.lock().unwrap().clone()
    }

    pub fn update_global_policy(&self, policy: FailoverPolicy) {
        *self.global_policy.lock().unwrap() = policy;
    }

    pub fn policy_for_machine(&self, machine_id: &MachineId) -> Option<FailoverPolicy> {
        self.machine_policies.lock().unwrap().get(machine_id).cloned()
    }

    pub fn update_policy_for_machine(&self, machine_id: MachineId, policy: FailoverPolicy) {
        self.machine_policies.lock().unwrap().insert(machine_id, policy);
    }

    /// Per-machine policy only applies when it explicitly opts in via
    /// `override_global`; otherwise every machine shares the global policy.
    fn effective_policy(&self, machine_id: &MachineId) -> FailoverPolicy {
        let machine_policies = self.machine_policies.lock().unwrap();
        match machine_policies.get(machine_id) {
            Some(policy) if policy.override_global => policy.clone(),
            _ => self.global_policy.lock().unwrap().clone(),
        }
    }

    /// `Failover.CheckReadiness`: a cheap, read-only signal for
    /// operators deciding whether to pre-emptively fail a machine over.
    pub fn check_readiness(&self, machine_id: &MachineId) -> ReadinessReport {
        let policy = self.effective_policy(machine_id);
        let strategy: FailoverStrategyKind = policy.default_strategy.into();

        let warm_pool_ready = self
            .warm_pool
            .as_ref()
            .is_some_and(|wp| wp.is_active(machine_id));
        let cpu_standby_ready = self.race.is_some() && self.snapshot.is_some();

        let recommended_action = if warm_pool_ready {
            "warm_pool".to_string()
        } else if self.regional.is_some() && policy.regional_volume.enabled {
            "regional_volume".to_string()
        } else if cpu_standby_ready {
            "cpu_standby".to_string()
        } else {
            "none_available".to_string()
        };

        ReadinessReport {
            strategy,
            warm_pool_ready,
            cpu_standby_ready,
            recommended_action,
        }
    }

    /// The entry point for a recovery. Rate limit and circuit
    /// breaker are checked once up front (keyed by the resolved strategy
    /// selection, e.g. `"all"`); each concrete strategy in the resolved
    /// ordered list is then independently gated and recorded under its own
    /// name, since the circuit breaker is keyed per strategy.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, request)))]
    pub async fn execute(&self, request: FailoverRequest) -> CoreResult<FailoverRecord> {
        let overall_start = Instant::now();
        let record_id = self.next_record_id.fetch_add(1, Ordering::SeqCst);

        self.resilience.rate_limiter.check(&request.machine_id)?;

        let policy = self.effective_policy(&request.machine_id);
        let strategy_kind = request
            .force_strategy
            .unwrap_or_else(|| policy.default_strategy.into());

        let ordered = strategy_kind.ordered_strategy_names();

        // Only `both`/`all` get a coarse aggregate breaker distinct from
        // their member strategies' own keys; a singleton kind's name is
        // identical to its one member's name, so gating and recording
        // against it here would double-count every attempt against the
        // same circuit.
        let has_aggregate_key = ordered.len() > 1;
        if has_aggregate_key {
            self.resilience.circuit_breaker.check(strategy_kind.as_str())?;
        }

        let mut phase_timings_ms = HashMap::new();
        let mut phase_history = Vec::new();
        let mut phase_errors = HashMap::new();
        for name in ordered {
            phase_timings_ms.insert((*name).to_string(), 0u64);
        }

        if ordered.is_empty() {
            return Ok(FailoverRecord {
                id: record_id,
                machine_id: request.machine_id,
                strategy_attempted: strategy_kind,
                strategy_succeeded: None,
                phase_timings_ms,
                phase_history,
                gpus_tried: 0,
                rounds_attempted: 0,
                phase_errors,
                new_instance_id: None,
                new_ssh_host: None,
                new_ssh_port: None,
                total_ms: overall_start.elapsed().as_millis() as u64,
                error: Some("failover disabled for this machine".to_string()),
                inference_check: None,
            });
        }

        let mut gpus_tried = 0u32;
        let mut rounds_attempted = 0u32;
        let mut last_error = None;

        for name in ordered {
            if let Err(err) = self.resilience.circuit_breaker.check(name) {
                last_error = Some(err.to_string());
                phase_errors.insert((*name).to_string(), err.to_string());
                phase_history.push(((*name).to_string(), chrono::Utc::now()));
                continue;
            }

            let phase_start = Instant::now();
            let result = self.attempt_strategy(name, &request, &policy, &mut gpus_tried, &mut rounds_attempted).await;
            let elapsed_ms = phase_start.elapsed().as_millis() as u64;
            phase_timings_ms.insert((*name).to_string(), elapsed_ms);
            phase_history.push(((*name).to_string(), chrono::Utc::now()));

            #[cfg(feature = "metrics")]
            gpufleet_resilience::metrics::record_phase_duration(
                strategy_kind.as_str(),
                name,
                elapsed_ms as f64 / 1000.0,
            );

            match result {
                Ok(outcome) => {
                    self.resilience.circuit_breaker.record_success(name);
                    if has_aggregate_key {
                        self.resilience.circuit_breaker.record_success(strategy_kind.as_str());
                    }
                    self.resilience.rate_limiter.record(&request.machine_id);

                    return Ok(FailoverRecord {
                        id: record_id,
                        machine_id: request.machine_id,
                        strategy_attempted: strategy_kind,
                        strategy_succeeded: Some((*name).to_string()),
                        phase_timings_ms,
                        phase_history,
                        gpus_tried,
                        rounds_attempted,
                        phase_errors,
                        new_instance_id: outcome.new_instance_id,
                        new_ssh_host: outcome.new_ssh_host,
                        new_ssh_port: outcome.new_ssh_port,
                        total_ms: overall_start.elapsed().as_millis() as u64,
                        error: None,
                        inference_check: outcome.inference_check,
                    });
                }
                Err(err) => {
                    self.resilience.circuit_breaker.record_failure(name);
                    last_error = Some(err.to_string());
                    phase_errors.insert((*name).to_string(), err.to_string());
                }
            }
        }

        if has_aggregate_key {
            self.resilience.circuit_breaker.record_failure(strategy_kind.as_str());
        }

        Ok(FailoverRecord {
            id: record_id,
            machine_id: request.machine_id,
            strategy_attempted: strategy_kind,
            strategy_succeeded: None,
            phase_timings_ms,
            phase_history,
            gpus_tried,
            rounds_attempted,
            phase_errors,
            new_instance_id: None,
            new_ssh_host: None,
            new_ssh_port: None,
            total_ms: overall_start.elapsed().as_millis() as u64,
            error: last_error,
            inference_check: None,
        })
    }

    async fn attempt_strategy(
        &self,
        name: &str,
        request: &FailoverRequest,
        policy: &FailoverPolicy,
        gpus_tried: &mut u32,
        rounds_attempted: &mut u32,
    ) -> CoreResult<StrategyOutcome> {
        match name {
            "warm_pool" => self.attempt_warm_pool(request, policy).await,
            "regional_volume" => self.attempt_regional(request, policy).await,
            "cpu_standby" => self.attempt_cpu_standby(request, policy, gpus_tried, rounds_attempted).await,
            other => Err(CoreError::ValidationError(format!("unknown strategy '{other}'"))),
        }
    }

    async fn attempt_warm_pool(
        &self,
        request: &FailoverRequest,
        policy: &FailoverPolicy,
    ) -> CoreResult<StrategyOutcome> {
        if !policy.warm_pool.enabled {
            return Err(CoreError::ValidationError("warm pool strategy disabled by policy".to_string()));
        }
        let warm_pool = self
            .warm_pool
            .as_ref()
            .ok_or_else(|| CoreError::ValidationError("no warm pool manager configured".to_string()))?;

        let outcome = warm_pool.fail_over(&request.machine_id).await?;
        let new_instance_id = warm_pool
            .record_of(&request.machine_id)
            .map(|r| r.primary_instance_id);

        Ok(StrategyOutcome {
            new_instance_id,
            new_ssh_host: outcome.new_ssh_host,
            new_ssh_port: outcome.new_ssh_port,
            inference_check: None,
        })
    }

    async fn attempt_regional(
        &self,
        request: &FailoverRequest,
        policy: &FailoverPolicy,
    ) -> CoreResult<StrategyOutcome> {
        if !policy.regional_volume.enabled {
            return Err(CoreError::ValidationError("regional volume strategy disabled by policy".to_string()));
        }
        let regional = self
            .regional
            .as_ref()
            .ok_or_else(|| CoreError::ValidationError("no regional volume engine configured".to_string()))?;
        let volume_id = request
            .volume_id
            .as_ref()
            .ok_or_else(|| CoreError::ValidationError("regional volume failover requires a volume_id".to_string()))?;
        let region = request
            .region
            .as_deref()
            .or(policy.regional_volume.region.as_deref())
            .ok_or_else(|| CoreError::ValidationError("regional volume failover requires a region".to_string()))?;

        let outcome = regional
            .failover(volume_id, region, Some(&request.gpu_instance_id), &policy.regional_volume.policy)
            .await?;

        Ok(StrategyOutcome {
            new_instance_id: Some(outcome.new_instance_id),
            new_ssh_host: outcome.new_ssh_host,
            new_ssh_port: outcome.new_ssh_port,
            inference_check: None,
        })
    }

    /// CPU-standby path: snapshot the failing workspace,
    /// race-provision a fresh GPU, restore onto it, then optionally run an
    /// inference smoke test. Despite the name this path provisions a GPU,
    /// not a CPU instance — `StandbyProvider`/`InferenceProbe` are the
    /// abstract seam for the inference check, not the replacement host
    /// itself.
    async fn attempt_cpu_standby(
        &self,
        request: &FailoverRequest,
        policy: &FailoverPolicy,
        gpus_tried: &mut u32,
        rounds_attempted: &mut u32,
    ) -> CoreResult<StrategyOutcome> {
        if !policy.cpu_standby.enabled {
            return Err(CoreError::ValidationError("cpu standby strategy disabled by policy".to_string()));
        }
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or_else(|| CoreError::ValidationError("no snapshot engine configured".to_string()))?;
        let race = self
            .race
            .as_ref()
            .ok_or_else(|| CoreError::ValidationError("no race provisioner configured".to_string()))?;
        let requirements = request
            .gpu_requirements
            .as_ref()
            .ok_or_else(|| CoreError::ValidationError("cpu standby failover requires gpu_requirements".to_string()))?;
        let race_config = request.race_config.clone().unwrap_or_default();

        let snapshot_id: SnapshotId = format!(
            "snap-{}-{}",
            request.gpu_instance_id,
            chrono::Utc::now().timestamp_millis()
        );
        snapshot
            .full_snapshot(
                &request.gpu_instance_id,
                &request.owner_id,
                &request.ssh_host,
                request.ssh_port,
                &request.workspace_path,
                snapshot_id.clone(),
                policy.cpu_standby.retention_days,
                policy.cpu_standby.keep_forever,
            )
            .await?;

        let failover_id = format!("cpu-standby-{}", request.gpu_instance_id);
        let provision_result = race
            .provision_fast(requirements, &race_config, &failover_id, CallerSource::CpuStandby)
            .await?;
        *gpus_tried += provision_result.gpus_tried;
        *rounds_attempted += provision_result.rounds_attempted;

        if !provision_result.success {
            return Err(CoreError::SshUnreachable(
                provision_result
                    .error
                    .unwrap_or_else(|| "race provisioner exhausted all rounds".to_string()),
            ));
        }

        let new_host = provision_result
            .ssh_host
            .clone()
            .ok_or_else(|| CoreError::ServiceUnavailable("winning candidate had no ssh host".to_string()))?;
        let new_port = provision_result.ssh_port.unwrap_or(22);

        snapshot
            .restore(&snapshot_id, &new_host, new_port, &request.workspace_path)
            .await?;

        let inference_check = if policy.cpu_standby.run_inference_smoke_test {
            if let (Some(inference), Some(prompt)) = (&self.inference, &request.inference_prompt) {
                Some(match inference.query(&new_host, new_port, prompt).await {
                    Ok(response) => {
                        #[cfg(feature = "metrics")]
                        metrics::histogram!("gpufleet_failover_inference_check_latency_ms")
                            .record(response.latency_ms as f64);
                        #[cfg(feature = "tracing")]
                        tracing::info!(
                            latency_ms = response.latency_ms,
                            "cpu standby inference smoke test succeeded"
                        );
                        InferenceCheckResult {
                            success: true,
                            response_text: Some(response.text),
                            latency_ms: Some(response.latency_ms),
                            error: None,
                        }
                    }
                    Err(err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %err, "cpu standby inference smoke test failed");
                        InferenceCheckResult {
                            success: false,
                            response_text: None,
                            latency_ms: None,
                            error: Some(err.to_string()),
                        }
                    }
                })
            } else {
                None
            }
        } else {
            None
        };

        Ok(StrategyOutcome {
            new_instance_id: provision_result.instance_id,
            new_ssh_host: Some(new_host),
            new_ssh_port: Some(new_port),
            inference_check,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpufleet_core::model::{
        ActualStatus, IntendedStatus, Instance, MachineType, Offer,
    };
    use gpufleet_core::ports::{Balance, CreateInstanceOptions, InstanceProvider, OfferFilter, SshProbe, Volume, VolumeProvider};
    use gpufleet_blacklist::HostBlacklist;
    use gpufleet_lifecycle::InMemoryLifecycleEventStore;
    use gpufleet_resilience::{
        CircuitBreakerConfig, CleanupJournal, DeletionAuditLog, RateLimiterConfig, ResilienceConfig,
    };
    use gpufleet_warmpool::WarmPoolConfig;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU64 as StdAtomicU64, Ordering as StdOrdering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeMarketplace {
        instances: StdMutex<StdHashMap<InstanceId, Instance>>,
        next_id: StdAtomicU64,
        region: &'static str,
    }

    impl FakeMarketplace {
        fn new(region: &'static str) -> Self {
            Self {
                instances: StdMutex::new(StdHashMap::new()),
                next_id: StdAtomicU64::new(1),
                region,
            }
        }

        fn insert(&self, offer_id: &str, ssh_host: &str) -> Instance {
            let id = format!("i-{}", self.next_id.fetch_add(1, StdOrdering::SeqCst));
            let instance = Instance {
                instance_id: id.clone(),
                offer_id: offer_id.to_string(),
                machine_id: "m-1".to_string(),
                intended_status: IntendedStatus::Running,
                actual_status: ActualStatus::Running,
                ssh_host: Some(ssh_host.to_string()),
                ssh_port: Some(22),
                price_per_hour: 1.0,
                started_at: chrono::Utc::now(),
                label: None,
            };
            self.instances.lock().unwrap().insert(id, instance.clone());
            instance
        }
    }

    #[async_trait]
    impl InstanceProvider for FakeMarketplace {
        async fn search_offers(&self, filter: &OfferFilter) -> CoreResult<Vec<Offer>> {
            let region = filter.region_substring.clone().unwrap_or_default();
            if region != self.region {
                return Ok(vec![]);
            }
            Ok(vec![Offer {
                offer_id: "offer-regional".to_string(),
                machine_id: "m-regional".to_string(),
                gpu_name: "A100".to_string(),
                num_gpus: 1,
                gpu_ram_mb: 80_000,
                price_per_hour: 1.0,
                reliability: 0.99,
                geolocation: format!("{region}-1"),
                verified: true,
                machine_type: MachineType::OnDemand,
                min_bid: None,
            }])
        }

        async fn create_instance(
            &self,
            offer_id: &String,
            _image: &str,
            _opts: &CreateInstanceOptions,
        ) -> CoreResult<Instance> {
            let host = if offer_id.contains("primary") { "10.0.0.1" } else { "10.0.0.2" };
            Ok(self.insert(offer_id, host))
        }

        async fn create_instance_bid(
            &self,
            offer_id: &String,
            image: &str,
            opts: &CreateInstanceOptions,
            _bid_price: f64,
        ) -> CoreResult<Instance> {
            self.create_instance(offer_id, image, opts).await
        }

        async fn get_instance(&self, instance_id: &InstanceId) -> CoreResult<Option<Instance>> {
            Ok(self.instances.lock().unwrap().get(instance_id).cloned())
        }

        async fn list_instances(&self) -> CoreResult<Vec<Instance>> {
            Ok(self.instances.lock().unwrap().values().cloned().collect())
        }

        async fn destroy_instance(&self, instance_id: &InstanceId) -> CoreResult<bool> {
            Ok(self.instances.lock().unwrap().remove(instance_id).is_some())
        }

        async fn pause_instance(&self, instance_id: &InstanceId) -> CoreResult<bool> {
            if let Some(instance) = self.instances.lock().unwrap().get_mut(instance_id) {
                instance.actual_status = ActualStatus::Stopped;
            }
            Ok(true)
        }

        async fn resume_instance(&self, instance_id: &InstanceId) -> CoreResult<bool> {
            if let Some(instance) = self.instances.lock().unwrap().get_mut(instance_id) {
                instance.actual_status = ActualStatus::Running;
            }
            Ok(true)
        }

        async fn get_balance(&self) -> CoreResult<Balance> {
            Ok(Balance {
                credit: 0.0,
                balance: 0.0,
                email: "x@example.com".to_string(),
            })
        }
    }

    struct FakeVolumes;

    #[async_trait]
    impl VolumeProvider for FakeVolumes {
        async fn create_volume(&self, region: &str, size_gb: u32) -> CoreResult<Volume> {
            Ok(Volume {
                volume_id: "vol-1".to_string(),
                region: region.to_string(),
                size_gb,
            })
        }

        async fn delete_volume(&self, _volume_id: &str) -> CoreResult<bool> {
            Ok(true)
        }
    }

    struct ScriptedProbe;

    #[async_trait]
    impl SshProbe for ScriptedProbe {
        async fn probe(&self, _host: &str, _port: u16) -> (bool, std::time::Duration) {
            (true, std::time::Duration::from_millis(1))
        }

        async fn exec(&self, _host: &str, _port: u16, _command: &str) -> CoreResult<String> {
            Ok(String::new())
        }
    }

    fn base_request(machine_id: &str) -> FailoverRequest {
        FailoverRequest {
            machine_id: machine_id.to_string(),
            gpu_instance_id: "i-failing".to_string(),
            owner_id: "owner-1".to_string(),
            ssh_host: "10.0.0.9".to_string(),
            ssh_port: 22,
            workspace_path: "/workspace".to_string(),
            volume_id: Some("vol-1".to_string()),
            region: Some("us-east".to_string()),
            gpu_requirements: None,
            race_config: None,
            inference_prompt: None,
            force_strategy: None,
        }
    }

    fn lifecycle(region: &'static str) -> Arc<LifecycleController> {
        let provider = Arc::new(FakeMarketplace::new(region));
        let events = Arc::new(InMemoryLifecycleEventStore::new());
        Arc::new(LifecycleController::new(provider, events))
    }

    fn envelope(config: ResilienceConfig) -> Arc<ResilienceEnvelope> {
        Arc::new(ResilienceEnvelope::new(config))
    }

    /// S2: five consecutive `warm_pool` failures with `fail_threshold=3`
    /// produce `{fail, fail, fail, CircuitOpen, CircuitOpen}`.
    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures() {
        let orchestrator = FailoverOrchestrator::new(
            envelope(ResilienceConfig {
                circuit_breaker: CircuitBreakerConfig {
                    fail_threshold: 3,
                    cool_down: Duration::from_secs(60),
                },
                ..ResilienceConfig::default()
            }),
            lifecycle("us-east"),
            None,
            None,
            None,
            None,
            None,
            None,
        );

        let mut errors = Vec::new();
        for _ in 0..5 {
            let mut request = base_request("m-42");
            request.force_strategy = Some(FailoverStrategyKind::WarmPool);
            let record = orchestrator.execute(request).await.unwrap();
            errors.push(record.error.unwrap());
        }

        assert!(errors[0].contains("no warm pool manager configured"));
        assert!(errors[1].contains("no warm pool manager configured"));
        assert!(errors[2].contains("no warm pool manager configured"));
        assert!(errors[3].contains("circuit"), "expected circuit-open message, got {}", errors[3]);
        assert!(errors[4].contains("circuit"), "expected circuit-open message, got {}", errors[4]);
    }

    /// S3: with `N=1`, a second `Failover.Execute` for the same machine
    /// within the window is rejected before any strategy runs.
    #[tokio::test]
    async fn rate_limit_exhaustion_rejects_without_running_a_strategy() {
        let lifecycle = lifecycle("us-east");
        let warm_pool = Arc::new(gpufleet_warmpool::WarmPoolManager::new(
            lifecycle.clone(),
            Arc::new(FakeVolumes),
            Arc::new(ScriptedProbe),
            WarmPoolConfig::default(),
        ));
        warm_pool
            .provision(
                &"m-7".to_string(),
                "us-east",
                &"offer-primary".to_string(),
                &"offer-standby".to_string(),
                "pytorch/pytorch:latest",
                100,
                None,
            )
            .await
            .unwrap();

        let orchestrator = FailoverOrchestrator::new(
            envelope(ResilienceConfig {
                rate_limiter: RateLimiterConfig {
                    limit_per_window: 1,
                    window: Duration::from_secs(24 * 3600),
                },
                ..ResilienceConfig::default()
            }),
            lifecycle,
            Some(warm_pool),
            None,
            None,
            None,
            None,
            None,
        );

        let mut first = base_request("m-7");
        first.force_strategy = Some(FailoverStrategyKind::WarmPool);
        let first_record = orchestrator.execute(first).await.unwrap();
        assert_eq!(first_record.strategy_succeeded.as_deref(), Some("warm_pool"));

        let mut second = base_request("m-7");
        second.force_strategy = Some(FailoverStrategyKind::WarmPool);
        let result = orchestrator.execute(second).await;
        assert!(matches!(result, Err(CoreError::RateLimited { .. })));
    }

    /// S6: `policy.strategy=all` with `warm_pool` unavailable and
    /// `regional_volume` succeeding records `strategy_attempted="all"`,
    /// `strategy_succeeded="regional_volume"`, and leaves the cpu_standby
    /// phase untouched at 0 ms since the walk stopped before reaching it.
    #[tokio::test]
    async fn strategy_ordering_falls_through_to_regional_volume() {
        let lifecycle = lifecycle("us-east");
        let regional = Arc::new(RegionalVolumeFailover::new(lifecycle.clone()));

        let mut policy = FailoverPolicy::global_default();
        policy.default_strategy = gpufleet_core::model::DefaultStrategy::All;

        let orchestrator = FailoverOrchestrator::new(
            envelope(ResilienceConfig::default()),
            lifecycle,
            None,
            Some(regional),
            None,
            None,
            None,
            None,
        );
        orchestrator.update_global_policy(policy);

        let record = orchestrator.execute(base_request("m-99")).await.unwrap();

        assert_eq!(record.strategy_attempted, FailoverStrategyKind::All);
        assert_eq!(record.strategy_succeeded.as_deref(), Some("regional_volume"));
        assert_eq!(record.phase_timings_ms.get("cpu_standby"), Some(&0));
        assert!(record.phase_timings_ms.get("warm_pool").copied().unwrap_or(0) < 1000);
    }

    #[derive(Default)]
    struct FakeBlobStore {
        objects: StdMutex<StdHashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl gpufleet_core::ports::BlobStore for FakeBlobStore {
        async fn put(&self, key: &str, bytes: &[u8], _content_type: Option<&str>) -> CoreResult<()> {
            self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        async fn get(&self, key: &str) -> CoreResult<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| CoreError::NotFound(key.to_string()))
        }

        async fn delete(&self, key: &str) -> CoreResult<bool> {
            Ok(self.objects.lock().unwrap().remove(key).is_some())
        }

        async fn list(&self, prefix: &str) -> CoreResult<Vec<String>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn exists(&self, key: &str) -> CoreResult<bool> {
            Ok(self.objects.lock().unwrap().contains_key(key))
        }
    }

    /// Single workspace remote shared across the snapshot/restore round trip,
    /// same exec protocol as the Snapshot Engine's own test fake.
    struct FakeWorkspaceRemote {
        files: StdMutex<StdHashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SshProbe for FakeWorkspaceRemote {
        async fn probe(&self, _host: &str, _port: u16) -> (bool, Duration) {
            (true, Duration::from_millis(1))
        }

        async fn exec(&self, _host: &str, _port: u16, command: &str) -> CoreResult<String> {
            use base64::Engine as _;
            let mut parts = command.split_whitespace();
            match parts.next() {
                Some("gpufleet-manifest") => {
                    let files = self.files.lock().unwrap();
                    let mut lines = String::new();
                    for (path, bytes) in files.iter() {
                        let (whole, chunks) = gpufleet_snapshot::manifest::chunk_and_hash(bytes);
                        let entry = gpufleet_snapshot::manifest::ManifestEntry {
                            relative_path: path.clone(),
                            size: bytes.len() as u64,
                            mtime: 0,
                            content_hash: whole,
                            chunk_hashes: chunks,
                        };
                        lines.push_str(&serde_json::to_string(&entry).unwrap());
                        lines.push('\n');
                    }
                    Ok(lines)
                }
                Some("gpufleet-read-chunk") => {
                    let hash = parts.next().unwrap();
                    let files = self.files.lock().unwrap();
                    let bytes = files
                        .values()
                        .find(|b| gpufleet_snapshot::manifest::hash_bytes(b) == hash)
                        .cloned()
                        .unwrap_or_default();
                    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
                }
                Some("gpufleet-write-chunk") => {
                    let workspace = parts.next().unwrap();
                    let relative_path = parts.next().unwrap();
                    let encoded = parts.next().unwrap();
                    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
                    let key = format!("{workspace}/{relative_path}");
                    self.files.lock().unwrap().insert(key, bytes);
                    Ok(String::new())
                }
                Some("gpufleet-count-files") => {
                    let workspace = parts.next().unwrap();
                    let prefix = format!("{workspace}/");
                    let count = self.files.lock().unwrap().keys().filter(|k| k.starts_with(&prefix)).count();
                    Ok(count.to_string())
                }
                Some("gpufleet-commit-restore") => {
                    let staging = parts.next().unwrap();
                    let workspace = parts.next().unwrap();
                    let staging_prefix = format!("{staging}/");
                    let mut files = self.files.lock().unwrap();
                    let moved: Vec<(String, Vec<u8>)> = files
                        .iter()
                        .filter(|(k, _)| k.starts_with(&staging_prefix))
                        .map(|(k, v)| (k[staging_prefix.len()..].to_string(), v.clone()))
                        .collect();
                    files.retain(|k, _| !k.starts_with(&staging_prefix));
                    for (relative_path, bytes) in moved {
                        files.insert(format!("{workspace}/{relative_path}"), bytes);
                    }
                    Ok(String::new())
                }
                Some("gpufleet-discard-restage") => {
                    let staging = parts.next().unwrap();
                    let staging_prefix = format!("{staging}/");
                    self.files.lock().unwrap().retain(|k, _| !k.starts_with(&staging_prefix));
                    Ok(String::new())
                }
                other => panic!("unexpected exec command: {other:?}"),
            }
        }
    }

    struct FakeInference {
        text: &'static str,
    }

    #[async_trait]
    impl InferenceProbe for FakeInference {
        async fn query(
            &self,
            _host: &str,
            _port: u16,
            _prompt: &str,
        ) -> CoreResult<gpufleet_core::ports::InferenceResponse> {
            Ok(gpufleet_core::ports::InferenceResponse {
                text: self.text.to_string(),
                latency_ms: 12,
            })
        }
    }

    fn race_config() -> RaceConfig {
        RaceConfig {
            gpus_per_round: 1,
            timeout_per_round: Duration::from_millis(150),
            max_rounds: 1,
            check_interval: Duration::from_millis(10),
            stagger_interval: Duration::from_millis(1),
            max_issue_retries: 1,
        }
    }

    fn gpu_requirements() -> gpufleet_provision::GpuRequirements {
        gpufleet_provision::GpuRequirements {
            min_gpu_ram_mb: 40_000,
            max_price_per_hour: 5.0,
            num_gpus: Some(1),
            disk_gb: 50,
            image: "pytorch/pytorch:latest".to_string(),
            on_start_script: None,
            env: vec![],
            preferred_gpu_names: vec![],
            min_reliability: None,
            verified_only: false,
        }
    }

    /// cpu_standby success records the inference smoke test's response onto
    /// the record instead of discarding it.
    #[tokio::test]
    async fn cpu_standby_success_records_inference_check_result() {
        let lifecycle = lifecycle("");
        let blacklist = Arc::new(HostBlacklist::new());
        let journal = Arc::new(CleanupJournal::new());
        let audit_log = Arc::new(DeletionAuditLog::new(1000));
        let race = Arc::new(RaceProvisioner::new(
            lifecycle.clone(),
            blacklist,
            Arc::new(ScriptedProbe),
            journal,
            audit_log,
        ));

        let blobstore = Arc::new(FakeBlobStore::default());
        let mut seed = StdHashMap::new();
        seed.insert("model.bin".to_string(), vec![7u8; 16]);
        let remote = Arc::new(FakeWorkspaceRemote {
            files: StdMutex::new(seed),
        });
        let snapshot = Arc::new(gpufleet_snapshot::SnapshotEngine::new(blobstore, remote));

        let orchestrator = FailoverOrchestrator::new(
            envelope(ResilienceConfig::default()),
            lifecycle,
            None,
            None,
            Some(race),
            Some(snapshot),
            None,
            Some(Arc::new(FakeInference { text: "pong" })),
        );
        let mut policy = FailoverPolicy::global_default();
        policy.cpu_standby.run_inference_smoke_test = true;
        orchestrator.update_global_policy(policy);

        let mut request = base_request("m-standby");
        request.force_strategy = Some(FailoverStrategyKind::CpuStandby);
        request.gpu_requirements = Some(gpu_requirements());
        request.race_config = Some(race_config());
        request.inference_prompt = Some("ping".to_string());

        let record = orchestrator.execute(request).await.unwrap();

        assert_eq!(record.strategy_succeeded.as_deref(), Some("cpu_standby"));
        let check = record.inference_check.expect("inference check should be recorded");
        assert!(check.success);
        assert_eq!(check.response_text.as_deref(), Some("pong"));
        assert_eq!(check.latency_ms, Some(12));
    }

    #[test]
    fn check_readiness_recommends_none_available_with_no_engines_configured() {
        let orchestrator = FailoverOrchestrator::new(
            envelope(ResilienceConfig::default()),
            lifecycle("us-east"),
            None,
            None,
            None,
            None,
            None,
            None,
        );

        let report = orchestrator.check_readiness(&"m-1".to_string());
        assert_eq!(report.recommended_action, "none_available");
    }
}
