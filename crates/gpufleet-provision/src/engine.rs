//! The Race Provisioner: fire several speculative rentals in parallel and
//! keep whichever answers SSH first.
//!
//! Grounded on `provisioner.py`'s round-based race loop: each round samples
//! an oversized batch of offers, issues rentals staggered by a fixed
//! interval, then polls every candidate's SSH reachability until one
//! responds or the round times out. The Lifecycle Controller is the only
//! thing this engine ever calls to create or destroy an instance; offer
//! search goes through it too so every mutation and every read share one
//! audit trail.

use crate::candidate::{GPUCandidate, ProvisionResult};
use crate::config::{GpuRequirements, RaceConfig};
use gpufleet_blacklist::HostBlacklist;
use gpufleet_core::model::{ActualStatus, CallerSource, Instance, InstanceId};
use gpufleet_core::ports::{CreateInstanceOptions, OfferFilter, SshProbe};
use gpufleet_core::{CoreError, CoreResult};
use gpufleet_lifecycle::LifecycleController;
use gpufleet_resilience::{CleanupJournal, DeletionAuditLog, JournaledResource};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RaceProvisioner {
    lifecycle: Arc<LifecycleController>,
    blacklist: Arc<HostBlacklist>,
    ssh: Arc<dyn SshProbe>,
    journal: Arc<CleanupJournal>,
    audit_log: Arc<DeletionAuditLog>,
}

impl RaceProvisioner {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        blacklist: Arc<HostBlacklist>,
        ssh: Arc<dyn SshProbe>,
        journal: Arc<CleanupJournal>,
        audit_log: Arc<DeletionAuditLog>,
    ) -> Self {
        Self {
            lifecycle,
            blacklist,
            ssh,
            journal,
            audit_log,
        }
    }

    /// Races up to `race.max_rounds` rounds, returning the winning instance
    /// or a failed `ProvisionResult` once rounds are exhausted.
    pub async fn provision_fast(
        &self,
        requirements: &GpuRequirements,
        race: &RaceConfig,
        failover_id: &str,
        caller_source: CallerSource,
    ) -> CoreResult<ProvisionResult> {
        let overall_start = Instant::now();
        let mut gpus_tried = 0u32;

        for round in 1..=race.max_rounds {
            let filter = OfferFilter {
                min_gpu_ram_mb: Some(requirements.min_gpu_ram_mb),
                max_price_per_hour: Some(requirements.max_price_per_hour),
                num_gpus: requirements.num_gpus,
                region_substring: None,
                min_reliability: requirements.min_reliability,
                preferred_gpu_names: requirements.preferred_gpu_names.clone(),
                verified_only: requirements.verified_only,
            };

            let offers = self.lifecycle.search_offers(&filter).await?;
            let mut offers = self.blacklist.filter_out(offers, |o| &o.machine_id);
            offers.sort_by(|a, b| {
                a.price_per_hour
                    .partial_cmp(&b.price_per_hour)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            offers.truncate(race.offers_to_query());
            let take = race.rentals_per_round().min(offers.len());
            let offers = &offers[..take];

            if offers.is_empty() {
                #[cfg(feature = "tracing")]
                tracing::warn!(round, "no eligible offers this round");
                continue;
            }

            let opts = CreateInstanceOptions {
                disk_gb: requirements.disk_gb,
                on_start: requirements.on_start_script.clone(),
                env: requirements.env.clone(),
                label: Some(format!("race-{failover_id}")),
                attach_volume_id: None,
            };

            let mut candidates = Vec::new();
            for offer in offers {
                tokio::time::sleep(race.stagger_interval).await;
                gpus_tried += 1;

                match self
                    .create_with_retry(&offer.offer_id, &opts, race.max_issue_retries, caller_source)
                    .await
                {
                    Ok(instance) => {
                        self.journal.register(
                            failover_id,
                            JournaledResource::Instance(instance.instance_id.clone()),
                        );
                        let mut candidate = GPUCandidate::new(
                            instance.instance_id.clone(),
                            offer.offer_id.clone(),
                            offer.machine_id.clone(),
                            offer.gpu_name.clone(),
                        );
                        candidate.ssh_host = instance.ssh_host;
                        candidate.ssh_port = instance.ssh_port;
                        candidates.push(candidate);
                    }
                    Err(CoreError::OfferUnavailable(_)) => continue,
                    Err(_) => continue,
                }
            }

            if candidates.is_empty() {
                continue;
            }

            match self.race_round(&mut candidates, race).await {
                Some(winner_id) => {
                    let winner = candidates
                        .iter()
                        .find(|c| c.instance_id == winner_id)
                        .expect("winner id comes from candidates")
                        .clone();
                    self.delete_losers(failover_id, &winner_id).await;

                    return Ok(ProvisionResult {
                        success: true,
                        instance_id: Some(winner.instance_id),
                        ssh_host: winner.ssh_host,
                        ssh_port: winner.ssh_port,
                        gpu_name: Some(winner.gpu_name),
                        rounds_attempted: round,
                        total_time_ms: overall_start.elapsed().as_millis() as u64,
                        gpus_tried,
                        ssh_ready_after: winner.ssh_ready_after,
                        error: None,
                    });
                }
                None => {
                    for candidate in &candidates {
                        if !candidate.connected {
                            self.blacklist.blacklist_default_ttl(
                                &candidate.machine_id,
                                format!(
                                    "ssh probe never succeeded within {:?} ({} attempts)",
                                    race.timeout_per_round, candidate.ssh_attempts
                                ),
                            );
                        }
                    }
                    self.delete_losers(failover_id, "").await;
                }
            }
        }

        Ok(ProvisionResult {
            success: false,
            rounds_attempted: race.max_rounds,
            total_time_ms: overall_start.elapsed().as_millis() as u64,
            gpus_tried,
            error: Some("exhausted all rounds without a winning candidate".to_string()),
            ..Default::default()
        })
    }

    async fn create_with_retry(
        &self,
        offer_id: &str,
        opts: &CreateInstanceOptions,
        max_retries: u32,
        caller_source: CallerSource,
    ) -> CoreResult<Instance> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .lifecycle
                .create_instance(
                    &offer_id.to_string(),
                    "pytorch/pytorch:latest",
                    opts,
                    caller_source,
                    "race provisioner speculative rental",
                )
                .await;

            match result {
                Ok(instance) => return Ok(instance),
                Err(CoreError::RateLimited { retry_after }) if attempt < max_retries => {
                    attempt += 1;
                    tokio::time::sleep(retry_after * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Polls every candidate's instance status and SSH reachability until
    /// one succeeds or `race.timeout_per_round` elapses. A candidate whose
    /// `actual_status` flips to `Failed` is blacklisted immediately and
    /// excluded from further probing, independent of how the round ends.
    async fn race_round(&self, candidates: &mut [GPUCandidate], race: &RaceConfig) -> Option<InstanceId> {
        let deadline = Instant::now() + race.timeout_per_round;

        loop {
            for candidate in candidates.iter_mut() {
                if candidate.failed || candidate.connected {
                    continue;
                }
                if let Ok(Some(instance)) = self.lifecycle.get_instance(&candidate.instance_id).await {
                    if let Some(host) = instance.ssh_host {
                        candidate.ssh_host = Some(host);
                    }
                    if let Some(port) = instance.ssh_port {
                        candidate.ssh_port = Some(port);
                    }
                    if instance.actual_status == ActualStatus::Failed {
                        candidate.failed = true;
                        self.blacklist.blacklist_default_ttl(
                            &candidate.machine_id,
                            "instance reported failed status before SSH became reachable",
                        );
                    }
                }
            }

            let mut probes = Vec::new();
            for (idx, candidate) in candidates.iter().enumerate() {
                if candidate.failed || candidate.connected || !candidate.has_ssh_endpoint() {
                    continue;
                }
                let ssh = self.ssh.clone();
                let host = candidate.ssh_host.clone().expect("checked above");
                let port = candidate.ssh_port.expect("checked above");
                probes.push(async move {
                    let (ok, latency) = ssh.probe(&host, port).await;
                    (idx, ok, latency)
                });
            }

            if !probes.is_empty() {
                let results = futures::future::join_all(probes).await;
                for (idx, ok, _latency) in &results {
                    candidates[*idx].ssh_attempts += 1;
                    if *ok {
                        candidates[*idx].connected = true;
                        candidates[*idx].ssh_ready_after =
                            Some(candidates[*idx].provision_start.elapsed());
                    }
                }

                if let Some(winner) = candidates
                    .iter()
                    .filter(|c| c.connected)
                    .min_by_key(|c| c.provision_start)
                {
                    return Some(winner.instance_id.clone());
                }
            }

            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(race.check_interval).await;
        }
    }

    /// Drains this round's journal entries and destroys every instance that
    /// is not `keep_id` (pass `""` to destroy everything, on a dry round).
    async fn delete_losers(&self, failover_id: &str, keep_id: &str) {
        for resource in self.journal.take(failover_id) {
            let JournaledResource::Instance(instance_id) = &resource else {
                continue;
            };
            if instance_id.as_str() == keep_id {
                continue;
            }

            let result = self
                .lifecycle
                .destroy_instance(instance_id, CallerSource::System, "deleted as a losing race candidate")
                .await;
            match result {
                Ok(_) => self.audit_log.record(failover_id, resource, true, None),
                Err(err) => {
                    let message = err.to_string();
                    self.audit_log.record(failover_id, resource, false, Some(message));
                }
            }
        }
    }
}
