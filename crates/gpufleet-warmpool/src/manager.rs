//! The Warm Pool Manager: a standby GPU pre-reserved, stopped,
//! on the *same physical host* as a primary, sharing one persistent volume.
//! On primary failure, destroying the primary and resuming the standby
//! yields workspace continuity in seconds rather than the minutes a
//! regional-volume or cold-restore failover costs.
//!
//! Grounded on `provisioner.py`'s candidate bookkeeping style (a small
//! per-machine record mutated under one lock) and on the Lifecycle
//! Controller being the only path that ever mutates instance state — this
//! manager never calls `InstanceProvider` directly.

use crate::config::WarmPoolConfig;
use crate::state::WarmPoolState;
use gpufleet_core::model::{ActualStatus, CallerSource, InstanceId, MachineId, OfferId, VolumeId};
use gpufleet_core::ports::{CreateInstanceOptions, SshProbe, VolumeProvider};
use gpufleet_core::{CoreError, CoreResult};
use gpufleet_lifecycle::LifecycleController;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One machine's warm pool bookkeeping. `volume_id` is attached to exactly
/// one `running` instance at any time — whichever of `primary_instance_id`/
/// `standby_instance_id` currently holds the primary role.
#[derive(Debug, Clone)]
pub struct WarmPoolRecord {
    pub machine_id: MachineId,
    pub state: WarmPoolState,
    pub volume_id: VolumeId,
    pub primary_instance_id: InstanceId,
    pub standby_instance_id: InstanceId,
    pub primary_ssh_host: Option<String>,
    pub primary_ssh_port: Option<u16>,
    pub consecutive_failures: u32,
}

pub struct ProvisionOutcome {
    pub record: WarmPoolRecord,
}

pub struct FailoverOutcome {
    pub new_ssh_host: Option<String>,
    pub new_ssh_port: Option<u16>,
    pub duration_ms: u64,
}

pub struct WarmPoolManager {
    lifecycle: Arc<LifecycleController>,
    volumes: Arc<dyn VolumeProvider>,
    ssh: Arc<dyn SshProbe>,
    config: WarmPoolConfig,
    pools: Mutex<HashMap<MachineId, WarmPoolRecord>>,
}

impl WarmPoolManager {
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        volumes: Arc<dyn VolumeProvider>,
        ssh: Arc<dyn SshProbe>,
        config: WarmPoolConfig,
    ) -> Self {
        Self {
            lifecycle,
            volumes,
            ssh,
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// `true` iff a pool is `Active` for `machine_id` — the cheap readiness
    /// signal `Failover.CheckReadiness` and `provision`'s invariant check
    /// both rely on.
    pub fn is_active(&self, machine_id: &MachineId) -> bool {
        self.pools
            .lock()
            .unwrap()
            .get(machine_id)
            .is_some_and(|r| r.state == WarmPoolState::Active)
    }

    pub fn record_of(&self, machine_id: &MachineId) -> Option<WarmPoolRecord> {
        self.pools.lock().unwrap().get(machine_id).cloned()
    }

    /// Provisions a fresh pool: one shared volume, a `running` primary and a
    /// `stopped` standby on the same host's two offers. Spec invariant: at
    /// most one standby per machine — refused if a pool already exists.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn provision(
        &self,
        machine_id: &MachineId,
        region: &str,
        primary_offer_id: &OfferId,
        standby_offer_id: &OfferId,
        image: &str,
        disk_gb: u32,
        on_start: Option<String>,
    ) -> CoreResult<ProvisionOutcome> {
        {
            let pools = self.pools.lock().unwrap();
            if pools.contains_key(machine_id) {
                return Err(CoreError::ValidationError(format!(
                    "warm pool already provisioned for machine {machine_id}"
                )));
            }
        }

        let volume = self.volumes.create_volume(region, self.config.volume_size_gb).await?;

        let primary_opts = CreateInstanceOptions {
            disk_gb,
            on_start: on_start.clone(),
            env: vec![],
            label: Some(format!("warmpool-primary-{machine_id}")),
            attach_volume_id: Some(volume.volume_id.clone()),
        };
        let primary = self
            .lifecycle
            .create_instance(
                primary_offer_id,
                image,
                &primary_opts,
                CallerSource::WarmPoolManager,
                "warm pool primary provisioning",
            )
            .await?;

        let standby_opts = CreateInstanceOptions {
            disk_gb,
            on_start,
            env: vec![],
            label: Some(format!("warmpool-standby-{machine_id}")),
            attach_volume_id: Some(volume.volume_id.clone()),
        };
        let standby = self
            .lifecycle
            .create_instance(
                standby_offer_id,
                image,
                &standby_opts,
                CallerSource::WarmPoolManager,
                "warm pool standby provisioning",
            )
            .await?;
        self.lifecycle
            .pause_instance(
                &standby.instance_id,
                CallerSource::WarmPoolManager,
                "standby stays stopped until a failover promotes it",
            )
            .await?;

        let record = WarmPoolRecord {
            machine_id: machine_id.clone(),
            state: WarmPoolState::Active,
            volume_id: volume.volume_id,
            primary_instance_id: primary.instance_id,
            standby_instance_id: standby.instance_id,
            primary_ssh_host: primary.ssh_host,
            primary_ssh_port: primary.ssh_port,
            consecutive_failures: 0,
        };

        self.pools.lock().unwrap().insert(machine_id.clone(), record.clone());
        Ok(ProvisionOutcome { record })
    }

    /// One SSH probe of the primary. Returns whether this probe pushed the
    /// pool's consecutive-failure counter past `fail_threshold` — the
    /// caller (a periodic health-check task) uses that to decide whether to
    /// call [`WarmPoolManager::fail_over`].
    pub async fn check_health(&self, machine_id: &MachineId) -> CoreResult<bool> {
        let (host, port) = {
            let pools = self.pools.lock().unwrap();
            let record = pools
                .get(machine_id)
                .ok_or_else(|| CoreError::NotFound(format!("no warm pool for {machine_id}")))?;
            match (record.primary_ssh_host.clone(), record.primary_ssh_port) {
                (Some(h), Some(p)) => (h, p),
                _ => return Ok(false),
            }
        };

        let (ok, _latency) = self.ssh.probe(&host, port).await;

        let mut pools = self.pools.lock().unwrap();
        let record = pools
            .get_mut(machine_id)
            .ok_or_else(|| CoreError::NotFound(format!("no warm pool for {machine_id}")))?;

        if ok {
            record.consecutive_failures = 0;
            Ok(false)
        } else {
            record.consecutive_failures += 1;
            Ok(record.consecutive_failures >= self.config.fail_threshold)
        }
    }

    /// Destroys the failing primary, resumes the standby, and once it
    /// answers SSH, promotes it to primary. When `reprovision_standby` is
    /// set the caller is expected to spawn a fresh
    /// [`WarmPoolManager::provision`] for a replacement standby
    /// asynchronously — this method only performs the synchronous half of
    /// the failover.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn fail_over(&self, machine_id: &MachineId) -> CoreResult<FailoverOutcome> {
        let start = Instant::now();
        let mut record = self
            .record_of(machine_id)
            .ok_or_else(|| CoreError::NotFound(format!("no warm pool for {machine_id}")))?;
        if !record.state.can_fail_over() {
            return Err(CoreError::ValidationError(format!(
                "warm pool for {machine_id} is not active (state {:?})",
                record.state
            )));
        }
        self.set_state(machine_id, WarmPoolState::FailingOver);

        self.lifecycle
            .destroy_instance(
                &record.primary_instance_id,
                CallerSource::WarmPoolFailover,
                "primary health check failed, failing over to standby",
            )
            .await?;

        self.lifecycle
            .resume_instance(
                &record.standby_instance_id,
                CallerSource::WarmPoolFailover,
                "promoting warm standby to primary",
            )
            .await?;

        let promoted = self
            .lifecycle
            .get_instance(&record.standby_instance_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("standby {} vanished mid-failover", record.standby_instance_id))
            })?;

        if let (Some(host), Some(port)) = (promoted.ssh_host.clone(), promoted.ssh_port) {
            let (ok, _latency) = self.ssh.probe(&host, port).await;
            if !ok {
                self.set_state(machine_id, WarmPoolState::Error);
                return Err(CoreError::SshUnreachable(format!(
                    "promoted standby {host}:{port} did not answer SSH"
                )));
            }
        }

        record.primary_instance_id = promoted.instance_id.clone();
        record.primary_ssh_host = promoted.ssh_host.clone();
        record.primary_ssh_port = promoted.ssh_port;
        record.consecutive_failures = 0;
        record.state = WarmPoolState::Active;
        self.pools.lock().unwrap().insert(machine_id.clone(), record.clone());

        Ok(FailoverOutcome {
            new_ssh_host: promoted.ssh_host,
            new_ssh_port: promoted.ssh_port,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub fn should_reprovision_standby(&self) -> bool {
        self.config.reprovision_standby
    }

    fn set_state(&self, machine_id: &MachineId, state: WarmPoolState) {
        if let Some(record) = self.pools.lock().unwrap().get_mut(machine_id) {
            record.state = state;
        }
    }
}
