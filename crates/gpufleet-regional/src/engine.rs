//! Regional Volume Failover: when a host dies outright, warm
//! pool cannot recover it (the standby shared the same dead host). This
//! engine keeps a persistent volume pinned to a region and, on failure,
//! rents a **new** GPU anywhere in that region and attaches the existing
//! volume to it.
//!
//! Grounded on `regional_volume_failover.py`'s filter pipeline (region
//! substring match, then a reliability floor, then an optional preferred-GPU
//! allowlist, then price ascending) and on the Race Provisioner's pattern of
//! delegating every instance mutation to the Lifecycle Controller.

use crate::policy::RegionalVolumePolicy;
use gpufleet_core::model::{InstanceId, VolumeId};
use gpufleet_core::ports::{CreateInstanceOptions, OfferFilter};
use gpufleet_core::{CoreError, CoreResult};
use gpufleet_lifecycle::LifecycleController;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RegionalFailoverOutcome {
    pub new_instance_id: InstanceId,
    pub new_ssh_host: Option<String>,
    pub new_ssh_port: Option<u16>,
    pub duration_s: f64,
}

pub struct RegionalVolumeFailover {
    lifecycle: Arc<LifecycleController>,
}

impl RegionalVolumeFailover {
    pub fn new(lifecycle: Arc<LifecycleController>) -> Self {
        Self { lifecycle }
    }

    /// Rents a new GPU in `region` and attaches `volume_id` to it.
    /// `old_instance_id` is destroyed only after the new instance reaches
    /// `running`, so a failed rental never leaves the volume unattached to
    /// anything.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, policy)))]
    pub async fn failover(
        &self,
        volume_id: &VolumeId,
        region: &str,
        old_instance_id: Option<&InstanceId>,
        policy: &RegionalVolumePolicy,
    ) -> CoreResult<RegionalFailoverOutcome> {
        let start = Instant::now();

        let filter = OfferFilter {
            region_substring: Some(region.to_string()),
            min_reliability: policy.min_reliability,
            preferred_gpu_names: policy.preferred_gpu_names.clone(),
            ..Default::default()
        };
        let mut offers = self.lifecycle.search_offers(&filter).await?;
        if offers.is_empty() {
            return Err(CoreError::OfferUnavailable(format!(
                "no offers found in region '{region}'"
            )));
        }
        offers.sort_by(|a, b| {
            a.price_per_hour
                .partial_cmp(&b.price_per_hour)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let on_start = format!("mkdir -p {}", policy.mount_point);
        let opts = CreateInstanceOptions {
            disk_gb: policy.disk_gb,
            on_start: Some(on_start),
            env: vec![],
            label: Some(format!("regional-failover-{volume_id}")),
            attach_volume_id: Some(volume_id.clone()),
        };

        let mut last_error = None;
        let mut created = None;
        for offer in &offers {
            match self
                .lifecycle
                .create_instance(
                    &offer.offer_id,
                    &policy.image,
                    &opts,
                    gpufleet_core::model::CallerSource::RegionalVolumeFailover,
                    format!("regional volume failover for volume {volume_id}"),
                )
                .await
            {
                Ok(instance) => {
                    created = Some(instance);
                    break;
                }
                Err(CoreError::OfferUnavailable(_)) => continue,
                Err(err) => {
                    last_error = Some(err);
                    continue;
                }
            }
        }

        let Some(new_instance) = created else {
            return Err(last_error
                .unwrap_or_else(|| CoreError::OfferUnavailable(format!("no offer in region '{region}' could be rented"))));
        };

        let new_instance = self
            .wait_for_running(&new_instance.instance_id, policy.timeout)
            .await?;

        if policy.destroy_old_instance {
            if let Some(old_id) = old_instance_id {
                let _ = self
                    .lifecycle
                    .destroy_instance(
                        old_id,
                        gpufleet_core::model::CallerSource::RegionalVolumeFailover,
                        "decommissioned after regional volume failover to a new instance",
                    )
                    .await;
            }
        }

        Ok(RegionalFailoverOutcome {
            new_instance_id: new_instance.instance_id,
            new_ssh_host: new_instance.ssh_host,
            new_ssh_port: new_instance.ssh_port,
            duration_s: start.elapsed().as_secs_f64(),
        })
    }

    async fn wait_for_running(
        &self,
        instance_id: &InstanceId,
        timeout: Duration,
    ) -> CoreResult<gpufleet_core::model::Instance> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(instance) = self.lifecycle.get_instance(instance_id).await? {
                match instance.actual_status {
                    gpufleet_core::model::ActualStatus::Running => return Ok(instance),
                    gpufleet_core::model::ActualStatus::Failed => {
                        return Err(CoreError::ServiceUnavailable(format!(
                            "instance {instance_id} reported failed status while provisioning"
                        )))
                    }
                    _ => {}
                }
            }
            if Instant::now() >= deadline {
                return Err(CoreError::ServiceUnavailable(format!(
                    "instance {instance_id} did not reach running within {timeout:?}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
