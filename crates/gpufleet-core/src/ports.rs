//! External collaborators the core consumes.
//!
//! The core never imports a specific vendor SDK: every concrete marketplace,
//! object-storage and standby-CPU backend is injected at the composition
//! root behind these traits.

use crate::error::CoreResult;
use crate::model::{Instance, InstanceId, MachineId, Offer, OfferId};
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct OfferFilter {
    pub min_gpu_ram_mb: Option<u64>,
    pub max_price_per_hour: Option<f64>,
    pub num_gpus: Option<u32>,
    pub region_substring: Option<String>,
    pub min_reliability: Option<f64>,
    pub preferred_gpu_names: Vec<String>,
    pub verified_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateInstanceOptions {
    pub disk_gb: u32,
    pub on_start: Option<String>,
    pub env: Vec<(String, String)>,
    pub label: Option<String>,
    /// Attach an existing persistent volume (regional volume failover).
    pub attach_volume_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Balance {
    pub credit: f64,
    pub balance: f64,
    pub email: String,
}

/// The GPU marketplace, abstracted. One implementation per marketplace; the
/// core never knows which.
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    async fn search_offers(&self, filter: &OfferFilter) -> CoreResult<Vec<Offer>>;

    async fn create_instance(
        &self,
        offer_id: &OfferId,
        image: &str,
        opts: &CreateInstanceOptions,
    ) -> CoreResult<Instance>;

    async fn create_instance_bid(
        &self,
        offer_id: &OfferId,
        image: &str,
        opts: &CreateInstanceOptions,
        bid_price: f64,
    ) -> CoreResult<Instance>;

    /// `Ok(None)` on not-found, never an error — callers routinely probe for
    /// instances that may already be gone.
    async fn get_instance(&self, instance_id: &InstanceId) -> CoreResult<Option<Instance>>;

    async fn list_instances(&self) -> CoreResult<Vec<Instance>>;

    async fn destroy_instance(&self, instance_id: &InstanceId) -> CoreResult<bool>;

    async fn pause_instance(&self, instance_id: &InstanceId) -> CoreResult<bool>;

    async fn resume_instance(&self, instance_id: &InstanceId) -> CoreResult<bool>;

    async fn get_balance(&self) -> CoreResult<Balance>;
}

/// Uniform `put/get/delete/list` over an S3-family backend. Retry semantics
/// are the adapter's responsibility, not this trait's — see
/// `gpufleet-blobstore`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: Option<&str>) -> CoreResult<()>;
    async fn get(&self, key: &str) -> CoreResult<Vec<u8>>;
    /// Idempotent: deleting a missing key returns `Ok(true)`.
    async fn delete(&self, key: &str) -> CoreResult<bool>;
    async fn list(&self, prefix: &str) -> CoreResult<Vec<String>>;
    async fn exists(&self, key: &str) -> CoreResult<bool>;
}

#[derive(Debug, Clone)]
pub struct Volume {
    pub volume_id: String,
    pub region: String,
    pub size_gb: u32,
}

/// Persistent-volume lifecycle on the marketplace side, abstracted the same
/// way as `InstanceProvider`: the Warm Pool Manager (C6) creates a volume
/// shared between a primary and standby GPU on one host; Regional Volume
/// Failover (C7) keeps one pinned to a region across GPU rentals. Attaching
/// a volume to a new instance goes through
/// [`CreateInstanceOptions::attach_volume_id`], not this trait — creation
/// and attachment are separate marketplace calls in the original API.
#[async_trait]
pub trait VolumeProvider: Send + Sync {
    async fn create_volume(&self, region: &str, size_gb: u32) -> CoreResult<Volume>;
    async fn delete_volume(&self, volume_id: &str) -> CoreResult<bool>;
}

#[derive(Debug, Clone)]
pub struct SpotPricing {
    pub machine_type: String,
    pub zone: String,
    pub price_per_hour: f64,
}

/// Auxiliary CPU-instance provider used as the slowest fallback standby.
#[async_trait]
pub trait StandbyProvider: Send + Sync {
    async fn provision(&self, machine_type: &str, zone: &str) -> CoreResult<Instance>;
    async fn list(&self) -> CoreResult<Vec<Instance>>;
    async fn destroy(&self, instance_id: &InstanceId) -> CoreResult<bool>;
    async fn get_spot_pricing(&self, machine_type: &str, zone: &str) -> CoreResult<SpotPricing>;
}

/// SSH reachability probe, the suspension point every race/failover/restore
/// path blocks on. A seam so tests can fake connectivity instead of
/// shelling out to a real `ssh` binary.
#[async_trait]
pub trait SshProbe: Send + Sync {
    /// Runs the equivalent of `echo ok && uptime` against `host:port` and
    /// reports whether it succeeded, along with the round-trip latency.
    async fn probe(&self, host: &str, port: u16) -> (bool, std::time::Duration);

    /// Executes an arbitrary remote command, used by the Snapshot Engine to
    /// compute manifests and assemble restored files.
    async fn exec(&self, host: &str, port: u16, command: &str) -> CoreResult<String>;
}

/// Optional inference smoke test run by the CPU-standby failover path after
/// a restore completes. A seam, not a concrete model client —
/// which model server runs on the standby GPU is out of scope here.
#[async_trait]
pub trait InferenceProbe: Send + Sync {
    async fn query(&self, host: &str, port: u16, prompt: &str) -> CoreResult<InferenceResponse>;
}

#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub text: String,
    pub latency_ms: u64,
}
