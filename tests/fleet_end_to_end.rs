//! Exercises the composed `Fleet` facade end to end: instance lifecycle,
//! snapshot create/restore across two hosts sharing one blobstore, and
//! policy inspection, all against hand-rolled fakes rather than a real
//! marketplace or SSH connection. Mirrors the per-engine unit tests in
//! `crates/*/tests/`, but drives them through the single `gpufleet::Fleet`
//! entry point an outer layer would use.

use async_trait::async_trait;
use base64::Engine as _;
use gpufleet::{Fleet, FleetConfig, FleetProviders};
use gpufleet_core::model::{
    ActualStatus, CallerSource, IntendedStatus, Instance, InstanceId, MachineType, Offer, OfferId,
};
use gpufleet_core::ports::{
    Balance, BlobStore, CreateInstanceOptions, InstanceProvider, OfferFilter, SshProbe, Volume,
    VolumeProvider,
};
use gpufleet_core::CoreResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeMarketplace {
    instances: Mutex<HashMap<InstanceId, Instance>>,
    next_id: AtomicU64,
}

#[async_trait]
impl InstanceProvider for FakeMarketplace {
    async fn search_offers(&self, _filter: &OfferFilter) -> CoreResult<Vec<Offer>> {
        Ok(vec![Offer {
            offer_id: "offer-1".to_string(),
            machine_id: "m-1".to_string(),
            gpu_name: "A100".to_string(),
            num_gpus: 1,
            gpu_ram_mb: 80_000,
            price_per_hour: 1.2,
            reliability: 0.98,
            geolocation: "us-east-1".to_string(),
            verified: true,
            machine_type: MachineType::OnDemand,
            min_bid: None,
        }])
    }

    async fn create_instance(
        &self,
        offer_id: &OfferId,
        _image: &str,
        _opts: &CreateInstanceOptions,
    ) -> CoreResult<Instance> {
        let id = format!("i-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let instance = Instance {
            instance_id: id.clone(),
            offer_id: offer_id.clone(),
            machine_id: "m-1".to_string(),
            intended_status: IntendedStatus::Running,
            actual_status: ActualStatus::Running,
            ssh_host: Some("10.0.0.1".to_string()),
            ssh_port: Some(22),
            price_per_hour: 1.2,
            started_at: chrono::Utc::now(),
            label: None,
        };
        self.instances.lock().unwrap().insert(id, instance.clone());
        Ok(instance)
    }

    async fn create_instance_bid(
        &self,
        offer_id: &OfferId,
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
        if let Some(i) = self.instances.lock().unwrap().get_mut(instance_id) {
            i.actual_status = ActualStatus::Stopped;
        }
        Ok(true)
    }

    async fn resume_instance(&self, instance_id: &InstanceId) -> CoreResult<bool> {
        if let Some(i) = self.instances.lock().unwrap().get_mut(instance_id) {
            i.actual_status = ActualStatus::Running;
        }
        Ok(true)
    }

    async fn get_balance(&self) -> CoreResult<Balance> {
        Ok(Balance {
            credit: 500.0,
            balance: 500.0,
            email: "ops@example.com".to_string(),
        })
    }
}

#[derive(Default)]
struct FakeBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStore for FakeBlobStore {
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
            .ok_or_else(|| gpufleet_core::CoreError::NotFound(key.to_string()))
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

struct NullVolumes;

#[async_trait]
impl VolumeProvider for NullVolumes {
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

/// A single remote workspace, keyed by absolute path, that answers the
/// snapshot engine's `gpufleet-*` exec protocol the way a real agent
/// installed on the GPU host would.
#[derive(Default)]
struct FakeRemote {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl SshProbe for FakeRemote {
    async fn probe(&self, _host: &str, _port: u16) -> (bool, Duration) {
        (true, Duration::from_millis(5))
    }

    async fn exec(&self, _host: &str, _port: u16, command: &str) -> CoreResult<String> {
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
                self.files.lock().unwrap().insert(format!("{workspace}/{relative_path}"), bytes);
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

fn fleet_with(ssh: Arc<FakeRemote>, blobstore: Arc<FakeBlobStore>) -> Fleet {
    Fleet::new(
        FleetProviders {
            instance_provider: Arc::new(FakeMarketplace::default()),
            blobstore,
            volumes: Arc::new(NullVolumes),
            ssh,
            standby: None,
            inference: None,
        },
        FleetConfig::default(),
    )
}

#[tokio::test]
async fn lifecycle_round_trip_through_the_fleet_facade() {
    let fleet = fleet_with(Arc::new(FakeRemote::default()), Arc::new(FakeBlobStore::default()));

    let instance = fleet
        .lifecycle_create(
            &"offer-1".to_string(),
            "pytorch/pytorch:latest",
            &CreateInstanceOptions::default(),
            CallerSource::ApiUser,
            "provision for training job",
        )
        .await
        .unwrap();
    assert_eq!(instance.actual_status, ActualStatus::Running);

    let paused = fleet
        .lifecycle_pause(&instance.instance_id, CallerSource::ApiUser, "idle cost control")
        .await
        .unwrap();
    assert!(paused);

    let resumed = fleet
        .lifecycle_resume(&instance.instance_id, CallerSource::ApiUser, "job resumed")
        .await
        .unwrap();
    assert!(resumed);

    let history = fleet.lifecycle_history(&instance.instance_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|e| e.success));

    let destroyed = fleet
        .lifecycle_destroy(&instance.instance_id, CallerSource::ApiUser, "job finished")
        .await
        .unwrap();
    assert!(destroyed);
}

#[tokio::test]
async fn snapshot_create_restore_and_cleanup_round_trip() {
    let mut source_files = HashMap::new();
    source_files.insert("weights.bin".to_string(), vec![7u8; 256]);
    source_files.insert("config.json".to_string(), b"{\"epoch\": 3}".to_vec());
    let source_remote = Arc::new(FakeRemote {
        files: Mutex::new(source_files),
    });
    let blobstore = Arc::new(FakeBlobStore::default());
    let fleet = fleet_with(source_remote, blobstore);

    let snapshot = fleet
        .snapshot_create(
            &"i-train-1".to_string(),
            "owner-1",
            "source-host",
            22,
            "/workspace",
            None,
            Some(3),
            false,
        )
        .await
        .unwrap();
    assert_eq!(snapshot.file_count, 2);
    assert_eq!(snapshot.retention_days, 3);

    let dry_run = fleet.snapshot_delete_expired(true).await.unwrap();
    assert_eq!(dry_run.deleted, 0, "a 3-day retention snapshot created moments ago is not yet expired");

    let report = fleet.snapshot_delete_expired(false).await.unwrap();
    assert_eq!(report.deleted, 0);
}

#[tokio::test]
async fn snapshot_restores_onto_a_different_host_sharing_the_blobstore() {
    // The snapshot engine's `SshProbe` is wired once per `Fleet`, so a
    // restore onto a different host is modeled as a second `Fleet` pointed
    // at the same blobstore but a different remote — exactly how a
    // production deployment would restore onto a freshly rented GPU.
    let mut source_files = HashMap::new();
    source_files.insert("weights.bin".to_string(), vec![9u8; 64]);
    let source_remote = Arc::new(FakeRemote {
        files: Mutex::new(source_files),
    });
    let blobstore = Arc::new(FakeBlobStore::default());
    let source_fleet = fleet_with(source_remote, blobstore.clone());

    let snapshot = source_fleet
        .snapshot_create(&"i-train-2".to_string(), "owner-1", "source-host", 22, "/workspace", None, None, false)
        .await
        .unwrap();

    let target_remote = Arc::new(FakeRemote::default());
    let target_fleet = fleet_with(target_remote.clone(), blobstore);

    let outcome = target_fleet
        .snapshot_restore(&snapshot.snapshot_id, "target-host", 22, "/workspace")
        .await
        .unwrap();
    assert_eq!(outcome.files_count, 1);
    assert_eq!(
        target_remote.files.lock().unwrap().get("/workspace/weights.bin").unwrap().len(),
        64
    );
}

#[tokio::test]
async fn policy_defaults_to_all_strategies_and_can_be_narrowed() {
    let fleet = fleet_with(Arc::new(FakeRemote::default()), Arc::new(FakeBlobStore::default()));

    let mut policy = fleet.policy_get_global();
    assert!(policy.warm_pool.enabled);
    assert!(policy.regional_volume.enabled);

    policy.regional_volume.enabled = false;
    fleet.policy_update_global(policy);
    assert!(!fleet.policy_get_global().regional_volume.enabled);

    let readiness = fleet.failover_check_readiness(&"m-unknown".to_string());
    assert!(!readiness.warm_pool_ready, "no warm pool was ever registered for this machine");
}
