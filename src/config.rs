//! `FleetConfig`: a typed, JSON-loadable configuration structure. This lives
//! in the composition root rather than `gpufleet-core` since it is the one
//! concern that genuinely only makes sense once all the engines are wired
//! together.
//!
//! Every engine crate keeps its own `Duration`-typed config struct for unit
//! tests and direct construction; this module's job is only to translate a
//! flat, serde-friendly JSON document into those structs, matching
//! `tower-resilience`'s convention of small per-engine configs composed by
//! whatever wires the stack together.

use gpufleet_core::model::DefaultStrategy;
use gpufleet_failover::{CpuStandbyStrategyConfig, FailoverPolicy, RegionalStrategyConfig, WarmPoolStrategyConfig};
use gpufleet_regional::RegionalVolumePolicy;
use gpufleet_resilience::{CircuitBreakerConfig, RateLimiterConfig, ResilienceConfig};
use gpufleet_snapshot::{CleanupConfig, RetentionConfig};
use gpufleet_warmpool::WarmPoolConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimiterSettings {
    pub limit_per_window: u32,
    pub window_hours: u64,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            limit_per_window: 5,
            window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub fail_threshold: u32,
    pub cool_down_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            cool_down_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub rate_limiter: RateLimiterSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub audit_log_capacity: usize,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            rate_limiter: RateLimiterSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            audit_log_capacity: 10_000,
        }
    }
}

impl ResilienceSettings {
    pub fn to_resilience_config(&self) -> ResilienceConfig {
        ResilienceConfig {
            rate_limiter: RateLimiterConfig {
                limit_per_window: self.rate_limiter.limit_per_window,
                window: Duration::from_secs(self.rate_limiter.window_hours * 3600),
            },
            circuit_breaker: CircuitBreakerConfig {
                fail_threshold: self.circuit_breaker.fail_threshold,
                cool_down: Duration::from_secs(self.circuit_breaker.cool_down_secs),
            },
            audit_log_capacity: self.audit_log_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarmPoolSettings {
    pub health_check_interval_secs: u64,
    pub fail_threshold: u32,
    pub volume_size_gb: u32,
    pub reprovision_standby: bool,
}

impl Default for WarmPoolSettings {
    fn default() -> Self {
        let d = WarmPoolConfig::default();
        Self {
            health_check_interval_secs: d.health_check_interval.as_secs(),
            fail_threshold: d.fail_threshold,
            volume_size_gb: d.volume_size_gb,
            reprovision_standby: d.reprovision_standby,
        }
    }
}

impl WarmPoolSettings {
    pub fn to_warm_pool_config(&self) -> WarmPoolConfig {
        WarmPoolConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            fail_threshold: self.fail_threshold,
            volume_size_gb: self.volume_size_gb,
            reprovision_standby: self.reprovision_standby,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegionalVolumeSettings {
    pub min_reliability: Option<f64>,
    pub preferred_gpu_names: Vec<String>,
    pub image: String,
    pub disk_gb: u32,
    pub mount_point: String,
    pub timeout_secs: u64,
    pub destroy_old_instance: bool,
}

impl Default for RegionalVolumeSettings {
    fn default() -> Self {
        let d = RegionalVolumePolicy::default();
        Self {
            min_reliability: d.min_reliability,
            preferred_gpu_names: d.preferred_gpu_names,
            image: d.image,
            disk_gb: d.disk_gb,
            mount_point: d.mount_point,
            timeout_secs: d.timeout.as_secs(),
            destroy_old_instance: d.destroy_old_instance,
        }
    }
}

impl RegionalVolumeSettings {
    pub fn to_policy(&self) -> RegionalVolumePolicy {
        RegionalVolumePolicy {
            min_reliability: self.min_reliability,
            preferred_gpu_names: self.preferred_gpu_names.clone(),
            image: self.image.clone(),
            disk_gb: self.disk_gb,
            mount_point: self.mount_point.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            destroy_old_instance: self.destroy_old_instance,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefaultStrategySetting {
    WarmPool,
    RegionalVolume,
    CpuStandby,
    Both,
    All,
    Disabled,
}

impl Default for DefaultStrategySetting {
    fn default() -> Self {
        Self::All
    }
}

impl From<DefaultStrategySetting> for DefaultStrategy {
    fn from(value: DefaultStrategySetting) -> Self {
        match value {
            DefaultStrategySetting::WarmPool => DefaultStrategy::WarmPool,
            DefaultStrategySetting::RegionalVolume => DefaultStrategy::RegionalVolume,
            DefaultStrategySetting::CpuStandby => DefaultStrategy::CpuStandby,
            DefaultStrategySetting::Both => DefaultStrategy::Both,
            DefaultStrategySetting::All => DefaultStrategy::All,
            DefaultStrategySetting::Disabled => DefaultStrategy::Disabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FailoverPolicySettings {
    pub default_strategy: DefaultStrategySetting,
    pub warm_pool_enabled: bool,
    pub regional_volume_enabled: bool,
    pub regional_volume_region: Option<String>,
    pub regional_volume: RegionalVolumeSettings,
    pub cpu_standby_enabled: bool,
    pub cpu_standby_retention_days: u32,
    pub cpu_standby_keep_forever: bool,
    pub cpu_standby_restore_timeout_secs: u64,
    pub cpu_standby_run_inference_smoke_test: bool,
    pub override_global: bool,
}

impl Default for FailoverPolicySettings {
    fn default() -> Self {
        let cpu_standby = CpuStandbyStrategyConfig::default();
        Self {
            default_strategy: DefaultStrategySetting::default(),
            warm_pool_enabled: true,
            regional_volume_enabled: true,
            regional_volume_region: None,
            regional_volume: RegionalVolumeSettings::default(),
            cpu_standby_enabled: cpu_standby.enabled,
            cpu_standby_retention_days: cpu_standby.retention_days,
            cpu_standby_keep_forever: cpu_standby.keep_forever,
            cpu_standby_restore_timeout_secs: cpu_standby.restore_timeout.as_secs(),
            cpu_standby_run_inference_smoke_test: cpu_standby.run_inference_smoke_test,
            override_global: false,
        }
    }
}

impl FailoverPolicySettings {
    pub fn to_policy(&self) -> FailoverPolicy {
        FailoverPolicy {
            default_strategy: self.default_strategy.into(),
            warm_pool: WarmPoolStrategyConfig {
                enabled: self.warm_pool_enabled,
            },
            regional_volume: RegionalStrategyConfig {
                enabled: self.regional_volume_enabled,
                region: self.regional_volume_region.clone(),
                policy: self.regional_volume.to_policy(),
            },
            cpu_standby: CpuStandbyStrategyConfig {
                enabled: self.cpu_standby_enabled,
                retention_days: self.cpu_standby_retention_days,
                keep_forever: self.cpu_standby_keep_forever,
                restore_timeout: Duration::from_secs(self.cpu_standby_restore_timeout_secs),
                run_inference_smoke_test: self.cpu_standby_run_inference_smoke_test,
            },
            override_global: self.override_global,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub default_retention_days: u32,
    pub cleanup_batch_size: usize,
    pub cleanup_interval_hours: u64,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        let cleanup = CleanupConfig::default();
        Self {
            default_retention_days: RetentionConfig::default().default_days,
            cleanup_batch_size: cleanup.batch_size,
            cleanup_interval_hours: cleanup.interval.as_secs() / 3600,
        }
    }
}

impl SnapshotSettings {
    pub fn to_retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            default_days: self.default_retention_days,
        }
    }

    pub fn to_cleanup_config(&self) -> CleanupConfig {
        CleanupConfig {
            batch_size: self.cleanup_batch_size,
            interval: Duration::from_secs(self.cleanup_interval_hours * 3600),
        }
    }
}

/// Root configuration document for the fleet control plane, loaded once at
/// startup from JSON. Every field here has a built-in default, so an empty
/// `{}` document is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub resilience: ResilienceSettings,
    pub warm_pool: WarmPoolSettings,
    pub default_policy: FailoverPolicySettings,
    pub snapshot: SnapshotSettings,
    pub host_blacklist_ttl_hours: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            resilience: ResilienceSettings::default(),
            warm_pool: WarmPoolSettings::default(),
            default_policy: FailoverPolicySettings::default(),
            snapshot: SnapshotSettings::default(),
            host_blacklist_ttl_hours: 6,
        }
    }
}

impl FleetConfig {
    /// Parses a `FleetConfig` from a JSON document. Any field omitted from
    /// `json` falls back to its built-in default.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
