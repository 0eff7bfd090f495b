//! `FailoverPolicy`: either a global singleton or a per-machine
//! override, each carrying a `default_strategy` plus one config block per
//! strategy. Resolution prefers the machine's own policy
//! over the global one only when that machine's policy has `override_global`
//! set — otherwise the global policy applies even if a machine-specific row
//! exists (a disabled/half-configured override should not silently win).

use gpufleet_core::model::DefaultStrategy;
use gpufleet_regional::RegionalVolumePolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WarmPoolStrategyConfig {
    pub enabled: bool,
}

impl Default for WarmPoolStrategyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone)]
pub struct RegionalStrategyConfig {
    pub enabled: bool,
    pub region: Option<String>,
    pub policy: RegionalVolumePolicy,
}

impl Default for RegionalStrategyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: None,
            policy: RegionalVolumePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CpuStandbyStrategyConfig {
    pub enabled: bool,
    pub retention_days: u32,
    pub keep_forever: bool,
    pub restore_timeout: Duration,
    pub run_inference_smoke_test: bool,
}

impl Default for CpuStandbyStrategyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 7,
            keep_forever: false,
            restore_timeout: Duration::from_secs(300),
            run_inference_smoke_test: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailoverPolicy {
    pub default_strategy: DefaultStrategy,
    pub warm_pool: WarmPoolStrategyConfig,
    pub regional_volume: RegionalStrategyConfig,
    pub cpu_standby: CpuStandbyStrategyConfig,
    /// Only consulted for a per-machine policy: whether this machine's
    /// settings should be used instead of falling back to the global one.
    pub override_global: bool,
}

impl FailoverPolicy {
    pub fn global_default() -> Self {
        Self {
            default_strategy: DefaultStrategy::All,
            ..Self::default()
        }
    }
}
