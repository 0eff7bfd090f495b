//! Tunables for one `provision_fast` call, defaulted from the original
//! implementation's `GPURequirements`/`RaceProvisionerConfig` dataclasses.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GpuRequirements {
    pub min_gpu_ram_mb: u64,
    pub max_price_per_hour: f64,
    pub num_gpus: Option<u32>,
    pub disk_gb: u32,
    pub image: String,
    pub on_start_script: Option<String>,
    pub env: Vec<(String, String)>,
    pub preferred_gpu_names: Vec<String>,
    pub min_reliability: Option<f64>,
    pub verified_only: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RaceConfig {
    pub gpus_per_round: u32,
    pub timeout_per_round: Duration,
    pub max_rounds: u32,
    pub check_interval: Duration,
    pub stagger_interval: Duration,
    pub max_issue_retries: u32,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            gpus_per_round: 5,
            timeout_per_round: Duration::from_secs(15),
            max_rounds: 4,
            check_interval: Duration::from_secs(2),
            stagger_interval: Duration::from_millis(200),
            max_issue_retries: 3,
        }
    }
}

impl RaceConfig {
    /// `gpus_per_round * 3` speculative rentals per round, oversampled from
    /// an offer pool of `gpus_per_round * 4` so there is slack when some
    /// offers turn out `OfferUnavailable`.
    pub fn rentals_per_round(&self) -> usize {
        (self.gpus_per_round as usize) * 3
    }

    pub fn offers_to_query(&self) -> usize {
        (self.gpus_per_round as usize) * 4
    }
}
