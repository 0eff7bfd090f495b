//! Tunables for one regional-volume failover attempt, pinned by SPEC_FULL.md
//! to the original's literal filter order: region substring, then
//! reliability floor, then preferred-GPU allowlist (if non-empty), then
//! price ascending.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RegionalVolumePolicy {
    pub min_reliability: Option<f64>,
    pub preferred_gpu_names: Vec<String>,
    pub image: String,
    pub disk_gb: u32,
    pub mount_point: String,
    pub timeout: Duration,
    /// Destroy the old instance once the new one is confirmed `running`.
    pub destroy_old_instance: bool,
}

impl Default for RegionalVolumePolicy {
    fn default() -> Self {
        Self {
            min_reliability: None,
            preferred_gpu_names: vec![],
            image: "pytorch/pytorch:latest".to_string(),
            disk_gb: 100,
            mount_point: "/workspace".to_string(),
            timeout: Duration::from_secs(180),
            destroy_old_instance: true,
        }
    }
}
