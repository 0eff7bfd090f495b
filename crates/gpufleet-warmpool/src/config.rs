use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct WarmPoolConfig {
    pub health_check_interval: Duration,
    pub fail_threshold: u32,
    pub volume_size_gb: u32,
    pub reprovision_standby: bool,
}

impl Default for WarmPoolConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
            fail_threshold: 3,
            volume_size_gb: 500,
            reprovision_standby: true,
        }
    }
}
