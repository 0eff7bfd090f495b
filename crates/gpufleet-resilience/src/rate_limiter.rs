//! Per-machine sliding-window admission control.
//!
//! Grounded on `tower-resilience-ratelimiter`'s sliding-log window state
//! (`SlidingLogState`), simplified from a generic per-request permit pool to
//! a single shape: at most `N` *successful* failover admissions per
//! `machine_id` within a rolling window `T`.

use gpufleet_core::model::MachineId;
use gpufleet_core::CoreError;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub limit_per_window: usize,
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit_per_window: 5,
            window: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Default)]
struct MachineWindow {
    admissions: VecDeque<Instant>,
}

impl MachineWindow {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(&front) = self.admissions.front() {
            if now.duration_since(front) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Keyed by `machine_id`. Admissions are only counted on success — a
/// rejected or failed attempt never consumes budget, which is what prevents
/// a single broken strategy from locking a machine out of retrying.
pub struct RateLimiter {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<MachineId, MachineWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Fails with `RateLimited(retry_after_seconds)` when the window is full.
    pub fn check(&self, machine_id: &MachineId) -> Result<(), CoreError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(machine_id.clone()).or_default();
        window.prune(self.config.window, now);

        if window.admissions.len() < self.config.limit_per_window {
            return Ok(());
        }

        let oldest = *window.admissions.front().expect("window is full, non-empty");
        let retry_after = self
            .config
            .window
            .saturating_sub(now.duration_since(oldest));

        #[cfg(feature = "tracing")]
        tracing::warn!(machine_id = %machine_id, retry_after_s = retry_after.as_secs(), "rate limit exceeded");

        Err(CoreError::RateLimited { retry_after })
    }

    /// Stamps a successful admission at completion of a failover attempt.
    pub fn record(&self, machine_id: &MachineId) {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(machine_id.clone()).or_default();
        window.prune(self.config.window, now);
        window.admissions.push_back(now);

        #[cfg(feature = "metrics")]
        metrics::counter!("gpufleet_ratelimiter_admissions_total", "machine_id" => machine_id.clone()).increment(1);
    }

    /// Current count of admissions still inside the window, for readiness
    /// checks and tests.
    pub fn current_count(&self, machine_id: &MachineId) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(machine_id.clone()).or_default();
        window.prune(self.config.window, now);
        window.admissions.len()
    }
}
