//! Thin wrappers around the `metrics` crate's macros, gated behind the
//! `metrics` feature exactly as `tower-resilience-circuitbreaker` and
//! `tower-resilience-ratelimiter` gate their own instrumentation. Kept as
//! free functions rather than methods so every engine in this crate emits
//! under the same metric names instead of each inventing its own.

#[cfg(feature = "metrics")]
pub fn record_strategy_attempt(strategy: &str) {
    metrics::counter!("gpufleet_failover_attempts_total", "strategy" => strategy.to_string())
        .increment(1);
}

#[cfg(feature = "metrics")]
pub fn record_strategy_outcome(strategy: &str, succeeded: bool) {
    let outcome = if succeeded { "success" } else { "failure" };
    metrics::counter!(
        "gpufleet_failover_outcomes_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
}

#[cfg(feature = "metrics")]
pub fn record_phase_duration(strategy: &str, phase: &str, seconds: f64) {
    metrics::histogram!(
        "gpufleet_failover_phase_duration_seconds",
        "strategy" => strategy.to_string(),
        "phase" => phase.to_string(),
    )
    .record(seconds);
}

#[cfg(feature = "metrics")]
pub fn record_ssh_probe_latency(seconds: f64) {
    metrics::histogram!("gpufleet_ssh_probe_latency_seconds").record(seconds);
}

#[cfg(not(feature = "metrics"))]
pub fn record_strategy_attempt(_strategy: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_strategy_outcome(_strategy: &str, _succeeded: bool) {}

#[cfg(not(feature = "metrics"))]
pub fn record_phase_duration(_strategy: &str, _phase: &str, _seconds: f64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_ssh_probe_latency(_seconds: f64) {}
