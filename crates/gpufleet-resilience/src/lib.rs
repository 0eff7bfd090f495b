//! The Resilience Envelope: per-machine rate limiting, per-strategy
//! circuit breaking, cleanup journaling and the deletion audit log that wrap
//! every failover and lifecycle action.
//!
//! Grounded on `tower-resilience-core`'s pattern of small, independently
//! testable engines composed by a facade, but the facade here is a plain
//! struct with direct methods rather than a `tower::Layer` stack: nothing in
//! this workspace is an HTTP/RPC service, so there is no `Service` to wrap.

pub mod audit;
pub mod circuit_breaker;
pub mod cleanup_journal;
pub mod metrics;
pub mod rate_limiter;

pub use audit::{DeletionAuditLog, DeletionAuditRecord};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cleanup_journal::{CleanupJournal, JournaledResource};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};

use gpufleet_core::model::MachineId;
use gpufleet_core::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct ResilienceConfig {
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub audit_log_capacity: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            audit_log_capacity: 10_000,
        }
    }
}

/// Owns one rate limiter, one circuit breaker, one cleanup journal and one
/// audit log, shared across every failover attempt. Cloned cheaply via
/// `Arc` at the composition root rather than re-instantiated per request.
pub struct ResilienceEnvelope {
    pub rate_limiter: RateLimiter,
    pub circuit_breaker: CircuitBreaker,
    pub cleanup_journal: CleanupJournal,
    pub audit_log: DeletionAuditLog,
}

impl ResilienceEnvelope {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config.rate_limiter),
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker),
            cleanup_journal: CleanupJournal::new(),
            audit_log: DeletionAuditLog::new(config.audit_log_capacity),
        }
    }

    /// Gate a failover attempt for `strategy` against `machine_id`: both the
    /// per-machine rate limit and the per-strategy circuit must admit the
    /// call, rate limiter checked first since it is the cheaper rejection.
    pub fn admit(&self, machine_id: &MachineId, strategy: &str) -> Result<(), CoreError> {
        self.rate_limiter.check(machine_id)?;
        self.circuit_breaker.check(strategy)?;
        Ok(())
    }

    pub fn record_outcome(&self, machine_id: &MachineId, strategy: &str, succeeded: bool) {
        metrics::record_strategy_outcome(strategy, succeeded);
        if succeeded {
            self.rate_limiter.record(machine_id);
            self.circuit_breaker.record_success(strategy);
        } else {
            self.circuit_breaker.record_failure(strategy);
        }
    }
}
