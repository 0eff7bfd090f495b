//! Per-strategy circuit breaker.
//!
//! Grounded on `tower-resilience-circuitbreaker`'s `Circuit`
//! (closed/open/half-open state machine with an `AtomicU8` mirror for
//! lock-free reads) but simplified from a sliding failure-rate window to a
//! plain consecutive-failure counter: after `fail_threshold` consecutive
//! failures, the next call returns `CircuitOpen` until `cool_down` elapses.

use chrono::{DateTime, Utc};
use gpufleet_core::CoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub fail_threshold: u32,
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

struct Circuit {
    state: Arc<AtomicU8>,
    consecutive_failures: u32,
    last_transition: Instant,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(CircuitState::Closed as u8)),
            consecutive_failures: 0,
            last_transition: Instant::now(),
        }
    }

    fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition_to(&mut self, state: CircuitState) {
        self.state.store(state as u8, Ordering::Release);
        self.last_transition = Instant::now();
        if state == CircuitState::Closed {
            self.consecutive_failures = 0;
        }
    }
}

/// Keyed by `strategy_name`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Fails with `CircuitOpen(strategy, reopen_at)` while `state == open`.
    /// Transitions `open -> half_open` lazily on the first check after
    /// `cool_down` has elapsed.
    pub fn check(&self, strategy: &str) -> Result<(), CoreError> {
        let mut circuits = self.circuits.lock().unwrap();
        let circuit = circuits
            .entry(strategy.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                if circuit.last_transition.elapsed() >= self.config.cool_down {
                    circuit.transition_to(CircuitState::HalfOpen);
                    #[cfg(feature = "tracing")]
                    tracing::info!(strategy, "circuit half-open after cool-down");
                    Ok(())
                } else {
                    let reopen_at = Utc::now()
                        + chrono::Duration::from_std(
                            self.config.cool_down - circuit.last_transition.elapsed(),
                        )
                        .unwrap_or_default();
                    Err(CoreError::CircuitOpen {
                        strategy: strategy.to_string(),
                        reopen_at,
                    })
                }
            }
        }
    }

    pub fn record_success(&self, strategy: &str) {
        let mut circuits = self.circuits.lock().unwrap();
        let circuit = circuits
            .entry(strategy.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state() {
            CircuitState::HalfOpen => circuit.transition_to(CircuitState::Closed),
            CircuitState::Closed => circuit.consecutive_failures = 0,
            CircuitState::Open => {}
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("gpufleet_circuitbreaker_calls_total", "strategy" => strategy.to_string(), "outcome" => "success").increment(1);
    }

    pub fn record_failure(&self, strategy: &str) {
        let mut circuits = self.circuits.lock().unwrap();
        let circuit = circuits
            .entry(strategy.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state() {
            CircuitState::HalfOpen => circuit.transition_to(CircuitState::Open),
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.config.fail_threshold {
                    circuit.transition_to(CircuitState::Open);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(strategy, "circuit opened after consecutive failures");
                }
            }
            CircuitState::Open => {}
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("gpufleet_circuitbreaker_calls_total", "strategy" => strategy.to_string(), "outcome" => "failure").increment(1);
    }

    pub fn state(&self, strategy: &str) -> CircuitState {
        let mut circuits = self.circuits.lock().unwrap();
        circuits
            .entry(strategy.to_string())
            .or_insert_with(Circuit::new)
            .state()
    }
}
