//! The Failover Orchestrator: the single entry point the rest of
//! the fleet control plane calls to recover a dead GPU. Everything else in
//! this workspace — warm pool, regional volume, race provisioner, snapshot
//! engine — is a strategy this crate composes and gates through the
//! Resilience Envelope.

pub mod orchestrator;
pub mod policy;

pub use orchestrator::{FailoverOrchestrator, FailoverRequest, ReadinessReport};
pub use policy::{
    CpuStandbyStrategyConfig, FailoverPolicy, RegionalStrategyConfig, WarmPoolStrategyConfig,
};
