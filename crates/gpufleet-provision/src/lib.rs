//! Race Provisioner: speculative parallel GPU rental with
//! first-SSH-ready-wins candidate selection.

pub mod candidate;
pub mod config;
pub mod engine;

pub use candidate::{GPUCandidate, ProvisionResult};
pub use config::{GpuRequirements, RaceConfig};
pub use engine::RaceProvisioner;
