//! Warm Pool Manager: a standby GPU on the same physical host as
//! a primary, sharing one persistent volume, promoted on primary failure.

pub mod config;
pub mod manager;
pub mod state;

pub use config::WarmPoolConfig;
pub use manager::{FailoverOutcome, ProvisionOutcome, WarmPoolManager, WarmPoolRecord};
pub use state::WarmPoolState;
