//! Regional Volume Failover: remounts an existing region-pinned
//! persistent volume onto a freshly rented GPU when the host it was on dies
//! outright and a warm-pool promotion has nothing left to promote.

pub mod engine;
pub mod policy;

pub use engine::{RegionalFailoverOutcome, RegionalVolumeFailover};
pub use policy::RegionalVolumePolicy;
