//! The Snapshot Engine: content-addressed full/incremental
//! workspace capture, restore with post-restore validation, and
//! retention-driven cleanup.

pub mod cleanup;
pub mod descriptor;
pub mod engine;
pub mod manifest;
pub mod repository;
pub mod retention;

pub use cleanup::{CleanupAgent, CleanupConfig, CleanupReport};
pub use descriptor::SnapshotDescriptor;
pub use engine::{RestoreOutcome, SnapshotEngine, MAX_CHAIN_DEPTH};
pub use manifest::Manifest;
pub use repository::{InMemorySnapshotRepository, SnapshotRepository};
pub use retention::RetentionConfig;
