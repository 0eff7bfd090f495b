//! The Lifecycle Controller: the sole chokepoint for instance
//! create/destroy/pause/resume/hibernate/wake, each accompanied by exactly
//! one append-only audit record before the call returns.

pub mod controller;
pub mod event_store;

pub use controller::LifecycleController;
pub use event_store::{InMemoryLifecycleEventStore, LifecycleEventStore};
