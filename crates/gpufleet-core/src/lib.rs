//! Shared domain model, error types, provider ports and the event system for
//! the gpufleet control plane.
//!
//! Every other crate in the workspace depends on this one and nothing else
//! upstream of it: this is where the data model, the error domain, and the
//! `InstanceProvider`/`BlobStore`/`StandbyProvider` ports live.

pub mod error;
pub mod events;
pub mod model;
pub mod ports;

pub use error::{CoreError, CoreResult};
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
