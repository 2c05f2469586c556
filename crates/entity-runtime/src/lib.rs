//! In-process scheduler for the durable entity core: the ambient Runtime
//! that wires a store, a set of per-entity-type operation registries, and
//! the batch executor into the orchestration-facing call/signal/lock
//! surface.

pub mod config;
pub mod error;
pub mod runtime;

pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use error::RuntimeError;
pub use runtime::Runtime;
