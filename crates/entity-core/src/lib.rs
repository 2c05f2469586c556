//! Durable entity core: addressable, persistent, single-writer actors for
//! a durable-task platform.
//!
//! Components, leaves first: [`instance_id`] (identity), [`store`]
//! (the state backend interface and reference adapter), [`dispatch`]
//! (handler selection and binding), [`executor`] (the batch state
//! machine), [`lock`] (the critical-section protocol), and [`query`]
//! (listing and storage reclamation). [`record`], [`message`], and
//! [`context`] are the shared data shapes every component operates on.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod instance_id;
pub mod lock;
pub mod message;
pub mod query;
pub mod record;
pub mod store;

pub use context::{OperationDescriptor, TaskEntityContext};
pub use error::EntityCoreError;
pub use executor::{Batch, BatchExecutor, ExecutionReport};
pub use instance_id::InstanceId;
pub use lock::{CriticalSectionScope, LockReleaseSink};
pub use query::{EntityMetadata, EntityQueryService, MetadataPage};
pub use record::EntityRecord;
pub use store::{InMemoryStore, OrchestrationStatusOracle, QueryFilter, StoreAdapter};
