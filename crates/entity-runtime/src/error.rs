//! Errors raised by the Runtime itself, layered over `entity-core`'s
//! taxonomy.

use thiserror::Error;

use entity_core::EntityCoreError;

/// Top-level error surfaced across the `entity-runtime` crate boundary.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] EntityCoreError),

    /// The entity name on an id has no registered `OperationRegistry`.
    #[error("no operation registry registered for entity type {entity_name:?}")]
    UnknownEntityType { entity_name: String },

    /// The batch executor returned without producing a response for a
    /// `reply_to` this call was waiting on — only reachable if the
    /// response channel was dropped before the batch committed.
    #[error("call to {instance_id} produced no response before its waiter was dropped")]
    ResponseChannelClosed { instance_id: String },
}
