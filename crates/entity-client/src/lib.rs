//! The client-facing surface: `GetEntity`, `GetAllEntities`,
//! `SignalEntity`, `CleanEntityStorage`. Unlike the orchestration-facing
//! `call_entity`/`lock_entities` on [`entity_runtime::Runtime`], a client
//! never calls an entity synchronously or holds a critical section — it
//! only observes state and fires signals.

use std::sync::Arc;

use thiserror::Error;

use entity_core::instance_id::{InstanceId, InstanceIdError};
use entity_core::query::{EntityMetadata, EntityQueryService, MetadataPage};
use entity_core::store::{CleanReport, OrchestrationStatusOracle, QueryFilter, StoreAdapter};
use entity_runtime::{Runtime, RuntimeError};

/// Errors surfaced across the `entity-client` crate boundary.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid entity id: {0}")]
    InvalidEntityId(#[from] InstanceIdError),

    #[error(transparent)]
    Store(#[from] entity_core::error::StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A client handle over a running [`Runtime`]: read-only queries plus
/// fire-and-forget signaling, with no access to `call`/lock primitives.
pub struct EntityClient<S: StoreAdapter + 'static> {
    runtime: Runtime<S>,
    query: EntityQueryService<S>,
}

impl<S: StoreAdapter + 'static> EntityClient<S> {
    pub fn new(runtime: Runtime<S>) -> Self {
        let query = EntityQueryService::new(runtime.store());
        Self { runtime, query }
    }

    /// `GetEntity(id, include_state) -> metadata?`, addressed
    /// by the caller-facing `@name@key` string.
    pub async fn get_entity(&self, canonical_id: &str, include_state: bool) -> Result<Option<EntityMetadata>, ClientError> {
        let id = InstanceId::parse(canonical_id)?;
        Ok(self.query.get_entity(&id, include_state).await?)
    }

    /// `GetAllEntities(filter) -> page<metadata>`.
    pub async fn get_all_entities(&self, filter: QueryFilter) -> Result<MetadataPage, ClientError> {
        Ok(self.query.get_all_entities(filter).await?)
    }

    /// `SignalEntity(id, op_name, input)`: fire-and-forget,
    /// delivered through the same scheduler an orchestration's signals go
    /// through, distinguished only by `sender`.
    pub async fn signal_entity(&self, canonical_id: &str, op_name: &str, input: Vec<u8>) -> Result<(), ClientError> {
        let id = InstanceId::parse(canonical_id)?;
        self.runtime.signal_entity(&id, "@client", op_name, input, None).await?;
        Ok(())
    }

    /// `CleanEntityStorage() -> { empty_entities_removed, orphaned_locks_released }`.
    pub async fn clean_entity_storage(&self, oracle: &dyn OrchestrationStatusOracle) -> Result<CleanReport, ClientError> {
        Ok(self.query.clean_entity_storage(oracle).await?)
    }
}

/// Convenience for callers that only hold a store and don't need the full
/// scheduler — e.g. an offline cleanup job with no live orchestrations.
pub fn query_service_for<S: StoreAdapter + 'static>(store: Arc<S>) -> EntityQueryService<S> {
    EntityQueryService::new(store)
}
