//! Entity Query & Cleanup: the client-facing surface over
//! a [`StoreAdapter`] — listing, filtering, and storage reclamation.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::instance_id::InstanceId;
use crate::record::EntityRecord;
use crate::store::{CleanReport, OrchestrationStatusOracle, QueryFilter, StoreAdapter};

/// Metadata about one entity, as surfaced to `GetEntity`/`GetAllEntities`.
/// `state` is omitted unless the caller asked for it.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    pub id: InstanceId,
    pub state: Option<Vec<u8>>,
    pub last_modified: DateTime<Utc>,
    pub is_locked: bool,
    pub backlog_queue_size: usize,
}

impl EntityMetadata {
    fn from_record(record: EntityRecord, include_state: bool) -> Self {
        Self {
            id: record.id,
            state: if include_state { record.state } else { None },
            last_modified: record.last_modified,
            is_locked: record.locked_by.is_some(),
            backlog_queue_size: record.backlog.len(),
        }
    }
}

/// One page of [`EntityQueryService::get_all_entities`] results.
#[derive(Debug, Clone)]
pub struct MetadataPage {
    pub records: Vec<EntityMetadata>,
    pub continuation_token: Option<String>,
}

/// The client-facing query/cleanup surface, layered over any
/// [`StoreAdapter`].
pub struct EntityQueryService<S: StoreAdapter> {
    store: Arc<S>,
}

impl<S: StoreAdapter> EntityQueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// `GetEntity(id, include_state) -> metadata?`.
    pub async fn get_entity(&self, id: &InstanceId, include_state: bool) -> Result<Option<EntityMetadata>, StoreError> {
        Ok(self.store.load(id).await?.map(|record| EntityMetadata::from_record(record, include_state)))
    }

    /// `GetAllEntities(filter) -> page-stream<metadata>`, realized as
    /// explicit paging so callers control backpressure across a wire
    /// boundary rather than consuming a raw in-process stream.
    pub async fn get_all_entities(&self, filter: QueryFilter) -> Result<MetadataPage, StoreError> {
        let include_state = filter.include_state;
        let page = self.store.query_page(filter).await?;
        Ok(MetadataPage {
            records: page.records.into_iter().map(|record| EntityMetadata::from_record(record, include_state)).collect(),
            continuation_token: page.continuation_token,
        })
    }

    /// `CleanEntityStorage() -> { empty_entities_removed, orphaned_locks_released }`.
    pub async fn clean_entity_storage(&self, oracle: &dyn OrchestrationStatusOracle) -> Result<CleanReport, StoreError> {
        self.store.clean(oracle).await
    }
}
