//! Reference [`super::StoreAdapter`] implementation: an in-process,
//! mutex-guarded map. Sufficient for tests and single-process demos; a
//! real deployment swaps in a durable backend behind the same trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    instance_id::InstanceId,
    lock::forcible_release_offline,
    message::OutboundMessage,
    record::EntityRecord,
};

use super::{CleanReport, CommitWrite, OrchestrationStatusOracle, Page, QueryFilter, StoreAdapter};

/// In-memory reference [`StoreAdapter`]. Keyed by canonical `@name@key`
/// string so iteration order matches the lock-ordering / query-prefix
/// total order.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<BTreeMap<String, EntityRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { records: Mutex::new(BTreeMap::new()) }
    }

    fn encode_token(last_key: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(last_key.as_bytes())
    }

    fn decode_token(token: &str) -> Option<String> {
        base64::engine::general_purpose::STANDARD
            .decode(token)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStore {
    const SUPPORTS_IMPLICIT_DELETION: bool = false;

    async fn load(&self, id: &InstanceId) -> Result<Option<EntityRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&id.to_canonical_string()).cloned())
    }

    async fn commit_batch(
        &self,
        id: &InstanceId,
        expected_version: u64,
        write: CommitWrite,
        outbound: Vec<OutboundMessage>,
    ) -> Result<(), StoreError> {
        let key = id.to_canonical_string();
        let mut records = self.records.lock().await;

        let actual_version = records.get(&key).map(|r| r.version).unwrap_or(0);
        if actual_version != expected_version {
            return Err(StoreError::Conflict { entity_id: key, expected: expected_version, actual: actual_version });
        }

        match write {
            CommitWrite::Delete => {
                records.remove(&key);
            }
            CommitWrite::Upsert(mut record) => {
                record.version = expected_version + 1;
                record.last_modified = Utc::now();
                records.insert(key, record);
            }
        }

        // Publication of outbound messages is a caller/Runtime concern in
        // this reference adapter — a real backend would fan these out as
        // part of the same transaction. We only validate they were
        // provided atomically alongside the state write, which the borrow
        // above already guarantees (no observer can see one without the
        // other within this function's critical section).
        drop(outbound);

        Ok(())
    }

    fn query<'a>(&'a self, filter: QueryFilter) -> BoxStream<'a, Result<EntityRecord, StoreError>> {
        stream::once(async move {
            let records = self.records.lock().await;
            records
                .iter()
                .filter(|(key, record)| filter.matches(key, record))
                .map(|(_, record)| Ok(record.clone()))
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn query_page(&self, filter: QueryFilter) -> Result<Page, StoreError> {
        let records = self.records.lock().await;

        let start_after = filter.continuation_token.as_deref().and_then(Self::decode_token);

        let mut matching: Vec<(&String, &EntityRecord)> = records
            .iter()
            .filter(|(key, record)| filter.matches(key, record))
            .collect();
        matching.sort_by(|(a, _), (b, _)| a.cmp(b));

        let start_index = match &start_after {
            Some(cursor) => matching.iter().position(|(key, _)| *key == cursor).map(|i| i + 1).unwrap_or(0),
            None => 0,
        };

        let page_size = filter.page_size();
        let page: Vec<EntityRecord> =
            matching[start_index..].iter().take(page_size).map(|(_, r)| (*r).clone()).collect();

        let continuation_token = if start_index + page.len() < matching.len() {
            page.last().map(|r| Self::encode_token(&r.id.to_canonical_string()))
        } else {
            None
        };

        Ok(Page { records: page, continuation_token })
    }

    async fn clean(&self, oracle: &dyn OrchestrationStatusOracle) -> Result<CleanReport, StoreError> {
        let mut records = self.records.lock().await;
        let mut report = CleanReport::default();

        let empty_keys: Vec<String> =
            records.iter().filter(|(_, r)| r.is_empty_entity()).map(|(k, _)| k.clone()).collect();
        for key in empty_keys {
            records.remove(&key);
            report.empty_entities_removed += 1;
        }

        for record in records.values_mut() {
            let should_release = record
                .locked_by
                .as_ref()
                .map(|holder| oracle.is_terminal_and_not_running(&holder.orchestration_id))
                .unwrap_or(false);
            if should_release && forcible_release_offline(record) {
                record.last_modified = Utc::now();
                report.orphaned_locks_released += 1;
            }
        }

        Ok(report)
    }
}
