//! Batch Executor: the heart of the core. Loads an
//! entity's record once per batch, applies every message in order with
//! per-operation rollback, and commits state plus outbound messages
//! atomically.
//!
//! The backlog behaves like an ordered, per-entity message buffer,
//! releasing deferred work in order once it becomes eligible rather than
//! dropping or reordering it.

mod batch;

pub use batch::Batch;

use std::sync::Arc;

use chrono::Utc;

use crate::{
    dispatch::{DispatchOutcome, HandlerError, HandlerOutput, OperationDescriptor, OperationRegistry},
    error::{EntityCoreError, StoreError},
    instance_id::InstanceId,
    lock::{enqueue_backlog, release_lock, request_lock, LockAcquisition},
    message::{BatchItem, CallResult, LockReleaseMessage, LockRequestMessage, OperationMessage, OutboundMessage},
    record::{BacklogEntry, EntityRecord, ScheduledEntry},
    store::{CommitWrite, StoreAdapter},
};

/// What one [`BatchExecutor::execute`] call produced.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outbound: Vec<OutboundMessage>,
}

pub struct BatchExecutor<S: StoreAdapter> {
    store: Arc<S>,
}

impl<S: StoreAdapter> BatchExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run one batch to completion against `id`'s record. On a store
    /// conflict the whole batch is replanned from a freshly-loaded
    /// record, so no partial effects from the losing attempt are
    /// observable.
    pub async fn execute(&self, id: &InstanceId, registry: &OperationRegistry, batch: Batch) -> Result<ExecutionReport, EntityCoreError> {
        loop {
            let (mut record, expected_version) = self.load_or_new(id).await?;
            let mut outbound = Vec::new();

            self.flush_due_scheduled(&mut record, registry, &mut outbound).await?;

            for item in batch.items.clone() {
                self.apply_item(&mut record, item, registry, &mut outbound).await?;
            }

            let write = if S::SUPPORTS_IMPLICIT_DELETION && record.is_empty_entity() {
                CommitWrite::Delete
            } else {
                CommitWrite::Upsert(record.clone())
            };

            match self.store.commit_batch(id, expected_version, write, outbound.clone()).await {
                Ok(()) => {
                    log::debug!(target: "entity_core::executor", "committed batch for {id} ({} outbound)", outbound.len());
                    return Ok(ExecutionReport { outbound });
                }
                Err(StoreError::Conflict { .. }) => {
                    log::debug!(target: "entity_core::executor", "commit conflict for {id}, replanning batch");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drains every `scheduled` entry whose `scheduled_time` has matured,
    /// dispatching in scheduled-time order. Run at the top of every batch
    /// activation so a deferred signal eventually lands even if no further
    /// operation ever targets this entity again.
    async fn flush_due_scheduled(
        &self,
        record: &mut EntityRecord,
        registry: &OperationRegistry,
        outbound: &mut Vec<OutboundMessage>,
    ) -> Result<(), EntityCoreError> {
        let now = Utc::now();
        let mut due = Vec::new();
        let mut not_yet = std::collections::VecDeque::new();
        for entry in std::mem::take(&mut record.scheduled) {
            if entry.scheduled_time <= now {
                due.push(entry);
            } else {
                not_yet.push_back(entry);
            }
        }
        record.scheduled = not_yet;
        due.sort_by_key(|entry| entry.scheduled_time);

        for entry in due {
            if !record.admits(&entry.sender, entry.lock_token) {
                log::debug!(target: "entity_core::executor", "matured {} on {} backlogged (locked)", entry.op_name, record.id);
                enqueue_backlog(
                    record,
                    BacklogEntry {
                        sender: entry.sender,
                        op_name: entry.op_name,
                        input: entry.input,
                        reply_to: entry.reply_to,
                        request_id: entry.request_id,
                    },
                );
                continue;
            }
            log::debug!(target: "entity_core::executor", "delivering matured {} on {}", entry.op_name, record.id);
            self.dispatch_and_commit_one(record, &entry.sender, &entry.op_name, entry.input, entry.reply_to, entry.request_id, registry, outbound).await?;
        }
        Ok(())
    }

    async fn load_or_new(&self, id: &InstanceId) -> Result<(EntityRecord, u64), EntityCoreError> {
        match self.store.load(id).await? {
            Some(record) => {
                let version = record.version;
                Ok((record, version))
            }
            None => Ok((EntityRecord::new_empty(id.clone(), Utc::now()), 0)),
        }
    }

    async fn apply_item(
        &self,
        record: &mut EntityRecord,
        item: BatchItem,
        registry: &OperationRegistry,
        outbound: &mut Vec<OutboundMessage>,
    ) -> Result<(), EntityCoreError> {
        match item {
            BatchItem::LockRequest(request) => self.apply_lock_request(record, &request, registry, outbound).await,
            BatchItem::LockRelease(release) => self.apply_lock_release(record, &release, registry, outbound).await,
            BatchItem::Operation(op) => self.apply_operation(record, &op, registry, outbound).await,
        }
    }

    async fn apply_lock_request(
        &self,
        record: &mut EntityRecord,
        request: &LockRequestMessage,
        registry: &OperationRegistry,
        outbound: &mut Vec<OutboundMessage>,
    ) -> Result<(), EntityCoreError> {
        match request_lock(record, &request.orchestration_id, request.critical_section_token) {
            LockAcquisition::Granted { critical_section_token, released_backlog } => {
                log::debug!(target: "entity_core::executor", "granted lock on {} to {}", record.id, request.orchestration_id);
                outbound.push(OutboundMessage::LockGranted {
                    orchestration_id: request.orchestration_id.clone(),
                    target_id: record.id.to_canonical_string(),
                    critical_section_token,
                });
                for entry in released_backlog {
                    self.apply_backlog_entry(record, entry, registry, outbound).await?;
                }
            }
            LockAcquisition::Queued => {
                log::debug!(target: "entity_core::executor", "queued lock request on {} from {}", record.id, request.orchestration_id);
            }
        }
        Ok(())
    }

    async fn apply_lock_release(
        &self,
        record: &mut EntityRecord,
        release: &LockReleaseMessage,
        registry: &OperationRegistry,
        outbound: &mut Vec<OutboundMessage>,
    ) -> Result<(), EntityCoreError> {
        match release_lock(record, &release.orchestration_id, release.critical_section_token) {
            Ok(Some(next)) => {
                log::debug!(target: "entity_core::executor", "released lock on {}, granting to next waiter {}", record.id, next.orchestration_id);
                let synthetic = LockRequestMessage {
                    orchestration_id: next.orchestration_id,
                    ordered_targets: vec![record.id.to_canonical_string()],
                    critical_section_token: next.critical_section_token,
                };
                self.apply_lock_request(record, &synthetic, registry, outbound).await?;
            }
            Ok(None) => {
                log::debug!(target: "entity_core::executor", "released lock on {}, no waiters", record.id);
            }
            Err(violation) => {
                log::error!(target: "entity_core::executor", "lock protocol violation on {}: {violation}", record.id);
                return Err(violation.into());
            }
        }
        Ok(())
    }

    async fn apply_operation(
        &self,
        record: &mut EntityRecord,
        op: &OperationMessage,
        registry: &OperationRegistry,
        outbound: &mut Vec<OutboundMessage>,
    ) -> Result<(), EntityCoreError> {
        if let Some(scheduled_time) = op.scheduled_time {
            if op.is_deferred(Utc::now()) {
                log::debug!(target: "entity_core::executor", "{} on {} deferred until {scheduled_time}", op.op_name, record.id);
                record.scheduled.push_back(ScheduledEntry {
                    sender: op.sender.clone(),
                    op_name: op.op_name.clone(),
                    input: op.input.clone(),
                    reply_to: op.reply_to.clone(),
                    request_id: op.request_id.clone(),
                    lock_token: op.lock_token,
                    scheduled_time,
                });
                return Ok(());
            }
        }

        if !record.admits(&op.sender, op.lock_token) {
            log::debug!(target: "entity_core::executor", "{} backlogged on {} (locked)", op.op_name, record.id);
            enqueue_backlog(
                record,
                BacklogEntry {
                    sender: op.sender.clone(),
                    op_name: op.op_name.clone(),
                    input: op.input.clone(),
                    reply_to: op.reply_to.clone(),
                    request_id: op.request_id.clone(),
                },
            );
            return Ok(());
        }

        self.dispatch_and_commit_one(record, &op.sender, &op.op_name, op.input.clone(), op.reply_to.clone(), op.request_id.clone(), registry, outbound).await
    }

    async fn apply_backlog_entry(
        &self,
        record: &mut EntityRecord,
        entry: BacklogEntry,
        registry: &OperationRegistry,
        outbound: &mut Vec<OutboundMessage>,
    ) -> Result<(), EntityCoreError> {
        self.dispatch_and_commit_one(record, &entry.sender, &entry.op_name, entry.input, entry.reply_to, entry.request_id, registry, outbound).await
    }

    /// The per-operation sub-transaction: snapshot,
    /// dispatch, and on failure roll back to the snapshot. Exactly one
    /// operation's state is ever at risk at a time.
    async fn dispatch_and_commit_one(
        &self,
        record: &mut EntityRecord,
        sender: &str,
        op_name: &str,
        input: Vec<u8>,
        reply_to: Option<String>,
        request_id: Option<String>,
        registry: &OperationRegistry,
        outbound: &mut Vec<OutboundMessage>,
    ) -> Result<(), EntityCoreError> {
        let state_pre_op = record.state.clone();
        let descriptor = OperationDescriptor { name: op_name.to_string(), id: record.id.clone(), request_id: request_id.clone() };

        match registry.dispatch(descriptor, record.state.take(), input).await {
            Ok(HandlerOutput { new_state, response, outbound_signals }) => {
                record.state = new_state;
                log::debug!(target: "entity_core::executor", "{sender}.{op_name} applied on {}", record.id);
                if let Some(reply_to) = reply_to {
                    outbound.push(OutboundMessage::CallResponse { reply_to, request_id, result: CallResult::Ok(response.unwrap_or_default()) });
                }
                for (sender, target, signal_op, bytes) in outbound_signals {
                    outbound.push(OutboundMessage::Signal {
                        sender: sender.to_canonical_string(),
                        target_id: target.to_canonical_string(),
                        op_name: signal_op,
                        input: bytes,
                    });
                }
            }
            Err(outcome) => {
                record.state = state_pre_op;
                let (error_message, stack) = match outcome {
                    DispatchOutcome::Handler(HandlerError { message, stack, .. }) => (message, stack),
                    DispatchOutcome::Dispatch(dispatch_err) => (dispatch_err.to_string(), None),
                };
                log::warn!(target: "entity_core::executor", "{sender}.{op_name} failed on {}, rolled back: {error_message}", record.id);
                if let Some(reply_to) = reply_to {
                    outbound.push(OutboundMessage::CallResponse { reply_to, request_id, result: CallResult::Failed { error_message, stack } });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::OperationRegistry;
    use crate::store::InMemoryStore;

    fn id() -> InstanceId {
        InstanceId::new("counter", "k1").unwrap()
    }

    fn counter_registry() -> OperationRegistry {
        OperationRegistry::new()
            .on_ctx_input("set", |ctx, input| {
                ctx.set_state(&String::from_utf8_lossy(input).to_string())
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                Ok(None)
            })
            .unwrap()
            .on_ctx("get", |ctx| Ok(ctx.get_state::<String>().unwrap_or_default().map(|s| s.into_bytes())))
            .unwrap()
    }

    #[tokio::test]
    async fn signal_then_call_observes_the_new_state() {
        let store = Arc::new(InMemoryStore::new());
        let executor = BatchExecutor::new(store);
        let registry = counter_registry();

        let set = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "set".into(),
            input: b"33".to_vec(),
            sender: "client".into(),
            reply_to: None,
            request_id: None,
            scheduled_time: None,
            lock_token: None,
        });
        let get = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "get".into(),
            input: vec![],
            sender: "client".into(),
            reply_to: Some("reply-1".into()),
            request_id: None,
            scheduled_time: None,
            lock_token: None,
        });

        let batch = Batch { items: vec![set, get] };
        let report = executor.execute(&id(), &registry, batch).await.unwrap();

        assert_eq!(report.outbound.len(), 1);
        match &report.outbound[0] {
            OutboundMessage::CallResponse { result: CallResult::Ok(bytes), .. } => assert_eq!(bytes, b"33"),
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unlocked_other_sender_is_backlogged_not_applied() {
        let store = Arc::new(InMemoryStore::new());
        let executor = BatchExecutor::new(store.clone());
        let registry = counter_registry();

        let lock = BatchItem::LockRequest(LockRequestMessage {
            orchestration_id: "orch-1".into(),
            ordered_targets: vec![id().to_canonical_string()],
            critical_section_token: uuid::Uuid::new_v4(),
        });
        executor.execute(&id(), &registry, Batch { items: vec![lock] }).await.unwrap();

        let foreign_set = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "set".into(),
            input: b"99".to_vec(),
            sender: "orch-2".into(),
            reply_to: None,
            request_id: None,
            scheduled_time: None,
            lock_token: None,
        });
        executor.execute(&id(), &registry, Batch { items: vec![foreign_set] }).await.unwrap();

        let record = store.load(&id()).await.unwrap().unwrap();
        assert_eq!(record.backlog.len(), 1);
        assert!(record.state.is_none());
    }

    #[tokio::test]
    async fn failed_operation_rolls_back_but_later_ops_in_the_batch_still_run() {
        let store = Arc::new(InMemoryStore::new());
        let executor = BatchExecutor::new(store.clone());
        let registry = counter_registry();

        let set_ok = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "set".into(),
            input: b"42".to_vec(),
            sender: "client".into(),
            reply_to: None,
            request_id: None,
            scheduled_time: None,
            lock_token: None,
        });
        let unknown_op = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "frobnicate".into(),
            input: vec![],
            sender: "client".into(),
            reply_to: Some("reply-1".into()),
            request_id: None,
            scheduled_time: None,
            lock_token: None,
        });

        executor.execute(&id(), &registry, Batch { items: vec![set_ok, unknown_op] }).await.unwrap();

        let record = store.load(&id()).await.unwrap().unwrap();
        assert_eq!(record.state, Some(br#""42""#.to_vec()));
    }

    #[tokio::test]
    async fn future_scheduled_time_holds_the_operation_back() {
        let store = Arc::new(InMemoryStore::new());
        let executor = BatchExecutor::new(store.clone());
        let registry = counter_registry();

        let deferred = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "set".into(),
            input: b"5".to_vec(),
            sender: "client".into(),
            reply_to: None,
            request_id: None,
            scheduled_time: Some(Utc::now() + chrono::Duration::hours(1)),
            lock_token: None,
        });
        executor.execute(&id(), &registry, Batch { items: vec![deferred] }).await.unwrap();

        let record = store.load(&id()).await.unwrap().unwrap();
        assert!(record.state.is_none());
        assert_eq!(record.scheduled.len(), 1);
    }

    #[tokio::test]
    async fn matured_scheduled_operation_is_flushed_on_the_next_activation() {
        let store = Arc::new(InMemoryStore::new());
        let executor = BatchExecutor::new(store.clone());
        let registry = counter_registry();

        let deferred = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "set".into(),
            input: b"5".to_vec(),
            sender: "client".into(),
            reply_to: None,
            request_id: None,
            scheduled_time: Some(Utc::now() - chrono::Duration::seconds(1)),
            lock_token: None,
        });
        executor.execute(&id(), &registry, Batch { items: vec![deferred] }).await.unwrap();
        executor.execute(&id(), &registry, Batch { items: vec![] }).await.unwrap();

        let record = store.load(&id()).await.unwrap().unwrap();
        assert_eq!(record.state, Some(br#""5""#.to_vec()));
        assert!(record.scheduled.is_empty());
    }

    #[tokio::test]
    async fn matured_scheduled_operation_against_a_locked_entity_is_backlogged() {
        let store = Arc::new(InMemoryStore::new());
        let executor = BatchExecutor::new(store.clone());
        let registry = counter_registry();

        let lock = BatchItem::LockRequest(LockRequestMessage {
            orchestration_id: "orch-1".into(),
            ordered_targets: vec![id().to_canonical_string()],
            critical_section_token: uuid::Uuid::new_v4(),
        });
        executor.execute(&id(), &registry, Batch { items: vec![lock] }).await.unwrap();

        let deferred = BatchItem::Operation(OperationMessage {
            target_id: id().to_canonical_string(),
            op_name: "set".into(),
            input: b"5".to_vec(),
            sender: "orch-2".into(),
            reply_to: None,
            request_id: None,
            scheduled_time: Some(Utc::now() - chrono::Duration::seconds(1)),
            lock_token: None,
        });
        executor.execute(&id(), &registry, Batch { items: vec![deferred] }).await.unwrap();
        executor.execute(&id(), &registry, Batch { items: vec![] }).await.unwrap();

        let record = store.load(&id()).await.unwrap().unwrap();
        assert!(record.scheduled.is_empty());
        assert_eq!(record.backlog.len(), 1);
        assert!(record.state.is_none());
    }
}
