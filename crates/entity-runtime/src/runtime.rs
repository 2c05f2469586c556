//! The Runtime: the in-process half of the scheduler. Wires a [`StoreAdapter`], one
//! [`OperationRegistry`] per entity type, and a [`BatchExecutor`] into
//! the orchestration-facing (`call_entity`/`signal_entity`/
//! `lock_entities`) and client-facing (exposed through
//! [`entity_core::EntityQueryService`] directly, see `entity-client`)
//! surfaces.
//!
//! Submissions targeting the same id are coalesced: a submission arriving
//! while that id already has a batch in flight joins the *next* batch
//! rather than blocking on a dedicated per-id task, so idle entities cost
//! nothing and a burst of signals to one entity collapses into as few
//! executor activations as the timing allows.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

use entity_core::dispatch::OperationRegistry;
use entity_core::executor::{Batch, BatchExecutor};
use entity_core::instance_id::InstanceId;
use entity_core::lock::{sort_targets, verify_sorted, CriticalSectionScope, LockReleaseSink};
use entity_core::message::{BatchItem, CallResult, LockReleaseMessage, LockRequestMessage, OperationMessage, OutboundMessage};
use entity_core::store::{QueryFilter, StoreAdapter};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;

/// Tracks one in-flight [`Runtime::lock_entities`] call: which targets
/// still owe a grant, and how to wake the waiting caller once none do.
struct LockWaiter {
    remaining: HashSet<String>,
    notify: Option<oneshot::Sender<()>>,
}

struct RuntimeInner<S: StoreAdapter + 'static> {
    config: RuntimeConfig,
    store: Arc<S>,
    executor: BatchExecutor<S>,
    registries: HashMap<String, OperationRegistry>,
    empty_registry: OperationRegistry,
    gates: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    pending: AsyncMutex<HashMap<String, Vec<BatchItem>>>,
    call_waiters: AsyncMutex<HashMap<String, oneshot::Sender<CallResult>>>,
    lock_waiters: AsyncMutex<HashMap<Uuid, LockWaiter>>,
}

/// A cheaply-cloneable handle to the scheduler. Every clone shares the
/// same pending queues, gates, and waiter tables.
pub struct Runtime<S: StoreAdapter + 'static> {
    inner: Arc<RuntimeInner<S>>,
}

impl<S: StoreAdapter + 'static> Clone for Runtime<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S: StoreAdapter + 'static> Runtime<S> {
    /// Build a runtime over `store`, with one [`OperationRegistry`] per
    /// entity type keyed by its case-folded name. An id whose name has no
    /// registered registry dispatches against an empty one — every
    /// operation but the implicit `delete` becomes `NoHandler`.
    pub fn new(store: Arc<S>, registries: HashMap<String, OperationRegistry>, config: RuntimeConfig) -> Self {
        let executor = BatchExecutor::new(store.clone());
        let inner = RuntimeInner {
            config,
            store,
            executor,
            registries,
            empty_registry: OperationRegistry::new(),
            gates: AsyncMutex::new(HashMap::new()),
            pending: AsyncMutex::new(HashMap::new()),
            call_waiters: AsyncMutex::new(HashMap::new()),
            lock_waiters: AsyncMutex::new(HashMap::new()),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn store(&self) -> Arc<S> {
        self.inner.store.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Spawn the background cleanup sweep, if `cleanup_sweep_interval`
    /// is set. A no-op (returns without spawning) when the config
    /// disables it.
    pub fn spawn_cleanup_sweep(&self, oracle: Arc<dyn entity_core::store::OrchestrationStatusOracle>) {
        let Some(interval) = self.inner.config.cleanup_sweep_interval else {
            return;
        };
        let store = self.inner.store.clone();
        let runtime = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match store.clean(oracle.as_ref()).await {
                    Ok(report) => log::info!(
                        target: "entity_runtime::cleanup",
                        "cleanup sweep: {} empty entities removed, {} orphaned locks released",
                        report.empty_entities_removed,
                        report.orphaned_locks_released
                    ),
                    Err(e) => log::error!(target: "entity_runtime::cleanup", "cleanup sweep failed: {e}"),
                }
                runtime.deliver_due_scheduled_signals().await;
            }
        });
    }

    /// Wake every entity carrying a matured `scheduled` entry but no
    /// freshly-arrived operation to piggyback the flush on. Without this,
    /// a deferred signal to an otherwise-quiet entity would sit in
    /// `EntityRecord::scheduled` forever, since [`Self::submit`] only runs
    /// the executor when something new arrives.
    async fn deliver_due_scheduled_signals(&self) {
        let now: DateTime<Utc> = Utc::now();
        let filter = QueryFilter { include_transient: true, include_state: false, ..Default::default() };
        let mut page = filter.clone();
        loop {
            let result = match self.inner.store.query_page(page.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    log::error!(target: "entity_runtime::cleanup", "scheduled-sweep query failed: {e}");
                    return;
                }
            };
            for record in &result.records {
                if record.scheduled.iter().any(|entry| entry.scheduled_time <= now) {
                    self.poke(&record.id).await;
                }
            }
            match result.continuation_token {
                Some(token) => page.continuation_token = Some(token),
                None => break,
            }
        }
    }

    /// Force one executor activation over `id` even if no new item is
    /// pending, so a record whose only work is a matured `scheduled`
    /// entry still gets flushed.
    async fn poke(&self, id: &InstanceId) {
        let registry = self.inner.registries.get(id.name()).unwrap_or(&self.inner.empty_registry);
        match self.inner.executor.execute(id, registry, Batch { items: Vec::new() }).await {
            Ok(report) => self.route_outbound(report.outbound).await,
            Err(e) => log::error!(target: "entity_runtime::cleanup", "poke failed for {id}: {e}"),
        }
    }

    /// Submit a call and await its response. Resolves once the owning batch commits. `lock_token`
    /// must be `Some(scope.critical_section_token())` when `sender` is
    /// calling an entity it currently holds locked — an unlocked entity
    /// admits any caller regardless of `lock_token`.
    pub async fn call_entity(
        &self,
        id: &InstanceId,
        sender: &str,
        op_name: &str,
        input: Vec<u8>,
        lock_token: Option<Uuid>,
    ) -> Result<CallResult, RuntimeError> {
        let reply_to = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.call_waiters.lock().await.insert(reply_to.clone(), tx);

        let item = BatchItem::Operation(OperationMessage {
            target_id: id.to_canonical_string(),
            op_name: op_name.to_string(),
            input,
            sender: sender.to_string(),
            reply_to: Some(reply_to.clone()),
            request_id: None,
            scheduled_time: None,
            lock_token,
        });
        self.submit(id, item).await?;

        rx.await.map_err(|_| RuntimeError::ResponseChannelClosed { instance_id: id.to_canonical_string() })
    }

    /// Fire-and-forget signal delivery. See [`Self::call_entity`]
    /// for `lock_token`'s role.
    pub async fn signal_entity(&self, id: &InstanceId, sender: &str, op_name: &str, input: Vec<u8>, lock_token: Option<Uuid>) -> Result<(), RuntimeError> {
        let item = BatchItem::Operation(OperationMessage {
            target_id: id.to_canonical_string(),
            op_name: op_name.to_string(),
            input,
            sender: sender.to_string(),
            reply_to: None,
            request_id: None,
            scheduled_time: None,
            lock_token,
        });
        self.submit(id, item).await
    }

    /// Fire-and-forget signal delivery, held back until `scheduled_time`.
    /// See [`Self::call_entity`] for `lock_token`'s role.
    pub async fn signal_entity_scheduled(
        &self,
        id: &InstanceId,
        sender: &str,
        op_name: &str,
        input: Vec<u8>,
        lock_token: Option<Uuid>,
        scheduled_time: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        let item = BatchItem::Operation(OperationMessage {
            target_id: id.to_canonical_string(),
            op_name: op_name.to_string(),
            input,
            sender: sender.to_string(),
            reply_to: None,
            request_id: None,
            scheduled_time: Some(scheduled_time),
            lock_token,
        });
        self.submit(id, item).await
    }

    /// Acquire a critical section over `ids`. Requests are
    /// dispatched in the mandated sorted order; the returned scope
    /// resolves only once every targeted entity has granted.
    pub async fn lock_entities(&self, orchestration_id: &str, ids: Vec<InstanceId>) -> Result<CriticalSectionScope<Self>, RuntimeError> {
        let sorted = sort_targets(ids);
        verify_sorted(&sorted)?;

        let token = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let remaining: HashSet<String> = sorted.iter().map(InstanceId::to_canonical_string).collect();
        self.inner.lock_waiters.lock().await.insert(token, LockWaiter { remaining, notify: Some(tx) });

        let ordered_targets: Vec<String> = sorted.iter().map(InstanceId::to_canonical_string).collect();
        for target in &sorted {
            let item = BatchItem::LockRequest(LockRequestMessage {
                orchestration_id: orchestration_id.to_string(),
                ordered_targets: ordered_targets.clone(),
                critical_section_token: token,
            });
            self.submit(target, item).await?;
        }

        rx.await.map_err(|_| RuntimeError::ResponseChannelClosed { instance_id: orchestration_id.to_string() })?;

        Ok(CriticalSectionScope::new(orchestration_id.to_string(), token, sorted, Arc::new(self.clone())))
    }

    /// Enqueue `item` for `id` and, if no other submission is already
    /// draining `id`'s pending queue, run one executor activation over
    /// everything that accumulated.
    async fn submit(&self, id: &InstanceId, item: BatchItem) -> Result<(), RuntimeError> {
        let canonical = id.to_canonical_string();
        self.inner.pending.lock().await.entry(canonical.clone()).or_default().push(item);

        let gate = {
            let mut gates = self.inner.gates.lock().await;
            gates.entry(canonical.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        let _permit = gate.lock().await;

        let items = {
            let mut pending = self.inner.pending.lock().await;
            pending.remove(&canonical).unwrap_or_default()
        };
        if items.is_empty() {
            // Another submission already drained this id's queue while we
            // waited on the gate.
            return Ok(());
        }

        let registry = self.inner.registries.get(id.name()).unwrap_or(&self.inner.empty_registry);
        log::debug!(target: "entity_runtime", "activating batch executor for {id} ({} items)", items.len());
        let report = self.inner.executor.execute(id, registry, Batch { items }).await?;
        self.route_outbound(report.outbound).await;
        Ok(())
    }

    fn route_outbound<'a>(&'a self, outbound: Vec<OutboundMessage>) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        for message in outbound {
            match message {
                OutboundMessage::CallResponse { reply_to, result, .. } => {
                    if let Some(tx) = self.inner.call_waiters.lock().await.remove(&reply_to) {
                        let _ = tx.send(result);
                    }
                }
                OutboundMessage::LockGranted { target_id, critical_section_token, orchestration_id } => {
                    log::debug!(target: "entity_runtime", "{orchestration_id} granted {target_id}");
                    let mut waiters = self.inner.lock_waiters.lock().await;
                    if let Some(waiter) = waiters.get_mut(&critical_section_token) {
                        waiter.remaining.remove(&target_id);
                        if waiter.remaining.is_empty() {
                            if let Some(notify) = waiter.notify.take() {
                                let _ = notify.send(());
                            }
                        }
                    }
                }
                OutboundMessage::Signal { sender, target_id, op_name, input } => {
                    let runtime = self.clone();
                    tokio::spawn(async move {
                        match InstanceId::parse(&target_id) {
                            Ok(id) => {
                                if let Err(e) = runtime.signal_entity(&id, &sender, &op_name, input, None).await {
                                    log::error!(target: "entity_runtime", "failed to deliver fanned-out signal to {target_id}: {e}");
                                }
                            }
                            Err(e) => log::error!(target: "entity_runtime", "handler produced an unparseable signal target {target_id:?}: {e}"),
                        }
                    });
                }
            }
        }
        })
    }
}

impl<S: StoreAdapter + 'static> LockReleaseSink for Runtime<S> {
    /// Releases cannot be awaited from `Drop`, so this spawns the actual
    /// submission rather than blocking. Eventual delivery is all the
    /// contract requires.
    fn enqueue_release(&self, orchestration_id: &str, target_id: &InstanceId, critical_section_token: Uuid) {
        let runtime = self.clone();
        let orchestration_id = orchestration_id.to_string();
        let target_id = target_id.clone();
        tokio::spawn(async move {
            let item = BatchItem::LockRelease(LockReleaseMessage {
                orchestration_id,
                target_id: target_id.to_canonical_string(),
                critical_section_token,
            });
            if let Err(e) = runtime.submit(&target_id, item).await {
                log::error!(target: "entity_runtime", "failed to submit lock release for {target_id}: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_core::dispatch::HandlerError;
    use entity_core::store::InMemoryStore;

    fn counter_id() -> InstanceId {
        InstanceId::new("counter", "k1").unwrap()
    }

    fn registries() -> HashMap<String, OperationRegistry> {
        let registry = OperationRegistry::new()
            .on_ctx_input("set", |ctx, input| {
                ctx.set_state(&String::from_utf8_lossy(input).to_string())
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                Ok(None)
            })
            .unwrap()
            .on_ctx("get", |ctx| Ok(ctx.get_state::<String>().unwrap_or_default().map(|s| s.into_bytes())))
            .unwrap();
        let mut map = HashMap::new();
        map.insert("counter".to_string(), registry);
        map
    }

    #[tokio::test]
    async fn call_entity_round_trips_through_the_scheduler() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Runtime::new(store, registries(), RuntimeConfig::builder().cleanup_sweep_interval(None).build());

        runtime.signal_entity(&counter_id(), "client", "set", b"7".to_vec(), None).await.unwrap();
        let result = runtime.call_entity(&counter_id(), "client", "get", vec![], None).await.unwrap();
        match result {
            CallResult::Ok(bytes) => assert_eq!(String::from_utf8(bytes).unwrap(), "\"7\""),
            CallResult::Failed { error_message, .. } => panic!("unexpected failure: {error_message}"),
        }
    }

    #[tokio::test]
    async fn unknown_entity_type_dispatches_against_an_empty_registry() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Runtime::new(store, HashMap::new(), RuntimeConfig::builder().cleanup_sweep_interval(None).build());

        let id = InstanceId::new("ghost", "k1").unwrap();
        let result = runtime.call_entity(&id, "client", "get", vec![], None).await.unwrap();
        assert!(matches!(result, CallResult::Failed { .. }));
    }

    #[tokio::test]
    async fn lock_entities_resolves_once_granted_and_release_unblocks_the_next_waiter() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Runtime::new(store, registries(), RuntimeConfig::builder().cleanup_sweep_interval(None).build());

        let scope = runtime.lock_entities("orch-1", vec![counter_id()]).await.unwrap();
        assert_eq!(scope.held_ids().to_vec(), vec![counter_id()]);
        scope.release();

        let scope2 = runtime.lock_entities("orch-2", vec![counter_id()]).await.unwrap();
        assert_eq!(scope2.held_ids().to_vec(), vec![counter_id()]);
    }

    #[tokio::test]
    async fn matured_scheduled_signal_is_delivered_without_a_fresh_submission() {
        let store = Arc::new(InMemoryStore::new());
        let runtime = Runtime::new(store.clone(), registries(), RuntimeConfig::builder().cleanup_sweep_interval(None).build());

        runtime
            .signal_entity_scheduled(&counter_id(), "client", "set", b"9".to_vec(), None, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let pre = store.load(&counter_id()).await.unwrap().unwrap();
        assert!(pre.state.is_none());
        assert_eq!(pre.scheduled.len(), 1);

        runtime.deliver_due_scheduled_signals().await;

        let post = store.load(&counter_id()).await.unwrap().unwrap();
        assert_eq!(post.state, Some(br#""9""#.to_vec()));
        assert!(post.scheduled.is_empty());
    }
}
