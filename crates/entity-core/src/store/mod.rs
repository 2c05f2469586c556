//! The Entity State Store Adapter: the only component
//! allowed to talk to the durable store. Every other component in this
//! crate operates on in-memory [`crate::record::EntityRecord`] values.

mod filter;
mod memory;

pub use filter::{Page, QueryFilter};
pub use memory::InMemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{error::StoreError, instance_id::InstanceId, message::OutboundMessage, record::EntityRecord};

/// Either a full record replacement or an explicit deletion, passed to
/// `CommitBatch`.
#[derive(Debug, Clone)]
pub enum CommitWrite {
    Upsert(EntityRecord),
    Delete,
}

/// A caller-supplied oracle the second `Clean()` sweep consults to decide
/// whether a lock holder is terminal-and-not-running. This
/// is the store adapter's only dependency on the replay engine, which is
/// otherwise out of scope.
pub trait OrchestrationStatusOracle: Send + Sync {
    /// `true` if `orchestration_id` has reached a terminal state other
    /// than `Running` (completed, failed, terminated) and therefore can
    /// never itself release a lock it still appears to hold.
    fn is_terminal_and_not_running(&self, orchestration_id: &str) -> bool;
}

/// The outcome of a `Clean()` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanReport {
    pub empty_entities_removed: u64,
    pub orphaned_locks_released: u64,
}

/// The interface the Batch Executor and Query/Cleanup components consume.
///
/// Implementers provide the only access path to a durable backend;
/// `expected_version` ties the record update to the outbound publish in a
/// single atomic commit, giving the "atomic commit" and "single-writer"
/// invariants their enforcement point.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Whether this backend deletes `state`-absent records as part of
    /// `CommitBatch` itself, making the first `Clean()` sweep a no-op.
    /// Discoverable so callers — and the test suite — can branch on
    /// backend capability rather than guess from observed counts.
    const SUPPORTS_IMPLICIT_DELETION: bool;

    /// Point read. Returns `Ok(None)` if the id has never been written
    /// (equivalent to an `EntityRecord` with `state: None` and no lock or
    /// backlog — not persisted at all, as opposed to a transient record).
    async fn load(&self, id: &InstanceId) -> Result<Option<EntityRecord>, StoreError>;

    /// Conditionally apply `write`, tying the record mutation to the
    /// publication of `outbound` in one atomic step. Fails with
    /// [`StoreError::Conflict`] if `expected_version` no longer matches —
    /// the whole batch must then be replanned.
    async fn commit_batch(
        &self,
        id: &InstanceId,
        expected_version: u64,
        write: CommitWrite,
        outbound: Vec<OutboundMessage>,
    ) -> Result<(), StoreError>;

    /// Stream matching records for `filter`, at most
    /// `filter.page_size` at a time.
    fn query<'a>(&'a self, filter: QueryFilter) -> BoxStream<'a, Result<EntityRecord, StoreError>>;

    /// One page of `query`, honoring `filter.continuation_token` if set.
    async fn query_page(&self, filter: QueryFilter) -> Result<Page, StoreError>;

    /// Remove empty entities and release orphaned locks.
    /// `oracle` resolves whether a lock holder is terminal-and-not-running.
    async fn clean(&self, oracle: &dyn OrchestrationStatusOracle) -> Result<CleanReport, StoreError>;
}
