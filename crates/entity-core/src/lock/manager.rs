//! Critical-section mechanics over a single [`EntityRecord`]: acquisition,
//! release, forcible/offline release, and backlog routing while locked.
//! The record itself is the lock's only storage — there is no separate
//! in-process lock table to keep in sync with it.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::error::LockProtocolViolation;
use crate::record::{BacklogEntry, EntityRecord, LockHolder, PendingLockRequest};

/// Outcome of presenting a lock request to one entity.
#[derive(Debug, Clone)]
pub enum LockAcquisition {
    /// Granted immediately. Any of the new holder's own messages that had
    /// queued in `backlog` while this entity was held by someone else are
    /// now eligible and returned for redelivery ahead of the rest of the
    /// current batch.
    Granted { critical_section_token: Uuid, released_backlog: Vec<BacklogEntry> },
    /// Already held by someone else; queued behind them.
    Queued,
}

/// Present a lock request to `record`.
pub fn request_lock(record: &mut EntityRecord, orchestration_id: &str, critical_section_token: Uuid) -> LockAcquisition {
    if record.locked_by.is_some() {
        record
            .pending_lock_queue
            .push_back(PendingLockRequest { orchestration_id: orchestration_id.to_string(), critical_section_token });
        return LockAcquisition::Queued;
    }

    record.locked_by = Some(LockHolder { orchestration_id: orchestration_id.to_string(), critical_section_token });
    let released_backlog = drain_backlog_for(record, orchestration_id);
    LockAcquisition::Granted { critical_section_token, released_backlog }
}

/// Release a held lock. Returns the next waiter
/// to grant to, if any — the caller re-presents it through
/// [`request_lock`], which is what actually moves the queue forward.
pub fn release_lock(
    record: &mut EntityRecord,
    orchestration_id: &str,
    critical_section_token: Uuid,
) -> Result<Option<PendingLockRequest>, LockProtocolViolation> {
    let entity_id = record.id.to_canonical_string();
    match &record.locked_by {
        None => Err(LockProtocolViolation::ReleaseWithoutHold { entity_id }),
        Some(holder) if holder.orchestration_id != orchestration_id || holder.critical_section_token != critical_section_token => {
            Err(LockProtocolViolation::TokenMismatch { entity_id, token: critical_section_token.to_string() })
        }
        Some(_) => {
            record.locked_by = None;
            Ok(record.pending_lock_queue.pop_front())
        }
    }
}

/// Offline forcible release (used by `Clean()`'s second sweep): clears
/// `locked_by` and *drains* — rather than forward-grants — the
/// pending queue, since there is no live runtime here to redeliver a
/// grant to the next waiter. Returns whether a lock was actually held.
pub fn forcible_release_offline(record: &mut EntityRecord) -> bool {
    if record.locked_by.is_none() {
        return false;
    }
    record.locked_by = None;
    record.pending_lock_queue.clear();
    true
}

/// Append a deferred operation to `backlog`.
pub fn enqueue_backlog(record: &mut EntityRecord, entry: BacklogEntry) {
    record.backlog.push_back(entry);
}

fn drain_backlog_for(record: &mut EntityRecord, orchestration_id: &str) -> Vec<BacklogEntry> {
    let (matching, remaining): (VecDeque<BacklogEntry>, VecDeque<BacklogEntry>) =
        std::mem::take(&mut record.backlog).into_iter().partition(|entry| entry.sender == orchestration_id);
    record.backlog = remaining;
    matching.into_iter().collect()
}
