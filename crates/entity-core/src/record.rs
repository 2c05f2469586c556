//! The persisted shape of a single entity.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::instance_id::InstanceId;

/// A pending lock request, queued behind the current holder.
///
/// Ordered FIFO by arrival — `pending_lock_queue` pops its head on
/// release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLockRequest {
    pub orchestration_id: String,
    pub critical_section_token: Uuid,
}

/// An operation deferred because the entity was locked by someone else
/// when it arrived.
#[derive(Debug, Clone)]
pub struct BacklogEntry {
    pub sender: String,
    pub op_name: String,
    pub input: Vec<u8>,
    pub reply_to: Option<String>,
    pub request_id: Option<String>,
}

/// An operation held back because its `scheduled_time` had not yet
/// arrived. Reassessed against the lock only once it matures — a
/// schedule delay is independent of, and resolved before, lock
/// admission.
#[derive(Debug, Clone)]
pub struct ScheduledEntry {
    pub sender: String,
    pub op_name: String,
    pub input: Vec<u8>,
    pub reply_to: Option<String>,
    pub request_id: Option<String>,
    pub lock_token: Option<Uuid>,
    pub scheduled_time: DateTime<Utc>,
}

/// The full, atomically-committed record for one entity.
///
/// `state: None` means "does not exist". A record whose
/// `state` is `None` but which has a lock holder or non-empty backlog is
/// *transient*: it exists only as a side effect of lock bookkeeping, see
/// [`EntityRecord::is_transient`].
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub id: InstanceId,
    pub state: Option<Vec<u8>>,
    pub locked_by: Option<LockHolder>,
    pub backlog: VecDeque<BacklogEntry>,
    pub pending_lock_queue: VecDeque<PendingLockRequest>,
    pub scheduled: VecDeque<ScheduledEntry>,
    pub last_modified: DateTime<Utc>,
    /// Monotonic version used as the CAS token in `CommitBatch`. Not part
    /// of the abstract entity data model, but required by any concrete
    /// `StoreAdapter`.
    pub version: u64,
}

/// The orchestration currently holding this entity's critical section,
/// plus the token it must present on subsequent calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub orchestration_id: String,
    pub critical_section_token: Uuid,
}

impl EntityRecord {
    /// A brand-new, empty record for `id` — used the first time any
    /// message targets an id the store has never seen.
    pub fn new_empty(id: InstanceId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: None,
            locked_by: None,
            backlog: VecDeque::new(),
            pending_lock_queue: VecDeque::new(),
            scheduled: VecDeque::new(),
            last_modified: now,
            version: 0,
        }
    }

    /// `state` absent ∧ (`locked_by` present ∨ `backlog` non-empty ∨
    /// `scheduled` non-empty).
    pub fn is_transient(&self) -> bool {
        self.state.is_none() && (self.locked_by.is_some() || !self.backlog.is_empty() || !self.scheduled.is_empty())
    }

    /// An "empty entity" eligible for `Clean()`'s first sweep: `state`
    /// absent, no lock, empty backlog, nothing scheduled. Note a
    /// transient entity with a lock, backlog, or scheduled entry is
    /// *not* empty — only a fully-idle absent record qualifies for
    /// removal.
    pub fn is_empty_entity(&self) -> bool {
        self.state.is_none() && self.locked_by.is_none() && self.backlog.is_empty() && self.scheduled.is_empty()
    }

    /// Whether `sender` holding `token` may run an operation against this
    /// entity right now.
    pub fn admits(&self, sender: &str, token: Option<Uuid>) -> bool {
        match &self.locked_by {
            None => true,
            Some(holder) => {
                holder.orchestration_id == sender && Some(holder.critical_section_token) == token
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(key: &str) -> InstanceId {
        InstanceId::new("counter", key).unwrap()
    }

    #[test]
    fn fresh_record_is_not_transient() {
        let record = EntityRecord::new_empty(id("k1"), Utc::now());
        assert!(!record.is_transient());
        assert!(record.is_empty_entity());
    }

    #[test]
    fn scheduled_with_no_state_is_transient_not_empty() {
        let mut record = EntityRecord::new_empty(id("k1"), Utc::now());
        record.scheduled.push_back(ScheduledEntry {
            sender: "orch-1".into(),
            op_name: "add".into(),
            input: vec![],
            reply_to: None,
            request_id: None,
            lock_token: None,
            scheduled_time: Utc::now(),
        });
        assert!(record.is_transient());
        assert!(!record.is_empty_entity());
    }

    #[test]
    fn locked_with_no_state_is_transient_not_empty() {
        let mut record = EntityRecord::new_empty(id("k1"), Utc::now());
        record.locked_by = Some(LockHolder {
            orchestration_id: "orch-1".into(),
            critical_section_token: Uuid::nil(),
        });
        assert!(record.is_transient());
        assert!(!record.is_empty_entity());
    }

    #[test]
    fn admits_only_matching_holder_and_token() {
        let mut record = EntityRecord::new_empty(id("k1"), Utc::now());
        let token = Uuid::new_v4();
        record.locked_by = Some(LockHolder { orchestration_id: "orch-1".into(), critical_section_token: token });

        assert!(record.admits("orch-1", Some(token)));
        assert!(!record.admits("orch-1", Some(Uuid::new_v4())));
        assert!(!record.admits("orch-2", Some(token)));
        assert!(!record.admits("orch-1", None));
    }

    #[test]
    fn unlocked_admits_everyone() {
        let record = EntityRecord::new_empty(id("k1"), Utc::now());
        assert!(record.admits("anyone", None));
    }
}
