//! The caller-facing lock scope: a typed handle over the held entity ids whose `Drop` impl is
//! the backstop that guarantees forcible release on every exit path.

use std::sync::Arc;

use uuid::Uuid;

use crate::instance_id::InstanceId;

/// Where a [`CriticalSectionScope`] sends its releases. The Runtime
/// implements this over its inbound batch queue; `enqueue_release` must
/// not block or fail — it only has to guarantee eventual delivery, since
/// `Drop` cannot run async code.
pub trait LockReleaseSink: Send + Sync {
    fn enqueue_release(&self, orchestration_id: &str, target_id: &InstanceId, critical_section_token: Uuid);
}

/// A held critical section over one or more entities. `release()` is the
/// normal-path call; `Drop` synthesizes the same releases if the scope is
/// dropped without one (panic, early return, cancellation) — this is how
/// the forcible-release guarantee holds without every caller remembering
/// to release explicitly.
pub struct CriticalSectionScope<S: LockReleaseSink> {
    orchestration_id: String,
    critical_section_token: Uuid,
    held: Vec<InstanceId>,
    sink: Arc<S>,
    released: bool,
}

impl<S: LockReleaseSink> CriticalSectionScope<S> {
    pub fn new(orchestration_id: String, critical_section_token: Uuid, held: Vec<InstanceId>, sink: Arc<S>) -> Self {
        Self { orchestration_id, critical_section_token, held, sink, released: false }
    }

    pub fn held_ids(&self) -> &[InstanceId] {
        &self.held
    }

    pub fn critical_section_token(&self) -> Uuid {
        self.critical_section_token
    }

    /// Normal-path release. Idempotent — a second call, or a later
    /// `Drop`, is a no-op.
    pub fn release(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        if self.released {
            return;
        }
        for id in &self.held {
            self.sink.enqueue_release(&self.orchestration_id, id, self.critical_section_token);
        }
        self.released = true;
    }
}

impl<S: LockReleaseSink> Drop for CriticalSectionScope<S> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        releases: Mutex<Vec<(String, String, Uuid)>>,
    }

    impl LockReleaseSink for RecordingSink {
        fn enqueue_release(&self, orchestration_id: &str, target_id: &InstanceId, critical_section_token: Uuid) {
            self.releases.lock().unwrap().push((orchestration_id.to_string(), target_id.to_canonical_string(), critical_section_token));
        }
    }

    fn id(key: &str) -> InstanceId {
        InstanceId::new("counter", key).unwrap()
    }

    #[test]
    fn explicit_release_enqueues_one_release_per_held_id() {
        let sink = Arc::new(RecordingSink::default());
        let token = Uuid::new_v4();
        let scope = CriticalSectionScope::new("orch-1".into(), token, vec![id("a"), id("b")], sink.clone());
        scope.release();
        assert_eq!(sink.releases.lock().unwrap().len(), 2);
    }

    #[test]
    fn drop_without_explicit_release_still_releases() {
        let sink = Arc::new(RecordingSink::default());
        let token = Uuid::new_v4();
        {
            let _scope = CriticalSectionScope::new("orch-1".into(), token, vec![id("a")], sink.clone());
        }
        assert_eq!(sink.releases.lock().unwrap().len(), 1);
    }

    #[test]
    fn release_then_drop_does_not_double_release() {
        let sink = Arc::new(RecordingSink::default());
        let token = Uuid::new_v4();
        let scope = CriticalSectionScope::new("orch-1".into(), token, vec![id("a")], sink.clone());
        scope.release();
        assert_eq!(sink.releases.lock().unwrap().len(), 1, "release() already ran Drop's work via release_all");
    }
}
