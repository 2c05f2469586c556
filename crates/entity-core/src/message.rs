//! Wire-level message shapes the Batch Executor consumes.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One operation addressed to an entity instance.
///
/// `reply_to` distinguishes *call* (`Some`, expects a response) from
/// *signal* (`None`, fire-and-forget). `scheduled_time` defers delivery
/// until that instant; the executor must not apply the operation earlier
/// in logical delivery order, though wall-clock early arrival is allowed.
#[derive(Debug, Clone)]
pub struct OperationMessage {
    pub target_id: String,
    pub op_name: String,
    pub input: Vec<u8>,
    pub sender: String,
    pub reply_to: Option<String>,
    pub request_id: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub lock_token: Option<Uuid>,
}

impl OperationMessage {
    pub fn is_call(&self) -> bool {
        self.reply_to.is_some()
    }

    pub fn is_signal(&self) -> bool {
        self.reply_to.is_none()
    }

    /// Whether delivery should be held back because `scheduled_time` has
    /// not yet arrived at logical time `now`.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_time.map(|t| t > now).unwrap_or(false)
    }
}

/// A lock-acquisition request carrying the caller's full, sorted target
/// set. Every targeted entity sees the same
/// `ordered_targets` so it can independently verify the caller acquired
/// in the mandated order.
#[derive(Debug, Clone)]
pub struct LockRequestMessage {
    pub orchestration_id: String,
    pub ordered_targets: Vec<String>,
    pub critical_section_token: Uuid,
}

/// A release for one previously-granted lock, sent per held entity.
#[derive(Debug, Clone)]
pub struct LockReleaseMessage {
    pub orchestration_id: String,
    pub target_id: String,
    pub critical_section_token: Uuid,
}

/// A single item in a batch: either a plain operation or a lock-protocol
/// message. Lock messages are a subclass of entity messages with special
/// ordering semantics.
#[derive(Debug, Clone)]
pub enum BatchItem {
    Operation(OperationMessage),
    LockRequest(LockRequestMessage),
    LockRelease(LockReleaseMessage),
}

/// Outbound side-effects the Batch Executor produces alongside the new
/// record: signals, orchestration starts, lock grants.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// A response to a `call`, successful or failed.
    CallResponse { reply_to: String, request_id: Option<String>, result: CallResult },
    /// A granted lock, sent back to the requesting orchestration.
    LockGranted { orchestration_id: String, target_id: String, critical_section_token: Uuid },
    /// A signal fanned out to another entity from inside a handler,
    /// published atomically with the sending entity's own commit so it
    /// cannot be observed without the state change that produced it.
    /// `sender` is the originating entity's id, not the target's.
    Signal { sender: String, target_id: String, op_name: String, input: Vec<u8> },
}

/// The result carried back to a `call` originator.
#[derive(Debug, Clone)]
pub enum CallResult {
    Ok(Vec<u8>),
    Failed { error_message: String, stack: Option<String> },
}
