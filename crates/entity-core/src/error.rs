//! Error taxonomy for the entity core.
//!
//! Handler errors are rolled back and
//! reported on the response (never surfaced as a crate-level error — see
//! [`crate::dispatch::DispatchOutcome`]); everything here is either a
//! programmer error at registration time, a store-level conflict, or an
//! internal protocol violation that must fail fast.

use thiserror::Error;

use crate::instance_id::InstanceIdError;

/// Errors raised while building an [`crate::dispatch::OperationRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// More than one handler matched the same case-folded operation name.
    #[error("operation {op_name:?} already has a registered handler")]
    AmbiguousHandler { op_name: String },

    /// A handler was registered with no way to obtain its input: no bound
    /// input parameter and no declared default.
    #[error("handler for {op_name:?} has no input binding and no default value")]
    InvalidBinding { op_name: String },

    /// No handler matched and the operation was not the implicit `delete`.
    #[error("no handler registered for operation {op_name:?}")]
    NoHandler { op_name: String },
}

/// Internal lock-protocol violations. These are bugs, not
/// recoverable conditions: the batch aborts and the violation is logged at
/// `error` level rather than surfaced to a caller as a typed failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockProtocolViolation {
    #[error("duplicate lock grant to {holder} for entity already locked by {current_holder}")]
    DuplicateGrant { holder: String, current_holder: String },

    #[error("release received for entity {entity_id} with no lock held")]
    ReleaseWithoutHold { entity_id: String },

    #[error("release token {token} does not match current holder's token for entity {entity_id}")]
    TokenMismatch { entity_id: String, token: String },
}

/// Errors raised by a [`crate::store::StoreAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// `CommitBatch`'s `expected_version` no longer matches the stored
    /// record; the whole batch must be replanned.
    #[error("commit conflict for {entity_id}: expected version {expected}, store has {actual}")]
    Conflict { entity_id: String, expected: u64, actual: u64 },

    /// The stored state bytes failed to deserialize into the type an
    /// operation expected to read.
    #[error("stored state for {entity_id} failed to deserialize: {reason}")]
    StateDeserialization { entity_id: String, reason: String },

    /// An underlying I/O or backend failure unrelated to CAS semantics.
    #[error("store backend error for {entity_id}: {reason}")]
    Backend { entity_id: String, reason: String },
}

/// Top-level error surfaced across the `entity-core` crate boundary.
#[derive(Debug, Clone, Error)]
pub enum EntityCoreError {
    #[error("invalid entity id: {0}")]
    InvalidEntityId(#[from] InstanceIdError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A single operation's handler failed; surfaced only to `call`
    /// originators (signals drop this on the floor).
    #[error("entity operation failed: {entity_id}.{op_name}: {error_message}")]
    EntityOperationFailed {
        entity_id: String,
        op_name: String,
        error_message: String,
        stack: Option<String>,
        inner: Option<String>,
    },

    /// Raised internally when a lock-protocol invariant is violated; the
    /// runtime logs this at `error` level and aborts the batch rather than
    /// returning it to ordinary callers.
    #[error("lock protocol violation: {0}")]
    LockProtocol(#[from] LockProtocolViolation),

    /// Two concurrent lock acquisitions on overlapping entity sets were
    /// requested in conflicting orders — surfaced only if a caller bypasses
    /// the ordering helper in [`crate::lock::ordering`].
    #[error("lock ordering violation: targets must be sorted by (name, key)")]
    LockOrderingViolation,
}
