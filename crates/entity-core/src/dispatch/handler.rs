//! The canonical handler contract every registered operation compiles
//! down to, regardless of which binding-rule subset it declared at
//! registration.

use std::future::Future;
use std::pin::Pin;

use crate::context::OperationDescriptor;
use crate::instance_id::InstanceId;

/// What kind of failure a [`HandlerError`] represents, beyond its display
/// message. The dispatcher only cares about one distinction:
/// `StateDeserialization` on a *read* is rescuable by falling back to the
/// `delete` operation; every other kind just rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerErrorKind {
    #[default]
    Generic,
    StateDeserialization,
}

/// A recoverable failure raised by handler code. Rolled back to the
/// pre-operation state snapshot by the batch executor.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub message: String,
    pub stack: Option<String>,
    pub kind: HandlerErrorKind,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), stack: None, kind: HandlerErrorKind::Generic }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self { message: message.into(), stack: Some(stack.into()), kind: HandlerErrorKind::Generic }
    }

    /// Marks the failure as a stored-state read deserialization failure —
    /// the one kind the dispatcher rescues by falling back to `delete`.
    /// Not for write-side serialization failures, which roll back like any
    /// other handler error.
    pub fn state_deserialization(message: impl Into<String>) -> Self {
        Self { message: message.into(), stack: None, kind: HandlerErrorKind::StateDeserialization }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Everything one handler invocation needs, owned so its future can be
/// `'static` regardless of how long the surrounding batch lives.
pub struct HandlerInput {
    pub descriptor: OperationDescriptor,
    pub state: Option<Vec<u8>>,
    pub input: Vec<u8>,
}

/// Everything one handler invocation produces: the entity's new state, an
/// optional response (meaningful only for calls), and any outbound
/// signals queued during the operation, each as `(sender, target,
/// op_name, input)`.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    pub new_state: Option<Vec<u8>>,
    pub response: Option<Vec<u8>>,
    pub outbound_signals: Vec<(InstanceId, InstanceId, String, Vec<u8>)>,
}

/// The single contract every handler compiles down to. The executor
/// awaits exactly one of these per operation before considering the
/// next — no two operations on the same entity ever interleave.
pub type DeferredResult = Pin<Box<dyn Future<Output = Result<HandlerOutput, HandlerError>> + Send>>;

/// A registered, type-erased handler.
pub type Handler = Box<dyn Fn(HandlerInput) -> DeferredResult + Send + Sync>;

/// Wraps an already-computed result as an immediately-ready deferred
/// result — the common case for handlers that never actually suspend.
pub fn ready(result: Result<HandlerOutput, HandlerError>) -> DeferredResult {
    Box::pin(async move { result })
}
