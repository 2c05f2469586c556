//! `TaskEntityContext`: the handle a handler receives to read/write the
//! current entity's state and to enqueue outbound actions.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;
use crate::instance_id::InstanceId;

/// The operation a handler is bound to, exposed to handlers that bind an
/// "operation descriptor" parameter.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub name: String,
    pub id: InstanceId,
    pub request_id: Option<String>,
}

/// Context handed to a handler during dispatch. Backed by the batch
/// executor's in-flight `state_pre_op` snapshot; `set_state`/`clear_state`
/// mutate that snapshot directly rather than touching the store, so a
/// subsequent rollback only has to restore the snapshot the
/// executor already holds.
pub struct TaskEntityContext<'a> {
    id: &'a InstanceId,
    state: &'a mut Option<Vec<u8>>,
    signals: Vec<(InstanceId, InstanceId, String, Vec<u8>)>,
}

impl<'a> TaskEntityContext<'a> {
    pub fn new(id: &'a InstanceId, state: &'a mut Option<Vec<u8>>) -> Self {
        Self { id, state, signals: Vec::new() }
    }

    pub fn id(&self) -> &InstanceId {
        self.id
    }

    /// Deserializes the current state, or `None` if the entity has never
    /// materialized. Bubbles a [`StoreError::StateDeserialization`] rather
    /// than panicking; a handler that tags this with
    /// [`crate::dispatch::HandlerError::state_deserialization`] gets
    /// routed into the registry's rescue-delete path one level up.
    pub fn get_state<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        match self.state.as_deref() {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| StoreError::StateDeserialization { entity_id: self.id.to_canonical_string(), reason: e.to_string() }),
            None => Ok(None),
        }
    }

    /// Serializes and stores `value` as the new state. Failure here is a
    /// handler error — the caller (dispatcher) rolls the operation back
    /// on `Err`.
    pub fn set_state<T: Serialize>(&mut self, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::StateDeserialization { entity_id: self.id.to_canonical_string(), reason: e.to_string() })?;
        *self.state = Some(bytes);
        Ok(())
    }

    /// Clears `state`, the implicit-delete effect.
    pub fn clear_state(&mut self) {
        *self.state = None;
    }

    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    /// Queues a fire-and-forget signal to another entity, to be published
    /// as part of this batch's atomic commit. The sending entity's own id
    /// travels with the signal so the receiving handler sees the true
    /// originator, not its own id, as `sender`.
    pub fn signal_entity<T: Serialize>(&mut self, target: InstanceId, op_name: impl Into<String>, input: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(input)
            .map_err(|e| StoreError::StateDeserialization { entity_id: target.to_canonical_string(), reason: e.to_string() })?;
        self.signals.push((self.id.clone(), target, op_name.into(), bytes));
        Ok(())
    }

    /// Drains queued outbound signals, consuming the context. Called by
    /// the batch executor after a successful handler invocation. Each
    /// entry is `(sender, target, op_name, input)`.
    pub fn take_signals(self) -> Vec<(InstanceId, InstanceId, String, Vec<u8>)> {
        self.signals
    }
}
