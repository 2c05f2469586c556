//! Builder-based handler registration.

use std::collections::HashMap;

use crate::context::{OperationDescriptor, TaskEntityContext};
use crate::error::DispatchError;

use super::handler::{ready, DeferredResult, Handler, HandlerError, HandlerErrorKind, HandlerInput, HandlerOutput};

const IMPLICIT_DELETE: &str = "delete";

/// Registers operation handlers and, once sealed, resolves an
/// `(op_name, input)` pair to the matching handler — or to the implicit
/// `delete` operation, or to [`DispatchError::NoHandler`].
///
/// Registration normalizes names to lower-case; registering the same
/// name twice is [`DispatchError::AmbiguousHandler`], checked here at
/// registration time rather than deferred to first dispatch.
#[derive(Default)]
pub struct OperationRegistry {
    handlers: HashMap<String, Handler>,
    explicit_delete: bool,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, handler: Handler) -> Result<(), DispatchError> {
        let key = name.to_lowercase();
        if self.handlers.contains_key(&key) {
            return Err(DispatchError::AmbiguousHandler { op_name: key });
        }
        if key == IMPLICIT_DELETE {
            self.explicit_delete = true;
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Full canonical form: the handler receives an owned [`HandlerInput`]
    /// and returns a [`DeferredResult`] directly. Every other `on_*`
    /// method is sugar over this one.
    pub fn on<F>(mut self, name: &str, f: F) -> Result<Self, DispatchError>
    where
        F: Fn(HandlerInput) -> DeferredResult + Send + Sync + 'static,
    {
        self.insert(name, Box::new(f))?;
        Ok(self)
    }

    /// Binds both an entity-context parameter and the raw input bytes.
    pub fn on_ctx_input<F>(mut self, name: &str, f: F) -> Result<Self, DispatchError>
    where
        F: Fn(&mut TaskEntityContext<'_>, &[u8]) -> Result<Option<Vec<u8>>, HandlerError> + Send + Sync + 'static,
    {
        let wrapped = move |input: HandlerInput| -> DeferredResult {
            let HandlerInput { descriptor, mut state, input: bytes } = input;
            let outcome = {
                let mut ctx = TaskEntityContext::new(&descriptor.id, &mut state);
                let response = f(&mut ctx, &bytes);
                let signals = ctx.take_signals();
                response.map(|response| (response, signals))
            };
            ready(outcome.map(|(response, signals)| HandlerOutput { new_state: state, response, outbound_signals: signals }))
        };
        self.insert(name, Box::new(wrapped))?;
        Ok(self)
    }

    /// Binds only an entity-context parameter; the operation ignores its
    /// input entirely.
    pub fn on_ctx<F>(mut self, name: &str, f: F) -> Result<Self, DispatchError>
    where
        F: Fn(&mut TaskEntityContext<'_>) -> Result<Option<Vec<u8>>, HandlerError> + Send + Sync + 'static,
    {
        self.on_ctx_input(name, move |ctx, _input| f(ctx))
    }

    /// Binds only the raw input bytes; state passes through unchanged.
    pub fn on_input<F>(mut self, name: &str, f: F) -> Result<Self, DispatchError>
    where
        F: Fn(&[u8]) -> Result<Option<Vec<u8>>, HandlerError> + Send + Sync + 'static,
    {
        let wrapped = move |input: HandlerInput| -> DeferredResult {
            let result = f(&input.input);
            ready(result.map(|response| HandlerOutput { new_state: input.state, response, outbound_signals: Vec::new() }))
        };
        self.insert(name, Box::new(wrapped))?;
        Ok(self)
    }

    /// Binds neither context nor input — the operation carries no
    /// meaningful payload. This is the only form that satisfies an
    /// unbound input parameter without raising `InvalidBinding`; anything
    /// else with no input binding and no default is a programmer error
    /// the registry cannot express, so there is no bare `.on_none()` that
    /// skips providing one.
    pub fn on_default<F>(mut self, name: &str, f: F) -> Result<Self, DispatchError>
    where
        F: Fn(&mut TaskEntityContext<'_>) -> Result<Option<Vec<u8>>, HandlerError> + Send + Sync + 'static,
    {
        self.on_ctx(name, f)
    }

    /// Resolve and invoke the handler for `op_name`. Falls back to the
    /// implicit `delete` when no explicit handler was registered for it;
    /// otherwise [`DispatchError::NoHandler`].
    ///
    /// A [`HandlerErrorKind::StateDeserialization`] failure from any
    /// operation other than `delete` itself is rescued: the operation's
    /// own failure is discarded and `delete` is dispatched against the
    /// same (corrupt) stored state instead. If that rescue dispatch also
    /// fails, or there is no handler to rescue with, the original error
    /// stands and state is left untouched.
    pub async fn dispatch(&self, descriptor: OperationDescriptor, state: Option<Vec<u8>>, input: Vec<u8>) -> Result<HandlerOutput, DispatchOutcome> {
        let key = descriptor.name.to_lowercase();

        if let Some(handler) = self.handlers.get(&key) {
            let rescue_state = state.clone();
            let future = handler(HandlerInput { descriptor: descriptor.clone(), state, input });
            return match future.await {
                Ok(output) => Ok(output),
                Err(err) if err.kind == HandlerErrorKind::StateDeserialization && key != IMPLICIT_DELETE => {
                    self.dispatch_delete_rescue(descriptor, rescue_state).await
                }
                Err(err) => Err(DispatchOutcome::Handler(err)),
            };
        }

        if key == IMPLICIT_DELETE && !self.explicit_delete {
            return Ok(HandlerOutput { new_state: None, response: None, outbound_signals: Vec::new() });
        }

        Err(DispatchOutcome::Dispatch(DispatchError::NoHandler { op_name: descriptor.name }))
    }

    /// The rescue path for a read-side state deserialization failure:
    /// dispatch `delete` (explicit if registered, implicit otherwise)
    /// against the same state bytes that failed to deserialize for the
    /// original operation.
    async fn dispatch_delete_rescue(&self, descriptor: OperationDescriptor, state: Option<Vec<u8>>) -> Result<HandlerOutput, DispatchOutcome> {
        let rescue_descriptor = OperationDescriptor { name: IMPLICIT_DELETE.to_string(), ..descriptor };
        match self.handlers.get(IMPLICIT_DELETE) {
            Some(handler) => handler(HandlerInput { descriptor: rescue_descriptor, state, input: Vec::new() }).await.map_err(DispatchOutcome::Handler),
            None => Ok(HandlerOutput { new_state: None, response: None, outbound_signals: Vec::new() }),
        }
    }
}

/// Why a dispatched operation did not produce a [`HandlerOutput`]: either
/// the handler itself failed or no handler could be resolved at all.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Handler(HandlerError),
    Dispatch(DispatchError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance_id::InstanceId;

    fn descriptor(op: &str) -> OperationDescriptor {
        OperationDescriptor { name: op.into(), id: InstanceId::new("counter", "k1").unwrap(), request_id: None }
    }

    #[tokio::test]
    async fn registers_and_dispatches_ctx_input_handler() {
        let registry = OperationRegistry::new()
            .on_ctx_input("set", |ctx, input| {
                ctx.set_state(&String::from_utf8_lossy(input).to_string()).map_err(|e| HandlerError::new(e.to_string()))?;
                Ok(None)
            })
            .unwrap();

        let out = registry.dispatch(descriptor("SET"), None, b"hello".to_vec()).await.unwrap();
        assert_eq!(out.new_state, Some(br#""hello""#.to_vec()));
    }

    #[tokio::test]
    async fn case_insensitive_lookup() {
        let registry = OperationRegistry::new().on_input("get", |_input| Ok(Some(b"ok".to_vec()))).unwrap();
        let out = registry.dispatch(descriptor("GeT"), None, vec![]).await.unwrap();
        assert_eq!(out.response, Some(b"ok".to_vec()));
    }

    #[tokio::test]
    async fn unknown_operation_without_explicit_delete_falls_back_to_implicit_delete() {
        let registry = OperationRegistry::new();
        let out = registry.dispatch(descriptor("delete"), Some(b"1".to_vec()), vec![]).await.unwrap();
        assert_eq!(out.new_state, None);
    }

    #[tokio::test]
    async fn truly_unknown_operation_is_no_handler() {
        let registry = OperationRegistry::new();
        let err = registry.dispatch(descriptor("frobnicate"), None, vec![]).await.unwrap_err();
        assert!(matches!(err, DispatchOutcome::Dispatch(DispatchError::NoHandler { .. })));
    }

    #[test]
    fn duplicate_registration_after_case_folding_is_ambiguous() {
        let result = OperationRegistry::new()
            .on_input("Get", |_| Ok(None))
            .unwrap()
            .on_input("get", |_| Ok(None));
        assert!(matches!(result, Err(DispatchError::AmbiguousHandler { .. })));
    }

    #[tokio::test]
    async fn explicit_delete_overrides_implicit_behavior() {
        let registry = OperationRegistry::new()
            .on_ctx("delete", |ctx| {
                let had_state = ctx.has_state();
                ctx.clear_state();
                Ok(Some(if had_state { b"true".to_vec() } else { b"false".to_vec() }))
            })
            .unwrap();

        let out = registry.dispatch(descriptor("delete"), Some(b"\"333\"".to_vec()), vec![]).await.unwrap();
        assert_eq!(out.response, Some(b"true".to_vec()));

        let out2 = registry.dispatch(descriptor("delete"), None, vec![]).await.unwrap();
        assert_eq!(out2.response, Some(b"false".to_vec()));
    }
}
