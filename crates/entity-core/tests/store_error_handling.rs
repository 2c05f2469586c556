use entity_core::context::OperationDescriptor;
use entity_core::dispatch::{DispatchOutcome, HandlerError, OperationRegistry};
use entity_core::error::StoreError;
use entity_core::instance_id::InstanceId;

fn descriptor(op: &str) -> OperationDescriptor {
    OperationDescriptor { name: op.into(), id: InstanceId::new("counter", "k1").unwrap(), request_id: None }
}

#[test]
fn conflict_message_carries_expected_and_actual_versions() {
    let err = StoreError::Conflict { entity_id: "@counter@k1".into(), expected: 3, actual: 5 };
    assert_eq!(err.to_string(), "commit conflict for @counter@k1: expected version 3, store has 5");
}

#[test]
fn state_deserialization_message_carries_the_reason() {
    let err = StoreError::StateDeserialization { entity_id: "@counter@k1".into(), reason: "unexpected end of input".into() };
    assert!(err.to_string().contains("unexpected end of input"));
}

#[test]
fn backend_error_message_carries_the_reason() {
    let err = StoreError::Backend { entity_id: "@counter@k1".into(), reason: "connection reset".into() };
    assert!(err.to_string().contains("connection reset"));
}

#[test]
fn store_error_is_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<StoreError>();
    assert_sync::<StoreError>();
}

#[test]
fn store_error_equality_and_clone() {
    let a = StoreError::Conflict { entity_id: "@counter@k1".into(), expected: 0, actual: 1 };
    let b = a.clone();
    assert_eq!(a, b);
}

#[tokio::test]
async fn state_deserialization_on_read_rescues_via_implicit_delete() {
    let registry = OperationRegistry::new()
        .on_ctx("get", |ctx| {
            let value = ctx.get_state::<i64>().map_err(|e| HandlerError::state_deserialization(e.to_string()))?;
            Ok(value.map(|v| v.to_string().into_bytes()))
        })
        .unwrap();

    let corrupt_state = Some(b"not valid json for an i64".to_vec());
    let out = registry.dispatch(descriptor("get"), corrupt_state, vec![]).await.unwrap();
    assert_eq!(out.new_state, None);
}

#[tokio::test]
async fn state_deserialization_on_read_rescues_via_explicit_delete() {
    let registry = OperationRegistry::new()
        .on_ctx("get", |ctx| {
            let value = ctx.get_state::<i64>().map_err(|e| HandlerError::state_deserialization(e.to_string()))?;
            Ok(value.map(|v| v.to_string().into_bytes()))
        })
        .unwrap()
        .on_ctx("delete", |ctx| {
            ctx.clear_state();
            Ok(Some(b"rescued".to_vec()))
        })
        .unwrap();

    let corrupt_state = Some(b"not valid json for an i64".to_vec());
    let out = registry.dispatch(descriptor("get"), corrupt_state, vec![]).await.unwrap();
    assert_eq!(out.new_state, None);
    assert_eq!(out.response, Some(b"rescued".to_vec()));
}

#[tokio::test]
async fn generic_handler_error_is_not_rescued_and_state_is_untouched() {
    let registry = OperationRegistry::new()
        .on_ctx("get", |_ctx| Err(HandlerError::new("not a deserialization failure")))
        .unwrap()
        .on_ctx("delete", |ctx| {
            ctx.clear_state();
            Ok(None)
        })
        .unwrap();

    let err = registry.dispatch(descriptor("get"), Some(b"1".to_vec()), vec![]).await.unwrap_err();
    assert!(matches!(err, DispatchOutcome::Handler(_)));
}
