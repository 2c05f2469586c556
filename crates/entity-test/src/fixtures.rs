//! Entity-type registries shared across the scenario tests.

use std::collections::HashMap;

use entity_core::dispatch::{HandlerError, OperationRegistry};

/// A `counter` entity: `add(n)` accumulates an `i64`, `get` reads it
/// (defaulting to `0` when uninitialized).
pub fn counter_registry() -> OperationRegistry {
    OperationRegistry::new()
        .on_ctx_input("add", |ctx, input| {
            let delta: i64 = std::str::from_utf8(input)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| HandlerError::new("add expects a decimal i64 input"))?;
            let current = ctx.get_state::<i64>().map_err(|e| HandlerError::state_deserialization(e.to_string()))?.unwrap_or(0);
            ctx.set_state(&(current + delta)).map_err(|e| HandlerError::new(e.to_string()))?;
            Ok(None)
        })
        .unwrap()
        .on_ctx("get", |ctx| {
            let value = ctx.get_state::<i64>().map_err(|e| HandlerError::state_deserialization(e.to_string()))?.unwrap_or(0);
            Ok(Some(value.to_string().into_bytes()))
        })
        .unwrap()
}

/// A `stringstore` entity of "type A": `get` on an uninitialized entity
/// auto-materializes as an empty string, and `delete` is left to the
/// implicit default (set `state` absent, never fails even when already
/// absent).
pub fn stringstore_registry() -> OperationRegistry {
    OperationRegistry::new()
        .on_ctx_input("set", |ctx, input| {
            ctx.set_state(&String::from_utf8_lossy(input).to_string()).map_err(|e| HandlerError::new(e.to_string()))?;
            Ok(None)
        })
        .unwrap()
        .on_ctx("get", |ctx| {
            let value = ctx.get_state::<String>().map_err(|e| HandlerError::state_deserialization(e.to_string()))?.unwrap_or_default();
            Ok(Some(value.into_bytes()))
        })
        .unwrap()
}

/// A `stringstore` entity of "type B": `delete` is overridden to return
/// whether it actually cleared anything, and `get` reports an
/// uninitialized entity as JSON `null` rather than auto-materializing —
/// a deliberately different choice from "type A" for the per-entity-type
/// `get` semantics.
pub fn stringstore_bool_registry() -> OperationRegistry {
    OperationRegistry::new()
        .on_ctx_input("set", |ctx, input| {
            ctx.set_state(&String::from_utf8_lossy(input).to_string()).map_err(|e| HandlerError::new(e.to_string()))?;
            Ok(None)
        })
        .unwrap()
        .on_ctx("get", |ctx| match ctx.get_state::<String>().map_err(|e| HandlerError::state_deserialization(e.to_string()))? {
            Some(value) => Ok(Some(value.into_bytes())),
            None => Ok(Some(b"null".to_vec())),
        })
        .unwrap()
        .on_ctx("delete", |ctx| {
            let had_state = ctx.has_state();
            ctx.clear_state();
            Ok(Some(if had_state { b"true".to_vec() } else { b"false".to_vec() }))
        })
        .unwrap()
}

pub fn counter_registries() -> HashMap<String, OperationRegistry> {
    let mut map = HashMap::new();
    map.insert("counter".to_string(), counter_registry());
    map
}
