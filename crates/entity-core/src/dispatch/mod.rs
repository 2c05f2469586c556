//! Operation Dispatcher: handler selection and binding,
//! the implicit `delete` operation, and deferred-result unwrapping.

mod handler;
mod registry;

pub use handler::{ready, DeferredResult, Handler, HandlerError, HandlerErrorKind, HandlerInput, HandlerOutput};
pub use registry::{DispatchOutcome, OperationRegistry};

pub use crate::context::OperationDescriptor;
