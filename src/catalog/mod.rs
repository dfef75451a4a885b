//! Remote object catalogue
//!
//! Typed proxies for the host's editor objects. Every method is a thin layer
//! over [`Bridge::call`](crate::Bridge::call); the helpers below fix how each
//! result shape turns a [`Call`] into a local result.

use serde_json::Value;

use crate::bridge::envelope::handle_keys;
use crate::bridge::{
    Bridge, BridgeResult, Call, Operation, Outcome, RemoteObject, ResultShape, Step,
    TransportError,
};

pub mod command;
pub mod view;
pub mod window;

pub use command::{CommandContext, CommandRegistry, WindowCommand};
pub use view::{Sheet, View};
pub use window::{InputPanel, QuickPanel, Window};

/// Operation producing a host object: a resolved proxy when evaluated now,
/// a longer chain otherwise.
pub(crate) async fn handle_op(
    bridge: &Bridge,
    receiver: &RemoteObject,
    operation: Operation,
    step: Option<&Step>,
) -> BridgeResult<RemoteObject> {
    let operation = operation.returning(ResultShape::Handle);
    match bridge.call(receiver, &operation, step).await? {
        Call::Pending(pending) => Ok(pending.into_proxy()),
        Call::Resolved(Outcome::Handle(key)) => Ok(RemoteObject::resolved(key)),
        Call::Resolved(other) => Err(unexpected(ResultShape::Handle, &other)),
    }
}

/// Operation producing a primitive value. `None` from the host reads as null.
pub(crate) async fn value_op(
    bridge: &Bridge,
    receiver: &RemoteObject,
    operation: Operation,
    step: Option<&Step>,
) -> BridgeResult<Value> {
    let outcome = settle(bridge, receiver, operation, step).await?;
    match outcome {
        Outcome::Value(value) => Ok(value),
        Outcome::Absent => Ok(Value::Null),
        other => Err(unexpected(ResultShape::Value, &other)),
    }
}

/// "Find" style lookup: definitive, so it follows the value-returning rules
pub(crate) async fn optional_op(
    bridge: &Bridge,
    receiver: &RemoteObject,
    operation: Operation,
    step: Option<&Step>,
) -> BridgeResult<Option<RemoteObject>> {
    let operation = operation.returning(ResultShape::OptionalHandle);
    match settle(bridge, receiver, operation, step).await? {
        Outcome::Handle(key) => Ok(Some(RemoteObject::resolved(key))),
        Outcome::Absent => Ok(None),
        other => Err(unexpected(ResultShape::OptionalHandle, &other)),
    }
}

/// Sequence of host objects, in host order
pub(crate) async fn handle_list_op(
    bridge: &Bridge,
    receiver: &RemoteObject,
    operation: Operation,
    step: Option<&Step>,
) -> BridgeResult<Vec<RemoteObject>> {
    let operation = operation.returning(ResultShape::HandleList);
    match settle(bridge, receiver, operation, step).await? {
        Outcome::Value(value) => Ok(handle_keys(value)?
            .into_iter()
            .map(RemoteObject::resolved)
            .collect()),
        other => Err(unexpected(ResultShape::HandleList, &other)),
    }
}

async fn settle(
    bridge: &Bridge,
    receiver: &RemoteObject,
    operation: Operation,
    step: Option<&Step>,
) -> BridgeResult<Outcome> {
    match bridge.call(receiver, &operation, step).await? {
        Call::Resolved(outcome) => Ok(outcome),
        Call::Pending(pending) => pending.resolve(bridge, step).await,
    }
}

fn unexpected(shape: ResultShape, outcome: &Outcome) -> crate::bridge::BridgeError {
    TransportError::UnexpectedKind {
        expected: shape.as_str(),
        found: outcome.kind(),
    }
    .into()
}

pub(crate) fn as_i64(value: Value) -> BridgeResult<i64> {
    value.as_i64().ok_or_else(|| {
        TransportError::MalformedEnvelope(format!("expected an integer, got {value}")).into()
    })
}

pub(crate) fn as_bool(value: Value) -> BridgeResult<bool> {
    value.as_bool().ok_or_else(|| {
        TransportError::MalformedEnvelope(format!("expected a boolean, got {value}")).into()
    })
}

pub(crate) fn as_string_list(value: Value) -> BridgeResult<Vec<String>> {
    let malformed = |value: &Value| {
        TransportError::MalformedEnvelope(format!("expected a list of strings, got {value}"))
    };
    let items = match value {
        Value::Array(items) => items,
        other => return Err(malformed(&other).into()),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(text) => Ok(text),
            other => Err(malformed(&other)),
        })
        .collect::<Result<_, _>>()
        .map_err(Into::into)
}

pub(crate) fn as_optional_string(value: Value) -> BridgeResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text)),
        other => Err(TransportError::MalformedEnvelope(format!(
            "expected a string or none, got {other}"
        ))
        .into()),
    }
}
