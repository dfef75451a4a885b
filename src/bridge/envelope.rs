//! Result envelope protocol
//!
//! Every round trip ends in exactly one envelope. The `kind` tag decides which
//! other field is present; nothing is coerced from one kind into another.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{RemoteError, TransportError};
use super::handle::HandleKey;

/// Wire representation of a round trip's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Envelope {
    /// JSON-compatible value
    Primitive {
        /// The value itself (may be JSON null)
        value: Value,
    },
    /// Reference to an object stored in the host's handle table
    Handle {
        /// Key in the handle table
        key: HandleKey,
    },
    /// No object at all (distinct from a primitive null)
    None,
    /// The generated source raised inside the host
    Error {
        /// Host error message
        message: String,
    },
}

impl Envelope {
    /// Parse an envelope from the JSON the transport returned
    pub fn from_json(value: Value) -> Result<Self, TransportError> {
        serde_json::from_value(value)
            .map_err(|err| TransportError::MalformedEnvelope(err.to_string()))
    }

    /// Serialise back to the wire shape
    pub fn to_json(&self) -> Value {
        // Envelope only holds strings and JSON values, serialisation cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The `kind` tag as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Primitive { .. } => "primitive",
            Envelope::Handle { .. } => "handle",
            Envelope::None => "none",
            Envelope::Error { .. } => "error",
        }
    }

    /// Split into a local outcome or the host's failure
    pub fn into_outcome(self) -> Result<Outcome, RemoteError> {
        match self {
            Envelope::Primitive { value } => Ok(Outcome::Value(value)),
            Envelope::Handle { key } => Ok(Outcome::Handle(key)),
            Envelope::None => Ok(Outcome::Absent),
            Envelope::Error { message } => Err(RemoteError { message }),
        }
    }
}

impl From<Outcome> for Envelope {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Value(value) => Envelope::Primitive { value },
            Outcome::Handle(key) => Envelope::Handle { key },
            Outcome::Absent => Envelope::None,
        }
    }
}

impl From<RemoteError> for Envelope {
    fn from(error: RemoteError) -> Self {
        Envelope::Error {
            message: error.message,
        }
    }
}

/// Successful outcome of a round trip, in local form
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Primitive value
    Value(Value),
    /// Handle to a host object
    Handle(HandleKey),
    /// No object
    Absent,
}

impl Outcome {
    /// Wire kind this outcome corresponds to
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Value(_) => "primitive",
            Outcome::Handle(_) => "handle",
            Outcome::Absent => "none",
        }
    }

    /// Borrow the handle key if this is a handle outcome
    pub fn as_handle(&self) -> Option<&HandleKey> {
        match self {
            Outcome::Handle(key) => Some(key),
            _ => None,
        }
    }

    /// Turn into a JSON value; absent becomes null
    pub fn into_value(self) -> Option<Value> {
        match self {
            Outcome::Value(value) => Some(value),
            Outcome::Absent => Some(Value::Null),
            Outcome::Handle(_) => None,
        }
    }
}

/// What the caller expects a round trip to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// A primitive value (host `None` arrives as `none`)
    Value,
    /// An object that must be stored in the handle table
    Handle,
    /// An object that may be missing ("find" style lookups)
    OptionalHandle,
    /// A sequence of objects, returned as a primitive list of handle keys
    HandleList,
}

impl ResultShape {
    /// Name used in generated source and diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultShape::Value => "value",
            ResultShape::Handle => "handle",
            ResultShape::OptionalHandle => "optional_handle",
            ResultShape::HandleList => "handle_list",
        }
    }

    /// Check an outcome against this shape
    pub fn accept(self, outcome: Outcome) -> Result<Outcome, TransportError> {
        let fits = matches!(
            (self, &outcome),
            (ResultShape::Value, Outcome::Value(_) | Outcome::Absent)
                | (ResultShape::Handle, Outcome::Handle(_))
                | (ResultShape::OptionalHandle, Outcome::Handle(_) | Outcome::Absent)
                | (ResultShape::HandleList, Outcome::Value(Value::Array(_)))
        );

        if fits {
            Ok(outcome)
        } else {
            Err(TransportError::UnexpectedKind {
                expected: self.as_str(),
                found: outcome.kind(),
            })
        }
    }
}

/// Read a primitive list of handle keys, preserving order
pub fn handle_keys(value: Value) -> Result<Vec<HandleKey>, TransportError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(key) => Ok(HandleKey::new(key)),
                other => Err(TransportError::MalformedEnvelope(format!(
                    "handle list entry is not a key: {other}"
                ))),
            })
            .collect(),
        other => Err(TransportError::MalformedEnvelope(format!(
            "handle list is not an array: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_kind() {
        let cases = vec![
            (json!({"kind": "primitive", "value": [1, 2]}), "primitive"),
            (json!({"kind": "handle", "key": "h7"}), "handle"),
            (json!({"kind": "none"}), "none"),
            (json!({"kind": "error", "message": "boom"}), "error"),
        ];

        for (raw, kind) in cases {
            let envelope = Envelope::from_json(raw.clone()).unwrap();
            assert_eq!(envelope.kind(), kind);
            assert_eq!(envelope.to_json(), raw);
        }
    }

    #[test]
    fn primitive_null_differs_from_none() {
        let null = Envelope::from_json(json!({"kind": "primitive", "value": null})).unwrap();
        let none = Envelope::from_json(json!({"kind": "none"})).unwrap();
        assert_eq!(null.into_outcome().unwrap(), Outcome::Value(Value::Null));
        assert_eq!(none.into_outcome().unwrap(), Outcome::Absent);
    }

    #[test]
    fn rejects_malformed_envelopes() {
        for raw in [
            json!({"value": 1}),
            json!({"kind": "handle"}),
            json!({"kind": "mystery"}),
            json!("primitive"),
        ] {
            let err = Envelope::from_json(raw).unwrap_err();
            assert!(matches!(err, TransportError::MalformedEnvelope(_)));
        }
    }

    #[test]
    fn error_envelope_becomes_remote_error() {
        let envelope = Envelope::Error {
            message: "NameError".into(),
        };
        assert_eq!(
            envelope.into_outcome().unwrap_err(),
            RemoteError::new("NameError")
        );
    }

    #[test]
    fn shape_rejects_cross_kind_results() {
        let err = ResultShape::Handle
            .accept(Outcome::Value(json!(3)))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::UnexpectedKind {
                expected: "handle",
                found: "primitive"
            }
        ));
        assert!(ResultShape::Handle.accept(Outcome::Absent).is_err());
        assert!(ResultShape::OptionalHandle.accept(Outcome::Absent).is_ok());
        assert!(ResultShape::HandleList.accept(Outcome::Value(json!({}))).is_err());
    }

    #[test]
    fn handle_keys_keep_order() {
        let keys = handle_keys(json!(["c", "a", "b"])).unwrap();
        assert_eq!(
            keys,
            vec![HandleKey::new("c"), HandleKey::new("a"), HandleKey::new("b")]
        );
        assert!(handle_keys(json!([1])).is_err());
    }
}
