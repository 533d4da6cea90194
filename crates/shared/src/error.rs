use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error text carried by a reply's `error` field or by a bare error push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
#[serde(transparent)]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The controller normally sends a string; anything else is kept as JSON text.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::new(message.clone()),
            other => Self::new(other.to_string()),
        }
    }
}
