use std::collections::HashMap;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    domain::{ControlId, GridPosition, IteratorMode, RequestId},
    error::RemoteError,
};

/// Reserved id of the bootstrap variable snapshot request.
pub const VARIABLES_SNAPSHOT_ID: RequestId = RequestId(1);
/// Reserved id of the bootstrap control layout request.
pub const CONTROLS_SNAPSHOT_ID: RequestId = RequestId(2);
/// First id handed out to ordinary requests, above every reserved id.
pub const FIRST_REQUEST_ID: u64 = 10;

pub const QUERY_VARIABLES: &str = "queryVariables";
pub const QUERY_CUSTOM_CONTROLS: &str = "queryCustomControls";
pub const RUN_CONNECTION_ACTION: &str = "runConnectionAction";

const KNOWN_EVENTS: &[&str] = &[
    "variablesChanged",
    "controlAdded",
    "controlUpdated",
    "controlReplaced",
    "controlRemoved",
    "interaction",
];

/// Variable name -> value for a single remote connection.
pub type VariableDelta = HashMap<String, Value>;
/// Connection name -> delta, as carried by `variablesChanged` and the snapshot reply.
pub type VariableBatch = HashMap<String, VariableDelta>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutboundRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn query_variables() -> Self {
        Self {
            id: VARIABLES_SNAPSHOT_ID,
            method: QUERY_VARIABLES.to_string(),
            params: None,
        }
    }

    pub fn query_custom_controls() -> Self {
        Self {
            id: CONTROLS_SNAPSHOT_ID,
            method: QUERY_CUSTOM_CONTROLS.to_string(),
            params: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLocation {
    #[serde(deserialize_with = "lenient_int")]
    pub page_number: u32,
    #[serde(deserialize_with = "lenient_int")]
    pub row: i32,
    #[serde(deserialize_with = "lenient_int")]
    pub column: i32,
}

impl ControlLocation {
    pub fn position(&self) -> GridPosition {
        GridPosition::new(self.row, self.column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlOptions {
    #[serde(
        default,
        rename = "controlType",
        alias = "classId",
        alias = "pythonClassId",
        skip_serializing_if = "Option::is_none"
    )]
    pub control_type: Option<String>,
    #[serde(default)]
    pub iterator: IteratorMode,
    #[serde(
        default,
        deserialize_with = "lenient_opt_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub manual_iteration: Option<i64>,
}

/// One control as described by the layout snapshot or a control event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlData {
    pub control_id: ControlId,
    pub location: ControlLocation,
    #[serde(default)]
    pub options: ControlOptions,
}

impl ControlData {
    pub fn type_tag(&self) -> Option<&str> {
        self.options.control_type.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlReplacedPayload {
    pub old_control_id: ControlId,
    #[serde(default)]
    pub new_control: Option<ControlData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRemovedPayload {
    pub control_id: ControlId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Press,
    Release,
    Rotate { clockwise: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPayload {
    pub control_id: ControlId,
    pub event: String,
    #[serde(default)]
    pub value: Value,
}

impl InteractionPayload {
    /// `press` carries the button state in `value`; `rotate` carries the direction.
    pub fn kind(&self) -> Option<InteractionKind> {
        match self.event.as_str() {
            "press" if is_truthy(&self.value) => Some(InteractionKind::Press),
            "press" | "release" => Some(InteractionKind::Release),
            "rotate" => Some(InteractionKind::Rotate {
                clockwise: is_truthy(&self.value),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum PushEvent {
    VariablesChanged(VariableBatch),
    ControlAdded(ControlData),
    ControlUpdated(ControlData),
    ControlReplaced(ControlReplacedPayload),
    ControlRemoved(ControlRemovedPayload),
    Interaction(InteractionPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Result(Value),
    Error(RemoteError),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: RequestId,
    pub outcome: ReplyOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Reply(Reply),
    Push(PushEvent),
    /// A known event whose payload did not have the expected shape.
    InvalidPush { event: String, reason: String },
    RemoteError(RemoteError),
    Unrecognized(Value),
}

impl InboundFrame {
    /// Classifies one text frame. Only text that is not JSON at all is an error.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(value))
    }

    pub fn classify(value: Value) -> Self {
        let Value::Object(map) = &value else {
            return Self::Unrecognized(value);
        };

        if let Some(id) = map.get("id").and_then(Value::as_u64) {
            let outcome = if let Some(result) = map.get("result") {
                ReplyOutcome::Result(result.clone())
            } else if let Some(error) = map.get("error") {
                ReplyOutcome::Error(RemoteError::from_value(error))
            } else {
                ReplyOutcome::Empty
            };
            return Self::Reply(Reply {
                id: RequestId(id),
                outcome,
            });
        }

        if let Some(event) = map.get("event").and_then(Value::as_str) {
            if !KNOWN_EVENTS.contains(&event) {
                return Self::Unrecognized(value);
            }
            let event = event.to_string();
            return match serde_json::from_value::<PushEvent>(value) {
                Ok(push) => Self::Push(push),
                Err(err) => Self::InvalidPush {
                    event,
                    reason: err.to_string(),
                },
            };
        }

        if let Some(error) = map.get("error") {
            return Self::RemoteError(RemoteError::from_value(error));
        }

        Self::Unrecognized(value)
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn int_from_value<E: serde::de::Error>(value: &Value) -> Result<Option<i64>, E> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|n| n as i64))
            .map(Some)
            .ok_or_else(|| E::custom(format!("number out of range: {number}"))),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| E::custom(format!("expected an integer, got {text:?}"))),
        other => Err(E::custom(format!("expected an integer, got {other}"))),
    }
}

/// Accepts both `3` and `"3"`; the controller is not consistent about it.
fn lenient_int<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let value = Value::deserialize(deserializer)?;
    let raw = int_from_value::<D::Error>(&value)?
        .ok_or_else(|| D::Error::custom("expected an integer, got nothing"))?;
    T::try_from(raw).map_err(|_| D::Error::custom(format!("integer out of range: {raw}")))
}

fn lenient_opt_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    int_from_value::<D::Error>(&value)
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
