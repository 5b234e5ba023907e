//! Shape log wire format.
//!
//! The HTTP shape endpoint answers with a JSON array of messages. Change
//! messages carry `headers.operation` and the row in `value`; control
//! messages carry `headers.control`.

use super::ShapeMessage;
use crate::error::TransportError;
use ordo_sync_engine::{wire, Operation, SyncRecord};
use serde::Deserialize;
use serde_json::Value;

/// Response header carrying the shape handle.
pub const HANDLE_HEADER: &str = "electric-handle";
/// Response header carrying the log offset to resume from.
pub const OFFSET_HEADER: &str = "electric-offset";
/// Offset requesting the log from the beginning.
pub const INITIAL_OFFSET: &str = "-1";

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    headers: RawHeaders,
}

#[derive(Debug, Default, Deserialize)]
struct RawHeaders {
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    control: Option<String>,
}

/// Decode a response body into shape messages.
///
/// A malformed body is a protocol error; a malformed row only rejects that row.
pub fn decode_batch<R: SyncRecord>(body: &[u8]) -> Result<Vec<ShapeMessage<R>>, TransportError> {
    let raw: Vec<RawMessage> =
        serde_json::from_slice(body).map_err(|e| TransportError::Protocol(e.to_string()))?;
    Ok(raw.into_iter().filter_map(decode_message).collect())
}

fn decode_message<R: SyncRecord>(raw: RawMessage) -> Option<ShapeMessage<R>> {
    if let Some(control) = raw.headers.control.as_deref() {
        return match control {
            "up-to-date" => Some(ShapeMessage::UpToDate),
            "must-refetch" => Some(ShapeMessage::MustRefetch),
            _ => None,
        };
    }

    let operation = raw.headers.operation.as_deref()?;
    let key = raw.key;
    let value = raw.value.unwrap_or(Value::Null);

    let decoded = match operation {
        "insert" => decode_patch::<R>(value).map(Operation::<R>::remote_insert),
        "update" => decode_patch::<R>(value).map(Operation::<R>::remote_update),
        "delete" => decode_delete::<R>(key.as_deref(), &value),
        other => Err(format!("unknown operation: {other}")),
    };

    Some(match decoded {
        Ok(op) => ShapeMessage::Change(op),
        Err(reason) => ShapeMessage::Rejected { key, reason },
    })
}

fn decode_patch<R: SyncRecord>(value: Value) -> Result<R::Patch, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn decode_delete<R: SyncRecord>(key: Option<&str>, value: &Value) -> Result<Operation<R>, String> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| key.and_then(id_from_key))
        .ok_or_else(|| "delete without id".to_string())?;

    let at = value
        .get("updated_at")
        .and_then(Value::as_str)
        .map(wire::parse_timestamp)
        .transpose()
        .map_err(|e| e.to_string())?;

    Ok(Operation::remote_delete(id, at))
}

/// Extract the row id from a message key such as `"public"."tasks"/"t1"`.
fn id_from_key(key: &str) -> Option<String> {
    let (_, id) = key.rsplit_once('/')?;
    let id = id.trim_matches('"');
    (!id.is_empty()).then(|| id.to_string())
}
