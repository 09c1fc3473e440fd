//! JSON mapping of the heartbeat schema.
//!
//! Inbound payloads follow the protobuf JSON conventions: lowerCamelCase
//! names with the proto field names accepted as aliases, int64 values as
//! numbers or decimal strings, `null` for defaults and no unknown fields.
//! Outbound acks are written the same way protobuf formats them: default
//! values omitted and int64 values quoted.

use crate::domain::HeartbeatError;
use common::domain::{HeartbeatMessage, ACK_MESSAGE_TYPE};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeartbeatWire {
    #[serde(
        rename = "deviceId",
        alias = "device_id",
        default,
        deserialize_with = "nullable_string"
    )]
    device_id: String,
    #[serde(
        rename = "moduleId",
        alias = "module_id",
        default,
        deserialize_with = "nullable_string"
    )]
    module_id: String,
    #[serde(default, deserialize_with = "int64")]
    id: i64,
    #[serde(
        rename = "msgType",
        alias = "msg_type",
        default,
        deserialize_with = "nullable_string"
    )]
    msg_type: String,
    #[serde(
        rename = "heartbeatCreatedTicksUtc",
        alias = "heartbeat_created_ticks_utc",
        default,
        deserialize_with = "int64"
    )]
    heartbeat_created_ticks_utc: i64,
}

#[derive(Debug, Serialize)]
struct HeartbeatWireOut {
    #[serde(rename = "deviceId", skip_serializing_if = "String::is_empty")]
    device_id: String,
    #[serde(rename = "moduleId", skip_serializing_if = "String::is_empty")]
    module_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "msgType", skip_serializing_if = "String::is_empty")]
    msg_type: String,
    #[serde(
        rename = "heartbeatCreatedTicksUtc",
        skip_serializing_if = "Option::is_none"
    )]
    heartbeat_created_ticks_utc: Option<String>,
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64Repr {
        Number(i64),
        Float(f64),
        Text(String),
    }

    match Option::<Int64Repr>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Int64Repr::Number(value)) => Ok(value),
        // i64::MAX as f64 rounds up to 2^63.
        Some(Int64Repr::Float(value))
            if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 =>
        {
            Ok(value as i64)
        }
        Some(Int64Repr::Float(value)) => Err(de::Error::custom(format!(
            "int64 value {value} is not a whole number in range"
        ))),
        Some(Int64Repr::Text(text)) => text
            .parse::<i64>()
            .map_err(|e| de::Error::custom(format!("invalid int64 value {text:?}: {e}"))),
    }
}

fn non_default(value: i64) -> Option<String> {
    (value != 0).then(|| value.to_string())
}

/// Decode a raw heartbeat payload.
///
/// Fails when the payload is not UTF-8, does not parse as a heartbeat
/// object, or carries no `deviceId`. The error keeps the raw payload.
pub fn decode(raw: &[u8]) -> Result<HeartbeatMessage, HeartbeatError> {
    let text = std::str::from_utf8(raw).map_err(|e| HeartbeatError::Decode {
        reason: format!("payload is not valid UTF-8: {e}"),
        raw_payload: String::from_utf8_lossy(raw).into_owned(),
    })?;

    let failed = |reason: String| HeartbeatError::Decode {
        reason,
        raw_payload: text.to_string(),
    };

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| failed(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(failed("heartbeat payload must be a JSON object".to_string()));
    }

    let wire: HeartbeatWire = serde_json::from_value(value)
        .map_err(|e| failed(format!("payload does not match heartbeat schema: {e}")))?;

    if wire.device_id.is_empty() {
        return Err(failed("missing deviceId".to_string()));
    }

    Ok(HeartbeatMessage {
        device_id: wire.device_id,
        module_id: wire.module_id,
        message_id: wire.id,
        created_at_utc_ticks: wire.heartbeat_created_ticks_utc,
        message_type: wire.msg_type,
    })
}

/// Encode a heartbeat in its wire format.
pub fn encode(msg: &HeartbeatMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&HeartbeatWireOut {
        device_id: msg.device_id.clone(),
        module_id: msg.module_id.clone(),
        id: non_default(msg.message_id),
        msg_type: msg.message_type.clone(),
        heartbeat_created_ticks_utc: non_default(msg.created_at_utc_ticks),
    })
}

/// Encode the payload echoed back to the device; `msgType` is always the
/// acknowledgment marker.
pub fn encode_ack(msg: &HeartbeatMessage) -> Result<String, serde_json::Error> {
    if msg.is_acknowledgment() {
        return encode(msg);
    }

    encode(&HeartbeatMessage {
        message_type: ACK_MESSAGE_TYPE.to_string(),
        ..msg.clone()
    })
}
