//! Normalization of call signals from the socket and push channels.
//!
//! Neither transport is exactly-once and the backend usually reports the
//! same incoming call on both. Nothing here deduplicates: we only convert
//! shapes. Duplicates are absorbed by the call-id guards in the machine.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::{CallOffer, CallType, NormalizedCallEvent};

pub const SOCKET_INCOMING_CALL: &str = "incoming_call";
pub const SOCKET_CALL_DECLINED: &str = "call_declined";
pub const SOCKET_CALL_ENDED: &str = "call_ended";

/// Why an inbound payload could not be normalized.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown call type {0:?}")]
    UnknownCallType(String),
    #[error("unknown push type {0:?}")]
    UnknownPushType(String),
}

/// Caller block of a socket `incoming_call` event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketCaller {
    #[serde(rename = "_id")]
    id: Option<String>,
    full_name: Option<String>,
    username: Option<String>,
    profile_image_url: Option<String>,
}

/// Socket payload; `call_declined`/`call_ended` carry only a subset.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketCallPayload {
    call_id: Option<String>,
    caller: Option<SocketCaller>,
    chat_id: Option<String>,
    call_type: Option<String>,
}

/// Push data payload. Data-only pushes carry every value as a string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushCallData {
    pub call_id: Option<String>,
    pub caller_id: Option<String>,
    pub caller_name: Option<String>,
    pub caller_image: Option<String>,
    pub chat_id: Option<String>,
    pub call_type: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn required(value: Option<String>, field: &'static str) -> Result<String, EventError> {
    non_empty(value).ok_or(EventError::MissingField(field))
}

fn call_type(value: Option<String>) -> Result<CallType, EventError> {
    match non_empty(value) {
        // Older servers omit the type for voice calls.
        None => Ok(CallType::Voice),
        Some(v) => CallType::parse(&v).ok_or(EventError::UnknownCallType(v)),
    }
}

/// Normalize a socket event. `Ok(None)` means the event is not call related.
pub fn normalize_socket_event(
    name: &str,
    payload: &Value,
) -> Result<Option<NormalizedCallEvent>, EventError> {
    if !matches!(
        name,
        SOCKET_INCOMING_CALL | SOCKET_CALL_DECLINED | SOCKET_CALL_ENDED
    ) {
        return Ok(None);
    }

    let payload: SocketCallPayload = serde_json::from_value(payload.clone())?;
    let call_id = required(payload.call_id, "callId")?;

    let event = match name {
        SOCKET_CALL_DECLINED => NormalizedCallEvent::Declined { call_id },
        SOCKET_CALL_ENDED => NormalizedCallEvent::Ended { call_id },
        _ => {
            let caller = payload.caller.ok_or(EventError::MissingField("caller"))?;
            let caller_id = required(caller.id, "caller._id")?;
            let caller_name = non_empty(caller.full_name)
                .or_else(|| non_empty(caller.username))
                .unwrap_or_else(|| "Unknown".to_string());
            NormalizedCallEvent::Incoming(CallOffer {
                call_id,
                caller_id,
                caller_name,
                caller_image: non_empty(caller.profile_image_url),
                chat_id: required(payload.chat_id, "chatId")?,
                call_type: call_type(payload.call_type)?,
            })
        }
    };
    Ok(Some(event))
}

/// Build an offer from push data (foreground push or relayed action).
pub fn offer_from_push(data: PushCallData) -> Result<CallOffer, EventError> {
    Ok(CallOffer {
        call_id: required(data.call_id, "callId")?,
        caller_id: required(data.caller_id, "callerId")?,
        caller_name: non_empty(data.caller_name).unwrap_or_else(|| "Unknown".to_string()),
        caller_image: non_empty(data.caller_image),
        chat_id: required(data.chat_id, "chatId")?,
        call_type: call_type(data.call_type)?,
    })
}

/// Normalize a foreground push message.
pub fn normalize_push(data: PushCallData) -> Result<NormalizedCallEvent, EventError> {
    let kind = non_empty(data.kind.clone());
    match kind.as_deref() {
        None | Some(SOCKET_INCOMING_CALL) => Ok(NormalizedCallEvent::Incoming(offer_from_push(data)?)),
        Some(SOCKET_CALL_DECLINED) => Ok(NormalizedCallEvent::Declined {
            call_id: required(data.call_id, "callId")?,
        }),
        Some(SOCKET_CALL_ENDED) => Ok(NormalizedCallEvent::Ended {
            call_id: required(data.call_id, "callId")?,
        }),
        Some(other) => Err(EventError::UnknownPushType(other.to_string())),
    }
}
