//! Engine.IO v4 / Socket.IO text packet parsing
//!
//! Only the default namespace is used. Packets we care about:
//! `0{..}` open, `2`/`3` ping/pong, `40` connected, `44{..}` connect error,
//! `42[name, payload]` event (optionally `42<ack id>[...]`), `41` disconnect.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

/// Values from the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenInfo {
    pub sid: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPacket {
    sid: String,
    ping_interval: u64,
    ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Connected,
    ConnectError(String),
    Disconnect,
    Event { name: String, payload: Value },
    Malformed(String),
    Other,
}

pub const PONG: &str = "3";

/// Namespace connect packet carrying the bearer token as auth payload.
pub fn connect_packet(token: &str) -> String {
    format!("40{}", serde_json::json!({ "token": token }))
}

/// Loggable form of an outgoing packet. Connect packets carry the bearer
/// token, so only their type is shown.
pub fn redacted(text: &str) -> &str {
    if text.starts_with("40") {
        "40{<auth redacted>}"
    } else {
        text
    }
}

/// Ack id of a `42<id>[...]` event, if the server asked for one.
pub fn event_ack_id(text: &str) -> Option<u64> {
    let rest = text.strip_prefix("42")?;
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Empty acknowledgement for event `id`.
pub fn ack_packet(id: u64) -> String {
    format!("43{}[]", id)
}

pub fn parse(text: &str) -> Frame {
    match text.chars().next() {
        Some('0') => parse_open(&text[1..]),
        Some('1') => Frame::Close,
        Some('2') => Frame::Ping,
        Some('3') => Frame::Pong,
        Some('4') => parse_socketio(&text[1..]),
        _ => Frame::Other,
    }
}

fn parse_open(body: &str) -> Frame {
    match serde_json::from_str::<OpenPacket>(body) {
        Ok(p) => Frame::Open(OpenInfo {
            sid: p.sid,
            ping_interval: Duration::from_millis(p.ping_interval),
            ping_timeout: Duration::from_millis(p.ping_timeout),
        }),
        Err(e) => Frame::Malformed(format!("open packet: {}", e)),
    }
}

fn parse_socketio(body: &str) -> Frame {
    let Some(kind) = body.chars().next() else {
        return Frame::Other;
    };
    let rest = &body[kind.len_utf8()..];
    match kind {
        '0' => Frame::Connected,
        '1' => Frame::Disconnect,
        '2' => parse_event(rest),
        '4' => {
            let message = serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| rest.to_string());
            Frame::ConnectError(message)
        }
        _ => Frame::Other,
    }
}

fn parse_event(body: &str) -> Frame {
    // Skip an optional numeric ack id.
    let json = body.trim_start_matches(|c: char| c.is_ascii_digit());
    let items = match serde_json::from_str::<Value>(json) {
        Ok(Value::Array(items)) => items,
        Ok(_) => return Frame::Malformed("event is not an array".to_string()),
        Err(e) => return Frame::Malformed(format!("event: {}", e)),
    };
    let mut items = items.into_iter();
    match items.next() {
        Some(Value::String(name)) => Frame::Event {
            name,
            payload: items.next().unwrap_or(Value::Null),
        },
        _ => Frame::Malformed("event without a name".to_string()),
    }
}
