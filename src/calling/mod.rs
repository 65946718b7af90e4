//! Call signaling core: call offers, sessions and the state machine that
//! reconciles events from the socket and push channels.
//!
//! Media itself is handled by an external room provider; this module only
//! decides when a call is ringing, being accepted, active, or gone.

pub mod bootstrap;
pub mod coordinator;
pub mod events;
pub mod janitor;
pub mod machine;
pub mod navigation;
pub mod relay;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media kind requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl CallType {
    /// Parse the wire value. Both channels send lowercase strings, but the
    /// push payload has been seen with `audio` for voice calls.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "voice" | "audio" => Some(CallType::Voice),
            "video" => Some(CallType::Video),
            _ => None,
        }
    }

    pub fn is_video(self) -> bool {
        self == CallType::Video
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallType::Voice => "voice",
            CallType::Video => "video",
        }
    }
}

/// Kind of media room backing a session. Decided by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Audio-only room variant used for some voice calls.
    Audio,
    /// Default full room (video capable).
    #[serde(alias = "default")]
    Video,
}

/// An incoming call that has not been accepted or declined yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOffer {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub caller_image: Option<String>,
    pub chat_id: String,
    pub call_type: CallType,
}

/// The call currently active on this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub call_id: String,
    pub chat_id: String,
    pub call_type: CallType,
    pub is_initiator: bool,
    pub room_id: Option<String>,
    pub room_kind: Option<RoomKind>,
    pub started_at: DateTime<Utc>,
}

/// Opaque token for joining a media room.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaCredential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MediaCredential {
    /// Whether the token is still usable `margin` from now.
    pub fn valid_for(&self, margin: chrono::Duration) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() + margin < exp,
            None => true,
        }
    }
}

// Keep the token itself out of logs.
impl std::fmt::Debug for MediaCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCredential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Reason attached to an end-call request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Ended,
    Cancelled,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Ended => "ended",
            EndReason::Cancelled => "cancelled",
        }
    }
}

/// Canonical call lifecycle signal, whatever transport delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedCallEvent {
    Incoming(CallOffer),
    Declined { call_id: String },
    Ended { call_id: String },
}

impl NormalizedCallEvent {
    pub fn call_id(&self) -> &str {
        match self {
            NormalizedCallEvent::Incoming(offer) => &offer.call_id,
            NormalizedCallEvent::Declined { call_id } | NormalizedCallEvent::Ended { call_id } => {
                call_id
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedCallEvent::Incoming(_) => "incoming",
            NormalizedCallEvent::Declined { .. } => "declined",
            NormalizedCallEvent::Ended { .. } => "ended",
        }
    }
}
