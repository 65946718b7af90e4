//! Notification action relay.
//!
//! Accept/Decline pressed on a system notification reaches us from the
//! notification helper, outside any interaction with our own prompt. Both
//! actions are turned into ordinary coordinator commands so they follow the
//! same transitions as in-app actions.

use serde::Deserialize;

use super::coordinator::{CallHandle, Command};
use super::events::{self, EventError, PushCallData};
use super::{CallOffer, NormalizedCallEvent};

pub const ACCEPT_CALL: &str = "ACCEPT_CALL";
pub const DECLINE_CALL: &str = "DECLINE_CALL";

/// Action message from the notification helper.
#[derive(Debug, Deserialize)]
pub struct ActionMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: PushCallData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationAction {
    Accept(CallOffer),
    Decline { call_id: String },
}

impl NotificationAction {
    /// `Ok(None)` when `kind` is not a call action.
    pub fn parse(message: ActionMessage) -> Result<Option<Self>, EventError> {
        match message.kind.as_str() {
            ACCEPT_CALL => Ok(Some(NotificationAction::Accept(events::offer_from_push(
                message.data,
            )?))),
            DECLINE_CALL => {
                let call_id = message
                    .data
                    .call_id
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(EventError::MissingField("callId"))?;
                Ok(Some(NotificationAction::Decline { call_id }))
            }
            _ => Ok(None),
        }
    }
}

/// Feed a notification action into the coordinator.
///
/// Accept synthesizes the offer first, waits for it to settle, then accepts
/// that exact call, the same as answering from the in-app prompt.
pub async fn relay(handle: &CallHandle, action: NotificationAction) {
    match action {
        NotificationAction::Accept(offer) => {
            let call_id = offer.call_id.clone();
            tracing::info!("Notification accept for call {}", call_id);
            handle.deliver(NormalizedCallEvent::Incoming(offer));
            tokio::time::sleep(handle.relay_settle()).await;
            handle.send(Command::Accept {
                call_id: Some(call_id),
            });
        }
        NotificationAction::Decline { call_id } => {
            tracing::info!("Notification decline for call {}", call_id);
            handle.send(Command::NotificationDecline { call_id });
        }
    }
}
