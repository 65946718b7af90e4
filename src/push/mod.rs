//! Push notification channel
//!
//! The platform notification helper forwards push payloads over a local TCP
//! socket, one JSON object per line. Two shapes arrive here:
//!
//! - foreground call data, `{"callId": .., "callerId": .., "type": "incoming_call"}`
//!   (a missing `type` means an incoming call)
//! - notification actions, `{"type": "ACCEPT_CALL" | "DECLINE_CALL", "data": {..}}`

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::calling::coordinator::CallHandle;
use crate::calling::events::{self, EventError, PushCallData};
use crate::calling::relay::{self, ActionMessage, NotificationAction, ACCEPT_CALL, DECLINE_CALL};
use crate::calling::NormalizedCallEvent;

/// A decoded line from the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    Event(NormalizedCallEvent),
    Action(NotificationAction),
}

pub fn parse_line(line: &str) -> Result<PushMessage, EventError> {
    let value: Value = serde_json::from_str(line)?;
    let is_action = matches!(
        value.get("type").and_then(Value::as_str),
        Some(ACCEPT_CALL) | Some(DECLINE_CALL)
    );

    if is_action {
        let message: ActionMessage = serde_json::from_value(value)?;
        let action = NotificationAction::parse(message)?
            .ok_or_else(|| EventError::UnknownPushType("action".to_string()))?;
        return Ok(PushMessage::Action(action));
    }

    let data: PushCallData = serde_json::from_value(value)?;
    Ok(PushMessage::Event(events::normalize_push(data)?))
}

/// Accept helper connections on `addr` until the task is aborted.
pub async fn listen(addr: String, handle: CallHandle) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind push listener on {}", addr))?;
    tracing::info!("Push channel listening on {}", addr);

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("Push listener accept failed")?;
        tracing::debug!("Push helper connected from {}", peer);
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, handle).await {
                tracing::warn!("Push connection from {} failed: {:#}", peer, e);
            }
        });
    }
}

async fn serve(stream: TcpStream, handle: CallHandle) -> Result<()> {
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(PushMessage::Event(event)) => handle.deliver(event),
            Ok(PushMessage::Action(action)) => {
                // Accept waits out the settle delay; keep reading meanwhile.
                let handle = handle.clone();
                tokio::spawn(async move { relay::relay(&handle, action).await });
            }
            Err(e) => tracing::warn!("Dropping malformed push message: {}", e),
        }
    }
    tracing::debug!("Push helper disconnected");
    Ok(())
}
