//! Call signaling endpoints: accept, decline, end, active-call lookup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::client::ApiClient;
use crate::calling::{CallType, EndReason, RoomKind};

/// Server side of the call lifecycle.
#[async_trait]
pub trait SignalingBackend: Send + Sync {
    async fn accept_call(&self, call_id: &str) -> Result<AcceptedCall>;
    async fn decline_call(&self, call_id: &str) -> Result<()>;
    async fn end_call(&self, call_id: &str, reason: EndReason) -> Result<()>;
    async fn get_active_call(&self) -> Result<Option<ActiveCall>>;
}

/// Backend answer to an accept. The room kind, when present, is the
/// backend's decision and is passed on to the room request unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedCall {
    pub room_kind: Option<RoomKind>,
}

/// Call record the backend still considers live for this user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCall {
    #[serde(alias = "_id")]
    pub call_id: String,
    pub chat_id: Option<String>,
    pub call_type: Option<CallType>,
    pub status: Option<String>,
}

/// Reject ids that would escape the `/calls/{id}` path segment.
fn call_path(call_id: &str, action: &str) -> Result<String> {
    anyhow::ensure!(
        !call_id.is_empty() && !call_id.contains(['/', '?', '#']),
        "Invalid call id {:?}",
        call_id
    );
    Ok(format!("/api/v1/calls/{}/{}", call_id, action))
}

#[async_trait]
impl SignalingBackend for ApiClient {
    async fn accept_call(&self, call_id: &str) -> Result<AcceptedCall> {
        tracing::info!("Accepting call {} -> backend", call_id);
        let accepted: Option<AcceptedCall> = self
            .post_data(&call_path(call_id, "accept")?, &serde_json::json!({}))
            .await
            .with_context(|| format!("Accept call {} failed", call_id))?;
        Ok(accepted.unwrap_or_default())
    }

    async fn decline_call(&self, call_id: &str) -> Result<()> {
        tracing::info!("Declining call {} -> backend", call_id);
        self.post_data::<serde_json::Value>(&call_path(call_id, "decline")?, &serde_json::json!({}))
            .await
            .with_context(|| format!("Decline call {} failed", call_id))?;
        Ok(())
    }

    async fn end_call(&self, call_id: &str, reason: EndReason) -> Result<()> {
        tracing::info!("Ending call {} ({}) -> backend", call_id, reason.as_str());
        self.post_data::<serde_json::Value>(
            &call_path(call_id, "end")?,
            &serde_json::json!({ "endReason": reason }),
        )
        .await
        .with_context(|| format!("End call {} failed", call_id))?;
        Ok(())
    }

    async fn get_active_call(&self) -> Result<Option<ActiveCall>> {
        self.get_data("/api/v1/calls/active")
            .await
            .context("Active call lookup failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_path() {
        assert_eq!(
            call_path("abc123", "end").unwrap(),
            "/api/v1/calls/abc123/end"
        );
        assert!(call_path("", "end").is_err());
        assert!(call_path("../users", "end").is_err());
    }

    #[test]
    fn test_active_call_accepts_mongo_id() {
        let call: ActiveCall = serde_json::from_str(
            r#"{"_id":"c1","chatId":"chat9","callType":"video","status":"active"}"#,
        )
        .unwrap();
        assert_eq!(call.call_id, "c1");
        assert_eq!(call.call_type, Some(CallType::Video));
    }

    #[test]
    fn test_accepted_call_room_kind_optional() {
        let accepted: AcceptedCall = serde_json::from_str(r#"{"roomKind":"audio"}"#).unwrap();
        assert_eq!(accepted.room_kind, Some(RoomKind::Audio));
        let accepted: AcceptedCall = serde_json::from_str(r#"{"status":"accepted"}"#).unwrap();
        assert!(accepted.room_kind.is_none());
    }
}
