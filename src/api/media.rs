//! Media credential issuance and media room creation.
//!
//! Tokens are cached: a still-valid token is handed out again without a
//! round trip, so callers must not assume a fresh token per call.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::client::ApiClient;
use crate::calling::{CallType, MediaCredential, RoomKind};

/// Remaining lifetime below which a cached token is refetched.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Issues tokens for joining media rooms.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn media_credential(&self) -> Result<MediaCredential>;
}

/// Creates or joins the media room behind a call.
#[async_trait]
pub trait MediaRooms: Send + Sync {
    async fn create_or_join(&self, request: &RoomRequest) -> Result<RoomInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    #[serde(skip)]
    pub call_id: String,
    pub call_type: CallType,
    pub members: Vec<String>,
    pub video_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_kind: Option<RoomKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: Option<String>,
    pub room_kind: Option<RoomKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    /// Seconds until expiry.
    expires_in: Option<i64>,
}

#[async_trait]
impl CredentialSource for ApiClient {
    async fn media_credential(&self) -> Result<MediaCredential> {
        let resp: TokenResponse = self
            .post_data("/api/v1/calls/media-token", &serde_json::json!({}))
            .await?
            .context("Media token response had no data")?;
        tracing::debug!("Issued media token (expires in {:?}s)", resp.expires_in);
        Ok(MediaCredential {
            token: resp.token,
            expires_at: resp
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

#[async_trait]
impl MediaRooms for ApiClient {
    async fn create_or_join(&self, request: &RoomRequest) -> Result<RoomInfo> {
        tracing::info!(
            "Creating media room for call {} ({}, video={})",
            request.call_id,
            request.call_type.as_str(),
            request.video_enabled
        );
        let body = serde_json::to_value(request).context("Failed to encode room request")?;
        let room: Option<RoomInfo> = self
            .post_data(&format!("/api/v1/calls/{}/room", request.call_id), &body)
            .await
            .with_context(|| format!("Room creation for call {} failed", request.call_id))?;
        room.context("Room response had no data")
    }
}

/// Caches the last issued credential until it nears expiry.
pub struct CachedCredentials {
    source: Arc<dyn CredentialSource>,
    cached: Mutex<Option<MediaCredential>>,
}

impl CachedCredentials {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CredentialSource for CachedCredentials {
    async fn media_credential(&self) -> Result<MediaCredential> {
        // Held across the fetch so concurrent accepts share one request.
        let mut cached = self.cached.lock().await;
        if let Some(ref cred) = *cached {
            if cred.valid_for(chrono::Duration::seconds(REFRESH_MARGIN_SECS)) {
                tracing::debug!("Reusing cached media credential");
                return Ok(cred.clone());
            }
        }
        let fresh = self
            .source
            .media_credential()
            .await
            .context("Media credential request failed")?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }
}
