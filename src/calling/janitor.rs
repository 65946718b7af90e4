//! Stale call cleanup.
//!
//! A crash or restart during a call leaves the server record live with
//! nobody on this end. On startup we ask the backend for our active call
//! and cancel it before accepting anything new.

use anyhow::Result;

use super::EndReason;
use crate::api::SignalingBackend;

/// End any call the backend still has active for us. Returns its id.
pub async fn sweep(backend: &dyn SignalingBackend) -> Result<Option<String>> {
    let Some(stale) = backend.get_active_call().await? else {
        tracing::debug!("No stale call to clean up");
        return Ok(None);
    };
    tracing::info!(
        "Cancelling stale call {} (status {})",
        stale.call_id,
        stale.status.as_deref().unwrap_or("unknown")
    );
    backend.end_call(&stale.call_id, EndReason::Cancelled).await?;
    Ok(Some(stale.call_id))
}

/// Best-effort variant used at startup: failures are only logged.
pub async fn sweep_logged(backend: &dyn SignalingBackend) {
    match sweep(backend).await {
        Ok(Some(call_id)) => tracing::info!("Stale call {} cleaned up", call_id),
        Ok(None) => {}
        Err(e) => tracing::warn!("Stale call cleanup failed: {:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AcceptedCall, ActiveCall};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Backend {
        active: Option<&'static str>,
        fail_lookup: bool,
        ended: Mutex<Vec<(String, EndReason)>>,
    }

    #[async_trait]
    impl SignalingBackend for Backend {
        async fn accept_call(&self, _call_id: &str) -> Result<AcceptedCall> {
            Ok(AcceptedCall::default())
        }
        async fn decline_call(&self, _call_id: &str) -> Result<()> {
            Ok(())
        }
        async fn end_call(&self, call_id: &str, reason: EndReason) -> Result<()> {
            self.ended.lock().unwrap().push((call_id.to_string(), reason));
            Ok(())
        }
        async fn get_active_call(&self) -> Result<Option<ActiveCall>> {
            if self.fail_lookup {
                bail!("HTTP 500");
            }
            Ok(self.active.map(|id| ActiveCall {
                call_id: id.to_string(),
                chat_id: None,
                call_type: None,
                status: Some("active".into()),
            }))
        }
    }

    #[tokio::test]
    async fn test_stale_call_is_cancelled() {
        let backend = Backend {
            active: Some("old"),
            fail_lookup: false,
            ended: Mutex::new(Vec::new()),
        };
        assert_eq!(sweep(&backend).await.unwrap().as_deref(), Some("old"));
        assert_eq!(
            *backend.ended.lock().unwrap(),
            vec![("old".to_string(), EndReason::Cancelled)]
        );
    }

    #[test]
    fn test_nothing_to_clean() {
        let backend = Backend {
            active: None,
            fail_lookup: false,
            ended: Mutex::new(Vec::new()),
        };
        let swept = tokio_test::assert_ok!(tokio_test::block_on(sweep(&backend)));
        assert!(swept.is_none());
        assert!(backend.ended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_swallowed_by_logged_sweep() {
        let backend = Backend {
            active: None,
            fail_lookup: true,
            ended: Mutex::new(Vec::new()),
        };
        assert!(sweep(&backend).await.is_err());
        sweep_logged(&backend).await;
    }
}
