//! Accept handshake: from a ringing offer to a joined media room.
//!
//! 1. Media credential and backend acceptance, concurrently.
//! 2. Room creation, once both have resolved.
//! 3. Session handed back to the machine.
//!
//! Any failing step fails the whole attempt. There is no retry: the caller
//! on the other side cannot tell an accept is being retried.

use chrono::Utc;
use thiserror::Error;

use super::{CallOffer, CallSession, MediaCredential};
use crate::api::{CredentialSource, MediaRooms, RoomRequest, SignalingBackend};

/// Which step of the handshake failed.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not get a media credential: {0:#}")]
    Credential(anyhow::Error),
    #[error("the server did not accept the call: {0:#}")]
    Accept(anyhow::Error),
    #[error("could not join the call room: {0:#}")]
    Room(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct Bootstrapped {
    pub session: CallSession,
    pub credential: MediaCredential,
}

/// Run the accept handshake for `offer` on behalf of `self_id`.
pub async fn run(
    offer: &CallOffer,
    self_id: &str,
    backend: &dyn SignalingBackend,
    credentials: &dyn CredentialSource,
    rooms: &dyn MediaRooms,
) -> Result<Bootstrapped, BootstrapError> {
    tracing::info!("Bootstrapping call {}", offer.call_id);

    let (credential, accepted) = tokio::join!(
        credentials.media_credential(),
        backend.accept_call(&offer.call_id),
    );
    let credential = credential.map_err(BootstrapError::Credential)?;
    let accepted = accepted.map_err(BootstrapError::Accept)?;

    let request = RoomRequest {
        call_id: offer.call_id.clone(),
        call_type: offer.call_type,
        members: vec![offer.caller_id.clone(), self_id.to_string()],
        video_enabled: offer.call_type.is_video(),
        room_kind: accepted.room_kind,
    };
    let room = rooms
        .create_or_join(&request)
        .await
        .map_err(BootstrapError::Room)?;

    let session = CallSession {
        call_id: offer.call_id.clone(),
        chat_id: offer.chat_id.clone(),
        call_type: offer.call_type,
        is_initiator: false,
        room_id: room.room_id,
        room_kind: room.room_kind.or(accepted.room_kind),
        started_at: Utc::now(),
    };
    Ok(Bootstrapped {
        session,
        credential,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AcceptedCall, ActiveCall, RoomInfo};
    use crate::calling::{CallType, EndReason, RoomKind};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Fakes {
        fail_credential: bool,
        fail_accept: bool,
        fail_room: bool,
        accept_kind: Option<RoomKind>,
        room_kind: Option<RoomKind>,
        room_requests: Mutex<Vec<RoomRequest>>,
    }

    #[async_trait]
    impl SignalingBackend for Fakes {
        async fn accept_call(&self, _call_id: &str) -> Result<AcceptedCall> {
            if self.fail_accept {
                bail!("409 call already ended");
            }
            Ok(AcceptedCall {
                room_kind: self.accept_kind,
            })
        }
        async fn decline_call(&self, _call_id: &str) -> Result<()> {
            Ok(())
        }
        async fn end_call(&self, _call_id: &str, _reason: EndReason) -> Result<()> {
            Ok(())
        }
        async fn get_active_call(&self) -> Result<Option<ActiveCall>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl CredentialSource for Fakes {
        async fn media_credential(&self) -> Result<MediaCredential> {
            if self.fail_credential {
                bail!("token service down");
            }
            Ok(MediaCredential {
                token: "tok".into(),
                expires_at: None,
            })
        }
    }

    #[async_trait]
    impl MediaRooms for Fakes {
        async fn create_or_join(&self, request: &RoomRequest) -> Result<RoomInfo> {
            self.room_requests.lock().unwrap().push(request.clone());
            if self.fail_room {
                bail!("room service down");
            }
            Ok(RoomInfo {
                room_id: Some("room-1".into()),
                room_kind: self.room_kind,
            })
        }
    }

    fn offer(call_type: CallType) -> CallOffer {
        CallOffer {
            call_id: "c1".into(),
            caller_id: "u2".into(),
            caller_name: "Asha".into(),
            caller_image: None,
            chat_id: "chat9".into(),
            call_type,
        }
    }

    async fn bootstrap(fakes: &Fakes, call_type: CallType) -> Result<Bootstrapped, BootstrapError> {
        run(&offer(call_type), "u1", fakes, fakes, fakes).await
    }

    #[tokio::test]
    async fn test_success_builds_session() {
        let fakes = Fakes {
            room_kind: Some(RoomKind::Video),
            ..Default::default()
        };
        let done = bootstrap(&fakes, CallType::Video).await.unwrap();
        assert_eq!(done.session.call_id, "c1");
        assert_eq!(done.session.chat_id, "chat9");
        assert_eq!(done.session.room_id.as_deref(), Some("room-1"));
        assert!(!done.session.is_initiator);
        assert_eq!(done.credential.token, "tok");

        let requests = fakes.room_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].members, vec!["u2".to_string(), "u1".to_string()]);
        assert!(requests[0].video_enabled);
    }

    #[tokio::test]
    async fn test_room_kind_comes_from_backend() {
        let fakes = Fakes {
            accept_kind: Some(RoomKind::Audio),
            ..Default::default()
        };
        let done = bootstrap(&fakes, CallType::Voice).await.unwrap();
        assert_eq!(done.session.room_kind, Some(RoomKind::Audio));
        let requests = fakes.room_requests.lock().unwrap();
        assert_eq!(requests[0].room_kind, Some(RoomKind::Audio));
        assert!(!requests[0].video_enabled);
    }

    #[tokio::test]
    async fn test_room_not_requested_when_accept_fails() {
        let fakes = Fakes {
            fail_accept: true,
            ..Default::default()
        };
        let err = bootstrap(&fakes, CallType::Voice).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Accept(_)));
        assert!(fakes.room_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credential_failure() {
        let fakes = Fakes {
            fail_credential: true,
            ..Default::default()
        };
        let err = bootstrap(&fakes, CallType::Voice).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Credential(_)));
        assert!(err.to_string().contains("token service down"));
    }

    #[tokio::test]
    async fn test_room_failure() {
        let fakes = Fakes {
            fail_room: true,
            ..Default::default()
        };
        let err = bootstrap(&fakes, CallType::Video).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Room(_)));
    }
}
