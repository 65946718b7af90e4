//! Call session state machine.
//!
//! A pure transition function: every producer (socket, push, notification
//! relay, user actions, bootstrap results) is turned into an [`Input`], and
//! [`CallMachine::apply`] returns the side effects for the coordinator to
//! run. Nothing in here performs I/O.
//!
//! States: `idle -> incoming -> bootstrapping -> active -> idle`, with any
//! non-idle state falling back to `idle` on decline, end or failure.
//!
//! Every input that names a call is checked against the live offer or
//! session. Late or duplicated events (both channels usually deliver the
//! same one) find no matching call and do nothing.

use chrono::Utc;

use super::navigation::PreCallRoute;
use super::{CallOffer, CallSession, EndReason, MediaCredential, NormalizedCallEvent};

/// Where the machine currently is. Holding the offer and session inside the
/// variants keeps at most one of each alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Incoming(CallOffer),
    /// Accept in progress. The offer stays until the session is up.
    Bootstrapping(CallOffer),
    Active {
        session: CallSession,
        credential: MediaCredential,
    },
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Incoming(_) => "incoming",
            Phase::Bootstrapping(_) => "bootstrapping",
            Phase::Active { .. } => "active",
        }
    }

    /// Call id of the live offer or session, if any.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Phase::Idle => None,
            Phase::Incoming(offer) | Phase::Bootstrapping(offer) => Some(&offer.call_id),
            Phase::Active { session, .. } => Some(&session.call_id),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Input {
    /// Normalized signal from the socket or push channel.
    Event(NormalizedCallEvent),
    /// User accepted. `call_id` pins the accept to one offer (notification
    /// relay); `None` accepts whatever is ringing.
    Accept {
        call_id: Option<String>,
        current_route: String,
    },
    /// User declined the ringing call.
    Decline,
    /// User hung up.
    End,
    /// Decline pressed on a system notification. The page may never have
    /// seen the offer.
    NotificationDecline { call_id: String },
    BootstrapSucceeded {
        call_id: String,
        session: CallSession,
        credential: MediaCredential,
    },
    BootstrapFailed { call_id: String, error: String },
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Bootstrap(CallOffer),
    NotifyDecline { call_id: String },
    NotifyEnd { call_id: String, reason: EndReason },
    RestoreRoute(String),
    SurfaceError(String),
}

/// Read-only view handed to UI consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSnapshot {
    pub incoming_call: Option<CallOffer>,
    pub current_call: Option<CallSession>,
    pub is_call_ui_open: bool,
    pub is_accepting: bool,
    pub media_credential: Option<MediaCredential>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct CallMachine {
    phase: Phase,
    pre_call_route: PreCallRoute,
    last_error: Option<String>,
}

impl Default for CallMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            pre_call_route: PreCallRoute::default(),
            last_error: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn saved_route(&self) -> Option<&str> {
        self.pre_call_route.get()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let mut snapshot = CallSnapshot {
            last_error: self.last_error.clone(),
            ..Default::default()
        };
        match &self.phase {
            Phase::Idle => {}
            Phase::Incoming(offer) => snapshot.incoming_call = Some(offer.clone()),
            Phase::Bootstrapping(offer) => {
                snapshot.incoming_call = Some(offer.clone());
                snapshot.is_accepting = true;
            }
            Phase::Active {
                session,
                credential,
            } => {
                snapshot.current_call = Some(session.clone());
                snapshot.media_credential = Some(credential.clone());
                snapshot.is_call_ui_open = true;
            }
        }
        snapshot
    }

    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Event(NormalizedCallEvent::Incoming(offer)) => self.on_incoming(offer),
            Input::Event(NormalizedCallEvent::Declined { call_id }) => {
                self.on_remote_termination(&call_id, "declined")
            }
            Input::Event(NormalizedCallEvent::Ended { call_id }) => {
                self.on_remote_termination(&call_id, "ended")
            }
            Input::Accept {
                call_id,
                current_route,
            } => self.on_accept(call_id.as_deref(), current_route),
            Input::Decline => self.on_decline(),
            Input::End => self.on_end(),
            Input::NotificationDecline { call_id } => self.on_notification_decline(call_id),
            Input::BootstrapSucceeded {
                call_id,
                session,
                credential,
            } => self.on_bootstrap_succeeded(&call_id, session, credential),
            Input::BootstrapFailed { call_id, error } => {
                self.on_bootstrap_failed(&call_id, error)
            }
        }
    }

    fn on_incoming(&mut self, offer: CallOffer) -> Vec<Effect> {
        let live = self.phase.call_id().map(str::to_string);
        match live.as_deref() {
            None => {
                tracing::info!(
                    "Incoming {} call {} from {} ({})",
                    offer.call_type.as_str(),
                    offer.call_id,
                    offer.caller_name,
                    offer.caller_id
                );
                self.last_error = None;
                self.phase = Phase::Incoming(offer);
            }
            Some(live) if live == offer.call_id => {
                tracing::debug!("Duplicate incoming event for call {}", offer.call_id);
            }
            Some(live) => {
                // One slot only: the first call keeps it.
                tracing::info!(
                    "Ignoring incoming call {} from {}: busy with call {} ({})",
                    offer.call_id,
                    offer.caller_name,
                    live,
                    self.phase.name()
                );
            }
        }
        Vec::new()
    }

    fn on_remote_termination(&mut self, call_id: &str, what: &str) -> Vec<Effect> {
        if self.phase.call_id() != Some(call_id) {
            tracing::debug!(
                "Ignoring remote {} for call {} (live: {:?})",
                what,
                call_id,
                self.phase.call_id()
            );
            return Vec::new();
        }
        tracing::info!(
            "Call {} {} remotely while {}",
            call_id,
            what,
            self.phase.name()
        );
        if let Phase::Active { session, .. } = &self.phase {
            log_duration(session);
        }
        self.to_idle()
    }

    fn on_accept(&mut self, call_id: Option<&str>, current_route: String) -> Vec<Effect> {
        let offer = match &self.phase {
            Phase::Incoming(offer) if call_id.map_or(true, |id| id == offer.call_id) => {
                offer.clone()
            }
            phase => {
                tracing::warn!(
                    "Accept for {:?} ignored while {} (live: {:?})",
                    call_id,
                    phase.name(),
                    phase.call_id()
                );
                return Vec::new();
            }
        };
        tracing::info!("Accepting call {}", offer.call_id);
        self.pre_call_route.save(current_route);
        self.last_error = None;
        self.phase = Phase::Bootstrapping(offer.clone());
        vec![Effect::Bootstrap(offer)]
    }

    fn on_decline(&mut self) -> Vec<Effect> {
        let Phase::Incoming(offer) = &self.phase else {
            tracing::warn!("Decline ignored while {}", self.phase.name());
            return Vec::new();
        };
        let call_id = offer.call_id.clone();
        tracing::info!("Declining call {}", call_id);
        let mut effects = self.to_idle();
        effects.push(Effect::NotifyDecline { call_id });
        effects
    }

    fn on_notification_decline(&mut self, call_id: String) -> Vec<Effect> {
        let ringing = matches!(&self.phase, Phase::Incoming(offer) if offer.call_id == call_id);
        let mut effects = if ringing {
            tracing::info!("Declining call {} from notification", call_id);
            self.to_idle()
        } else {
            tracing::info!("Declining call {} from notification (not ringing here)", call_id);
            Vec::new()
        };
        effects.push(Effect::NotifyDecline { call_id });
        effects
    }

    fn on_end(&mut self) -> Vec<Effect> {
        let (call_id, reason) = match &self.phase {
            Phase::Active { session, .. } => {
                log_duration(session);
                (session.call_id.clone(), EndReason::Ended)
            }
            // Hanging up while the accept is still in flight cancels it; the
            // late bootstrap result is discarded by the call-id guard.
            Phase::Bootstrapping(offer) => (offer.call_id.clone(), EndReason::Cancelled),
            phase => {
                tracing::warn!("End ignored while {}", phase.name());
                return Vec::new();
            }
        };
        tracing::info!("Ending call {} ({})", call_id, reason.as_str());
        // Local hangup wins: state is cleared before the backend hears about it.
        let mut effects = self.to_idle();
        effects.push(Effect::NotifyEnd { call_id, reason });
        effects
    }

    fn on_bootstrap_succeeded(
        &mut self,
        call_id: &str,
        session: CallSession,
        credential: MediaCredential,
    ) -> Vec<Effect> {
        let live = matches!(&self.phase, Phase::Bootstrapping(offer) if offer.call_id == call_id);
        if !live {
            tracing::info!(
                "Discarding bootstrap result for call {}: no longer live ({})",
                call_id,
                self.phase.name()
            );
            return Vec::new();
        }
        tracing::info!(
            "Call {} active (room {:?}, kind {:?})",
            call_id,
            session.room_id,
            session.room_kind
        );
        self.phase = Phase::Active {
            session,
            credential,
        };
        Vec::new()
    }

    fn on_bootstrap_failed(&mut self, call_id: &str, error: String) -> Vec<Effect> {
        match &self.phase {
            Phase::Bootstrapping(offer) if offer.call_id == call_id => {}
            phase => {
                tracing::debug!(
                    "Ignoring bootstrap failure for call {} while {}: {}",
                    call_id,
                    phase.name(),
                    error
                );
                return Vec::new();
            }
        }
        tracing::error!("Failed to join call {}: {}", call_id, error);
        let mut effects = self.to_idle();
        self.last_error = Some(error.clone());
        effects.insert(0, Effect::SurfaceError(error));
        effects
    }

    /// Drop the live offer/session and hand back the saved route, if any.
    fn to_idle(&mut self) -> Vec<Effect> {
        self.phase = Phase::Idle;
        self.pre_call_route
            .take()
            .map(Effect::RestoreRoute)
            .into_iter()
            .collect()
    }
}

fn log_duration(session: &CallSession) {
    let secs = (Utc::now() - session.started_at).num_seconds().max(0);
    tracing::info!(
        "Call {} lasted {}m{:02}s",
        session.call_id,
        secs / 60,
        secs % 60
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calling::{CallType, RoomKind};

    fn offer(id: &str) -> CallOffer {
        CallOffer {
            call_id: id.into(),
            caller_id: "u2".into(),
            caller_name: "Asha".into(),
            caller_image: None,
            chat_id: "chat9".into(),
            call_type: CallType::Video,
        }
    }

    fn session(id: &str) -> CallSession {
        CallSession {
            call_id: id.into(),
            chat_id: "chat9".into(),
            call_type: CallType::Video,
            is_initiator: false,
            room_id: Some("room-1".into()),
            room_kind: Some(RoomKind::Video),
            started_at: Utc::now(),
        }
    }

    fn credential() -> MediaCredential {
        MediaCredential {
            token: "tok".into(),
            expires_at: None,
        }
    }

    fn accept(route: &str) -> Input {
        Input::Accept {
            call_id: None,
            current_route: route.into(),
        }
    }

    fn ended(id: &str) -> Input {
        Input::Event(NormalizedCallEvent::Ended { call_id: id.into() })
    }

    fn declined(id: &str) -> Input {
        Input::Event(NormalizedCallEvent::Declined { call_id: id.into() })
    }

    fn incoming(id: &str) -> Input {
        Input::Event(NormalizedCallEvent::Incoming(offer(id)))
    }

    /// Drive a machine to `active` for `id`, starting from `/feed`.
    fn active_machine(id: &str) -> CallMachine {
        let mut m = CallMachine::new();
        m.apply(incoming(id));
        m.apply(accept("/feed"));
        m.apply(Input::BootstrapSucceeded {
            call_id: id.into(),
            session: session(id),
            credential: credential(),
        });
        assert_eq!(m.phase().name(), "active");
        m
    }

    #[test]
    fn test_incoming_sets_offer() {
        let mut m = CallMachine::new();
        assert!(m.apply(incoming("c1")).is_empty());
        let snap = m.snapshot();
        assert_eq!(snap.incoming_call.unwrap().call_id, "c1");
        assert!(snap.current_call.is_none());
        assert!(!snap.is_call_ui_open);
    }

    #[test]
    fn test_second_incoming_is_ignored_while_ringing() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        m.apply(incoming("c1"));
        m.apply(incoming("c2"));
        assert_eq!(m.phase().call_id(), Some("c1"));
    }

    #[test]
    fn test_accept_saves_route_and_starts_bootstrap() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        let effects = m.apply(accept("/feed"));
        assert_eq!(effects, vec![Effect::Bootstrap(offer("c1"))]);
        assert_eq!(m.saved_route(), Some("/feed"));

        let snap = m.snapshot();
        assert!(snap.is_accepting);
        // Offer survives until the session is up.
        assert_eq!(snap.incoming_call.unwrap().call_id, "c1");
        assert!(!snap.is_call_ui_open);
    }

    #[test]
    fn test_accept_without_offer_is_noop() {
        let mut m = CallMachine::new();
        assert!(m.apply(accept("/feed")).is_empty());
        assert!(m.saved_route().is_none());
    }

    #[test]
    fn test_targeted_accept_must_match_offer() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        let effects = m.apply(Input::Accept {
            call_id: Some("c2".into()),
            current_route: "/feed".into(),
        });
        assert!(effects.is_empty());
        assert_eq!(m.phase().name(), "incoming");
    }

    #[test]
    fn test_bootstrap_success_activates_and_clears_offer() {
        let m = active_machine("c1");
        let snap = m.snapshot();
        assert!(snap.incoming_call.is_none());
        assert_eq!(snap.current_call.unwrap().call_id, "c1");
        assert!(snap.is_call_ui_open);
        assert!(snap.media_credential.is_some());
    }

    #[test]
    fn test_duplicate_end_transitions_once() {
        let mut m = active_machine("c1");
        let first = m.apply(ended("c1"));
        assert_eq!(first, vec![Effect::RestoreRoute("/feed".into())]);
        assert_eq!(m.phase(), &Phase::Idle);

        let second = m.apply(ended("c1"));
        assert!(second.is_empty());
        assert_eq!(m.phase(), &Phase::Idle);
    }

    #[test]
    fn test_duplicate_decline_transitions_once() {
        let mut m = active_machine("c1");
        assert_eq!(m.apply(declined("c1")).len(), 1);
        assert!(m.apply(declined("c1")).is_empty());
        assert!(m.apply(ended("c1")).is_empty());
    }

    #[test]
    fn test_stale_end_is_ignored() {
        let mut m = active_machine("c1");
        assert!(m.apply(ended("c2")).is_empty());
        assert!(m.apply(declined("c2")).is_empty());
        assert_eq!(m.snapshot().current_call.unwrap().call_id, "c1");
    }

    #[test]
    fn test_remote_end_of_ringing_offer_clears_it() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        // No route was saved, so nothing to restore.
        assert!(m.apply(ended("c1")).is_empty());
        assert_eq!(m.phase(), &Phase::Idle);
    }

    #[test]
    fn test_user_decline_notifies_without_navigation() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        let effects = m.apply(Input::Decline);
        assert_eq!(
            effects,
            vec![Effect::NotifyDecline {
                call_id: "c1".into()
            }]
        );
        assert!(m.snapshot().incoming_call.is_none());
    }

    #[test]
    fn test_user_end_restores_before_notifying() {
        let mut m = active_machine("c1");
        let effects = m.apply(Input::End);
        assert_eq!(
            effects,
            vec![
                Effect::RestoreRoute("/feed".into()),
                Effect::NotifyEnd {
                    call_id: "c1".into(),
                    reason: EndReason::Ended
                },
            ]
        );
        let snap = m.snapshot();
        assert!(snap.current_call.is_none());
        assert!(!snap.is_call_ui_open);
        assert!(m.saved_route().is_none());
    }

    #[test]
    fn test_end_when_idle_is_noop() {
        let mut m = CallMachine::new();
        assert!(m.apply(Input::End).is_empty());
        m.apply(incoming("c1"));
        assert!(m.apply(Input::End).is_empty());
        assert_eq!(m.phase().name(), "incoming");
    }

    #[test]
    fn test_bootstrap_failure_rolls_back() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        m.apply(accept("/feed"));
        let effects = m.apply(Input::BootstrapFailed {
            call_id: "c1".into(),
            error: "room join failed".into(),
        });
        assert_eq!(
            effects,
            vec![
                Effect::SurfaceError("room join failed".into()),
                Effect::RestoreRoute("/feed".into()),
            ]
        );
        let snap = m.snapshot();
        assert!(snap.incoming_call.is_none());
        assert!(snap.current_call.is_none());
        assert!(!snap.is_call_ui_open);
        assert_eq!(snap.last_error.as_deref(), Some("room join failed"));

        // The failed offer is not restored on a retry.
        assert!(m.apply(accept("/feed")).is_empty());
    }

    #[test]
    fn test_next_incoming_clears_last_error() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        m.apply(accept("/feed"));
        m.apply(Input::BootstrapFailed {
            call_id: "c1".into(),
            error: "boom".into(),
        });
        m.apply(incoming("c2"));
        assert!(m.snapshot().last_error.is_none());
    }

    #[test]
    fn test_late_bootstrap_success_after_remote_end_is_discarded() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        m.apply(accept("/feed"));
        assert_eq!(
            m.apply(ended("c1")),
            vec![Effect::RestoreRoute("/feed".into())]
        );

        let effects = m.apply(Input::BootstrapSucceeded {
            call_id: "c1".into(),
            session: session("c1"),
            credential: credential(),
        });
        assert!(effects.is_empty());
        let snap = m.snapshot();
        assert!(snap.current_call.is_none());
        assert!(!snap.is_call_ui_open);
    }

    #[test]
    fn test_late_bootstrap_for_old_call_does_not_touch_new_offer() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        m.apply(accept("/feed"));
        m.apply(ended("c1"));
        m.apply(incoming("c2"));

        m.apply(Input::BootstrapSucceeded {
            call_id: "c1".into(),
            session: session("c1"),
            credential: credential(),
        });
        m.apply(Input::BootstrapFailed {
            call_id: "c1".into(),
            error: "late".into(),
        });
        let snap = m.snapshot();
        assert_eq!(snap.incoming_call.unwrap().call_id, "c2");
        assert!(snap.current_call.is_none());
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn test_end_during_bootstrap_cancels() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        m.apply(accept("/feed"));
        let effects = m.apply(Input::End);
        assert_eq!(
            effects,
            vec![
                Effect::RestoreRoute("/feed".into()),
                Effect::NotifyEnd {
                    call_id: "c1".into(),
                    reason: EndReason::Cancelled
                },
            ]
        );
    }

    #[test]
    fn test_notification_decline_without_local_offer() {
        let mut m = CallMachine::new();
        let effects = m.apply(Input::NotificationDecline {
            call_id: "c9".into(),
        });
        assert_eq!(
            effects,
            vec![Effect::NotifyDecline {
                call_id: "c9".into()
            }]
        );
        assert_eq!(m.phase(), &Phase::Idle);
    }

    #[test]
    fn test_notification_decline_clears_matching_offer() {
        let mut m = CallMachine::new();
        m.apply(incoming("c1"));
        m.apply(Input::NotificationDecline {
            call_id: "c1".into(),
        });
        assert_eq!(m.phase(), &Phase::Idle);
    }

    #[test]
    fn test_offer_and_session_never_coexist() {
        let mut m = active_machine("c1");
        m.apply(incoming("c2"));
        let snap = m.snapshot();
        assert!(snap.incoming_call.is_none());
        assert_eq!(snap.current_call.unwrap().call_id, "c1");
    }

    #[test]
    fn test_route_restored_once_per_call() {
        let mut m = active_machine("c1");
        let restores = |effects: Vec<Effect>| {
            effects
                .into_iter()
                .filter(|e| matches!(e, Effect::RestoreRoute(_)))
                .count()
        };
        assert_eq!(restores(m.apply(Input::End)), 1);
        assert_eq!(restores(m.apply(ended("c1"))), 0);
        assert_eq!(restores(m.apply(declined("c1"))), 0);
    }
}
