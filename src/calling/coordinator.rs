//! Call coordinator: the single owner of the call state machine.
//!
//! Producers (socket channel, push channel, notification relay, the user)
//! hold a [`CallHandle`] and send commands over an mpsc channel. One tokio
//! task applies them to the [`CallMachine`], publishes a [`CallSnapshot`]
//! through a watch channel and runs the requested effects as separate
//! tasks, whose results come back as commands.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::bootstrap::{self, BootstrapError, Bootstrapped};
use super::janitor;
use super::machine::{CallMachine, CallSnapshot, Effect, Input};
use super::navigation::{self, Navigator};
use super::{EndReason, NormalizedCallEvent};
use crate::api::{CredentialSource, MediaRooms, SignalingBackend};
use crate::config::Config;

/// Commands accepted by the coordinator task.
pub enum Command {
    Event(NormalizedCallEvent),
    Accept { call_id: Option<String> },
    Decline,
    End,
    NotificationDecline { call_id: String },
    /// Result of a bootstrap task.
    Bootstrap {
        call_id: String,
        result: Result<Bootstrapped, BootstrapError>,
    },
}

/// External services the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn SignalingBackend>,
    pub credentials: Arc<dyn CredentialSource>,
    pub rooms: Arc<dyn MediaRooms>,
    pub navigator: Arc<dyn Navigator>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub restore_delay: Duration,
    pub end_call_timeout: Duration,
    pub relay_settle: Duration,
}

impl Timing {
    pub fn from_config(config: &Config) -> Self {
        Self {
            restore_delay: config.restore_delay(),
            end_call_timeout: config.end_call_timeout(),
            relay_settle: config.relay_settle(),
        }
    }
}

/// Handle given to producers and UI consumers.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<CallSnapshot>,
    relay_settle: Duration,
}

impl CallHandle {
    pub fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::error!("Call coordinator stopped -- command dropped");
        }
    }

    /// Feed a normalized event from either channel.
    pub fn deliver(&self, event: NormalizedCallEvent) {
        tracing::debug!("Delivering {} event for call {}", event.kind(), event.call_id());
        self.send(Command::Event(event));
    }

    pub fn accept_call(&self) {
        self.send(Command::Accept { call_id: None });
    }

    pub fn decline_call(&self) {
        self.send(Command::Decline);
    }

    pub fn end_call(&self) {
        self.send(Command::End);
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.state.clone()
    }

    pub fn relay_settle(&self) -> Duration {
        self.relay_settle
    }
}

/// Start the coordinator task for `self_id`.
///
/// The stale-call janitor runs before the first command is handled;
/// commands sent meanwhile wait in the channel.
pub fn spawn(self_id: String, collaborators: Collaborators, timing: Timing) -> CallHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(CallSnapshot::default());

    let coordinator = Coordinator {
        machine: CallMachine::new(),
        self_id,
        collaborators,
        timing,
        commands: cmd_tx.downgrade(),
        state: state_tx,
    };
    tokio::spawn(coordinator.run(cmd_rx));

    CallHandle {
        commands: cmd_tx,
        state: state_rx,
        relay_settle: timing.relay_settle,
    }
}

struct Coordinator {
    machine: CallMachine,
    self_id: String,
    collaborators: Collaborators,
    timing: Timing,
    /// Weak so the task ends once every handle is dropped.
    commands: mpsc::WeakUnboundedSender<Command>,
    state: watch::Sender<CallSnapshot>,
}

impl Coordinator {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        // Bounded: a hung lookup must not hold back call handling.
        let limit = self.timing.end_call_timeout;
        let sweep = janitor::sweep_logged(self.collaborators.backend.as_ref());
        if tokio::time::timeout(limit, sweep).await.is_err() {
            tracing::warn!("Stale call cleanup timed out after {:?}", limit);
        }

        while let Some(cmd) = cmd_rx.recv().await {
            self.handle(cmd);
        }
        tracing::debug!("Call coordinator stopped");
    }

    fn handle(&mut self, cmd: Command) {
        let input = match cmd {
            Command::Event(event) => Input::Event(event),
            Command::Accept { call_id } => Input::Accept {
                call_id,
                current_route: self.collaborators.navigator.current_route(),
            },
            Command::Decline => Input::Decline,
            Command::End => Input::End,
            Command::NotificationDecline { call_id } => Input::NotificationDecline { call_id },
            Command::Bootstrap {
                call_id,
                result: Ok(done),
            } => Input::BootstrapSucceeded {
                call_id,
                session: done.session,
                credential: done.credential,
            },
            Command::Bootstrap {
                call_id,
                result: Err(e),
            } => Input::BootstrapFailed {
                call_id,
                error: e.to_string(),
            },
        };

        let effects = self.machine.apply(input);
        // State and UI visibility change together, before any effect runs.
        self.publish();
        for effect in effects {
            self.execute(effect);
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        self.state.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn execute(&self, effect: Effect) {
        match effect {
            Effect::Bootstrap(offer) => {
                let Some(commands) = self.commands.upgrade() else {
                    return;
                };
                let c = self.collaborators.clone();
                let self_id = self.self_id.clone();
                tokio::spawn(async move {
                    let result = bootstrap::run(
                        &offer,
                        &self_id,
                        c.backend.as_ref(),
                        c.credentials.as_ref(),
                        c.rooms.as_ref(),
                    )
                    .await;
                    let _ = commands.send(Command::Bootstrap {
                        call_id: offer.call_id,
                        result,
                    });
                });
            }
            Effect::NotifyDecline { call_id } => {
                let backend = Arc::clone(&self.collaborators.backend);
                tokio::spawn(async move {
                    // The decline already happened locally either way.
                    if let Err(e) = backend.decline_call(&call_id).await {
                        tracing::warn!("Failed to report decline of call {}: {:#}", call_id, e);
                    }
                });
            }
            Effect::NotifyEnd { call_id, reason } => {
                let backend = Arc::clone(&self.collaborators.backend);
                let limit = self.timing.end_call_timeout;
                tokio::spawn(notify_end(backend, call_id, reason, limit));
            }
            Effect::RestoreRoute(route) => {
                tokio::spawn(navigation::restore_after(
                    Arc::clone(&self.collaborators.navigator),
                    route,
                    self.timing.restore_delay,
                ));
            }
            Effect::SurfaceError(message) => {
                // Shown to the user through `CallSnapshot::last_error`.
                tracing::debug!("Surfacing call error: {}", message);
            }
        }
    }
}

async fn notify_end(
    backend: Arc<dyn SignalingBackend>,
    call_id: String,
    reason: EndReason,
    limit: Duration,
) {
    match tokio::time::timeout(limit, backend.end_call(&call_id, reason)).await {
        Ok(Ok(())) => tracing::debug!("Backend confirmed end of call {}", call_id),
        Ok(Err(e)) => tracing::warn!("Failed to report end of call {}: {:#}", call_id, e),
        Err(_) => tracing::warn!(
            "Backend did not confirm end of call {} within {:?}",
            call_id,
            limit
        ),
    }
}
