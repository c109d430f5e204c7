use crate::channel::Subscription;
use crate::commands::{CallCommand, CallHandle};
use crate::config::CallConfig;
use crate::controller::{Backend, CallBinding, CallController};
use crate::error::CallError;
use crate::events::Emitter;
use crate::session::{CallId, CallSession, CallStatus, UserId};
use crate::task;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Per-user entry point: opens at most one call at a time.
#[derive(Clone)]
pub struct CallCenter {
    local: UserId,
    backend: Backend,
    config: CallConfig,
    slot: Arc<Mutex<Option<UserId>>>,
}

/// Holds the single call slot until the call task exits.
struct SlotGuard {
    slot: Arc<Mutex<Option<UserId>>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

impl CallCenter {
    /// Fails with `Config` when `config` does not validate.
    pub fn new(local: UserId, backend: Backend, config: CallConfig) -> Result<Self, CallError> {
        config.validate()?;
        Ok(Self {
            local,
            backend,
            config,
            slot: Arc::new(Mutex::new(None)),
        })
    }

    pub fn local(&self) -> &UserId {
        &self.local
    }

    /// Remote participant of the call currently open, if any.
    pub fn active_remote(&self) -> Option<UserId> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.active_remote().is_some()
    }

    /// `Err` carries whoever holds the slot.
    fn claim(&self, remote: &UserId) -> Result<SlotGuard, Option<UserId>> {
        let mut slot = self.slot.lock().map_err(|_| None)?;
        if let Some(current) = slot.as_ref() {
            return Err(Some(current.clone()));
        }
        *slot = Some(remote.clone());
        Ok(SlotGuard {
            slot: self.slot.clone(),
        })
    }

    /// Spawns the call task. `queued` is delivered before any signal is read.
    async fn open(
        &self,
        remote: UserId,
        guard: SlotGuard,
        prepare: impl FnOnce(&mut CallController) -> Result<(), CallError>,
        queued: Option<CallCommand>,
    ) -> Result<CallHandle, CallError> {
        let binding = CallBinding::new(&self.config.topic_prefix, self.local.clone(), remote);
        let signals = self.backend.channel.subscribe(&binding.topic).await?;
        let (emitter, events) = Emitter::channel();
        let mut controller = CallController::new(
            binding.clone(),
            self.backend.clone(),
            self.config.clone(),
            emitter,
        );
        prepare(&mut controller)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        if let Some(command) = queued {
            commands.send(command).map_err(|_| CallError::Closed)?;
        }
        let task = tokio::spawn(async move {
            let _guard = guard;
            task::run(controller, signals, command_rx).await;
        });
        Ok(CallHandle::new(binding, commands, events, task))
    }

    /// Starts an outgoing call to `remote`.
    pub async fn dial(&self, remote: UserId) -> Result<CallHandle, CallError> {
        if remote == self.local {
            return Err(CallError::SelfCall);
        }
        let guard = self.claim(&remote).map_err(|_| CallError::Busy)?;
        let (reply, dialed) = oneshot::channel();
        let handle = self
            .open(remote, guard, |_| Ok(()), Some(CallCommand::Dial(reply)))
            .await?;
        match dialed.await.unwrap_or(Err(CallError::Closed)) {
            Ok(()) => Ok(handle),
            Err(e) => {
                handle.close().await;
                Err(e)
            }
        }
    }

    /// Opens the call UI for a ringing record addressed to this user.
    ///
    /// While another call is open the record is rejected, unless it comes
    /// from the same remote (a simultaneous call the open controller resolves).
    pub async fn answer(&self, session: &CallSession) -> Result<CallHandle, CallError> {
        if session.receiver_id != self.local {
            return Err(CallError::NotParticipant(session.id.to_string()));
        }
        if session.status != CallStatus::Ringing {
            return Err(CallError::Transition {
                from: session.status,
                to: CallStatus::Accepted,
            });
        }
        let guard = match self.claim(&session.caller_id) {
            Ok(guard) => guard,
            Err(Some(current)) if current == session.caller_id => return Err(CallError::Busy),
            Err(_) => {
                info!(call_id = %session.id, caller = %session.caller_id, "busy, rejecting incoming call");
                if let Err(e) = self
                    .backend
                    .store
                    .transition(&session.id, CallStatus::Rejected, Some(Utc::now()))
                    .await
                {
                    warn!(call_id = %session.id, error = %e, "failed to reject call while busy");
                }
                return Err(CallError::Busy);
            }
        };
        let id = session.id.clone();
        self.open(
            session.caller_id.clone(),
            guard,
            move |controller| controller.ring(Some(id)),
            None,
        )
        .await
    }

    /// Opens an idle call UI for `remote` that rings on their `request`.
    pub async fn listen(&self, remote: UserId) -> Result<CallHandle, CallError> {
        if remote == self.local {
            return Err(CallError::SelfCall);
        }
        let guard = self.claim(&remote).map_err(|_| CallError::Busy)?;
        self.open(remote, guard, |_| Ok(()), None).await
    }

    /// Ringing records addressed to this user, as they are created or closed.
    pub async fn incoming(&self) -> Result<IncomingCalls, CallError> {
        let subscription = self.backend.store.watch_incoming(&self.local).await?;
        Ok(IncomingCalls {
            subscription,
            local: self.local.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingNotice {
    Ringing(CallSession),
    /// The record was rejected or ended before anyone answered here.
    Dismissed(CallId),
}

pub struct IncomingCalls {
    subscription: Subscription<CallSession>,
    local: UserId,
}

impl IncomingCalls {
    pub async fn next(&mut self) -> Option<IncomingNotice> {
        while let Some(session) = self.subscription.recv().await {
            if session.receiver_id != self.local {
                continue;
            }
            match session.status {
                CallStatus::Ringing => return Some(IncomingNotice::Ringing(session)),
                CallStatus::Rejected | CallStatus::Ended => {
                    return Some(IncomingNotice::Dismissed(session.id))
                }
                CallStatus::Accepted => continue,
            }
        }
        None
    }
}
