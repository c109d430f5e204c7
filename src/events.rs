use crate::error::CallError;
use crate::peer::state::CallPhase;
use crate::session::CallStatus;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why a call returned to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangUp,
    LocalRejected,
    RemoteEnded,
    RemoteRejected,
    /// The call UI went away.
    Closed,
    ConnectionFailed,
    Failed,
}

impl EndReason {
    /// Terminal record status written for this exit.
    pub fn record_status(self) -> CallStatus {
        match self {
            EndReason::LocalRejected | EndReason::RemoteRejected => CallStatus::Rejected,
            _ => CallStatus::Ended,
        }
    }
}

/// What the UI shell is told about the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    PhaseChanged(CallPhase),
    Tick(u64),
    MuteChanged(bool),
    RemoteAudio,
    Connected,
    ConnectionProblem,
    ConnectionRecovered,
    ConnectionFailed,
    Error { message: String, error: CallError },
    Ended(EndReason),
}

/// Pushes [`CallEvent`]s to the UI. A dropped receiver is not an error.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl Emitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: CallEvent) {
        debug!(?event, "emit");
        let _ = self.tx.send(event);
    }

    pub fn emit_phase(&self, phase: CallPhase) {
        info!(%phase, "call phase changed");
        self.emit(CallEvent::PhaseChanged(phase));
    }

    pub fn emit_tick(&self, elapsed: u64) {
        self.emit(CallEvent::Tick(elapsed));
    }

    pub fn emit_mute(&self, muted: bool) {
        self.emit(CallEvent::MuteChanged(muted));
    }

    pub fn emit_remote_audio(&self) {
        self.emit(CallEvent::RemoteAudio);
    }

    pub fn emit_connected(&self) {
        self.emit(CallEvent::Connected);
    }

    pub fn emit_connection_problem(&self) {
        warn!("connection issues detected");
        self.emit(CallEvent::ConnectionProblem);
    }

    pub fn emit_connection_recovered(&self) {
        info!("connection recovered");
        self.emit(CallEvent::ConnectionRecovered);
    }

    pub fn emit_connection_failed(&self) {
        warn!("connection recovery failed");
        self.emit(CallEvent::ConnectionFailed);
    }

    pub fn emit_error(&self, error: &CallError) {
        warn!(error = %error, "call error");
        self.emit(CallEvent::Error {
            message: error.user_message().to_string(),
            error: error.clone(),
        });
    }

    pub fn emit_ended(&self, reason: EndReason) {
        info!(?reason, "call ended");
        self.emit(CallEvent::Ended(reason));
    }
}
