use crate::controller::CallBinding;
use crate::error::CallError;
use crate::events::CallEvent;
use crate::media::AudioCapture;
use crate::peer::state::CallPhase;
use crate::session::{CallId, UserId};
use crate::utils::format_elapsed;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Local actions sent from a [`CallHandle`] to its call task.
pub enum CallCommand {
    Dial(oneshot::Sender<Result<(), CallError>>),
    Accept(oneshot::Sender<Result<(), CallError>>),
    Reject(oneshot::Sender<Result<(), CallError>>),
    HangUp(oneshot::Sender<Result<(), CallError>>),
    ToggleMute(oneshot::Sender<Result<bool, CallError>>),
    Snapshot(oneshot::Sender<CallSnapshot>),
    Microphone(oneshot::Sender<Option<AudioCapture>>),
}

/// Point-in-time view of a call for rendering.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub call_id: Option<CallId>,
    pub muted: bool,
    pub elapsed_secs: u64,
    pub has_peer: bool,
    pub has_capture: bool,
    pub connected: bool,
    pub finished: bool,
}

impl CallSnapshot {
    /// Call timer as `m:ss`.
    pub fn elapsed_label(&self) -> String {
        format_elapsed(self.elapsed_secs)
    }
}

/// UI side of a running call. Dropping it ends the call as if the UI closed.
pub struct CallHandle {
    binding: CallBinding,
    commands: mpsc::UnboundedSender<CallCommand>,
    events: mpsc::UnboundedReceiver<CallEvent>,
    task: JoinHandle<()>,
}

impl CallHandle {
    pub(crate) fn new(
        binding: CallBinding,
        commands: mpsc::UnboundedSender<CallCommand>,
        events: mpsc::UnboundedReceiver<CallEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            binding,
            commands,
            events,
            task,
        }
    }

    pub fn local(&self) -> &UserId {
        &self.binding.local
    }

    pub fn remote(&self) -> &UserId {
        &self.binding.remote
    }

    pub fn topic(&self) -> &str {
        &self.binding.topic
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CallCommand,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }

    pub async fn accept(&self) -> Result<(), CallError> {
        self.request(CallCommand::Accept).await?
    }

    pub async fn reject(&self) -> Result<(), CallError> {
        match self.request(CallCommand::Reject).await {
            Ok(result) => result,
            Err(CallError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ends the call. Succeeds if it has already ended.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        match self.request(CallCommand::HangUp).await {
            Ok(result) => result,
            Err(CallError::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(CallCommand::ToggleMute).await?
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot, CallError> {
        self.request(CallCommand::Snapshot).await
    }

    /// Current microphone capture, for feeding encoded frames.
    pub async fn microphone(&self) -> Result<Option<AudioCapture>, CallError> {
        self.request(CallCommand::Microphone).await
    }

    pub async fn next_event(&mut self) -> Option<CallEvent> {
        self.events.recv().await
    }

    pub fn try_event(&mut self) -> Option<CallEvent> {
        self.events.try_recv().ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes the UI side and waits for the call task to exit.
    pub async fn close(self) {
        let CallHandle { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "call task did not exit cleanly");
        }
    }
}
