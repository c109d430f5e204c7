use crate::media::AudioCapture;
use crate::peer::PeerLink;
use crate::session::CallId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// ========== CONSTANTS ==========

/// Wait before a disconnected/failed peer connection ends the call
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Wait for the peer connection to report `connected` after the call goes active
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Call timer resolution
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    Idle,
    Calling,
    Incoming,
    Active,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallPhase::Idle => "idle",
            CallPhase::Calling => "calling",
            CallPhase::Incoming => "incoming",
            CallPhase::Active => "active",
        };
        f.write_str(s)
    }
}

/// Process-local view of the call, owned by one controller.
pub struct LocalCallState {
    pub phase: CallPhase,
    pub call_id: Option<CallId>,
    pub muted: bool,
    pub elapsed_secs: u64,
    pub initiator: bool,
    pub connected: bool,
    /// Deadline after which an unconnected active call is ended.
    pub watchdog: Option<Instant>,
    pub(crate) capture: Option<AudioCapture>,
    pub(crate) peer: Option<Arc<dyn PeerLink>>,
}

impl Default for LocalCallState {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            call_id: None,
            muted: false,
            elapsed_secs: 0,
            initiator: false,
            connected: false,
            watchdog: None,
            capture: None,
            peer: None,
        }
    }
}

impl LocalCallState {
    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn capture(&self) -> Option<&AudioCapture> {
        self.capture.as_ref()
    }

    /// Closes the peer connection and stops the capture. Safe to call repeatedly.
    pub async fn release(&mut self) {
        if let Some(peer) = self.peer.take() {
            debug!("closing peer connection");
            if let Err(e) = peer.close().await {
                warn!(error = %e, "peer connection close failed");
            }
        }
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        self.watchdog = None;
        self.connected = false;
    }
}

impl Drop for LocalCallState {
    fn drop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(peer) = self.peer.take() {
            // dropped without teardown, e.g. the task was aborted
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = peer.close().await;
                });
            }
        }
    }
}
