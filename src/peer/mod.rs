pub mod connection;
pub mod ice;
pub mod state;
pub mod types;

use crate::error::CallError;
use crate::media::AudioCapture;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use connection::{RtcPeer, RtcPeerFactory};
pub use state::{CallPhase, LocalCallState, GRACE_PERIOD, NEGOTIATION_TIMEOUT, TICK_INTERVAL};
pub use types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks of a peer connection, delivered to the owning call task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    State(PeerState),
    RemoteTrack,
}

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

/// One negotiated media connection to the remote participant.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn attach_audio(&self, capture: &AudioCapture) -> Result<(), CallError>;

    /// Creates an offer and applies it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    /// Applies a remote offer, then creates and applies the answer.
    async fn accept_offer(&self, offer: SessionDescription)
        -> Result<SessionDescription, CallError>;

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), CallError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;

    /// Closing an already closed connection is a no-op.
    async fn close(&self) -> Result<(), CallError>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, events: PeerEvents) -> Result<Arc<dyn PeerLink>, CallError>;
}
