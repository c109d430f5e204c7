use crate::peer::state::CallPhase;
use crate::session::CallStatus;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// One participant has blocked the other.
    #[error("call blocked between participants")]
    Blocked,

    #[error("microphone unavailable: {0}")]
    MediaUnavailable(String),

    /// Creating or updating the call record failed.
    #[error("call record store failed: {0}")]
    Persistence(String),

    #[error("call record cannot move from {from} to {to}")]
    Transition { from: CallStatus, to: CallStatus },

    #[error("signaling channel failed: {0}")]
    Channel(String),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("peer connection failed: {0}")]
    Peer(String),

    #[error("operation not allowed while {0}")]
    InvalidPhase(CallPhase),

    #[error("another call is already in progress")]
    Busy,

    #[error("call is no longer running")]
    Closed,

    #[error("cannot call yourself")]
    SelfCall,

    /// The call record names other participants.
    #[error("call {0} is not addressed to this participant")]
    NotParticipant(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CallError {
    /// Text shown to the user when the attempt is aborted.
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::Blocked => "You cannot call this user.",
            CallError::MediaUnavailable(_) => "Could not access microphone",
            CallError::Persistence(_) | CallError::Transition { .. } => {
                "Could not start call. Please try again."
            }
            CallError::Busy => "You are already in a call.",
            CallError::Channel(_) | CallError::Peer(_) => "The call was interrupted.",
            CallError::SelfCall => "You cannot call yourself.",
            CallError::InvalidSignal(_)
            | CallError::InvalidPhase(_)
            | CallError::NotParticipant(_)
            | CallError::Closed
            | CallError::Config(_) => "Something went wrong with the call.",
        }
    }
}

impl From<webrtc::Error> for CallError {
    fn from(err: webrtc::Error) -> Self {
        CallError::Peer(err.to_string())
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::InvalidSignal(err.to_string())
    }
}
