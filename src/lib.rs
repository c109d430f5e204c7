//! Signaling and lifecycle control for one-to-one audio calls.
//!
//! A [`CallCenter`] opens calls for one user. Each call runs as a task that
//! owns a [`CallController`] and exchanges signals with the remote participant
//! over a per-pair topic of a [`SignalChannel`], while the persisted
//! [`CallSession`] record acts as the fallback source of truth.

pub mod channel;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod logger;
pub mod media;
pub mod peer;
pub mod phone;
pub mod session;
pub mod signaling;
pub mod store;
mod task;
pub mod utils;

pub use channel::{LocalHub, SignalChannel, Subscription};
pub use commands::{CallHandle, CallSnapshot};
pub use config::CallConfig;
pub use controller::{Backend, CallBinding, CallController};
pub use error::CallError;
pub use events::{CallEvent, EndReason};
pub use media::{AudioCapture, MediaDevices, TrackMicrophone};
pub use peer::{CallPhase, PeerEvent, PeerFactory, PeerLink, PeerState, RtcPeerFactory};
pub use phone::{CallCenter, IncomingCalls, IncomingNotice};
pub use session::{BlockList, CallId, CallSession, CallStatus, CallStore, UserId};
pub use signaling::{Signal, SignalKind, SignalMessage};
pub use store::MemoryBackend;
