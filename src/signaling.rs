use crate::error::CallError;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use crate::session::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Request,
    Accept,
    Reject,
    End,
    Offer,
    Answer,
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::Request => "request",
            SignalKind::Accept => "accept",
            SignalKind::Reject => "reject",
            SignalKind::End => "end",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Request,
    Accept,
    Reject,
    End,
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Request => SignalKind::Request,
            Signal::Accept => SignalKind::Accept,
            Signal::Reject => SignalKind::Reject,
            Signal::End => SignalKind::End,
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::Candidate(_) => SignalKind::Candidate,
        }
    }
}

/// One signal broadcast on the call topic, tagged with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub from: UserId,
    pub signal: Signal,
}

/// Wire shape: `{"type": .., "from": .., "signal": ..}`.
#[derive(Serialize, Deserialize)]
struct WireSignal {
    #[serde(rename = "type")]
    kind: SignalKind,
    from: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signal: Option<Value>,
}

impl SignalMessage {
    pub fn new(from: UserId, signal: Signal) -> Self {
        Self { from, signal }
    }

    pub fn kind(&self) -> SignalKind {
        self.signal.kind()
    }

    pub fn encode(&self) -> Result<Value, CallError> {
        let signal = match &self.signal {
            Signal::Request | Signal::Accept | Signal::Reject | Signal::End => None,
            Signal::Offer(sdp) | Signal::Answer(sdp) => Some(serde_json::to_value(sdp)?),
            Signal::Candidate(candidate) => Some(serde_json::to_value(candidate)?),
        };
        let wire = WireSignal {
            kind: self.kind(),
            from: self.from.clone(),
            signal,
        };
        Ok(serde_json::to_value(wire)?)
    }

    /// Decodes and validates a raw channel payload.
    pub fn decode(raw: Value) -> Result<Self, CallError> {
        let wire: WireSignal = serde_json::from_value(raw)?;
        let signal = match (wire.kind, wire.signal) {
            (SignalKind::Request, None) => Signal::Request,
            (SignalKind::Accept, None) => Signal::Accept,
            (SignalKind::Reject, None) => Signal::Reject,
            (SignalKind::End, None) => Signal::End,
            (SignalKind::Offer, Some(payload)) => {
                Signal::Offer(description(payload, SdpKind::Offer)?)
            }
            (SignalKind::Answer, Some(payload)) => {
                Signal::Answer(description(payload, SdpKind::Answer)?)
            }
            (SignalKind::Candidate, Some(payload)) => {
                let candidate: IceCandidate = serde_json::from_value(payload)?;
                if candidate.candidate.is_empty() {
                    return Err(CallError::InvalidSignal("empty candidate".into()));
                }
                Signal::Candidate(candidate)
            }
            (kind, Some(_)) => {
                return Err(CallError::InvalidSignal(format!(
                    "{kind} carries an unexpected payload"
                )))
            }
            (kind, None) => {
                return Err(CallError::InvalidSignal(format!("{kind} without payload")))
            }
        };
        Ok(Self {
            from: wire.from,
            signal,
        })
    }
}

fn description(payload: Value, expected: SdpKind) -> Result<SessionDescription, CallError> {
    let sdp: SessionDescription = serde_json::from_value(payload)?;
    if sdp.kind != expected {
        return Err(CallError::InvalidSignal(format!(
            "expected {expected:?} description, got {:?}",
            sdp.kind
        )));
    }
    Ok(sdp)
}
