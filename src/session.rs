use crate::channel::Subscription;
use crate::error::CallError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier assigned by the call record store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Accepted,
    Rejected,
    Ended,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Rejected | CallStatus::Ended)
    }

    /// `ringing -> accepted|rejected|ended`, `accepted -> ended`. Terminal statuses are final.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        matches!(
            (self, next),
            (CallStatus::Ringing, CallStatus::Accepted)
                | (CallStatus::Ringing, CallStatus::Rejected)
                | (CallStatus::Ringing, CallStatus::Ended)
                | (CallStatus::Accepted, CallStatus::Ended)
        )
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Accepted => "accepted",
            CallStatus::Rejected => "rejected",
            CallStatus::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Durable record of one call attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Call record table. Status updates go through `transition`, which refuses
/// edges not allowed by [`CallStatus::can_transition_to`].
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn create(&self, caller: &UserId, receiver: &UserId) -> Result<CallSession, CallError>;

    async fn get(&self, id: &CallId) -> Result<Option<CallSession>, CallError>;

    async fn transition(
        &self,
        id: &CallId,
        status: CallStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<CallSession, CallError>;

    /// Newest ringing record from `caller` to `receiver`.
    async fn latest_ringing(
        &self,
        caller: &UserId,
        receiver: &UserId,
    ) -> Result<Option<CallSession>, CallError>;

    /// Every change of one record.
    async fn watch_call(&self, id: &CallId) -> Result<Subscription<CallSession>, CallError>;

    /// Inserts and updates of records whose receiver is `receiver`.
    async fn watch_incoming(
        &self,
        receiver: &UserId,
    ) -> Result<Subscription<CallSession>, CallError>;
}

#[async_trait]
pub trait BlockList: Send + Sync {
    /// True when either participant has blocked the other.
    async fn is_blocked(&self, a: &UserId, b: &UserId) -> Result<bool, CallError>;
}

/// Broadcast topic shared by a pair of participants, independent of who calls.
///
/// `-` and `%` inside ids are percent-escaped so `-` only ever separates parts.
pub fn pair_topic(prefix: &str, a: &UserId, b: &UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!(
        "{prefix}-{}-{}",
        escape_topic_part(lo.as_str()),
        escape_topic_part(hi.as_str())
    )
}

fn escape_topic_part(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '%' => out.push_str("%25"),
            '-' => out.push_str("%2D"),
            c => out.push(c),
        }
    }
    out
}
