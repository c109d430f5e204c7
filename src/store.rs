use crate::channel::Subscription;
use crate::error::CallError;
use crate::session::{BlockList, CallId, CallSession, CallStatus, CallStore, UserId};
use crate::utils::random_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// In-process call record table and block list with change notifications.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    calls: HashMap<CallId, CallSession>,
    order: Vec<CallId>,
    blocks: HashSet<(UserId, UserId)>,
    call_watchers: Vec<(u64, CallId, mpsc::UnboundedSender<CallSession>)>,
    receiver_watchers: Vec<(u64, UserId, mpsc::UnboundedSender<CallSession>)>,
    next_watch: u64,
    unavailable: bool,
}

impl Inner {
    fn notify(&mut self, session: &CallSession) {
        self.call_watchers
            .retain(|(_, id, tx)| id != &session.id || tx.send(session.clone()).is_ok());
        self.receiver_watchers.retain(|(_, receiver, tx)| {
            receiver != &session.receiver_id || tx.send(session.clone()).is_ok()
        });
    }

    fn check_available(&self) -> Result<(), CallError> {
        if self.unavailable {
            Err(CallError::Persistence("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, CallError> {
        self.inner
            .lock()
            .map_err(|_| CallError::Persistence("store state poisoned".into()))
    }

    pub fn block(&self, blocker: &UserId, blocked: &UserId) -> Result<(), CallError> {
        self.lock()?
            .blocks
            .insert((blocker.clone(), blocked.clone()));
        Ok(())
    }

    pub fn unblock(&self, blocker: &UserId, blocked: &UserId) -> Result<(), CallError> {
        self.lock()?
            .blocks
            .remove(&(blocker.clone(), blocked.clone()));
        Ok(())
    }

    /// Makes every record operation fail with `Persistence` while set.
    pub fn set_unavailable(&self, unavailable: bool) -> Result<(), CallError> {
        self.lock()?.unavailable = unavailable;
        Ok(())
    }

    /// Records in creation order.
    pub fn calls(&self) -> Result<Vec<CallSession>, CallError> {
        let inner = self.lock()?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.calls.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl CallStore for MemoryBackend {
    async fn create(&self, caller: &UserId, receiver: &UserId) -> Result<CallSession, CallError> {
        let mut inner = self.lock()?;
        inner.check_available()?;
        let session = CallSession {
            id: CallId::new(random_id()),
            caller_id: caller.clone(),
            receiver_id: receiver.clone(),
            status: CallStatus::Ringing,
            created_at: Utc::now(),
            ended_at: None,
        };
        inner.calls.insert(session.id.clone(), session.clone());
        inner.order.push(session.id.clone());
        inner.notify(&session);
        info!(call_id = %session.id, caller = %caller, receiver = %receiver, "call record created");
        Ok(session)
    }

    async fn get(&self, id: &CallId) -> Result<Option<CallSession>, CallError> {
        let inner = self.lock()?;
        inner.check_available()?;
        Ok(inner.calls.get(id).cloned())
    }

    async fn transition(
        &self,
        id: &CallId,
        status: CallStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<CallSession, CallError> {
        let mut inner = self.lock()?;
        inner.check_available()?;
        let session = inner
            .calls
            .get_mut(id)
            .ok_or_else(|| CallError::Persistence(format!("call {id} not found")))?;
        if !session.status.can_transition_to(status) {
            return Err(CallError::Transition {
                from: session.status,
                to: status,
            });
        }
        session.status = status;
        if status.is_terminal() {
            session.ended_at = Some(ended_at.unwrap_or_else(Utc::now));
        }
        let updated = session.clone();
        inner.notify(&updated);
        debug!(call_id = %id, status = %status, "call record updated");
        Ok(updated)
    }

    async fn latest_ringing(
        &self,
        caller: &UserId,
        receiver: &UserId,
    ) -> Result<Option<CallSession>, CallError> {
        let inner = self.lock()?;
        inner.check_available()?;
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.calls.get(id))
            .find(|s| {
                s.status == CallStatus::Ringing
                    && &s.caller_id == caller
                    && &s.receiver_id == receiver
            })
            .cloned())
    }

    async fn watch_call(&self, id: &CallId) -> Result<Subscription<CallSession>, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch = {
            let mut inner = self.lock()?;
            inner.next_watch += 1;
            let watch = inner.next_watch;
            inner.call_watchers.push((watch, id.clone(), tx));
            watch
        };
        let store = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(store) = store.upgrade() {
                if let Ok(mut inner) = store.lock() {
                    inner.call_watchers.retain(|(w, _, _)| *w != watch);
                }
            }
        }))
    }

    async fn watch_incoming(
        &self,
        receiver: &UserId,
    ) -> Result<Subscription<CallSession>, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch = {
            let mut inner = self.lock()?;
            inner.next_watch += 1;
            let watch = inner.next_watch;
            inner.receiver_watchers.push((watch, receiver.clone(), tx));
            watch
        };
        let store = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(store) = store.upgrade() {
                if let Ok(mut inner) = store.lock() {
                    inner.receiver_watchers.retain(|(w, _, _)| *w != watch);
                }
            }
        }))
    }
}

#[async_trait]
impl BlockList for MemoryBackend {
    async fn is_blocked(&self, a: &UserId, b: &UserId) -> Result<bool, CallError> {
        let inner = self.lock()?;
        inner.check_available()?;
        Ok(inner.blocks.contains(&(a.clone(), b.clone()))
            || inner.blocks.contains(&(b.clone(), a.clone())))
    }
}
