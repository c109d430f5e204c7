#![allow(dead_code)]

use async_trait::async_trait;
use callsig::peer::{IceCandidate, PeerEvents, SessionDescription};
use callsig::{
    AudioCapture, Backend, CallCenter, CallConfig, CallError, CallEvent, CallHandle, CallPhase,
    CallSnapshot, LocalHub, MediaDevices, MemoryBackend, PeerEvent, PeerFactory, PeerLink,
    SignalChannel, SignalKind, SignalMessage, Subscription, UserId,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

pub fn test_config() -> CallConfig {
    CallConfig {
        grace_period: Duration::from_millis(200),
        negotiation_timeout: Duration::from_secs(10),
        tick_interval: Duration::from_millis(50),
        ..CallConfig::default()
    }
}

/// Peer connection double that records what the controller asked of it.
pub struct FakePeer {
    ops: Mutex<Vec<String>>,
    closed: AtomicBool,
    events: PeerEvents,
}

impl FakePeer {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn has_op(&self, prefix: &str) -> bool {
        self.ops().iter().any(|op| op.starts_with(prefix))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: PeerEvent) {
        self.events.send(event).unwrap();
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn attach_audio(&self, capture: &AudioCapture) -> Result<(), CallError> {
        self.record(format!("attach:{}", capture.id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.record("offer");
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        self.record(format!("accept:{}", offer.sdp));
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), CallError> {
        self.record(format!("answer:{}", answer.sdp));
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), CallError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.record("close");
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakePeers {
    created: Arc<Mutex<Vec<Arc<FakePeer>>>>,
}

impl FakePeers {
    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Arc<FakePeer>> {
        self.created.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PeerFactory for FakePeers {
    async fn create(&self, events: PeerEvents) -> Result<Arc<dyn PeerLink>, CallError> {
        let peer = Arc::new(FakePeer {
            ops: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            events,
        });
        self.created.lock().unwrap().push(peer.clone());
        Ok(peer as Arc<dyn PeerLink>)
    }
}

#[derive(Default)]
pub struct FakeMedia {
    fail: bool,
    acquired: Mutex<Vec<AudioCapture>>,
}

impl FakeMedia {
    pub fn working() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn last(&self) -> Option<AudioCapture> {
        self.acquired.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire_microphone(&self) -> Result<AudioCapture, CallError> {
        if self.fail {
            return Err(CallError::MediaUnavailable("permission denied".into()));
        }
        let capture = AudioCapture::detached();
        self.acquired.lock().unwrap().push(capture.clone());
        Ok(capture)
    }
}

/// Hub wrapper that logs every publish and can lose chosen signal kinds.
pub struct RecordingChannel {
    pub hub: LocalHub,
    lost: Vec<SignalKind>,
    sent: Mutex<Vec<SignalMessage>>,
}

impl RecordingChannel {
    pub fn sent_by(&self, from: &UserId) -> Vec<SignalKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| &m.from == from)
            .map(|m| m.kind())
            .collect()
    }

    pub fn count(&self, from: &UserId, kind: SignalKind) -> usize {
        self.sent_by(from).into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl SignalChannel for RecordingChannel {
    async fn publish(&self, topic: &str, message: &SignalMessage) -> Result<(), CallError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.lost.contains(&message.kind()) {
            return Ok(());
        }
        self.hub.publish(topic, message).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription<Value>, CallError> {
        self.hub.subscribe(topic).await
    }
}

/// Shared channel and store for a set of participants.
pub struct World {
    pub channel: Arc<RecordingChannel>,
    pub store: MemoryBackend,
}

pub struct Party {
    pub id: UserId,
    pub center: CallCenter,
    pub peers: FakePeers,
    pub media: Arc<FakeMedia>,
}

impl World {
    pub fn new() -> Self {
        Self::losing(&[])
    }

    pub fn losing(lost: &[SignalKind]) -> Self {
        Self {
            channel: Arc::new(RecordingChannel {
                hub: LocalHub::new(),
                lost: lost.to_vec(),
                sent: Mutex::new(Vec::new()),
            }),
            store: MemoryBackend::new(),
        }
    }

    pub fn party(&self, id: &str) -> Party {
        self.party_with(id, FakeMedia::working(), test_config())
    }

    pub fn backend(&self, media: Arc<FakeMedia>, peers: FakePeers) -> Backend {
        Backend {
            channel: self.channel.clone(),
            store: Arc::new(self.store.clone()),
            blocks: Arc::new(self.store.clone()),
            media,
            peers: Arc::new(peers),
        }
    }

    pub fn party_with(&self, id: &str, media: Arc<FakeMedia>, config: CallConfig) -> Party {
        let peers = FakePeers::default();
        let backend = self.backend(media.clone(), peers.clone());
        Party {
            id: user(id),
            center: CallCenter::new(user(id), backend, config).unwrap(),
            peers,
            media,
        }
    }
}

pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_phase(handle: &CallHandle, phase: CallPhase) -> CallSnapshot {
    let deadline = Instant::now() + WAIT;
    loop {
        let snapshot = handle.snapshot().await.expect("call task is running");
        if snapshot.phase == phase {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {phase}, still {}", snapshot.phase);
        sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_event(
    handle: &mut CallHandle,
    mut matches: impl FnMut(&CallEvent) -> bool,
) -> CallEvent {
    timeout(WAIT, async {
        loop {
            match handle.next_event().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn wait_for_end(handle: &mut CallHandle) -> callsig::EndReason {
    match wait_for_event(handle, |e| matches!(e, CallEvent::Ended(_))).await {
        CallEvent::Ended(reason) => reason,
        _ => unreachable!(),
    }
}

/// Dials `callee` from `caller`, answers through `callee`'s listener and
/// waits until both sides are active.
pub async fn connected_pair(caller: &Party, callee: &Party) -> (CallHandle, CallHandle) {
    let listener = callee.center.listen(caller.id.clone()).await.unwrap();
    let dialed = caller.center.dial(callee.id.clone()).await.unwrap();
    wait_for_phase(&listener, CallPhase::Incoming).await;
    listener.accept().await.unwrap();
    wait_for_phase(&dialed, CallPhase::Active).await;
    wait_for_phase(&listener, CallPhase::Active).await;
    (dialed, listener)
}
