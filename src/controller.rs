use crate::channel::SignalChannel;
use crate::commands::CallSnapshot;
use crate::config::CallConfig;
use crate::error::CallError;
use crate::events::{Emitter, EndReason};
use crate::media::{MediaDevices, TrackMicrophone};
use crate::peer::state::{CallPhase, LocalCallState};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::peer::{PeerEvent, PeerEvents, PeerFactory, PeerState, RtcPeerFactory};
use crate::session::{pair_topic, BlockList, CallId, CallSession, CallStatus, CallStore, UserId};
use crate::signaling::{Signal, SignalMessage};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// External collaborators of a call.
#[derive(Clone)]
pub struct Backend {
    pub channel: Arc<dyn SignalChannel>,
    pub store: Arc<dyn CallStore>,
    pub blocks: Arc<dyn BlockList>,
    pub media: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerFactory>,
}

impl Backend {
    /// Opus microphone and webrtc-rs peers, both set up from `config`.
    pub fn webrtc(
        channel: Arc<dyn SignalChannel>,
        store: Arc<dyn CallStore>,
        blocks: Arc<dyn BlockList>,
        config: &CallConfig,
    ) -> Self {
        Self {
            channel,
            store,
            blocks,
            media: Arc::new(TrackMicrophone::from_config(config)),
            peers: Arc::new(RtcPeerFactory::from_config(config)),
        }
    }
}

/// The two participants of a call and the topic they signal on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallBinding {
    pub local: UserId,
    pub remote: UserId,
    pub topic: String,
}

impl CallBinding {
    pub fn new(prefix: &str, local: UserId, remote: UserId) -> Self {
        let topic = pair_topic(prefix, &local, &remote);
        Self {
            local,
            remote,
            topic,
        }
    }

    /// On simultaneous requests the lower participant id keeps its call.
    pub fn wins_glare(&self) -> bool {
        self.local < self.remote
    }
}

/// Call signaling state machine for one call UI.
///
/// Every input (local action, inbound signal, record change, peer callback,
/// timer) is handled to completion before the next one, so handlers never
/// observe a half-applied transition. Once the call has returned to idle after
/// having started, the controller is finished and ignores further input.
pub struct CallController {
    binding: CallBinding,
    backend: Backend,
    config: CallConfig,
    state: LocalCallState,
    emitter: Emitter,
    peer_tx: PeerEvents,
    peer_rx: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    started: bool,
    terminal_sent: bool,
    record_closed: bool,
    connection_problem: bool,
    finished: bool,
}

impl CallController {
    pub fn new(binding: CallBinding, backend: Backend, config: CallConfig, emitter: Emitter) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        Self {
            binding,
            backend,
            config,
            state: LocalCallState::default(),
            emitter,
            peer_tx,
            peer_rx: Some(peer_rx),
            started: false,
            terminal_sent: false,
            record_closed: false,
            connection_problem: false,
            finished: false,
        }
    }

    pub fn binding(&self) -> &CallBinding {
        &self.binding
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn state(&self) -> &LocalCallState {
        &self.state
    }

    pub fn phase(&self) -> CallPhase {
        self.state.phase
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.state.call_id.as_ref()
    }

    pub fn watchdog(&self) -> Option<Instant> {
        self.state.watchdog
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Receiver for peer connection callbacks; handed to the call task once.
    pub fn take_peer_events(&mut self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.peer_rx.take()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            phase: self.state.phase,
            call_id: self.state.call_id.clone(),
            muted: self.state.muted,
            elapsed_secs: self.state.elapsed_secs,
            has_peer: self.state.has_peer(),
            has_capture: self.state.has_capture(),
            connected: self.state.connected,
            finished: self.finished,
        }
    }

    fn set_phase(&mut self, phase: CallPhase) {
        if self.state.phase != phase {
            self.state.phase = phase;
            self.emitter.emit_phase(phase);
        }
    }

    async fn send(&self, signal: Signal) {
        let kind = signal.kind();
        let message = SignalMessage::new(self.binding.local.clone(), signal);
        match self.backend.channel.publish(&self.binding.topic, &message).await {
            Ok(()) => trace!(topic = %self.binding.topic, %kind, "signal sent"),
            Err(e) => warn!(topic = %self.binding.topic, %kind, error = %e, "signal send failed"),
        }
    }

    // ---------------------------------------------------------------------
    // local actions
    // ---------------------------------------------------------------------

    /// `idle -> calling`: checks blocks, creates the ringing record, broadcasts `request`.
    pub async fn start_call(&mut self) -> Result<(), CallError> {
        if self.started || self.finished {
            return Err(CallError::InvalidPhase(self.state.phase));
        }
        let local = self.binding.local.clone();
        let remote = self.binding.remote.clone();

        match self.backend.blocks.is_blocked(&local, &remote).await {
            Ok(false) => {}
            Ok(true) => return Err(self.abort_start(CallError::Blocked)),
            Err(e) => return Err(self.abort_start(e)),
        }
        let session = match self.backend.store.create(&local, &remote).await {
            Ok(session) => session,
            Err(e) => return Err(self.abort_start(e)),
        };

        info!(call_id = %session.id, topic = %self.binding.topic, remote = %remote, "outgoing call");
        self.started = true;
        self.state.call_id = Some(session.id);
        self.set_phase(CallPhase::Calling);
        self.send(Signal::Request).await;
        Ok(())
    }

    fn abort_start(&mut self, error: CallError) -> CallError {
        self.emitter.emit_error(&error);
        self.finished = true;
        error
    }

    /// Opens the controller on a known incoming record.
    pub fn ring(&mut self, call_id: Option<CallId>) -> Result<(), CallError> {
        if self.started || self.finished {
            return Err(CallError::InvalidPhase(self.state.phase));
        }
        info!(call_id = ?call_id, remote = %self.binding.remote, "incoming call");
        self.started = true;
        self.state.call_id = call_id;
        self.set_phase(CallPhase::Incoming);
        Ok(())
    }

    /// `incoming -> active` as the answering side.
    pub async fn accept(&mut self) -> Result<(), CallError> {
        if self.finished || self.state.phase != CallPhase::Incoming {
            return Err(CallError::InvalidPhase(self.state.phase));
        }
        if let Some(id) = self.state.call_id.clone() {
            match self
                .backend
                .store
                .transition(&id, CallStatus::Accepted, None)
                .await
            {
                Ok(_) => {}
                Err(CallError::Transition { from, to }) if from.is_terminal() => {
                    // the caller gave up before the answer landed
                    self.record_closed = true;
                    let reason = if from == CallStatus::Rejected {
                        EndReason::RemoteRejected
                    } else {
                        EndReason::RemoteEnded
                    };
                    self.teardown(reason, false).await;
                    return Err(CallError::Transition { from, to });
                }
                Err(e) => return self.fail(e).await,
            }
        }
        self.send(Signal::Accept).await;
        self.start_peer(false).await
    }

    /// Declines an incoming call. Only `reject` is broadcast.
    pub async fn reject(&mut self) -> Result<(), CallError> {
        if self.finished {
            return Ok(());
        }
        if self.state.phase != CallPhase::Incoming {
            return Err(CallError::InvalidPhase(self.state.phase));
        }
        if let Some(id) = self.state.call_id.clone() {
            if let Err(e) = self
                .backend
                .store
                .transition(&id, CallStatus::Rejected, Some(Utc::now()))
                .await
            {
                warn!(call_id = %id, error = %e, "failed to mark call rejected");
            }
        }
        self.record_closed = true;
        self.terminal_sent = true;
        self.send(Signal::Reject).await;
        self.teardown(EndReason::LocalRejected, false).await;
        Ok(())
    }

    /// Ends the call from this side. Repeated calls are no-ops.
    pub async fn hang_up(&mut self) -> Result<(), CallError> {
        if self.finished {
            return Ok(());
        }
        if !self.started {
            self.finished = true;
            return Ok(());
        }
        self.teardown(EndReason::LocalHangUp, true).await;
        Ok(())
    }

    /// The call UI went away: same teardown as a hang-up.
    pub async fn close(&mut self) {
        if self.finished {
            return;
        }
        if !self.started {
            self.finished = true;
            return;
        }
        self.teardown(EndReason::Closed, true).await;
    }

    pub fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let Some(capture) = self.state.capture.as_ref() else {
            return Err(CallError::InvalidPhase(self.state.phase));
        };
        let muted = !self.state.muted;
        capture.set_muted(muted);
        self.state.muted = muted;
        self.emitter.emit_mute(muted);
        Ok(muted)
    }

    pub fn tick(&mut self) {
        if self.state.phase == CallPhase::Active && !self.finished {
            self.state.elapsed_secs += 1;
            self.emitter.emit_tick(self.state.elapsed_secs);
        }
    }

    // ---------------------------------------------------------------------
    // inbound signals
    // ---------------------------------------------------------------------

    pub async fn handle_raw_signal(&mut self, raw: Value) {
        match SignalMessage::decode(raw) {
            Ok(message) => self.handle_signal(message).await,
            Err(e) => warn!(topic = %self.binding.topic, error = %e, "dropping malformed signal"),
        }
    }

    pub async fn handle_signal(&mut self, message: SignalMessage) {
        if message.from == self.binding.local {
            trace!(kind = %message.kind(), "ignoring own signal");
            return;
        }
        if message.from != self.binding.remote {
            warn!(from = %message.from, kind = %message.kind(), "signal from a third participant");
            return;
        }
        if self.finished {
            debug!(kind = %message.kind(), "call finished, dropping signal");
            return;
        }
        debug!(kind = %message.kind(), phase = %self.state.phase, "signal received");

        match message.signal {
            Signal::Request => self.on_request().await,
            Signal::Accept => {
                if self.state.phase == CallPhase::Calling {
                    let _ = self.start_peer(true).await;
                }
            }
            Signal::Reject => self.on_remote_terminal(EndReason::RemoteRejected).await,
            Signal::End => self.on_remote_terminal(EndReason::RemoteEnded).await,
            Signal::Offer(offer) => self.on_offer(offer).await,
            Signal::Answer(answer) => self.on_answer(answer).await,
            Signal::Candidate(candidate) => self.on_candidate(candidate).await,
        }
    }

    async fn on_request(&mut self) {
        match self.state.phase {
            CallPhase::Idle if !self.started => {
                self.started = true;
                self.state.call_id = self.lookup_ringing().await;
                info!(call_id = ?self.state.call_id, remote = %self.binding.remote, "incoming call");
                self.set_phase(CallPhase::Incoming);
            }
            CallPhase::Calling if self.binding.wins_glare() => {
                info!(remote = %self.binding.remote, "simultaneous call, keeping outgoing call");
            }
            CallPhase::Calling => {
                info!(remote = %self.binding.remote, "simultaneous call, yielding to remote call");
                if let Some(own) = self.state.call_id.take() {
                    if let Err(e) = self
                        .backend
                        .store
                        .transition(&own, CallStatus::Ended, Some(Utc::now()))
                        .await
                    {
                        warn!(call_id = %own, error = %e, "failed to abandon outgoing record");
                    }
                }
                self.state.call_id = self.lookup_ringing().await;
                self.set_phase(CallPhase::Incoming);
            }
            _ => debug!(phase = %self.state.phase, "duplicate request ignored"),
        }
    }

    async fn lookup_ringing(&self) -> Option<CallId> {
        match self
            .backend
            .store
            .latest_ringing(&self.binding.remote, &self.binding.local)
            .await
        {
            Ok(found) => found.map(|session| session.id),
            Err(e) => {
                warn!(error = %e, "could not resolve incoming call record");
                None
            }
        }
    }

    async fn on_remote_terminal(&mut self, reason: EndReason) {
        if !self.started {
            debug!(?reason, "no call in progress, ignoring terminal signal");
            return;
        }
        self.teardown(reason, false).await;
    }

    async fn on_offer(&mut self, offer: SessionDescription) {
        if self.state.phase == CallPhase::Idle {
            debug!("offer while idle dropped");
            return;
        }
        if self.state.initiator {
            warn!("offer received by the initiating side, dropped");
            return;
        }
        if self.state.peer.is_none() && self.start_peer(false).await.is_err() {
            return;
        }
        let Some(peer) = self.state.peer.clone() else {
            return;
        };
        match peer.accept_offer(offer).await {
            Ok(answer) => self.send(Signal::Answer(answer)).await,
            Err(e) => {
                let _ = self.fail(e).await;
            }
        }
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        let Some(peer) = self.state.peer.clone() else {
            debug!("answer without peer connection dropped");
            return;
        };
        if !self.state.initiator {
            warn!("answer received by the answering side, dropped");
            return;
        }
        if let Err(e) = peer.apply_answer(answer).await {
            let _ = self.fail(e).await;
        }
    }

    async fn on_candidate(&mut self, candidate: IceCandidate) {
        let Some(peer) = self.state.peer.clone() else {
            debug!("candidate without peer connection dropped");
            return;
        };
        if let Err(e) = peer.add_candidate(candidate).await {
            warn!(error = %e, "failed to add remote candidate");
        }
    }

    // ---------------------------------------------------------------------
    // record changes, peer callbacks, timers
    // ---------------------------------------------------------------------

    /// Persisted status fallback for missed `accept`/`reject`/`end` broadcasts.
    pub async fn on_status_change(&mut self, session: CallSession) {
        if self.finished || self.state.call_id.as_ref() != Some(&session.id) {
            return;
        }
        debug!(call_id = %session.id, status = %session.status, phase = %self.state.phase, "call record changed");
        match session.status {
            CallStatus::Accepted => {
                if self.state.phase == CallPhase::Calling {
                    let _ = self.start_peer(true).await;
                }
            }
            CallStatus::Rejected => {
                self.record_closed = true;
                self.teardown(EndReason::RemoteRejected, false).await;
            }
            CallStatus::Ended => {
                self.record_closed = true;
                self.teardown(EndReason::RemoteEnded, false).await;
            }
            CallStatus::Ringing => {}
        }
    }

    pub async fn on_peer_event(&mut self, event: PeerEvent) {
        if self.finished {
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if self.state.peer.is_some() {
                    self.send(Signal::Candidate(candidate)).await;
                }
            }
            PeerEvent::State(PeerState::Connected) => {
                self.state.connected = true;
                self.state.watchdog = None;
                if std::mem::take(&mut self.connection_problem) {
                    self.emitter.emit_connection_recovered();
                }
                self.emitter.emit_connected();
            }
            PeerEvent::State(PeerState::Disconnected | PeerState::Failed) => {
                if self.state.phase != CallPhase::Active || self.connection_problem {
                    return;
                }
                self.connection_problem = true;
                self.state.connected = false;
                self.state.watchdog = Some(Instant::now() + self.config.grace_period);
                self.emitter.emit_connection_problem();
            }
            PeerEvent::State(_) => {}
            PeerEvent::RemoteTrack => self.emitter.emit_remote_audio(),
        }
    }

    /// Ends an active call whose connection did not come up or recover in time.
    pub async fn on_watchdog(&mut self) {
        let Some(deadline) = self.state.watchdog else {
            return;
        };
        if self.finished || Instant::now() < deadline {
            return;
        }
        self.state.watchdog = None;
        warn!(call_id = ?self.state.call_id, "peer connection did not connect in time");
        self.emitter.emit_connection_failed();
        self.teardown(EndReason::ConnectionFailed, true).await;
    }

    // ---------------------------------------------------------------------
    // negotiation and teardown
    // ---------------------------------------------------------------------

    /// Builds the peer connection once; later calls are no-ops.
    async fn start_peer(&mut self, initiator: bool) -> Result<(), CallError> {
        if self.finished {
            return Err(CallError::Closed);
        }
        if self.state.peer.is_some() {
            debug!("peer connection already exists");
            return Ok(());
        }
        let peer = match self.backend.peers.create(self.peer_tx.clone()).await {
            Ok(peer) => peer,
            Err(e) => return self.fail(e).await,
        };
        self.state.peer = Some(peer.clone());
        self.state.initiator = initiator;

        let capture = match self.backend.media.acquire_microphone().await {
            Ok(capture) => capture,
            Err(e) => return self.fail(e).await,
        };
        capture.set_muted(self.state.muted);
        self.state.capture = Some(capture.clone());
        if let Err(e) = peer.attach_audio(&capture).await {
            return self.fail(e).await;
        }

        if initiator {
            let offer = match peer.create_offer().await {
                Ok(offer) => offer,
                Err(e) => return self.fail(e).await,
            };
            self.send(Signal::Offer(offer)).await;
        }

        self.state.elapsed_secs = 0;
        self.state.watchdog = Some(Instant::now() + self.config.negotiation_timeout);
        self.set_phase(CallPhase::Active);
        Ok(())
    }

    async fn fail(&mut self, error: CallError) -> Result<(), CallError> {
        self.emitter.emit_error(&error);
        self.teardown(EndReason::Failed, true).await;
        Err(error)
    }

    /// Single exit path. Runs once; later calls return immediately.
    async fn teardown(&mut self, reason: EndReason, notify: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        if notify && !self.terminal_sent {
            self.terminal_sent = true;
            self.send(Signal::End).await;
        }

        if !self.record_closed {
            self.record_closed = true;
            if let Some(id) = self.state.call_id.clone() {
                match self
                    .backend
                    .store
                    .transition(&id, reason.record_status(), Some(Utc::now()))
                    .await
                {
                    Ok(_) => {}
                    Err(CallError::Transition { from, .. }) => {
                        debug!(call_id = %id, %from, "call record already final")
                    }
                    Err(e) => warn!(call_id = %id, error = %e, "failed to close call record"),
                }
            }
        }

        self.state.release().await;
        self.set_phase(CallPhase::Idle);
        self.emitter.emit_ended(reason);
    }
}
