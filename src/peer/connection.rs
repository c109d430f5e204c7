use crate::config::CallConfig;
use crate::error::CallError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::media::AudioCapture;
use crate::peer::ice::{analyze_candidates, rtc_config, PendingCandidates};
use crate::peer::types::{IceCandidate, SdpKind, ServerConfig, SessionDescription};
use crate::peer::{PeerEvent, PeerEvents, PeerFactory, PeerLink, PeerState};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds webrtc-rs peer connections with the configured ICE servers.
pub struct RtcPeerFactory {
    servers: Vec<ServerConfig>,
}

impl RtcPeerFactory {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self { servers }
    }

    pub fn from_config(config: &CallConfig) -> Self {
        Self::new(config.ice_servers.clone())
    }

    pub fn servers(&self) -> &[ServerConfig] {
        &self.servers
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, events: PeerEvents) -> Result<Arc<dyn PeerLink>, CallError> {
        let peer = RtcPeer::connect(&self.servers, events).await?;
        Ok(Arc::new(peer))
    }
}

pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    pending: Arc<PendingCandidates>,
    closed: AtomicBool,
}

impl RtcPeer {
    pub async fn connect(servers: &[ServerConfig], events: PeerEvents) -> Result<Self, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(servers)).await?);

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(c) = cand else {
                    debug!("ICE candidate gathering completed");
                    return;
                };
                dump_candidate("LOCAL", &c);
                match c.to_json() {
                    Ok(init) => {
                        let _ = events.send(PeerEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => warn!(error = %e, "failed to serialize local candidate"),
                }
            })
        }));

        pc.on_ice_gathering_state_change(Box::new(|state| {
            debug!(?state, "ICE gathering state changed");
            Box::pin(async {})
        }));

        let state_events = events.clone();
        let pc_stats = Arc::downgrade(&pc);
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!(state = ?st, "peer connection state changed");
            let mapped = match st {
                RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
                    Some(PeerState::Connecting)
                }
                RTCPeerConnectionState::Connected => Some(PeerState::Connected),
                RTCPeerConnectionState::Disconnected => Some(PeerState::Disconnected),
                RTCPeerConnectionState::Failed => Some(PeerState::Failed),
                RTCPeerConnectionState::Closed => Some(PeerState::Closed),
                _ => None,
            };
            if matches!(
                mapped,
                Some(PeerState::Disconnected) | Some(PeerState::Failed)
            ) {
                if let Some(pc) = pc_stats.upgrade() {
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                    });
                }
            }
            if let Some(state) = mapped {
                let _ = state_events.send(PeerEvent::State(state));
            }
            Box::pin(async {})
        }));

        let track_events = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                info!(kind = %track.kind(), ssrc = track.ssrc(), "remote track");
                let _ = track_events.send(PeerEvent::RemoteTrack);
                Box::pin(async {})
            },
        ));

        Ok(Self {
            pc,
            pending: Arc::new(PendingCandidates::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    fn ensure_open(&self) -> Result<(), CallError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CallError::Peer("connection already closed".into()))
        } else {
            Ok(())
        }
    }

    async fn local_description(&self, kind: SdpKind) -> Result<SessionDescription, CallError> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::Peer("local description missing".into()))?;
        Ok(SessionDescription {
            kind,
            sdp: desc.sdp,
        })
    }

    async fn apply_pending_candidates(&self) {
        let queued = self.pending.drain();
        if queued.is_empty() {
            return;
        }
        analyze_candidates(&queued);
        for candidate in queued {
            debug!(candidate = %candidate.candidate, "applying pending candidate");
            if let Err(e) = self.pc.add_ice_candidate(candidate.into()).await {
                warn!(error = %e, "failed to apply pending candidate");
            }
        }
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, CallError> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

#[async_trait]
impl PeerLink for RtcPeer {
    async fn attach_audio(&self, capture: &AudioCapture) -> Result<(), CallError> {
        self.ensure_open()?;
        let Some(track) = capture.track() else {
            debug!(capture = %capture.id(), "capture has no outbound track");
            return Ok(());
        };
        let track: Arc<dyn TrackLocal + Send + Sync> = track.clone();
        let rtp_sender = self.pc.add_track(track).await?;
        // drain RTCP so interceptors keep running
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.ensure_open()?;
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        self.local_description(SdpKind::Offer).await
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        self.ensure_open()?;
        self.pc.set_remote_description(to_rtc(offer)?).await?;
        self.apply_pending_candidates().await;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        self.local_description(SdpKind::Answer).await
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), CallError> {
        self.ensure_open()?;
        self.pc.set_remote_description(to_rtc(answer)?).await?;
        self.apply_pending_candidates().await;
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.ensure_open()?;
        if self.pc.remote_description().await.is_none() {
            self.pending.push(candidate);
            return Ok(());
        }
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CallError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pending.clear();
        self.pc.close().await?;
        info!("peer connection closed");
        Ok(())
    }
}
