use crate::config::CallConfig;
use crate::error::CallError;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Microphone access for the call.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire_microphone(&self) -> Result<AudioCapture, CallError>;
}

/// Handle to one acquired microphone capture. Clones share the same flags.
#[derive(Clone)]
pub struct AudioCapture {
    id: String,
    track: Option<Arc<TrackLocalStaticSample>>,
    muted: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl std::fmt::Debug for AudioCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCapture")
            .field("id", &self.id)
            .field("muted", &self.is_muted())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl AudioCapture {
    pub fn with_track(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: random_id(),
            track: Some(track),
            muted: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Capture without an outbound track, for hosts that route audio elsewhere.
    pub fn detached() -> Self {
        Self {
            id: random_id(),
            track: None,
            muted: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        self.track.as_ref()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Stops capturing. Returns false if it was already stopped.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if first {
            debug!(capture = %self.id, "microphone capture stopped");
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Pushes one encoded frame. Frames are dropped while muted or stopped.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> Result<bool, CallError> {
        if self.is_stopped() || self.is_muted() {
            return Ok(false);
        }
        let Some(track) = &self.track else {
            return Ok(false);
        };
        track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(true)
    }
}

/// Microphone backed by an opus sample track; the host audio pipeline feeds
/// encoded frames through [`AudioCapture::write_frame`].
pub struct TrackMicrophone {
    enabled: bool,
}

impl TrackMicrophone {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_config(config: &CallConfig) -> Self {
        Self::new(config.microphone_enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl MediaDevices for TrackMicrophone {
    async fn acquire_microphone(&self) -> Result<AudioCapture, CallError> {
        if !self.enabled {
            return Err(CallError::MediaUnavailable(
                "microphone access is disabled".into(),
            ));
        }
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            format!("callsig-{}", random_id()),
        ));
        let capture = AudioCapture::with_track(track);
        info!(capture = %capture.id(), "microphone acquired");
        Ok(capture)
    }
}
