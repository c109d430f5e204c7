use crate::config::{CallConfig, LOGGING_ENABLED};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Default filter when neither `CALLSIG_LOG` nor the config sets one.
pub fn default_level() -> &'static str {
    if LOGGING_ENABLED {
        if crate::config::dev::ENABLE_LOGGING {
            "debug"
        } else {
            "off"
        }
    } else {
        "warn"
    }
}

/// Installs the global subscriber. Repeated calls leave the first one in place.
pub fn init(config: &CallConfig) {
    let level = config
        .log_level
        .clone()
        .unwrap_or_else(|| default_level().to_string());
    let filter = EnvFilter::try_from_env("CALLSIG_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Logs a trickle ICE candidate as it appears.
pub fn dump_candidate(label: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            label,
            candidate = %init.candidate,
            sdp_mid = ?init.sdp_mid,
            sdp_mline_index = ?init.sdp_mline_index,
            "trickle candidate"
        );
    }
}

/// getStats snapshot of the nominated candidate pair.
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    moment,
                    local = %pair.local_candidate_id,
                    remote = %pair.remote_candidate_id,
                    bytes_sent = pair.bytes_sent,
                    bytes_received = pair.bytes_received,
                    state = ?pair.state,
                    "selected candidate pair"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_keeps_first_subscriber() {
        let config = CallConfig {
            log_level: Some("callsig=trace".into()),
            ..CallConfig::default()
        };
        init(&config);
        init(&CallConfig::default());
        assert!(!default_level().is_empty());
    }
}
