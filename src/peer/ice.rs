use crate::error::CallError;
use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Rejects empty urls and TURN entries without credentials.
pub fn validate_servers(servers: &[ServerConfig]) -> Result<(), CallError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(CallError::Config(format!(
                "ICE server {} has an empty url",
                server.id
            )));
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
        {
            return Err(CallError::Config(format!(
                "TURN server {} requires username and credential",
                server.id
            )));
        }
    }
    Ok(())
}

pub fn to_rtc_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let servers = if servers.is_empty() {
        DEFAULT_ICE_SERVERS.as_slice()
    } else {
        servers
    };
    RTCConfiguration {
        ice_servers: to_rtc_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(c: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate,
            sdp_mid: c.sdp_mid,
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: c.username_fragment,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        IceCandidate {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

/// Remote candidates that arrived before the remote description was set.
#[derive(Default)]
pub struct PendingCandidates {
    queue: Mutex<Vec<IceCandidate>>,
}

impl PendingCandidates {
    pub fn push(&self, candidate: IceCandidate) {
        if let Ok(mut queue) = self.queue.lock() {
            debug!(queued = queue.len() + 1, "remote description not set yet, queuing candidate");
            queue.push(candidate);
        }
    }

    pub fn drain(&self) -> Vec<IceCandidate> {
        self.queue
            .lock()
            .map(|mut queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CandidateCounts {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateCounts {
    let mut counts = CandidateCounts::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            counts.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            counts.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            counts.relay += 1;
        }
    }
    info!(
        host = counts.host,
        srflx = counts.srflx,
        relay = counts.relay,
        "candidate analysis"
    );
    if counts.relay == 0 {
        warn!("no TURN relay candidates, connection through NAT may fail");
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(username: Option<&str>) -> ServerConfig {
        ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: username.map(Into::into),
            credential: username.map(|_| "secret".into()),
        }
    }

    fn candidate(line: &str) -> IceCandidate {
        IceCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn turn_requires_credentials() {
        assert!(matches!(
            validate_servers(&[turn(None)]),
            Err(CallError::Config(_))
        ));
        assert!(validate_servers(&[turn(Some("user"))]).is_ok());
        assert!(validate_servers(&DEFAULT_ICE_SERVERS).is_ok());
    }

    #[test]
    fn empty_list_falls_back_to_defaults() {
        let config = rtc_config(&[]);
        assert_eq!(config.ice_servers.len(), DEFAULT_ICE_SERVERS.len());
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }

    #[test]
    fn custom_servers_get_schemes_and_credentials() {
        let servers = to_rtc_servers(&[turn(Some("user"))]);
        assert_eq!(servers[0].urls, vec!["turn:relay.example.org:3478"]);
        assert_eq!(servers[0].username, "user");
        assert_eq!(servers[0].credential, "secret");
    }

    #[test]
    fn pending_queue_drains_once() {
        let pending = PendingCandidates::default();
        pending.push(candidate("candidate:1 1 udp 1 10.0.0.1 5000 typ host"));
        pending.push(candidate("candidate:2 1 udp 1 10.0.0.1 5001 typ host"));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.drain().len(), 2);
        assert!(pending.is_empty());
        assert!(pending.drain().is_empty());
    }

    #[test]
    fn counts_candidate_types() {
        let counts = analyze_candidates(&[
            candidate("candidate:1 1 udp 1 10.0.0.1 5000 typ host"),
            candidate("candidate:2 1 udp 1 1.2.3.4 5000 typ srflx raddr 10.0.0.1"),
            candidate("candidate:3 1 udp 1 5.6.7.8 5000 typ relay raddr 1.2.3.4"),
            candidate("candidate:4 1 udp 1 10.0.0.2 5000 typ host"),
        ]);
        assert_eq!(
            counts,
            CandidateCounts {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }
}
