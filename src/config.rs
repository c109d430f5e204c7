// Logging is on in debug builds and reduced to warnings in release builds.

use crate::error::CallError;
use crate::peer::ice::{validate_servers, DEFAULT_ICE_SERVERS};
use crate::peer::state::{GRACE_PERIOD, NEGOTIATION_TIMEOUT, TICK_INTERVAL};
use crate::peer::types::ServerConfig;
use std::time::Duration;
use tracing::info;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

#[cfg(debug_assertions)]
pub mod dev {
    // Set to false to silence the default filter in debug builds.
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = false;
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    /// Prefix of the per-pair signaling topic.
    pub topic_prefix: String,
    pub grace_period: Duration,
    pub negotiation_timeout: Duration,
    pub tick_interval: Duration,
    pub microphone_enabled: bool,
    pub log_level: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            topic_prefix: "call".into(),
            grace_period: GRACE_PERIOD,
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            tick_interval: TICK_INTERVAL,
            microphone_enabled: true,
            log_level: None,
        }
    }
}

impl CallConfig {
    /// Loads `CALLSIG_*` variables, reading a `.env` file first if present.
    pub fn from_env() -> Result<Self, CallError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let stun_urls = env_csv("CALLSIG_STUN_URLS");
        let turn_urls = env_csv("CALLSIG_TURN_URLS");
        let turn_username = std::env::var("CALLSIG_TURN_USERNAME").ok();
        let turn_credential = std::env::var("CALLSIG_TURN_CREDENTIAL").ok();

        let mut ice_servers: Vec<ServerConfig> = match &stun_urls {
            Some(urls) => urls
                .iter()
                .enumerate()
                .map(|(i, url)| ServerConfig {
                    id: format!("stun-{i}"),
                    r#type: "stun".into(),
                    url: url.clone(),
                    username: None,
                    credential: None,
                })
                .collect(),
            None => defaults.ice_servers.clone(),
        };
        for (i, url) in turn_urls.unwrap_or_default().into_iter().enumerate() {
            ice_servers.push(ServerConfig {
                id: format!("turn-{i}"),
                r#type: "turn".into(),
                url,
                username: turn_username.clone(),
                credential: turn_credential.clone(),
            });
        }

        let config = Self {
            ice_servers,
            topic_prefix: env_or("CALLSIG_TOPIC_PREFIX", &defaults.topic_prefix),
            grace_period: env_secs("CALLSIG_GRACE_SECS", defaults.grace_period)?,
            negotiation_timeout: env_secs("CALLSIG_NEGOTIATION_SECS", defaults.negotiation_timeout)?,
            tick_interval: defaults.tick_interval,
            microphone_enabled: env_bool("CALLSIG_MICROPHONE", defaults.microphone_enabled),
            log_level: std::env::var("CALLSIG_LOG").ok().filter(|s| !s.is_empty()),
        };
        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CallError> {
        if self.topic_prefix.is_empty() {
            return Err(CallError::Config("topic prefix must not be empty".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(CallError::Config("tick interval must be positive".into()));
        }
        validate_servers(&self.ice_servers)
    }

    fn log_summary(&self) {
        info!(
            ice_servers = self.ice_servers.len(),
            topic_prefix = %self.topic_prefix,
            grace_secs = self.grace_period.as_secs(),
            negotiation_secs = self.negotiation_timeout.as_secs(),
            microphone = self.microphone_enabled,
            "call configuration loaded"
        );
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_csv(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, CallError> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| CallError::Config(format!("{key} must be a whole number of seconds"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topic_prefix, "call");
        assert_eq!(config.grace_period, Duration::from_secs(10));
    }

    #[test]
    fn turn_without_credentials_is_invalid() {
        let mut config = CallConfig::default();
        config.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "turn:relay.example.org".into(),
            username: None,
            credential: None,
        });
        assert!(matches!(config.validate(), Err(CallError::Config(_))));
    }

    #[tokio::test]
    async fn env_overrides_reach_the_media_and_peer_backends() {
        use crate::media::{MediaDevices, TrackMicrophone};
        use crate::peer::RtcPeerFactory;

        std::env::set_var("CALLSIG_MICROPHONE", "false");
        std::env::set_var("CALLSIG_STUN_URLS", "stun:stun.example.org:3478");
        std::env::set_var("CALLSIG_TURN_URLS", "turn:relay.example.org:3478");
        std::env::set_var("CALLSIG_TURN_USERNAME", "relay-user");
        std::env::set_var("CALLSIG_TURN_CREDENTIAL", "relay-secret");
        let loaded = CallConfig::from_env();
        for key in [
            "CALLSIG_MICROPHONE",
            "CALLSIG_STUN_URLS",
            "CALLSIG_TURN_URLS",
            "CALLSIG_TURN_USERNAME",
            "CALLSIG_TURN_CREDENTIAL",
        ] {
            std::env::remove_var(key);
        }
        let config = loaded.unwrap();

        assert!(!config.microphone_enabled);
        let urls: Vec<&str> = config.ice_servers.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["stun:stun.example.org:3478", "turn:relay.example.org:3478"]
        );
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("relay-user"));

        let peers = RtcPeerFactory::from_config(&config);
        assert_eq!(peers.servers(), config.ice_servers.as_slice());

        let microphone = TrackMicrophone::from_config(&config);
        assert!(!microphone.is_enabled());
        let err = microphone.acquire_microphone().await.unwrap_err();
        assert!(matches!(err, CallError::MediaUnavailable(_)));
    }

    #[test]
    fn empty_prefix_is_invalid() {
        let config = CallConfig {
            topic_prefix: String::new(),
            ..CallConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
