// Client configuration
// Log verbosity follows the build profile, everything else is read from JSON or defaults.

use crate::broker::BrokerEndpoint;
use crate::error::{ClientError, ClientResult};
use crate::media::MediaConstraints;
use crate::peer::PeerJsConfig;
use crate::retry::RetryPolicy;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "peerchat_lib=debug,peerchat=debug,webrtc=warn"; // debug builds are chatty

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "peerchat_lib=warn,peerchat=info,webrtc=error";

/// Public PeerJS cloud broker, used when the config lists no endpoints
pub static DEFAULT_ENDPOINTS: Lazy<Vec<BrokerEndpoint>> =
    Lazy::new(|| vec![BrokerEndpoint::new("0.peerjs.com", 443, "/", true)]);

/// Timeouts, retry policies and the broker endpoint list for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Ordered broker candidates; registration attempts walk this list round-robin
    pub endpoints: Vec<BrokerEndpoint>,
    pub registration_retry: RetryPolicy,
    pub send_retry: RetryPolicy,
    pub registration_timeout_ms: u64,
    pub liveness_interval_ms: u64,
    pub channel_open_timeout_ms: u64,
    pub identity_wait_timeout_ms: u64,
    pub media_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub media: MediaConstraints,
    /// Only read by the PeerJS broker
    pub peerjs: PeerJsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.clone(),
            registration_retry: RetryPolicy::registration(),
            send_retry: RetryPolicy::single(),
            registration_timeout_ms: 10_000,
            liveness_interval_ms: 15_000,
            channel_open_timeout_ms: 5_000,
            identity_wait_timeout_ms: 10_000,
            media_timeout_ms: 10_000,
            probe_timeout_ms: 3_000,
            media: MediaConstraints::default(),
            peerjs: PeerJsConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(raw: &str) -> ClientResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| ClientError::config(format!("invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClientError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.endpoints.is_empty() {
            return Err(ClientError::config("at least one broker endpoint is required"));
        }
        if let Some(bad) = self.endpoints.iter().find(|e| e.host.trim().is_empty()) {
            return Err(ClientError::config(format!("endpoint with empty host: {bad:?}")));
        }
        if self.registration_retry.max_attempts == 0 || self.send_retry.max_attempts == 0 {
            return Err(ClientError::config("retry policies need at least one attempt"));
        }
        if self.peerjs.key.is_empty() {
            return Err(ClientError::config("peerjs.key must not be empty"));
        }
        if self.peerjs.heartbeat_interval_ms == 0 {
            return Err(ClientError::config("peerjs.heartbeat_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Registration policy bound to the configured endpoint list
    pub fn registration_policy(&self) -> RetryPolicy {
        self.registration_retry
            .clone()
            .with_candidates(self.endpoints.clone())
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn channel_open_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_open_timeout_ms)
    }

    pub fn identity_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_wait_timeout_ms)
    }

    pub fn media_timeout(&self) -> Duration {
        Duration::from_millis(self.media_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_bounds() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoints[0].host, "0.peerjs.com");
        assert_eq!(config.registration_retry.max_attempts, 3);
        assert_eq!(config.liveness_interval(), Duration::from_secs(15));
        assert_eq!(config.channel_open_timeout(), Duration::from_secs(5));
        assert_eq!(config.media_timeout(), Duration::from_secs(10));
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClientConfig::from_json_str(
            r#"{
                "endpoints": [
                    {"host": "broker-a.local", "port": 9000, "path": "/myapp", "secure": false},
                    {"host": "broker-b.local", "port": 9000, "path": "/myapp", "secure": false}
                ],
                "probe_timeout_ms": 1500
            }"#,
        )
        .unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.probe_timeout(), Duration::from_millis(1500));
        assert_eq!(config.channel_open_timeout_ms, 5_000);
        assert_eq!(config.peerjs.key, "peerjs");

        let policy = config.registration_policy();
        assert_eq!(policy.candidate(0).unwrap().host, "broker-a.local");
        assert_eq!(policy.candidate(1).unwrap().host, "broker-b.local");
        assert_eq!(policy.candidate(2).unwrap().host, "broker-a.local");
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let err = ClientConfig::from_json_str(r#"{"endpoints": []}"#).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
