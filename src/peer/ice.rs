use crate::peer::types::{IceCandidate, IceServerConfig};
use crate::utils::add_ice_url_scheme;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, trace, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;

/// Public STUN servers used when the user configured none
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![
        IceServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        IceServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

pub fn rtc_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Rejects entries a peer connection would refuse later
pub fn validate_ice_servers(servers: &[IceServerConfig]) -> Result<(), String> {
    for server in servers {
        if server.url.is_empty() {
            return Err(format!("ICE server {} has an empty url", server.id));
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(format!("TURN server {} requires username and credential", server.id));
        }
    }
    Ok(())
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

/// Remote candidates that arrived before the remote description
#[derive(Default)]
pub struct PendingCandidates {
    queue: Mutex<Vec<IceCandidate>>,
    host: AtomicU32,
    srflx: AtomicU32,
    relay: AtomicU32,
}

impl PendingCandidates {
    /// Applies `candidate` now if the remote description is set, otherwise queues it
    pub async fn add(&self, pc: &RTCPeerConnection, candidate: IceCandidate) {
        self.count(&candidate);
        if pc.remote_description().await.is_none() {
            trace!("remote description not set yet, queuing candidate");
            self.queue.lock().push(candidate);
            return;
        }
        if let Err(e) = pc.add_ice_candidate(candidate.into()).await {
            warn!(error = %e, "failed to add ICE candidate");
        }
    }

    /// Applies everything queued; call right after setting the remote description
    pub async fn flush(&self, pc: &RTCPeerConnection) {
        let candidates: Vec<IceCandidate> = self.queue.lock().drain(..).collect();
        for candidate in candidates {
            trace!(candidate = %candidate.candidate, "applying queued candidate");
            if let Err(e) = pc.add_ice_candidate(candidate.into()).await {
                warn!(error = %e, "failed to apply queued candidate");
            }
        }
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    fn count(&self, candidate: &IceCandidate) {
        let counter = if candidate.candidate.contains("typ host") {
            &self.host
        } else if candidate.candidate.contains("typ srflx") {
            &self.srflx
        } else if candidate.candidate.contains("typ relay") {
            &self.relay
        } else {
            return;
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Logs the remote candidate mix; no relay candidates usually means NAT trouble
    pub fn log_mix(&self, connection_id: &str) {
        let (host, srflx, relay) = (
            self.host.load(Ordering::Relaxed),
            self.srflx.load(Ordering::Relaxed),
            self.relay.load(Ordering::Relaxed),
        );
        debug!(connection_id, host, srflx, relay, "remote candidate mix");
        if relay == 0 && srflx == 0 && host > 0 {
            warn!(connection_id, "only host candidates from remote; connection through NAT may fail");
        }
    }
}

/// Trickle log line for a freshly gathered local candidate
pub fn log_local_candidate(connection_id: &str, candidate: &RTCIceCandidate) {
    if let Ok(init) = candidate.to_json() {
        trace!(
            connection_id,
            candidate = %init.candidate,
            sdp_mid = ?init.sdp_mid,
            sdp_mline_index = ?init.sdp_mline_index,
            "local candidate"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_without_credentials_is_rejected() {
        let mut servers = default_ice_servers();
        assert!(validate_ice_servers(&servers).is_ok());
        servers.push(IceServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example:3478".into(),
            username: None,
            credential: None,
        });
        assert!(validate_ice_servers(&servers).unwrap_err().contains("relay"));
    }

    #[test]
    fn rtc_servers_carry_scheme_and_credentials() {
        let servers = rtc_ice_servers(&[IceServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example:3478".into(),
            username: Some("u".into()),
            credential: Some("p".into()),
        }]);
        assert_eq!(servers[0].urls, vec!["turn:relay.example:3478".to_string()]);
        assert_eq!(servers[0].username, "u");
        assert_eq!(servers[0].credential, "p");
    }
}
