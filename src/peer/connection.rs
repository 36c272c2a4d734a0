use crate::error::TransportError;
use crate::peer::ice::{log_local_candidate, rtc_ice_servers, PendingCandidates};
use crate::peer::signaling::Outbox;
use crate::peer::types::{
    AnswerPayload, CandidatePayload, ClientMessage, ConnectionType, IceCandidate, IceServerConfig, MessageType,
    OfferPayload,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// How long a disconnected peer connection may take to recover before it is reported as failed
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Called once when the peer connection is given up on
pub type FailureHook = Arc<dyn Fn(String) + Send + Sync>;

/// Offer fields beyond the SDP
#[derive(Debug, Clone, Default)]
pub struct OfferOptions {
    pub label: Option<String>,
    pub serialization: Option<String>,
    pub reliable: bool,
    pub metadata: Option<Value>,
}

/// One PeerJS connection: an RTCPeerConnection plus the signaling needed to negotiate it
pub struct PeerLeg {
    pub connection_id: String,
    pub remote_id: String,
    pub connection_type: ConnectionType,
    pub pc: Arc<RTCPeerConnection>,
    pending: PendingCandidates,
    outbox: Arc<Outbox>,
    grace: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PeerLeg {
    pub async fn new(
        connection_id: String,
        remote_id: String,
        connection_type: ConnectionType,
        ice_servers: &[IceServerConfig],
        outbox: Arc<Outbox>,
        on_failure: FailureHook,
    ) -> Result<Arc<Self>, TransportError> {
        let pc = new_peer_connection(ice_servers).await?;
        let leg = Arc::new(Self {
            connection_id,
            remote_id,
            connection_type,
            pc,
            pending: PendingCandidates::default(),
            outbox,
            grace: Arc::new(Mutex::new(None)),
        });
        leg.install_handlers(on_failure);
        Ok(leg)
    }

    fn install_handlers(&self, on_failure: FailureHook) {
        let outbox = self.outbox.clone();
        let connection_id = self.connection_id.clone();
        let remote_id = self.remote_id.clone();
        let connection_type = self.connection_type;
        self.pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => {
                    log_local_candidate(&connection_id, &c);
                    match c.to_json() {
                        Ok(init) => {
                            let payload = CandidatePayload {
                                candidate: IceCandidate::from(init),
                                connection_type,
                                connection_id: connection_id.clone(),
                            };
                            let sent = ClientMessage::to(MessageType::Candidate, &remote_id, &payload)
                                .map_err(|e| TransportError::Setup(e.to_string()))
                                .and_then(|msg| outbox.send(msg));
                            if let Err(e) = sent {
                                debug!(connection_id = %connection_id, error = %e, "candidate not sent");
                            }
                        }
                        Err(e) => warn!(error = %e, "candidate without json form"),
                    }
                }
                None => trace!(connection_id = %connection_id, "ICE gathering complete"),
            }
            Box::pin(async {})
        }));

        let connection_id = self.connection_id.clone();
        self.pc.on_ice_gathering_state_change(Box::new(move |state| {
            trace!(connection_id = %connection_id, ?state, "ICE gathering state");
            Box::pin(async {})
        }));

        let connection_id = self.connection_id.clone();
        let grace = self.grace.clone();
        let pc = Arc::downgrade(&self.pc);
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                debug!(connection_id = %connection_id, state = ?st, "peer connection state");
                match st {
                    RTCPeerConnectionState::Connected => {
                        if let Some(handle) = grace.lock().take() {
                            info!(connection_id = %connection_id, "peer connection recovered");
                            handle.abort();
                        }
                    }
                    RTCPeerConnectionState::Disconnected => {
                        let mut pending = grace.lock();
                        if pending.is_none() {
                            let pc = pc.clone();
                            let connection_id = connection_id.clone();
                            let on_failure = on_failure.clone();
                            *pending = Some(tokio::spawn(async move {
                                sleep(GRACE_PERIOD).await;
                                let Some(pc) = pc.upgrade() else { return };
                                let state_now = pc.connection_state();
                                if state_now != RTCPeerConnectionState::Connected {
                                    dump_selected_pair(&pc, &connection_id, "after-grace").await;
                                    on_failure(format!("connection lost ({state_now:?})"));
                                }
                            }));
                        }
                    }
                    RTCPeerConnectionState::Failed => {
                        if let Some(handle) = grace.lock().take() {
                            handle.abort();
                        }
                        if let Some(pc) = pc.upgrade() {
                            let connection_id = connection_id.clone();
                            tokio::spawn(async move { dump_selected_pair(&pc, &connection_id, "failed").await });
                        }
                        on_failure("ICE connection failed".into());
                    }
                    RTCPeerConnectionState::Closed => {
                        if let Some(handle) = grace.lock().take() {
                            handle.abort();
                        }
                    }
                    _ => {}
                }
                Box::pin(async {})
            }));
    }

    /// Creates and sends our offer
    pub async fn send_offer(&self, options: OfferOptions) -> Result<(), TransportError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        let payload = OfferPayload {
            sdp: offer,
            connection_type: self.connection_type,
            connection_id: self.connection_id.clone(),
            label: options.label,
            reliable: options.reliable,
            serialization: options.serialization,
            metadata: options.metadata,
            browser: Some(concat!("peerchat/", env!("CARGO_PKG_VERSION")).into()),
        };
        let msg = ClientMessage::to(MessageType::Offer, &self.remote_id, &payload)
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        self.outbox.send(msg)?;
        debug!(connection_id = %self.connection_id, remote_id = %self.remote_id, "offer sent");
        Ok(())
    }

    /// Applies a remote offer and answers it
    pub async fn accept_offer(&self, offer: RTCSessionDescription) -> Result<(), TransportError> {
        self.pc.set_remote_description(offer).await?;
        self.pending.flush(&self.pc).await;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        let payload = AnswerPayload {
            sdp: answer,
            connection_type: self.connection_type,
            connection_id: self.connection_id.clone(),
            browser: None,
        };
        let msg = ClientMessage::to(MessageType::Answer, &self.remote_id, &payload)
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        self.outbox.send(msg)?;
        debug!(connection_id = %self.connection_id, remote_id = %self.remote_id, "answer sent");
        Ok(())
    }

    pub async fn apply_answer(&self, answer: RTCSessionDescription) -> Result<(), TransportError> {
        self.pc.set_remote_description(answer).await?;
        self.pending.flush(&self.pc).await;
        self.pending.log_mix(&self.connection_id);
        Ok(())
    }

    pub async fn add_candidate(&self, candidate: IceCandidate) {
        self.pending.add(&self.pc, candidate).await;
    }

    pub async fn close(&self) {
        self.pending.clear();
        if let Some(handle) = self.grace.lock().take() {
            handle.abort();
        }
        if let Err(e) = self.pc.close().await {
            debug!(connection_id = %self.connection_id, error = %e, "peer connection close failed");
        }
    }
}

/// Peer connection with default codecs and interceptors, so the same
/// constructor serves data and media connections.
pub async fn new_peer_connection(ice_servers: &[IceServerConfig]) -> Result<Arc<RTCPeerConnection>, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = api.new_peer_connection(rtc_config(ice_servers)).await?;
    Ok(Arc::new(pc))
}

fn rtc_config(ice_servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: rtc_ice_servers(ice_servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Snapshot of the nominated candidate pair, for diagnosing failed connections
pub async fn dump_selected_pair(pc: &RTCPeerConnection, connection_id: &str, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                debug!(
                    connection_id,
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
