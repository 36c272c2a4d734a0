//! PeerJS-protocol broker over a WebSocket signaling link and `webrtc` peer connections.
//!
//! Every data or media connection is its own RTCPeerConnection, negotiated
//! through OFFER / ANSWER / CANDIDATE frames relayed by the PeerJS server.

pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod media;
pub mod signaling;
pub mod types;

pub use data_channel::RtcLink;
pub use media::{RemoteMediaStream, RtcCall, RtcMediaDevices, RtcMediaStream};
pub use types::IceServerConfig;

use crate::broker::{
    Broker, BrokerEndpoint, BrokerError, BrokerErrorKind, BrokerEvent, CallMetadata, ChannelKind, DataLink,
    EventSender, MediaCall,
};
use crate::error::TransportError;
use crate::media::MediaStream;
use crate::utils::{random_id, random_token};
use async_trait::async_trait;
use connection::{FailureHook, OfferOptions, PeerLeg};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use signaling::{Outbox, SignalingTasks};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use types::{AnswerPayload, CandidatePayload, ConnectionType, MessageType, OfferPayload, ServerMessage};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;

/// PeerJS server options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerJsConfig {
    /// API key; the public cloud server accepts `peerjs`
    pub key: String,
    pub heartbeat_interval_ms: u64,
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for PeerJsConfig {
    fn default() -> Self {
        Self {
            key: "peerjs".into(),
            heartbeat_interval_ms: 5_000,
            ice_servers: ice::default_ice_servers(),
        }
    }
}

impl PeerJsConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Clone)]
enum Connection {
    Data(Arc<RtcLink>),
    Media(Arc<RtcCall>),
}

impl Connection {
    fn remote_id(&self) -> &str {
        match self {
            Connection::Data(link) => &link.leg().remote_id,
            Connection::Media(call) => &call.leg().remote_id,
        }
    }

    fn leg(&self) -> &Arc<PeerLeg> {
        match self {
            Connection::Data(link) => link.leg(),
            Connection::Media(call) => call.leg(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Connection::Data(link) => link.is_closed(),
            Connection::Media(call) => call.is_closed(),
        }
    }

    async fn close(&self) {
        match self {
            Connection::Data(link) => link.close().await,
            Connection::Media(call) => call.close().await,
        }
    }
}

#[derive(Clone)]
struct Registration {
    local_id: String,
    token: String,
    endpoint: BrokerEndpoint,
    events: EventSender,
}

struct ActiveSocket {
    _tasks: SignalingTasks,
    router: JoinHandle<()>,
}

impl Drop for ActiveSocket {
    fn drop(&mut self) {
        self.router.abort();
    }
}

struct Shared {
    config: PeerJsConfig,
    outbox: Arc<Outbox>,
    registration: Mutex<Option<Registration>>,
    socket: Mutex<Option<ActiveSocket>>,
    disconnected: AtomicBool,
    reconnecting: AtomicBool,
    /// Bumped by register/destroy; routers of older sockets stop reporting
    generation: AtomicU64,
    connections: Mutex<HashMap<String, Connection>>,
}

/// Broker speaking the PeerJS server protocol
#[derive(Clone)]
pub struct PeerJsBroker {
    shared: Arc<Shared>,
}

impl PeerJsBroker {
    pub fn new(config: PeerJsConfig) -> Result<Self, TransportError> {
        ice::validate_ice_servers(&config.ice_servers).map_err(TransportError::Setup)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                outbox: Arc::new(Outbox::default()),
                registration: Mutex::new(None),
                socket: Mutex::new(None),
                disconnected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                connections: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl Shared {
    fn emit(&self, event: BrokerEvent) {
        let events = self.registration.lock().as_ref().map(|r| r.events.clone());
        if let Some(events) = events {
            if events.send(event).is_err() {
                trace!("event loop gone, dropping broker event");
            }
        }
    }

    fn registered(&self) -> Result<Registration, TransportError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::NotRegistered);
        }
        self.registration.lock().clone().ok_or(TransportError::NotRegistered)
    }

    fn insert(&self, id: &str, connection: Connection) {
        let mut connections = self.connections.lock();
        connections.retain(|_, c| !c.is_closed());
        connections.insert(id.to_string(), connection);
    }

    fn connection(&self, id: &str) -> Option<Connection> {
        self.connections.lock().get(id).cloned()
    }

    /// Opens a socket for `registration` and waits for the server's verdict
    async fn open_socket(
        self: &Arc<Self>,
        registration: &Registration,
        generation: u64,
    ) -> Result<ActiveSocket, TransportError> {
        let url = signaling::server_url(
            &registration.endpoint,
            &self.config.key,
            &registration.local_id,
            &registration.token,
        )?;
        let (tx, mut incoming, tasks) = signaling::open(&url, self.config.heartbeat_interval()).await?;

        let first = incoming
            .recv()
            .await
            .ok_or_else(|| TransportError::Signaling("socket closed before OPEN".into()))?;
        match first.kind {
            MessageType::Open => {}
            MessageType::IdTaken | MessageType::InvalidKey => {
                return Err(TransportError::Rejected(first.error_message()));
            }
            _ => return Err(TransportError::Signaling(first.error_message())),
        }

        self.outbox.attach(tx);
        let router = tokio::spawn(route(Arc::downgrade(self), incoming, generation));
        Ok(ActiveSocket { _tasks: tasks, router })
    }

    async fn handle(self: &Arc<Self>, msg: ServerMessage) {
        match msg.kind {
            MessageType::Open | MessageType::Heartbeat => {}
            MessageType::Error => self.emit(BrokerEvent::Error(BrokerError::new(
                BrokerErrorKind::ServerError,
                msg.error_message(),
            ))),
            MessageType::IdTaken => self.emit(BrokerEvent::Error(BrokerError::new(
                BrokerErrorKind::IdTaken,
                msg.error_message(),
            ))),
            MessageType::InvalidKey => self.emit(BrokerEvent::Error(BrokerError::new(
                BrokerErrorKind::InvalidKey,
                msg.error_message(),
            ))),
            MessageType::Leave => {
                if let Some(src) = msg.src {
                    info!(remote_id = %src, "peer left");
                    let gone: Vec<Connection> = self
                        .connections
                        .lock()
                        .values()
                        .filter(|c| c.remote_id() == src)
                        .cloned()
                        .collect();
                    for connection in gone {
                        connection.close().await;
                    }
                }
            }
            MessageType::Expire => {
                if let Some(src) = msg.src {
                    self.emit(BrokerEvent::Error(BrokerError::new(
                        BrokerErrorKind::PeerUnavailable(src.clone()),
                        format!("Could not connect to peer {src}"),
                    )));
                }
            }
            MessageType::Offer => match (msg.src, msg.payload) {
                (Some(src), Some(payload)) => match serde_json::from_value::<OfferPayload>(payload) {
                    Ok(offer) => self.accept_offer(src, offer).await,
                    Err(e) => warn!(error = %e, "malformed OFFER"),
                },
                _ => warn!("OFFER without source or payload"),
            },
            MessageType::Answer => {
                let Some(payload) = msg.payload else { return };
                match serde_json::from_value::<AnswerPayload>(payload) {
                    Ok(answer) => match self.connection(&answer.connection_id) {
                        Some(connection) => {
                            if let Err(e) = connection.leg().apply_answer(answer.sdp).await {
                                warn!(connection_id = %answer.connection_id, error = %e, "cannot apply answer");
                                self.fail(&connection, e.to_string());
                            }
                        }
                        None => trace!(connection_id = %answer.connection_id, "answer for unknown connection"),
                    },
                    Err(e) => warn!(error = %e, "malformed ANSWER"),
                }
            }
            MessageType::Candidate => {
                let Some(payload) = msg.payload else { return };
                match serde_json::from_value::<CandidatePayload>(payload) {
                    Ok(candidate) => match self.connection(&candidate.connection_id) {
                        Some(connection) => connection.leg().add_candidate(candidate.candidate).await,
                        None => trace!(connection_id = %candidate.connection_id, "candidate for unknown connection"),
                    },
                    Err(e) => warn!(error = %e, "malformed CANDIDATE"),
                }
            }
            MessageType::Unknown => debug!("unknown signaling frame ignored"),
        }
    }

    fn fail(&self, connection: &Connection, reason: String) {
        match connection {
            Connection::Data(link) => link.fail(reason),
            Connection::Media(call) => call.fail(reason),
        }
    }

    fn failure_hook(self: &Arc<Self>, connection_id: &str) -> FailureHook {
        let shared = Arc::downgrade(self);
        let connection_id = connection_id.to_string();
        Arc::new(move |reason: String| {
            if let Some(connection) = shared.upgrade().and_then(|s| s.connection(&connection_id)) {
                match connection {
                    Connection::Data(link) => link.fail(reason),
                    Connection::Media(call) => call.fail(reason),
                }
            }
        })
    }

    async fn accept_offer(self: &Arc<Self>, src: String, offer: OfferPayload) {
        let Ok(registration) = self.registered() else { return };
        let connection_id = offer.connection_id.clone();
        let leg = match PeerLeg::new(
            connection_id.clone(),
            src.clone(),
            offer.connection_type,
            &self.config.ice_servers,
            self.outbox.clone(),
            self.failure_hook(&connection_id),
        )
        .await
        {
            Ok(leg) => leg,
            Err(e) => {
                warn!(remote_id = %src, error = %e, "cannot set up inbound connection");
                return;
            }
        };

        match offer.connection_type {
            ConnectionType::Data => {
                let kind = ChannelKind::from_label(offer.label.as_deref().unwrap_or_default());
                let link = RtcLink::new(leg.clone(), kind, registration.events.clone());
                let weak: Weak<RtcLink> = Arc::downgrade(&link);
                leg.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    if let Some(link) = weak.upgrade() {
                        link.attach(dc);
                    }
                    Box::pin(async {})
                }));
                self.insert(&connection_id, Connection::Data(link.clone()));
                self.emit(BrokerEvent::Connection(link.clone()));
                if let Err(e) = leg.accept_offer(offer.sdp).await {
                    warn!(connection_id = %connection_id, error = %e, "cannot answer data offer");
                    link.fail(e.to_string());
                }
            }
            ConnectionType::Media => {
                let metadata = offer
                    .metadata
                    .and_then(|m| serde_json::from_value::<CallMetadata>(m).ok());
                let call = RtcCall::new(leg, metadata, Some(offer.sdp), registration.events.clone());
                self.insert(&connection_id, Connection::Media(call.clone()));
                self.emit(BrokerEvent::Call(call));
            }
        }
    }

    async fn close_connections(&self) {
        let all: Vec<Connection> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for connection in all {
            connection.close().await;
        }
    }
}

/// Forwards server frames to the broker until the socket closes
async fn route(shared: Weak<Shared>, mut incoming: mpsc::UnboundedReceiver<ServerMessage>, generation: u64) {
    while let Some(msg) = incoming.recv().await {
        let Some(shared) = shared.upgrade() else { return };
        shared.handle(msg).await;
    }
    let Some(shared) = shared.upgrade() else { return };
    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    warn!("signaling socket lost");
    shared.outbox.detach();
    shared.disconnected.store(true, Ordering::SeqCst);
    shared.emit(BrokerEvent::Disconnected);
}

#[async_trait]
impl Broker for PeerJsBroker {
    async fn register(&self, local_id: &str, endpoint: &BrokerEndpoint, events: EventSender) -> Result<(), TransportError> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.socket.lock().take();
        self.shared.outbox.detach();

        let registration = Registration {
            local_id: local_id.to_string(),
            token: random_token(),
            endpoint: endpoint.clone(),
            events,
        };
        // set before the router starts so inbound offers find their event stream
        *self.shared.registration.lock() = Some(registration.clone());
        self.shared.disconnected.store(false, Ordering::SeqCst);

        let socket = match self.shared.open_socket(&registration, generation).await {
            Ok(socket) => socket,
            Err(e) => {
                if self.shared.generation.load(Ordering::SeqCst) == generation {
                    self.shared.registration.lock().take();
                    self.shared.outbox.detach();
                }
                return Err(e);
            }
        };
        if self.shared.generation.load(Ordering::SeqCst) != generation {
            return Err(TransportError::Signaling("registration superseded".into()));
        }
        *self.shared.socket.lock() = Some(socket);
        info!(local_id, %endpoint, "registered with PeerJS server");
        Ok(())
    }

    fn reconnect(&self) {
        let Some(registration) = self.shared.registration.lock().clone() else { return };
        if !self.shared.disconnected.load(Ordering::SeqCst) || self.shared.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(local_id = %registration.local_id, endpoint = %registration.endpoint, "reconnecting signaling socket");
            match shared.open_socket(&registration, generation).await {
                Ok(socket) if shared.generation.load(Ordering::SeqCst) == generation => {
                    *shared.socket.lock() = Some(socket);
                    shared.disconnected.store(false, Ordering::SeqCst);
                    shared.emit(BrokerEvent::Open);
                }
                Ok(_) => debug!("reconnect superseded"),
                // stay disconnected; the next liveness tick asks again
                Err(e) => warn!(error = %e, "reconnect failed"),
            }
            shared.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }

    async fn connect(&self, remote_id: &str, kind: ChannelKind) -> Result<Arc<dyn DataLink>, TransportError> {
        let registration = self.shared.registered()?;
        let connection_id = format!("{}{}", ConnectionType::Data.prefix(), random_id());
        let leg = PeerLeg::new(
            connection_id.clone(),
            remote_id.to_string(),
            ConnectionType::Data,
            &self.shared.config.ice_servers,
            self.shared.outbox.clone(),
            self.shared.failure_hook(&connection_id),
        )
        .await?;

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = leg.pc.create_data_channel(kind.label(), Some(init)).await?;
        let link = RtcLink::new(leg.clone(), kind, registration.events);
        link.attach(dc);
        self.shared.insert(&connection_id, Connection::Data(link.clone()));

        let options = OfferOptions {
            label: Some(kind.label().to_string()),
            serialization: Some("json".into()),
            reliable: true,
            metadata: None,
        };
        if let Err(e) = leg.send_offer(options).await {
            link.close().await;
            return Err(e);
        }
        debug!(remote_id, connection_id = %connection_id, ?kind, "data connection offered");
        Ok(link)
    }

    async fn call(
        &self,
        remote_id: &str,
        local: Arc<dyn MediaStream>,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn MediaCall>, TransportError> {
        let registration = self.shared.registered()?;
        let stream = local
            .as_any()
            .downcast_ref::<RtcMediaStream>()
            .ok_or_else(|| TransportError::Setup("local stream is not backed by webrtc tracks".into()))?;

        let connection_id = format!("{}{}", ConnectionType::Media.prefix(), random_id());
        let leg = PeerLeg::new(
            connection_id.clone(),
            remote_id.to_string(),
            ConnectionType::Media,
            &self.shared.config.ice_servers,
            self.shared.outbox.clone(),
            self.shared.failure_hook(&connection_id),
        )
        .await?;
        let call = RtcCall::new(leg.clone(), Some(metadata.clone()), None, registration.events);
        call.add_local(stream).await?;
        self.shared.insert(&connection_id, Connection::Media(call.clone()));

        let options = OfferOptions {
            metadata: Some(serde_json::to_value(&metadata).map_err(|e| TransportError::Setup(e.to_string()))?),
            ..Default::default()
        };
        if let Err(e) = leg.send_offer(options).await {
            call.close().await;
            return Err(e);
        }
        debug!(remote_id, connection_id = %connection_id, "media connection offered");
        Ok(call)
    }

    async fn destroy(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let registration = self.shared.registration.lock().take();
        self.shared.outbox.detach();
        self.shared.socket.lock().take();
        self.shared.disconnected.store(false, Ordering::SeqCst);
        self.shared.close_connections().await;
        if let Some(registration) = registration {
            debug!(local_id = %registration.local_id, "PeerJS registration destroyed");
        }
    }
}
