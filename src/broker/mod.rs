//! Seam between the session and a signaling broker.
//!
//! A [`Broker`] registers the local identity, originates data channels and
//! calls, and reports everything that happens afterwards as [`BrokerEvent`]s on
//! a single ordered stream. The session's event loop is the only consumer of
//! that stream.

pub mod memory;

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::media::MediaStream;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where a broker can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            secure,
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// Purpose of a data channel; carried as the channel label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Persistent chat channel, cached per remote peer
    Messaging,
    /// Disposable reachability check
    Probe,
}

impl ChannelKind {
    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::Messaging => "chat",
            ChannelKind::Probe => "probe",
        }
    }

    /// Anything not explicitly labelled as a probe is treated as messaging,
    /// so channels opened by stock clients still reach the chat path.
    pub fn from_label(label: &str) -> Self {
        if label == ChannelKind::Probe.label() {
            ChannelKind::Probe
        } else {
            ChannelKind::Messaging
        }
    }
}

/// Metadata attached to an outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub caller: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl CallMetadata {
    pub fn now(caller: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// The remote id is not registered with the broker
    PeerUnavailable(String),
    Network,
    ServerError,
    SocketError,
    IdTaken,
    InvalidKey,
    Other,
}

/// Error reported asynchronously by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Fatal errors end the registration; the rest concern a single peer
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, BrokerErrorKind::PeerUnavailable(_) | BrokerErrorKind::Other)
    }

    pub fn unavailable_peer(&self) -> Option<&str> {
        match &self.kind {
            BrokerErrorKind::PeerUnavailable(peer) => Some(peer),
            _ => None,
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Lifecycle of one data channel
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Open,
    Data(Bytes),
    Close,
    Error(String),
}

/// Lifecycle of one media call
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Remote media arrived
    Stream(Arc<dyn MediaStream>),
    Close,
    Error(String),
}

#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The identity is (again) registered
    Open,
    /// A remote peer opened a data channel to us
    Connection(Arc<dyn DataLink>),
    /// A remote peer is calling us
    Call(Arc<dyn MediaCall>),
    Error(BrokerError),
    /// The signaling link dropped; the identity survives
    Disconnected,
    /// The broker closed the registration for good
    Close,
    Link { link_id: String, event: LinkEvent },
    Media { call_id: String, event: CallEvent },
}

pub type EventSender = mpsc::UnboundedSender<BrokerEvent>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Registers `local_id` at `endpoint`; resolves once the broker accepts the id.
    /// All later events for this registration go to `events`.
    async fn register(&self, local_id: &str, endpoint: &BrokerEndpoint, events: EventSender) -> Result<(), TransportError>;

    /// Requests re-establishment of a dropped signaling link. Completion is
    /// reported as [`BrokerEvent::Open`].
    fn reconnect(&self);

    fn is_disconnected(&self) -> bool;

    /// Starts a data channel to `remote_id`. The returned link opens later,
    /// reported as [`LinkEvent::Open`] unless already open on return.
    async fn connect(&self, remote_id: &str, kind: ChannelKind) -> Result<Arc<dyn DataLink>, TransportError>;

    /// Places a call carrying `local` media
    async fn call(
        &self,
        remote_id: &str,
        local: Arc<dyn MediaStream>,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn MediaCall>, TransportError>;

    /// Drops the registration and every link and call it owns. Does not emit
    /// [`BrokerEvent::Close`]; that event is reserved for broker-side closure.
    async fn destroy(&self);
}

#[async_trait]
pub trait DataLink: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn remote_id(&self) -> &str;

    fn kind(&self) -> ChannelKind;

    fn is_open(&self) -> bool;

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Signals the transport to close; the close itself is reported as an event
    async fn close(&self);
}

#[async_trait]
pub trait MediaCall: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn remote_id(&self) -> &str;

    fn metadata(&self) -> Option<CallMetadata>;

    /// Answers an inbound call with local media
    async fn answer(&self, local: Arc<dyn MediaStream>) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Named capabilities the event loop dispatches to. `source` identifies the
/// broker registration, channel or call the event belongs to.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_open(&self, _source: &str) {}

    async fn on_data(&self, _source: &str, _data: Bytes) {}

    async fn on_close(&self, _source: &str) {}

    async fn on_error(&self, _source: &str, _error: &str) {}
}
