//! In-process broker network.
//!
//! Every [`MemoryBroker`] created from one [`MemoryNetwork`] can reach the
//! others by id. Channels and calls are wired back to back and report their
//! lifecycle through each side's event stream, the same way a signaling
//! adapter would. Fault switches let tests drop links, refuse registrations,
//! silence channels or stall opens.

use super::{
    Broker, BrokerEndpoint, BrokerError, BrokerErrorKind, BrokerEvent, CallEvent, CallMetadata, ChannelKind, DataLink,
    EventSender, LinkEvent, MediaCall,
};
use crate::envelope::Envelope;
use crate::error::{MediaError, TransportError};
use crate::media::{MediaConstraints, MediaDevices, MediaStream};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Shared registry of brokers that can reach each other
#[derive(Default)]
pub struct MemoryNetwork {
    peers: Mutex<HashMap<String, Arc<BrokerShared>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A broker attached to this network, not yet registered
    pub fn broker(self: &Arc<Self>) -> MemoryBroker {
        MemoryBroker {
            shared: Arc::new(BrokerShared {
                network: Arc::downgrade(self),
                state: Mutex::new(BrokerState::default()),
                faults: Faults::default(),
            }),
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.peers.lock().contains_key(id)
    }

    fn lookup(&self, id: &str) -> Option<Arc<BrokerShared>> {
        self.peers.lock().get(id).cloned()
    }
}

#[derive(Default)]
struct BrokerState {
    local_id: Option<String>,
    events: Option<EventSender>,
    disconnected: bool,
    links: HashMap<String, Arc<MemoryLink>>,
    calls: HashMap<String, Arc<MemoryCall>>,
}

#[derive(Default)]
struct Faults {
    fail_registrations: AtomicU32,
    hang_registrations: AtomicBool,
    manual_reconnect: AtomicBool,
    stall_opens: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    muted: Mutex<HashSet<ChannelKind>>,
    attempted: Mutex<Vec<BrokerEndpoint>>,
    connects: AtomicU32,
    frames_sent: AtomicU32,
    reconnects: AtomicU32,
}

struct BrokerShared {
    network: Weak<MemoryNetwork>,
    state: Mutex<BrokerState>,
    faults: Faults,
}

impl BrokerShared {
    fn emit(&self, event: BrokerEvent) {
        let events = self.state.lock().events.clone();
        if let Some(events) = events {
            if events.send(event).is_err() {
                trace!("event loop gone, dropping broker event");
            }
        }
    }

    fn local_id(&self) -> Option<String> {
        self.state.lock().local_id.clone()
    }

    fn ensure_registered(&self) -> Result<String, TransportError> {
        let state = self.state.lock();
        match (&state.local_id, state.disconnected) {
            (Some(id), false) => Ok(id.clone()),
            _ => Err(TransportError::NotRegistered),
        }
    }
}

/// Broker handle; clones share one registration
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<BrokerShared>,
}

impl MemoryBroker {
    /// The next `count` registrations fail
    pub fn fail_next_registrations(&self, count: u32) {
        self.shared.faults.fail_registrations.store(count, Ordering::SeqCst);
    }

    /// Registrations never answer
    pub fn hang_registrations(&self, hang: bool) {
        self.shared.faults.hang_registrations.store(hang, Ordering::SeqCst);
    }

    /// Endpoints tried so far, in order
    pub fn attempted_endpoints(&self) -> Vec<BrokerEndpoint> {
        self.shared.faults.attempted.lock().clone()
    }

    /// Number of `connect` calls made
    pub fn connect_count(&self) -> u32 {
        self.shared.faults.connects.load(Ordering::SeqCst)
    }

    /// Frames that left this broker over any channel
    pub fn frames_sent(&self) -> u32 {
        self.shared.faults.frames_sent.load(Ordering::SeqCst)
    }

    pub fn reconnect_requests(&self) -> u32 {
        self.shared.faults.reconnects.load(Ordering::SeqCst)
    }

    /// When set, `reconnect` is recorded but the link stays down
    pub fn manual_reconnect(&self, manual: bool) {
        self.shared.faults.manual_reconnect.store(manual, Ordering::SeqCst);
    }

    /// New channels are created but never open
    pub fn stall_opens(&self, stall: bool) {
        self.shared.faults.stall_opens.store(stall, Ordering::SeqCst);
    }

    /// `connect` waits this long before the channel exists, like a real offer round trip
    pub fn delay_connects(&self, delay: Option<Duration>) {
        *self.shared.faults.connect_delay.lock() = delay;
    }

    /// Outgoing frames on channels of `kind` are silently dropped
    pub fn mute(&self, kind: ChannelKind) {
        self.shared.faults.muted.lock().insert(kind);
    }

    pub fn unmute(&self, kind: ChannelKind) {
        self.shared.faults.muted.lock().remove(&kind);
    }

    /// Simulates losing the signaling link
    pub fn drop_signaling(&self) {
        let registered = {
            let mut state = self.shared.state.lock();
            if state.local_id.is_none() {
                return;
            }
            state.disconnected = true;
            true
        };
        if registered {
            self.shared.emit(BrokerEvent::Disconnected);
        }
    }

    /// Simulates the broker restoring the link on its own
    pub fn restore_signaling(&self) {
        self.shared.state.lock().disconnected = false;
        self.shared.emit(BrokerEvent::Open);
    }

    /// Simulates the broker closing the registration
    pub fn close_registration(&self) {
        self.shared.emit(BrokerEvent::Close);
    }

    /// Pushes an arbitrary event into this broker's stream
    pub fn inject(&self, event: BrokerEvent) {
        self.shared.emit(event);
    }

    /// Channels this broker currently holds, in no particular order
    pub fn links(&self) -> Vec<Arc<MemoryLink>> {
        self.shared.state.lock().links.values().cloned().collect()
    }

    pub fn local_id(&self) -> Option<String> {
        self.shared.local_id()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn register(&self, local_id: &str, endpoint: &BrokerEndpoint, events: EventSender) -> Result<(), TransportError> {
        let faults = &self.shared.faults;
        faults.attempted.lock().push(endpoint.clone());

        if faults.hang_registrations.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let refused = faults
            .fail_registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Signaling(format!("{endpoint} refused the connection")));
        }

        let network = self
            .shared
            .network
            .upgrade()
            .ok_or_else(|| TransportError::Setup("network dropped".into()))?;
        {
            let mut peers = network.peers.lock();
            if let Some(existing) = peers.get(local_id) {
                if !Arc::ptr_eq(existing, &self.shared) {
                    return Err(TransportError::Rejected(format!("ID \"{local_id}\" is taken")));
                }
            }
            peers.insert(local_id.to_string(), self.shared.clone());
        }

        let mut state = self.shared.state.lock();
        state.local_id = Some(local_id.to_string());
        state.events = Some(events);
        state.disconnected = false;
        debug!(local_id, %endpoint, "memory broker registered");
        Ok(())
    }

    fn reconnect(&self) {
        self.shared.faults.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.shared.faults.manual_reconnect.load(Ordering::SeqCst) {
            return;
        }
        let reopened = {
            let mut state = self.shared.state.lock();
            let reopened = state.local_id.is_some() && state.disconnected;
            state.disconnected = false;
            reopened
        };
        if reopened {
            self.shared.emit(BrokerEvent::Open);
        }
    }

    fn is_disconnected(&self) -> bool {
        self.shared.state.lock().disconnected
    }

    async fn connect(&self, remote_id: &str, kind: ChannelKind) -> Result<Arc<dyn DataLink>, TransportError> {
        self.shared.faults.connects.fetch_add(1, Ordering::SeqCst);
        let local_id = self.shared.ensure_registered()?;
        let delay = *self.shared.faults.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let link_id = format!("dc_{}", random_id());

        let local = Arc::new(MemoryLink::new(&link_id, remote_id, kind, &self.shared));
        self.shared.state.lock().links.insert(link_id.clone(), local.clone());

        let remote_broker = self.shared.network.upgrade().and_then(|n| n.lookup(remote_id));
        let Some(remote_broker) = remote_broker else {
            debug!(remote_id, "connect to unknown peer");
            self.shared.emit(BrokerEvent::Error(BrokerError::new(
                BrokerErrorKind::PeerUnavailable(remote_id.to_string()),
                format!("Could not connect to peer {remote_id}"),
            )));
            return Ok(local);
        };

        let remote = Arc::new(MemoryLink::new(&link_id, &local_id, kind, &remote_broker));
        remote_broker.state.lock().links.insert(link_id.clone(), remote.clone());
        local.pair(&remote);
        remote.pair(&local);
        remote_broker.emit(BrokerEvent::Connection(remote.clone()));

        if !self.shared.faults.stall_opens.load(Ordering::SeqCst) {
            local.open.store(true, Ordering::SeqCst);
            remote.open.store(true, Ordering::SeqCst);
            remote.notify(LinkEvent::Open);
            local.notify(LinkEvent::Open);
        }
        Ok(local)
    }

    async fn call(
        &self,
        remote_id: &str,
        local: Arc<dyn MediaStream>,
        metadata: CallMetadata,
    ) -> Result<Arc<dyn MediaCall>, TransportError> {
        let local_id = self.shared.ensure_registered()?;
        let call_id = format!("mc_{}", random_id());
        let outbound = Arc::new(MemoryCall::new(&call_id, remote_id, None, &self.shared));
        *outbound.local.lock() = Some(local);
        self.shared.state.lock().calls.insert(call_id.clone(), outbound.clone());

        let remote_broker = self.shared.network.upgrade().and_then(|n| n.lookup(remote_id));
        let Some(remote_broker) = remote_broker else {
            self.shared.emit(BrokerEvent::Error(BrokerError::new(
                BrokerErrorKind::PeerUnavailable(remote_id.to_string()),
                format!("Could not connect to peer {remote_id}"),
            )));
            return Ok(outbound);
        };

        let inbound = Arc::new(MemoryCall::new(&call_id, &local_id, Some(metadata), &remote_broker));
        remote_broker.state.lock().calls.insert(call_id.clone(), inbound.clone());
        outbound.pair(&inbound);
        inbound.pair(&outbound);
        remote_broker.emit(BrokerEvent::Call(inbound));
        Ok(outbound)
    }

    async fn destroy(&self) {
        let (local_id, links, calls) = {
            let mut state = self.shared.state.lock();
            state.events = None;
            state.disconnected = false;
            (
                state.local_id.take(),
                state.links.drain().map(|(_, l)| l).collect::<Vec<_>>(),
                state.calls.drain().map(|(_, c)| c).collect::<Vec<_>>(),
            )
        };
        for link in links {
            link.close().await;
        }
        for call in calls {
            call.close().await;
        }
        if let (Some(id), Some(network)) = (local_id, self.shared.network.upgrade()) {
            let mut peers = network.peers.lock();
            if peers.get(&id).is_some_and(|p| Arc::ptr_eq(p, &self.shared)) {
                peers.remove(&id);
            }
            debug!(local_id = %id, "memory broker destroyed");
        }
    }
}

/// One end of an in-process data channel
pub struct MemoryLink {
    id: String,
    remote_id: String,
    kind: ChannelKind,
    open: AtomicBool,
    closed: AtomicBool,
    owner: Weak<BrokerShared>,
    peer: Mutex<Option<Weak<MemoryLink>>>,
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("id", &self.id)
            .field("remote_id", &self.remote_id)
            .field("kind", &self.kind)
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish()
    }
}

impl MemoryLink {
    fn new(id: &str, remote_id: &str, kind: ChannelKind, owner: &Arc<BrokerShared>) -> Self {
        Self {
            id: id.to_string(),
            remote_id: remote_id.to_string(),
            kind,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            owner: Arc::downgrade(owner),
            peer: Mutex::new(None),
        }
    }

    fn pair(&self, other: &Arc<MemoryLink>) {
        *self.peer.lock() = Some(Arc::downgrade(other));
    }

    fn notify(&self, event: LinkEvent) {
        if let Some(owner) = self.owner.upgrade() {
            owner.emit(BrokerEvent::Link {
                link_id: self.id.clone(),
                event,
            });
        }
    }

    fn peer(&self) -> Option<Arc<MemoryLink>> {
        self.peer.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Marks this end closed; `true` on the first call only
    fn shut(&self) -> bool {
        self.open.store(false, Ordering::SeqCst);
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn detach(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.state.lock().links.remove(&self.id);
        }
    }

    /// Fails this channel with a transport error on both ends
    pub fn fail(&self, reason: &str) {
        if self.shut() {
            self.notify(LinkEvent::Error(reason.to_string()));
            self.detach();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataLink for MemoryLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        let owner = self.owner.upgrade().ok_or(TransportError::ChannelClosed)?;
        let frame = envelope.encode().map_err(|e| TransportError::Setup(e.to_string()))?;
        owner.faults.frames_sent.fetch_add(1, Ordering::SeqCst);
        if owner.faults.muted.lock().contains(&self.kind) {
            trace!(link_id = %self.id, "muted, frame dropped");
            return Ok(());
        }
        let peer = self.peer().ok_or(TransportError::ChannelClosed)?;
        peer.notify(LinkEvent::Data(Bytes::from(frame)));
        Ok(())
    }

    async fn close(&self) {
        if !self.shut() {
            return;
        }
        self.notify(LinkEvent::Close);
        self.detach();
        if let Some(peer) = self.peer() {
            if peer.shut() {
                peer.notify(LinkEvent::Close);
                peer.detach();
            }
        }
    }
}

/// One end of an in-process call
pub struct MemoryCall {
    id: String,
    remote_id: String,
    metadata: Option<CallMetadata>,
    local: Mutex<Option<Arc<dyn MediaStream>>>,
    closed: AtomicBool,
    owner: Weak<BrokerShared>,
    peer: Mutex<Option<Weak<MemoryCall>>>,
}

impl std::fmt::Debug for MemoryCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCall")
            .field("id", &self.id)
            .field("remote_id", &self.remote_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl MemoryCall {
    fn new(id: &str, remote_id: &str, metadata: Option<CallMetadata>, owner: &Arc<BrokerShared>) -> Self {
        Self {
            id: id.to_string(),
            remote_id: remote_id.to_string(),
            metadata,
            local: Mutex::new(None),
            closed: AtomicBool::new(false),
            owner: Arc::downgrade(owner),
            peer: Mutex::new(None),
        }
    }

    fn pair(&self, other: &Arc<MemoryCall>) {
        *self.peer.lock() = Some(Arc::downgrade(other));
    }

    fn notify(&self, event: CallEvent) {
        if let Some(owner) = self.owner.upgrade() {
            owner.emit(BrokerEvent::Media {
                call_id: self.id.clone(),
                event,
            });
        }
    }

    fn peer(&self) -> Option<Arc<MemoryCall>> {
        self.peer.lock().as_ref().and_then(Weak::upgrade)
    }

    fn shut(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn detach(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.state.lock().calls.remove(&self.id);
        }
    }

    /// Fails this end of the call with a transport error
    pub fn fail(&self, reason: &str) {
        if self.shut() {
            self.notify(CallEvent::Error(reason.to_string()));
            self.detach();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaCall for MemoryCall {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn metadata(&self) -> Option<CallMetadata> {
        self.metadata.clone()
    }

    async fn answer(&self, local: Arc<dyn MediaStream>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let peer = self.peer().ok_or(TransportError::ChannelClosed)?;
        *self.local.lock() = Some(local.clone());

        // each side sees a fresh handle for the other side's media
        let caller_media = peer.local.lock().as_ref().map(|s| MemoryStream::mirror(s.id()));
        peer.notify(CallEvent::Stream(MemoryStream::mirror(local.id())));
        if let Some(stream) = caller_media {
            self.notify(CallEvent::Stream(stream));
        }
        Ok(())
    }

    async fn close(&self) {
        if !self.shut() {
            return;
        }
        self.notify(CallEvent::Close);
        self.detach();
        if let Some(peer) = self.peer() {
            if peer.shut() {
                peer.notify(CallEvent::Close);
                peer.detach();
            }
        }
    }
}

/// Media handle with no tracks behind it
#[derive(Debug)]
pub struct MemoryStream {
    id: String,
    stopped: AtomicBool,
}

impl MemoryStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: format!("stream-{}", random_id()),
            stopped: AtomicBool::new(false),
        })
    }

    fn mirror(source_id: &str) -> Arc<dyn MediaStream> {
        Arc::new(Self {
            id: format!("remote-{source_id}"),
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaStream for MemoryStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// How scripted devices answer an acquisition
#[derive(Debug, Clone)]
pub enum DeviceBehavior {
    Grant,
    Deny(MediaError),
    /// Grant after a delay
    Delay(Duration),
    /// Never answer
    Hang,
}

/// Scripted capture devices
pub struct MemoryMediaDevices {
    behavior: Mutex<DeviceBehavior>,
    acquired: AtomicU32,
    streams: Mutex<Vec<Arc<MemoryStream>>>,
}

impl MemoryMediaDevices {
    pub fn new(behavior: DeviceBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            acquired: AtomicU32::new(0),
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: DeviceBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Number of acquisition requests seen
    pub fn acquisitions(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Every stream handed out so far
    pub fn streams(&self) -> Vec<Arc<MemoryStream>> {
        self.streams.lock().clone()
    }

    fn grant(&self) -> Arc<dyn MediaStream> {
        let stream = MemoryStream::new();
        self.streams.lock().push(stream.clone());
        stream
    }
}

#[async_trait]
impl MediaDevices for MemoryMediaDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaStream>, MediaError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if constraints.is_empty() {
            return Err(MediaError::NoDevice);
        }
        let behavior = self.behavior.lock().clone();
        match behavior {
            DeviceBehavior::Grant => Ok(self.grant()),
            DeviceBehavior::Deny(e) => Err(e),
            DeviceBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.grant())
            }
            DeviceBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(MediaError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Message;
    use tokio::sync::mpsc;

    fn endpoint() -> BrokerEndpoint {
        BrokerEndpoint::new("memory", 0, "/", false)
    }

    #[tokio::test]
    async fn connect_delivers_connection_then_frames() {
        let network = MemoryNetwork::new();
        let alice = network.broker();
        let bob = network.broker();
        let (atx, mut arx) = mpsc::unbounded_channel();
        let (btx, mut brx) = mpsc::unbounded_channel();
        alice.register("alice", &endpoint(), atx).await.unwrap();
        bob.register("bob", &endpoint(), btx).await.unwrap();

        let link = alice.connect("bob", ChannelKind::Messaging).await.unwrap();
        assert!(link.is_open());
        assert!(matches!(arx.recv().await, Some(BrokerEvent::Link { event: LinkEvent::Open, .. })));
        match brx.recv().await {
            Some(BrokerEvent::Connection(inbound)) => {
                assert_eq!(inbound.remote_id(), "alice");
                assert_eq!(inbound.id(), link.id());
            }
            other => panic!("expected connection, got {other:?}"),
        }
        assert!(matches!(brx.recv().await, Some(BrokerEvent::Link { event: LinkEvent::Open, .. })));

        link.send(&Envelope::Message(Message::new("alice", "bob", "hi"))).await.unwrap();
        match brx.recv().await {
            Some(BrokerEvent::Link { event: LinkEvent::Data(data), .. }) => {
                assert!(matches!(Envelope::decode(&data).unwrap(), Envelope::Message(m) if m.text == "hi"));
            }
            other => panic!("expected data, got {other:?}"),
        }
        assert_eq!(alice.frames_sent(), 1);
    }

    #[tokio::test]
    async fn unknown_peer_reports_unavailable() {
        let network = MemoryNetwork::new();
        let alice = network.broker();
        let (atx, mut arx) = mpsc::unbounded_channel();
        alice.register("alice", &endpoint(), atx).await.unwrap();

        let link = alice.connect("ghost", ChannelKind::Messaging).await.unwrap();
        assert!(!link.is_open());
        match arx.recv().await {
            Some(BrokerEvent::Error(err)) => assert_eq!(err.unavailable_peer(), Some("ghost")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let network = MemoryNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        network.broker().register("alice", &endpoint(), tx.clone()).await.unwrap();
        let err = network.broker().register("alice", &endpoint(), tx).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
    }

    #[tokio::test]
    async fn destroy_is_silent_and_frees_the_id() {
        let network = MemoryNetwork::new();
        let alice = network.broker();
        let (tx, mut rx) = mpsc::unbounded_channel();
        alice.register("alice", &endpoint(), tx).await.unwrap();
        alice.destroy().await;
        assert!(!network.is_registered("alice"));
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            alice.connect("bob", ChannelKind::Messaging).await,
            Err(TransportError::NotRegistered)
        ));
    }
}
