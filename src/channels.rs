//! Data channel manager: one cached messaging channel per remote peer.

use crate::broker::{Broker, ChannelKind, DataLink, EventHandler};
use crate::envelope::{Envelope, Message};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::host::HostHandler;
use crate::identity::{IdentityClient, IdentityState};
use crate::retry::{retry, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Open,
    Closed(Option<String>),
}

struct LinkEntry {
    link: Arc<dyn DataLink>,
    state: watch::Sender<LinkState>,
    inbound: bool,
}

pub struct ChannelManager {
    broker: Arc<dyn Broker>,
    identity: Arc<IdentityClient>,
    host: Arc<dyn HostHandler>,
    send_policy: RetryPolicy,
    open_timeout: Duration,
    identity_wait: Duration,
    /// remote id -> channel used for messaging
    active: Mutex<HashMap<String, Arc<dyn DataLink>>>,
    /// link id -> every channel we know about, open or not
    links: Mutex<HashMap<String, LinkEntry>>,
    /// remote id -> gate held while an outbound open is in flight
    opening: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ChannelManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        identity: Arc<IdentityClient>,
        host: Arc<dyn HostHandler>,
        send_policy: RetryPolicy,
        open_timeout: Duration,
        identity_wait: Duration,
    ) -> Self {
        Self {
            broker,
            identity,
            host,
            send_policy,
            open_timeout,
            identity_wait,
            active: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            opening: Mutex::new(HashMap::new()),
        }
    }

    /// Delivers `message` to `remote_id`, opening a channel when none is cached
    pub async fn send(&self, remote_id: &str, message: Message) -> ClientResult<()> {
        match self.identity.state() {
            IdentityState::Disconnected | IdentityState::Error => return Err(ClientError::NotRegistered),
            IdentityState::Connecting => {
                debug!(remote_id, "identity connecting, holding send");
                if !self.identity.wait_connected(self.identity_wait).await {
                    return Err(ClientError::NotRegistered);
                }
            }
            IdentityState::Connected => {}
        }

        let envelope = Envelope::Message(message);
        retry("send", &self.send_policy, |_| self.send_once(remote_id, &envelope)).await
    }

    async fn send_once(&self, remote_id: &str, envelope: &Envelope) -> ClientResult<()> {
        let link = match self.cached(remote_id) {
            Some(link) => link,
            None => self.open_shared(remote_id).await?,
        };
        if let Err(e) = link.send(envelope).await {
            warn!(remote_id, link_id = link.id(), error = %e, "send failed, dropping channel");
            self.uncache(remote_id, link.id());
            return Err(ClientError::channel(e.to_string()));
        }
        trace!(remote_id, link_id = link.id(), "envelope sent");
        Ok(())
    }

    fn cached(&self, remote_id: &str) -> Option<Arc<dyn DataLink>> {
        let mut active = self.active.lock();
        let link = active.get(remote_id)?.clone();
        if link.is_open() {
            return Some(link);
        }
        active.remove(remote_id);
        None
    }

    /// Opens at most one outbound channel per remote at a time; later callers
    /// pick up the channel the first one cached.
    async fn open_shared(&self, remote_id: &str) -> ClientResult<Arc<dyn DataLink>> {
        let gate = self.opening.lock().entry(remote_id.to_string()).or_default().clone();
        let opened = {
            let _held = gate.lock().await;
            match self.cached(remote_id) {
                Some(link) => {
                    trace!(remote_id, link_id = link.id(), "reusing channel opened concurrently");
                    Ok(link)
                }
                None => self.open(remote_id).await,
            }
        };
        let mut opening = self.opening.lock();
        // map plus this handle: nobody else is waiting
        if opening.get(remote_id).is_some_and(|g| Arc::ptr_eq(g, &gate)) && Arc::strong_count(&gate) == 2 {
            opening.remove(remote_id);
        }
        opened
    }

    async fn open(&self, remote_id: &str) -> ClientResult<Arc<dyn DataLink>> {
        let link = self
            .broker
            .connect(remote_id, ChannelKind::Messaging)
            .await
            .map_err(|e| match e {
                TransportError::NotRegistered => ClientError::NotRegistered,
                other => ClientError::channel(other.to_string()),
            })?;
        debug!(remote_id, link_id = link.id(), "opening channel");

        let mut rx = self.track(&link, false);
        // the open event may have been dispatched before the entry existed
        if link.is_open() {
            self.set_state(link.id(), LinkState::Open);
        }

        let outcome = timeout(self.open_timeout, rx.wait_for(|s| *s != LinkState::Connecting))
            .await
            .map(|r| r.map(|state| state.clone()));
        match outcome {
            Ok(Ok(LinkState::Open)) => {}
            Ok(Ok(LinkState::Closed(reason))) => {
                self.links.lock().remove(link.id());
                link.close().await;
                return Err(ClientError::channel(reason.unwrap_or_else(|| "channel closed before open".into())));
            }
            Ok(Ok(LinkState::Connecting)) | Ok(Err(_)) => {
                self.links.lock().remove(link.id());
                return Err(ClientError::channel("channel dropped before open"));
            }
            Err(_) => {
                warn!(remote_id, link_id = link.id(), "channel open timed out");
                self.links.lock().remove(link.id());
                link.close().await;
                return Err(ClientError::ConnectTimeout {
                    remote_id: remote_id.to_string(),
                    timeout: self.open_timeout,
                });
            }
        }

        let stale = self.active.lock().insert(remote_id.to_string(), link.clone());
        if let Some(stale) = stale.filter(|stale| stale.id() != link.id()) {
            self.retire(stale).await;
        }
        info!(remote_id, link_id = link.id(), "channel open");
        Ok(link)
    }

    /// Inbound channel from a remote peer
    pub async fn on_connection(&self, link: Arc<dyn DataLink>) {
        info!(remote_id = link.remote_id(), link_id = link.id(), kind = ?link.kind(), "inbound channel");
        self.track(&link, true);
        if link.is_open() {
            if let Some(stale) = self.mark_open(link.id()) {
                self.retire(stale).await;
            }
        }
    }

    /// Closes a channel that lost its cache slot to a newer one
    async fn retire(&self, stale: Arc<dyn DataLink>) {
        debug!(remote_id = stale.remote_id(), link_id = stale.id(), "closing replaced channel");
        self.links.lock().remove(stale.id());
        stale.close().await;
    }

    /// Fails every pending open towards a peer the broker reports as unknown
    pub fn fail_pending(&self, remote_id: &str) {
        let links = self.links.lock();
        for entry in links.values() {
            if entry.link.remote_id() == remote_id && *entry.state.borrow() == LinkState::Connecting {
                entry.state.send_replace(LinkState::Closed(Some(format!("peer {remote_id} is unavailable"))));
            }
        }
    }

    /// Closes and forgets the messaging channel to `remote_id`
    pub async fn close(&self, remote_id: &str) {
        let link = self.active.lock().remove(remote_id);
        if let Some(link) = link {
            info!(remote_id, link_id = link.id(), "closing channel");
            self.links.lock().remove(link.id());
            link.close().await;
        }
    }

    pub async fn close_all(&self) {
        self.active.lock().clear();
        let entries: Vec<LinkEntry> = self.links.lock().drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            entry.state.send_replace(LinkState::Closed(Some("session closed".into())));
            entry.link.close().await;
        }
    }

    /// Currently cached messaging channel, if any
    pub fn active_link(&self, remote_id: &str) -> Option<Arc<dyn DataLink>> {
        self.active.lock().get(remote_id).cloned()
    }

    fn track(&self, link: &Arc<dyn DataLink>, inbound: bool) -> watch::Receiver<LinkState> {
        let (tx, rx) = watch::channel(LinkState::Connecting);
        self.links.lock().insert(
            link.id().to_string(),
            LinkEntry {
                link: link.clone(),
                state: tx,
                inbound,
            },
        );
        rx
    }

    fn set_state(&self, link_id: &str, state: LinkState) {
        if let Some(entry) = self.links.lock().get(link_id) {
            entry.state.send_replace(state);
        }
    }

    /// Marks a channel open; returns the channel it displaced from the cache
    fn mark_open(&self, link_id: &str) -> Option<Arc<dyn DataLink>> {
        let links = self.links.lock();
        let entry = links.get(link_id)?;
        entry.state.send_replace(LinkState::Open);
        if !entry.inbound || entry.link.kind() != ChannelKind::Messaging {
            return None;
        }
        // last inbound open wins
        let stale = self
            .active
            .lock()
            .insert(entry.link.remote_id().to_string(), entry.link.clone());
        debug!(remote_id = entry.link.remote_id(), link_id, "cached inbound channel");
        stale.filter(|stale| stale.id() != link_id)
    }

    fn uncache(&self, remote_id: &str, link_id: &str) {
        let mut active = self.active.lock();
        if active.get(remote_id).is_some_and(|l| l.id() == link_id) {
            active.remove(remote_id);
        }
    }

    fn forget(&self, link_id: &str, reason: Option<String>) -> Option<Arc<dyn DataLink>> {
        let entry = self.links.lock().remove(link_id)?;
        entry.state.send_replace(LinkState::Closed(reason));
        self.uncache(entry.link.remote_id(), link_id);
        Some(entry.link)
    }

    fn link(&self, link_id: &str) -> Option<Arc<dyn DataLink>> {
        self.links.lock().get(link_id).map(|e| e.link.clone())
    }

    async fn dispatch(&self, link: Arc<dyn DataLink>, data: Bytes) {
        let envelope = match Envelope::decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(link_id = link.id(), error = %e, "dropping undecodable frame");
                return;
            }
        };
        match envelope {
            Envelope::Message(message) => {
                debug!(from = %message.sender, id = message.id, "message received");
                self.host.on_message(message);
            }
            Envelope::Ping => {
                trace!(link_id = link.id(), "ping, answering");
                if let Err(e) = link.send(&Envelope::Pong).await {
                    debug!(link_id = link.id(), error = %e, "pong not sent");
                }
            }
            Envelope::Pong => trace!(link_id = link.id(), "stray pong ignored"),
        }
    }
}

#[async_trait]
impl EventHandler for ChannelManager {
    async fn on_open(&self, source: &str) {
        if let Some(stale) = self.mark_open(source) {
            self.retire(stale).await;
        }
    }

    async fn on_data(&self, source: &str, data: Bytes) {
        match self.link(source) {
            Some(link) => self.dispatch(link, data).await,
            None => trace!(link_id = source, "data for unknown channel"),
        }
    }

    async fn on_close(&self, source: &str) {
        if let Some(link) = self.forget(source, None) {
            debug!(remote_id = link.remote_id(), link_id = source, "channel closed");
        }
    }

    async fn on_error(&self, source: &str, error: &str) {
        if let Some(link) = self.forget(source, Some(error.to_string())) {
            warn!(remote_id = link.remote_id(), link_id = source, error, "channel error");
            link.close().await;
        }
    }
}
