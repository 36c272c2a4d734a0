//! Session context: owns the four components and the event loop that feeds them.

use crate::broker::{Broker, BrokerEvent, CallEvent, EventHandler, LinkEvent};
use crate::call::{CallManager, CallState};
use crate::channels::ChannelManager;
use crate::config::ClientConfig;
use crate::envelope::Message;
use crate::error::{ClientError, ClientResult};
use crate::host::HostHandler;
use crate::identity::{IdentityClient, IdentityState, PeerIdentity};
use crate::media::MediaDevices;
use crate::probe::LivenessProber;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// One logged-in peer: identity, channels, call and prober sharing a broker.
///
/// Dropping the session stops its event loop.
pub struct PeerSession {
    identity: Arc<IdentityClient>,
    channels: Arc<ChannelManager>,
    calls: Arc<CallManager>,
    prober: Arc<LivenessProber>,
    event_loop: JoinHandle<()>,
}

impl PeerSession {
    pub fn new(
        config: ClientConfig,
        broker: Arc<dyn Broker>,
        devices: Arc<dyn MediaDevices>,
        host: Arc<dyn HostHandler>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let identity = Arc::new(IdentityClient::new(
            broker.clone(),
            host.clone(),
            events_tx,
            config.registration_policy(),
            config.registration_timeout(),
            config.liveness_interval(),
        ));
        let channels = Arc::new(ChannelManager::new(
            broker.clone(),
            identity.clone(),
            host.clone(),
            config.send_retry.clone(),
            config.channel_open_timeout(),
            config.identity_wait_timeout(),
        ));
        let calls = Arc::new(CallManager::new(
            broker.clone(),
            devices,
            host,
            config.media,
            config.media_timeout(),
        ));
        let prober = Arc::new(LivenessProber::new(broker, identity.clone(), config.probe_timeout()));

        let dispatcher = Dispatcher {
            identity: identity.clone(),
            channels: channels.clone(),
            calls: calls.clone(),
            prober: prober.clone(),
        };
        let event_loop = tokio::spawn(dispatcher.run(events_rx));

        Ok(Self {
            identity,
            channels,
            calls,
            prober,
            event_loop,
        })
    }

    /// Registers the local identity with the first reachable broker
    pub async fn register(&self, local_id: &str) -> ClientResult<()> {
        if local_id.trim().is_empty() {
            return Err(ClientError::config("local id must not be empty"));
        }
        self.identity.register(local_id).await
    }

    /// Sends `text` to `remote_id`; returns the message as sent so the host can store it
    pub async fn send(&self, remote_id: &str, text: &str) -> ClientResult<Message> {
        let local_id = self.identity.local_id().ok_or(ClientError::NotRegistered)?;
        let message = Message::new(local_id, remote_id, text);
        self.channels.send(remote_id, message.clone()).await?;
        Ok(message)
    }

    /// Sends a prepared message to its receiver
    pub async fn send_message(&self, message: Message) -> ClientResult<()> {
        if self.identity.local_id().is_none() {
            return Err(ClientError::NotRegistered);
        }
        let remote_id = message.receiver.clone();
        self.channels.send(&remote_id, message).await
    }

    pub async fn start_call(&self, remote_id: &str) -> ClientResult<()> {
        if self.identity.state() != IdentityState::Connected {
            return Err(ClientError::NotRegistered);
        }
        let local_id = self.identity.local_id().ok_or(ClientError::NotRegistered)?;
        self.calls.start_call(&local_id, remote_id).await
    }

    pub async fn end_call(&self) {
        self.calls.end_call().await;
    }

    pub async fn probe(&self, remote_id: &str) -> bool {
        self.prober.probe(remote_id).await
    }

    pub async fn close_channel(&self, remote_id: &str) {
        self.channels.close(remote_id).await;
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity.snapshot()
    }

    /// Watch the identity state without a host callback
    pub fn status(&self) -> watch::Receiver<IdentityState> {
        self.identity.subscribe()
    }

    pub async fn call_state(&self) -> CallState {
        self.calls.state().await
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// Ends the call, closes every channel and drops the registration
    pub async fn logout(&self) {
        info!(local_id = ?self.identity.local_id(), "logging out");
        self.calls.end_call().await;
        self.channels.close_all().await;
        self.identity.logout().await;
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Routes broker events to the component that owns the resource
struct Dispatcher {
    identity: Arc<IdentityClient>,
    channels: Arc<ChannelManager>,
    calls: Arc<CallManager>,
    prober: Arc<LivenessProber>,
}

impl Dispatcher {
    async fn run(self, mut events: mpsc::UnboundedReceiver<BrokerEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        debug!("broker event stream closed");
    }

    async fn dispatch(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::Open => self.identity.on_open("broker").await,
            BrokerEvent::Disconnected => self.identity.on_disconnected(),
            BrokerEvent::Close => {
                self.identity.on_close("broker").await;
                self.calls.end_call().await;
            }
            BrokerEvent::Error(err) => {
                if let Some(peer) = err.unavailable_peer() {
                    self.channels.fail_pending(peer);
                    self.calls.on_peer_unavailable(peer).await;
                }
                self.identity.on_broker_error(&err);
            }
            BrokerEvent::Connection(link) => self.channels.on_connection(link).await,
            BrokerEvent::Call(call) => self.calls.on_incoming(call).await,
            BrokerEvent::Link { link_id, event } => {
                let handler: &dyn EventHandler = if self.prober.owns(&link_id) {
                    self.prober.as_ref()
                } else {
                    self.channels.as_ref()
                };
                match event {
                    LinkEvent::Open => handler.on_open(&link_id).await,
                    LinkEvent::Data(data) => handler.on_data(&link_id, data).await,
                    LinkEvent::Close => handler.on_close(&link_id).await,
                    LinkEvent::Error(e) => handler.on_error(&link_id, &e).await,
                }
            }
            BrokerEvent::Media { call_id, event } => match event {
                CallEvent::Stream(stream) => self.calls.on_stream(&call_id, stream).await,
                CallEvent::Close => self.calls.on_close(&call_id).await,
                CallEvent::Error(e) => self.calls.on_error(&call_id, &e).await,
            },
        }
        trace!("event dispatched");
    }
}
