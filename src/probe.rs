//! Reachability checks over disposable probe channels.
//!
//! Probe links live in their own table and their events never reach the
//! channel manager, so a `pong` cannot leak into the messaging path.

use crate::broker::{Broker, ChannelKind, DataLink, EventHandler};
use crate::envelope::Envelope;
use crate::identity::{IdentityClient, IdentityState};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    Pending,
    Open,
    Pong,
    Failed,
}

pub struct LivenessProber {
    broker: Arc<dyn Broker>,
    identity: Arc<IdentityClient>,
    timeout: Duration,
    links: Mutex<HashMap<String, watch::Sender<ProbeState>>>,
}

impl LivenessProber {
    pub fn new(broker: Arc<dyn Broker>, identity: Arc<IdentityClient>, timeout: Duration) -> Self {
        Self {
            broker,
            identity,
            timeout,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the event for `link_id` belongs to a probe in flight
    pub fn owns(&self, link_id: &str) -> bool {
        self.links.lock().contains_key(link_id)
    }

    /// `true` when `remote_id` answers a ping within the probe timeout
    pub async fn probe(&self, remote_id: &str) -> bool {
        if self.identity.state() != IdentityState::Connected {
            debug!(remote_id, "not connected, probe skipped");
            return false;
        }
        let deadline = Instant::now() + self.timeout;

        let link = match timeout_at(deadline, self.broker.connect(remote_id, ChannelKind::Probe)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                debug!(remote_id, error = %e, "probe channel refused");
                return false;
            }
            Err(_) => return false,
        };

        let (tx, mut rx) = watch::channel(ProbeState::Pending);
        self.links.lock().insert(link.id().to_string(), tx);
        // the open event may have been routed before the link was ours
        if link.is_open() {
            self.update(link.id(), ProbeState::Open);
        }

        let reachable = self.exchange(&link, &mut rx, deadline).await;

        self.links.lock().remove(link.id());
        link.close().await;
        debug!(remote_id, reachable, "probe finished");
        reachable
    }

    async fn exchange(&self, link: &Arc<dyn DataLink>, rx: &mut watch::Receiver<ProbeState>, deadline: Instant) -> bool {
        let opened = timeout_at(deadline, rx.wait_for(|s| *s != ProbeState::Pending))
            .await
            .is_ok_and(|r| r.is_ok_and(|s| *s != ProbeState::Failed));
        if !opened {
            return false;
        }
        if link.send(&Envelope::Ping).await.is_err() {
            return false;
        }
        timeout_at(deadline, rx.wait_for(|s| matches!(s, ProbeState::Pong | ProbeState::Failed)))
            .await
            .is_ok_and(|r| r.is_ok_and(|s| *s == ProbeState::Pong))
    }

    fn update(&self, link_id: &str, state: ProbeState) {
        if let Some(tx) = self.links.lock().get(link_id) {
            tx.send_if_modified(|current| {
                // a pong or failure is final
                if matches!(*current, ProbeState::Pong | ProbeState::Failed) || *current == state {
                    return false;
                }
                *current = state;
                true
            });
        }
    }
}

#[async_trait]
impl EventHandler for LivenessProber {
    async fn on_open(&self, source: &str) {
        self.update(source, ProbeState::Open);
    }

    async fn on_data(&self, source: &str, data: Bytes) {
        match Envelope::decode(&data) {
            Ok(Envelope::Pong) => self.update(source, ProbeState::Pong),
            Ok(other) => trace!(link_id = source, kind = other.kind(), "ignored on probe channel"),
            Err(e) => trace!(link_id = source, error = %e, "undecodable probe frame"),
        }
    }

    async fn on_close(&self, source: &str) {
        self.update(source, ProbeState::Failed);
    }

    async fn on_error(&self, source: &str, _error: &str) {
        self.update(source, ProbeState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerEndpoint, CallMetadata, EventSender, MediaCall};
    use crate::error::TransportError;
    use crate::host::NullHost;
    use crate::media::MediaStream;
    use crate::retry::RetryPolicy;
    use std::sync::Weak;
    use tokio::sync::mpsc;

    const LINK_ID: &str = "dc_quiet";

    /// Opens the moment the prober holds it, without an open event, and answers pings in place
    #[derive(Debug)]
    struct QuietLink {
        prober: Weak<LivenessProber>,
    }

    #[async_trait]
    impl DataLink for QuietLink {
        fn id(&self) -> &str {
            LINK_ID
        }

        fn remote_id(&self) -> &str {
            "bob"
        }

        fn kind(&self) -> ChannelKind {
            ChannelKind::Probe
        }

        fn is_open(&self) -> bool {
            self.prober.upgrade().is_some_and(|p| p.owns(LINK_ID))
        }

        async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
            if let (Envelope::Ping, Some(prober)) = (envelope, self.prober.upgrade()) {
                let pong = Envelope::Pong.encode().unwrap();
                prober.on_data(LINK_ID, Bytes::from(pong)).await;
            }
            Ok(())
        }

        async fn close(&self) {}
    }

    struct QuietBroker {
        prober: Mutex<Weak<LivenessProber>>,
    }

    #[async_trait]
    impl Broker for QuietBroker {
        async fn register(
            &self,
            _local_id: &str,
            _endpoint: &BrokerEndpoint,
            _events: EventSender,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn reconnect(&self) {}

        fn is_disconnected(&self) -> bool {
            false
        }

        async fn connect(&self, _remote_id: &str, _kind: ChannelKind) -> Result<Arc<dyn DataLink>, TransportError> {
            Ok(Arc::new(QuietLink {
                prober: self.prober.lock().clone(),
            }))
        }

        async fn call(
            &self,
            _remote_id: &str,
            _local: Arc<dyn MediaStream>,
            _metadata: CallMetadata,
        ) -> Result<Arc<dyn MediaCall>, TransportError> {
            Err(TransportError::Setup("calls unsupported".into()))
        }

        async fn destroy(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn link_already_open_at_handover_is_pinged() {
        let broker = Arc::new(QuietBroker {
            prober: Mutex::new(Weak::new()),
        });
        let (events, _rx) = mpsc::unbounded_channel();
        let endpoint = BrokerEndpoint::new("broker.local", 9000, "/", false);
        let identity = Arc::new(IdentityClient::new(
            broker.clone(),
            Arc::new(NullHost),
            events,
            RetryPolicy::registration().with_candidates(vec![endpoint]),
            Duration::from_secs(10),
            Duration::from_secs(15),
        ));
        identity.register("alice").await.unwrap();

        let prober = Arc::new(LivenessProber::new(broker.clone(), identity, Duration::from_secs(3)));
        *broker.prober.lock() = Arc::downgrade(&prober);

        assert!(prober.probe("bob").await);
        assert!(!prober.owns(LINK_ID));
    }
}
