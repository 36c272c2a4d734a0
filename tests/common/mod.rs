#![allow(dead_code)]

use peerchat_lib::broker::memory::{DeviceBehavior, MemoryBroker, MemoryMediaDevices, MemoryNetwork};
use peerchat_lib::broker::BrokerEndpoint;
use peerchat_lib::{logger, ChannelHost, ClientConfig, HostEvent, IdentityState, Message, PeerSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

pub fn endpoints() -> Vec<BrokerEndpoint> {
    vec![
        BrokerEndpoint::new("broker-a.local", 9000, "/", false),
        BrokerEndpoint::new("broker-b.local", 9000, "/", false),
    ]
}

pub fn config() -> ClientConfig {
    ClientConfig {
        endpoints: endpoints(),
        ..ClientConfig::default()
    }
}

pub struct Peer {
    pub id: String,
    pub session: PeerSession,
    pub broker: MemoryBroker,
    pub devices: Arc<MemoryMediaDevices>,
    pub events: UnboundedReceiver<HostEvent>,
}

impl Peer {
    /// Session on `network`, not yet registered
    pub fn new(network: &Arc<MemoryNetwork>, id: &str, config: ClientConfig) -> Self {
        logger::init_for_tests();
        let broker = network.broker();
        let devices = MemoryMediaDevices::new(DeviceBehavior::Grant);
        let (host, events) = ChannelHost::new();
        let session = PeerSession::new(config, Arc::new(broker.clone()), devices.clone(), host).unwrap();
        Self {
            id: id.to_string(),
            session,
            broker,
            devices,
            events,
        }
    }

    pub async fn registered(network: &Arc<MemoryNetwork>, id: &str) -> Self {
        let peer = Self::new(network, id, config());
        peer.session.register(id).await.unwrap();
        assert_eq!(peer.session.identity().state(), IdentityState::Connected);
        peer
    }

    /// Everything the host saw so far
    pub fn drain(&mut self) -> Vec<HostEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }

    pub fn messages(&mut self) -> Vec<Message> {
        self.drain()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Next host event matching `pred`, within five seconds
    pub async fn expect(&mut self, pred: impl Fn(&HostEvent) -> bool) -> HostEvent {
        let found = timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("host channel closed"),
                }
            }
        })
        .await;
        found.unwrap_or_else(|_| panic!("{}: expected host event did not arrive", self.id))
    }
}

/// Lets the event loops drain; with a paused clock this costs no real time
pub async fn settle() {
    sleep(Duration::from_millis(50)).await;
}
