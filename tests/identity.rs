mod common;

use common::{config, settle, Peer};
use peerchat_lib::broker::memory::MemoryNetwork;
use peerchat_lib::{ClientError, HostEvent, IdentityState};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn registration_fails_over_to_next_endpoint() {
    let network = MemoryNetwork::new();
    let peer = Peer::new(&network, "alice", config());
    peer.broker.fail_next_registrations(1);

    peer.session.register("alice").await.unwrap();

    let hosts: Vec<_> = peer.broker.attempted_endpoints().into_iter().map(|e| e.host).collect();
    assert_eq!(hosts, ["broker-a.local", "broker-b.local"]);
    let identity = peer.session.identity();
    assert_eq!(identity.state(), IdentityState::Connected);
    assert_eq!(identity.endpoint().unwrap().host, "broker-b.local");
    assert_eq!(identity.retries(), 0);
    assert!(network.is_registered("alice"));
}

#[tokio::test(start_paused = true)]
async fn registration_gives_up_after_retry_budget() {
    let network = MemoryNetwork::new();
    let mut peer = Peer::new(&network, "alice", config());
    peer.broker.fail_next_registrations(10);

    let err = peer.session.register("alice").await.unwrap_err();

    assert!(matches!(err, ClientError::Registration { attempts: 3, .. }));
    assert_eq!(peer.session.identity().state(), IdentityState::Error);
    let hosts: Vec<_> = peer.broker.attempted_endpoints().into_iter().map(|e| e.host).collect();
    assert_eq!(hosts, ["broker-a.local", "broker-b.local", "broker-a.local"]);
    assert!(!network.is_registered("alice"));

    let statuses: Vec<_> = peer
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::Status(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, [IdentityState::Connecting, IdentityState::Error]);
}

#[tokio::test(start_paused = true)]
async fn silent_broker_counts_as_failed_attempt() {
    let network = MemoryNetwork::new();
    let peer = Peer::new(&network, "alice", config());
    peer.broker.hang_registrations(true);

    let err = peer.session.register("alice").await.unwrap_err();
    assert!(matches!(err, ClientError::Registration { attempts: 3, .. }));
    assert_eq!(peer.broker.attempted_endpoints().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn taken_id_is_refused() {
    let network = MemoryNetwork::new();
    let _first = Peer::registered(&network, "alice").await;
    let second = Peer::new(&network, "alice", config());

    let err = second.session.register("alice").await.unwrap_err();
    assert!(matches!(err, ClientError::Registration { .. }));
    assert_eq!(second.session.identity().state(), IdentityState::Error);
}

#[tokio::test(start_paused = true)]
async fn empty_id_is_a_config_error() {
    let network = MemoryNetwork::new();
    let peer = Peer::new(&network, "", config());
    assert!(matches!(peer.session.register("  ").await, Err(ClientError::Config(_))));
    assert!(peer.broker.attempted_endpoints().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_reconnects_automatically() {
    let network = MemoryNetwork::new();
    let mut peer = Peer::registered(&network, "alice").await;
    peer.drain();

    peer.broker.drop_signaling();
    settle().await;

    assert_eq!(peer.broker.reconnect_requests(), 1);
    assert_eq!(peer.session.identity().state(), IdentityState::Connected);
    let statuses: Vec<_> = peer
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::Status(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, [IdentityState::Connecting, IdentityState::Connected]);
}

#[tokio::test(start_paused = true)]
async fn state_follows_the_last_broker_event() {
    let network = MemoryNetwork::new();
    let peer = Peer::registered(&network, "alice").await;
    peer.broker.manual_reconnect(true);

    peer.broker.drop_signaling();
    peer.broker.restore_signaling();
    peer.broker.drop_signaling();
    settle().await;
    assert_eq!(peer.session.identity().state(), IdentityState::Connecting);

    peer.broker.restore_signaling();
    settle().await;
    assert_eq!(peer.session.identity().state(), IdentityState::Connected);
}

#[tokio::test(start_paused = true)]
async fn liveness_loop_keeps_asking_for_reconnect() {
    let network = MemoryNetwork::new();
    let peer = Peer::registered(&network, "alice").await;
    peer.broker.manual_reconnect(true);

    peer.broker.drop_signaling();
    settle().await;
    assert_eq!(peer.broker.reconnect_requests(), 1);

    sleep(Duration::from_secs(16)).await;
    assert_eq!(peer.broker.reconnect_requests(), 2);
    assert_eq!(peer.session.identity().state(), IdentityState::Connecting);

    peer.broker.restore_signaling();
    settle().await;
    assert_eq!(peer.session.identity().state(), IdentityState::Connected);
}

#[tokio::test(start_paused = true)]
async fn broker_close_is_terminal_until_link_returns() {
    let network = MemoryNetwork::new();
    let peer = Peer::registered(&network, "alice").await;

    peer.broker.close_registration();
    settle().await;
    assert_eq!(peer.session.identity().state(), IdentityState::Error);

    // a later open recovers the identity and clears the failure count
    peer.broker.restore_signaling();
    settle().await;
    let identity = peer.session.identity();
    assert_eq!(identity.state(), IdentityState::Connected);
    assert_eq!(identity.retries(), 0);
}

#[tokio::test(start_paused = true)]
async fn logout_releases_the_id() {
    let network = MemoryNetwork::new();
    let mut peer = Peer::registered(&network, "alice").await;
    peer.drain();

    peer.session.logout().await;

    assert!(!network.is_registered("alice"));
    let identity = peer.session.identity();
    assert_eq!(identity.state(), IdentityState::Disconnected);
    assert_eq!(identity.local_id(), None);
    assert!(matches!(peer.session.send("bob", "hi").await, Err(ClientError::NotRegistered)));

    // events after logout are ignored
    peer.broker.restore_signaling();
    settle().await;
    assert_eq!(peer.session.identity().state(), IdentityState::Disconnected);
}
