mod common;

use common::{config, settle, Peer};
use peerchat_lib::broker::memory::MemoryNetwork;
use peerchat_lib::broker::DataLink;
use peerchat_lib::ChannelKind;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn reachable_peer_answers_ping() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let mut bob = Peer::registered(&network, "bob").await;

    assert!(alice.session.probe("bob").await);
    settle().await;

    // the probe channel is gone and never became the chat channel
    assert!(alice.broker.links().is_empty());
    assert!(alice.session.channels().active_link("bob").is_none());
    assert!(bob.session.channels().active_link("alice").is_none());
    assert!(bob.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_unreachable_and_cache_untouched() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let bob = Peer::registered(&network, "bob").await;

    alice.session.send("bob", "hi").await.unwrap();
    settle().await;
    let cached = alice.session.channels().active_link("bob").unwrap();

    bob.broker.mute(ChannelKind::Probe);
    let started = Instant::now();
    assert!(!alice.session.probe("bob").await);

    assert!(started.elapsed() >= Duration::from_secs(3));
    let still = alice.session.channels().active_link("bob").unwrap();
    assert_eq!(still.id(), cached.id());
    assert!(still.is_open());
}

#[tokio::test(start_paused = true)]
async fn probe_needs_a_registered_identity() {
    let network = MemoryNetwork::new();
    let _bob = Peer::registered(&network, "bob").await;
    let alice = Peer::new(&network, "alice", config());

    assert!(!alice.session.probe("bob").await);
    assert_eq!(alice.broker.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_peer_is_unreachable() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;

    assert!(!alice.session.probe("ghost").await);
    settle().await;
    assert!(alice.broker.links().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_probe_times_out() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let _bob = Peer::registered(&network, "bob").await;
    alice.broker.stall_opens(true);

    let started = Instant::now();
    assert!(!alice.session.probe("bob").await);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(alice.broker.links().is_empty());
}
