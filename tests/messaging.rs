mod common;

use common::{config, settle, Peer};
use peerchat_lib::broker::memory::MemoryNetwork;
use peerchat_lib::broker::DataLink;
use peerchat_lib::{Broker, ChannelKind, ClientError, IdentityState};
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn message_is_delivered_exactly_once() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let mut bob = Peer::registered(&network, "bob").await;

    let sent = alice.session.send("bob", "hello bob").await.unwrap();
    settle().await;

    let received = bob.messages();
    assert_eq!(received, vec![sent]);
    assert_eq!(received[0].sender, "alice");
    assert_eq!(received[0].receiver, "bob");
}

#[tokio::test(start_paused = true)]
async fn channel_is_reused_in_both_directions() {
    let network = MemoryNetwork::new();
    let mut alice = Peer::registered(&network, "alice").await;
    let mut bob = Peer::registered(&network, "bob").await;

    alice.session.send("bob", "one").await.unwrap();
    alice.session.send("bob", "two").await.unwrap();
    settle().await;
    assert_eq!(alice.broker.connect_count(), 1);

    // bob answers over the channel alice opened
    bob.session.send("alice", "three").await.unwrap();
    settle().await;
    assert_eq!(bob.broker.connect_count(), 0);

    let texts: Vec<_> = bob.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, ["one", "two"]);
    let texts: Vec<_> = alice.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, ["three"]);
}

#[tokio::test(start_paused = true)]
async fn send_without_registration_touches_nothing() {
    let network = MemoryNetwork::new();
    let _bob = Peer::registered(&network, "bob").await;
    let alice = Peer::new(&network, "alice", config());

    let err = alice.session.send("bob", "hi").await.unwrap_err();

    assert!(matches!(err, ClientError::NotRegistered));
    assert_eq!(alice.broker.connect_count(), 0);
    assert_eq!(alice.broker.frames_sent(), 0);
}

#[tokio::test(start_paused = true)]
async fn send_after_terminal_error_is_refused() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let _bob = Peer::registered(&network, "bob").await;

    alice.broker.close_registration();
    settle().await;
    assert_eq!(alice.session.identity().state(), IdentityState::Error);

    assert!(matches!(alice.session.send("bob", "hi").await, Err(ClientError::NotRegistered)));
    assert_eq!(alice.broker.frames_sent(), 0);
}

#[tokio::test(start_paused = true)]
async fn send_waits_for_reconnect() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let mut bob = Peer::registered(&network, "bob").await;
    alice.broker.manual_reconnect(true);
    alice.broker.drop_signaling();
    settle().await;
    assert_eq!(alice.session.identity().state(), IdentityState::Connecting);

    let broker = alice.broker.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(2)).await;
        broker.restore_signaling();
    });

    alice.session.send("bob", "held").await.unwrap();
    settle().await;
    assert_eq!(bob.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_gives_up_when_identity_stays_connecting() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let _bob = Peer::registered(&network, "bob").await;
    alice.broker.manual_reconnect(true);
    alice.broker.drop_signaling();
    settle().await;

    let started = Instant::now();
    let err = alice.session.send("bob", "lost").await.unwrap_err();

    assert!(matches!(err, ClientError::NotRegistered));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(alice.broker.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_channel_times_out() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let _bob = Peer::registered(&network, "bob").await;
    alice.broker.stall_opens(true);

    let err = alice.session.send("bob", "hi").await.unwrap_err();

    match err {
        ClientError::ConnectTimeout { remote_id, timeout } => {
            assert_eq!(remote_id, "bob");
            assert_eq!(timeout, Duration::from_secs(5));
        }
        other => panic!("expected connect timeout, got {other:?}"),
    }
    assert!(alice.session.channels().active_link("bob").is_none());
}

#[tokio::test(start_paused = true)]
async fn unknown_peer_fails_fast() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;

    let started = Instant::now();
    let err = alice.session.send("ghost", "anyone?").await.unwrap_err();

    assert!(matches!(err, ClientError::Channel(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1));
    // peer-scoped errors leave the identity alone
    assert_eq!(alice.session.identity().state(), IdentityState::Connected);
}

#[tokio::test(start_paused = true)]
async fn closed_channel_is_replaced_on_next_send() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let mut bob = Peer::registered(&network, "bob").await;

    alice.session.send("bob", "first").await.unwrap();
    settle().await;
    let first = alice.session.channels().active_link("bob").unwrap();

    // the remote end hangs up
    for link in bob.broker.links() {
        link.close().await;
    }
    settle().await;
    assert!(alice.session.channels().active_link("bob").is_none());

    alice.session.send("bob", "second").await.unwrap();
    settle().await;
    let second = alice.session.channels().active_link("bob").unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(alice.broker.connect_count(), 2);
    assert_eq!(bob.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_error_drops_the_cached_channel() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let _bob = Peer::registered(&network, "bob").await;

    alice.session.send("bob", "first").await.unwrap();
    settle().await;
    let links = alice.broker.links();
    assert_eq!(links.len(), 1);

    links[0].fail("ice failed");
    settle().await;

    assert!(alice.session.channels().active_link("bob").is_none());
    assert!(links[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn close_channel_forgets_the_peer() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let _bob = Peer::registered(&network, "bob").await;

    alice.session.send("bob", "hi").await.unwrap();
    alice.session.close_channel("bob").await;
    settle().await;

    assert!(alice.session.channels().active_link("bob").is_none());
    assert!(alice.broker.links().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_sends_share_one_new_channel() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let mut bob = Peer::registered(&network, "bob").await;
    alice.broker.delay_connects(Some(Duration::from_millis(500)));

    let (first, second) = tokio::join!(alice.session.send("bob", "one"), alice.session.send("bob", "two"));
    first.unwrap();
    second.unwrap();
    settle().await;

    assert_eq!(alice.broker.connect_count(), 1);
    assert_eq!(alice.broker.links().len(), 1);
    assert_eq!(bob.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn crossing_opens_settle_on_one_channel() {
    let network = MemoryNetwork::new();
    let mut alice = Peer::registered(&network, "alice").await;
    let mut bob = Peer::registered(&network, "bob").await;
    alice.broker.delay_connects(Some(Duration::from_secs(1)));

    let bob_sends = async {
        sleep(Duration::from_millis(100)).await;
        bob.session.send("alice", "from bob").await
    };
    let (from_alice, from_bob) = tokio::join!(alice.session.send("bob", "from alice"), bob_sends);
    from_alice.unwrap();
    from_bob.unwrap();
    settle().await;

    let alice_link = alice.session.channels().active_link("bob").unwrap();
    let bob_link = bob.session.channels().active_link("alice").unwrap();
    assert_eq!(alice_link.id(), bob_link.id());
    assert!(alice_link.is_open());
    // the displaced channel is closed on both ends
    assert_eq!(alice.broker.links().len(), 1);
    assert_eq!(bob.broker.links().len(), 1);

    assert_eq!(alice.messages().len(), 1);
    assert_eq!(bob.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_inbound_channel_wins() {
    let network = MemoryNetwork::new();
    let alice = Peer::registered(&network, "alice").await;
    let bob = Peer::registered(&network, "bob").await;

    let first = bob.broker.connect("alice", ChannelKind::Messaging).await.unwrap();
    settle().await;
    assert_eq!(alice.session.channels().active_link("bob").unwrap().id(), first.id());

    let second = bob.broker.connect("alice", ChannelKind::Messaging).await.unwrap();
    settle().await;
    let cached = alice.session.channels().active_link("bob").unwrap();
    assert_eq!(cached.id(), second.id());
    assert!(!first.is_open());

    // a late close of the older channel leaves the newer one cached
    first.close().await;
    settle().await;
    let cached = alice.session.channels().active_link("bob").unwrap();
    assert_eq!(cached.id(), second.id());
    assert!(cached.is_open());

    alice.session.send("bob", "over the newest channel").await.unwrap();
    assert_eq!(alice.broker.connect_count(), 0);
    assert_eq!(alice.broker.frames_sent(), 1);
}
