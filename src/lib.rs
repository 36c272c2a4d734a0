//! Peer-to-peer chat and calling client core.
//!
//! A [`PeerSession`] registers a local id with a signaling broker, keeps one
//! reliable data channel per remote peer for chat, runs at most one media call
//! and can probe whether a peer answers. Brokers plug in through the
//! [`broker::Broker`] trait: [`peer::PeerJsBroker`] talks to a PeerJS server
//! over WebRTC, [`broker::memory::MemoryNetwork`] connects sessions in-process.

pub mod broker;
pub mod call;
pub mod channels;
pub mod config;
pub mod envelope;
pub mod error;
pub mod host;
pub mod identity;
pub mod logger;
pub mod media;
pub mod peer;
pub mod probe;
pub mod retry;
pub mod session;
pub mod store;
pub mod utils;

#[cfg(feature = "tauri")]
pub mod commands;

pub use broker::{Broker, BrokerEndpoint, ChannelKind};
pub use call::CallState;
pub use config::ClientConfig;
pub use envelope::{Envelope, Message};
pub use error::{ClientError, ClientResult, MediaError, StoreError, TransportError};
pub use host::{ChannelHost, HostEvent, HostHandler, NullHost};
pub use identity::{IdentityState, PeerIdentity};
pub use media::{MediaConstraints, MediaDevices, MediaSlot, MediaStream};
pub use peer::{PeerJsBroker, PeerJsConfig, RtcMediaDevices};
pub use session::PeerSession;
