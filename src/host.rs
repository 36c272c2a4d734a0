//! Callbacks into the host application (UI, terminal, tests)

use crate::call::CallState;
use crate::envelope::Message;
use crate::identity::IdentityState;
use crate::media::{MediaSlot, MediaStream};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Host-supplied handlers the session calls into.
///
/// Calls arrive from the session's event loop; implementations should hand the
/// work off rather than block.
pub trait HostHandler: Send + Sync {
    /// Inbound chat message from a remote peer
    fn on_message(&self, message: Message);

    /// Connection status of the local identity
    fn on_status(&self, state: IdentityState);

    fn on_call_state(&self, _state: CallState) {}

    /// Bind (`Some`) or clear (`None`) a media output
    fn on_media(&self, _slot: MediaSlot, _stream: Option<Arc<dyn MediaStream>>) {}

    /// A call attempt failed or was torn down by an error
    fn on_call_failed(&self, _reason: &str) {}
}

/// Host notification as a plain value
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Message(Message),
    Status(IdentityState),
    CallState(CallState),
    Media { slot: MediaSlot, stream_id: Option<String> },
    CallFailed(String),
}

/// Forwards every notification into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelHost {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn emit(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            trace!("host receiver dropped, discarding event");
        }
    }
}

impl HostHandler for ChannelHost {
    fn on_message(&self, message: Message) {
        self.emit(HostEvent::Message(message));
    }

    fn on_status(&self, state: IdentityState) {
        self.emit(HostEvent::Status(state));
    }

    fn on_call_state(&self, state: CallState) {
        self.emit(HostEvent::CallState(state));
    }

    fn on_media(&self, slot: MediaSlot, stream: Option<Arc<dyn MediaStream>>) {
        self.emit(HostEvent::Media {
            slot,
            stream_id: stream.map(|s| s.id().to_string()),
        });
    }

    fn on_call_failed(&self, reason: &str) {
        self.emit(HostEvent::CallFailed(reason.to_string()));
    }
}

/// Discards everything; for headless sessions that only send
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostHandler for NullHost {
    fn on_message(&self, _message: Message) {}

    fn on_status(&self, _state: IdentityState) {}
}
