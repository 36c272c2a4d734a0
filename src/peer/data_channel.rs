use crate::broker::{BrokerEvent, ChannelKind, DataLink, EventSender, LinkEvent};
use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::peer::connection::PeerLeg;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

/// PeerJS data connection carrying JSON-serialized envelopes
pub struct RtcLink {
    leg: Arc<PeerLeg>,
    kind: ChannelKind,
    dc: Mutex<Option<Arc<RTCDataChannel>>>,
    closed: AtomicBool,
    events: EventSender,
}

impl fmt::Debug for RtcLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcLink")
            .field("id", &self.leg.connection_id)
            .field("remote_id", &self.leg.remote_id)
            .field("kind", &self.kind)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RtcLink {
    pub fn new(leg: Arc<PeerLeg>, kind: ChannelKind, events: EventSender) -> Arc<Self> {
        Arc::new(Self {
            leg,
            kind,
            dc: Mutex::new(None),
            closed: AtomicBool::new(false),
            events,
        })
    }

    pub fn leg(&self) -> &Arc<PeerLeg> {
        &self.leg
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wires the data channel's callbacks into this link's event stream
    pub fn attach(self: &Arc<Self>, dc: Arc<RTCDataChannel>) {
        debug!(link_id = %self.leg.connection_id, label = dc.label(), "data channel attached");
        *self.dc.lock() = Some(dc.clone());

        let link = Arc::downgrade(self);
        dc.on_open(Box::new(move || {
            if let Some(link) = link.upgrade() {
                trace!(link_id = %link.leg.connection_id, "data channel open");
                link.notify(LinkEvent::Open);
            }
            Box::pin(async {})
        }));

        let link = Arc::downgrade(self);
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            if let Some(link) = link.upgrade() {
                link.notify(LinkEvent::Data(msg.data));
            }
            Box::pin(async {})
        }));

        let link: Weak<Self> = Arc::downgrade(self);
        dc.on_close(Box::new(move || {
            if let Some(link) = link.upgrade() {
                if link.mark_closed() {
                    debug!(link_id = %link.leg.connection_id, "data channel closed by remote");
                    link.notify(LinkEvent::Close);
                }
            }
            Box::pin(async {})
        }));

        let link = Arc::downgrade(self);
        dc.on_error(Box::new(move |err: webrtc::Error| {
            if let Some(link) = link.upgrade() {
                link.notify(LinkEvent::Error(err.to_string()));
            }
            Box::pin(async {})
        }));
    }

    /// Reports a failure of the underlying peer connection
    pub fn fail(&self, reason: String) {
        if self.mark_closed() {
            self.notify(LinkEvent::Error(reason));
        }
    }

    /// Marks the link closed; `true` only for the first caller
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn notify(&self, event: LinkEvent) {
        let sent = self.events.send(BrokerEvent::Link {
            link_id: self.leg.connection_id.clone(),
            event,
        });
        if sent.is_err() {
            trace!(link_id = %self.leg.connection_id, "event loop gone, dropping link event");
        }
    }
}

#[async_trait]
impl DataLink for RtcLink {
    fn id(&self) -> &str {
        &self.leg.connection_id
    }

    fn remote_id(&self) -> &str {
        &self.leg.remote_id
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
            && self
                .dc
                .lock()
                .as_ref()
                .is_some_and(|dc| dc.ready_state() == RTCDataChannelState::Open)
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let dc = self.dc.lock().clone().ok_or(TransportError::ChannelClosed)?;
        let text = envelope.encode().map_err(|e| TransportError::Setup(e.to_string()))?;
        dc.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) {
        if !self.mark_closed() {
            return;
        }
        self.notify(LinkEvent::Close);
        let dc = self.dc.lock().take();
        if let Some(dc) = dc {
            if let Err(e) = dc.close().await {
                debug!(link_id = %self.leg.connection_id, error = %e, "data channel close failed");
            }
        }
        self.leg.close().await;
    }
}
