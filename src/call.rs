//! Call session manager: one audio/video call at a time.

use crate::broker::{Broker, CallMetadata, EventHandler, MediaCall};
use crate::error::{ClientError, ClientResult, MediaError};
use crate::host::HostHandler;
use crate::media::{MediaConstraints, MediaDevices, MediaSlot, MediaStream};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Idle,
    AcquiringMedia,
    Negotiating,
    Active,
    Closing,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::AcquiringMedia => "acquiring-media",
            CallState::Negotiating => "negotiating",
            CallState::Active => "active",
            CallState::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct CallSession {
    /// Bumped on every start and teardown; async steps holding an older value are stale
    attempt: u64,
    state: CallState,
    remote_id: Option<String>,
    local: Option<Arc<dyn MediaStream>>,
    remote: Option<Arc<dyn MediaStream>>,
    call: Option<Arc<dyn MediaCall>>,
}

impl CallSession {
    fn idle() -> Self {
        Self {
            attempt: 0,
            state: CallState::Idle,
            remote_id: None,
            local: None,
            remote: None,
            call: None,
        }
    }

    fn is_current_call(&self, call_id: &str) -> bool {
        self.call.as_ref().is_some_and(|c| c.id() == call_id)
    }
}

pub struct CallManager {
    broker: Arc<dyn Broker>,
    devices: Arc<dyn MediaDevices>,
    host: Arc<dyn HostHandler>,
    constraints: MediaConstraints,
    media_timeout: Duration,
    // held across broker calls so call events observe a fully set up session
    session: Mutex<CallSession>,
}

impl CallManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        devices: Arc<dyn MediaDevices>,
        host: Arc<dyn HostHandler>,
        constraints: MediaConstraints,
        media_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            devices,
            host,
            constraints,
            media_timeout,
            session: Mutex::new(CallSession::idle()),
        }
    }

    pub async fn state(&self) -> CallState {
        self.session.lock().await.state
    }

    pub async fn remote_id(&self) -> Option<String> {
        self.session.lock().await.remote_id.clone()
    }

    /// Places a call to `remote_id`. Does nothing while another call exists.
    pub async fn start_call(&self, local_id: &str, remote_id: &str) -> ClientResult<()> {
        let attempt = {
            let mut session = self.session.lock().await;
            if session.state != CallState::Idle {
                debug!(remote_id, state = %session.state, "call already in progress, ignoring start");
                return Ok(());
            }
            session.attempt += 1;
            session.remote_id = Some(remote_id.to_string());
            self.set_state(&mut session, CallState::AcquiringMedia);
            session.attempt
        };
        info!(remote_id, "starting call");

        let acquired = self.acquire().await;

        let mut session = self.session.lock().await;
        if session.attempt != attempt {
            if let Ok(stream) = acquired {
                stream.stop();
            }
            debug!(remote_id, "call setup superseded, media released");
            return Err(ClientError::cancelled("call ended during setup"));
        }

        let local = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                warn!(remote_id, reason = e.reason(), "media acquisition failed");
                self.teardown_locked(&mut session).await;
                self.host.on_call_failed(e.reason());
                return Err(e.into());
            }
        };
        session.local = Some(local.clone());
        self.host.on_media(MediaSlot::Local, Some(local.clone()));

        let metadata = CallMetadata::now(local_id);
        match self.broker.call(remote_id, local, metadata).await {
            Ok(call) => {
                debug!(remote_id, call_id = call.id(), "offer placed");
                session.call = Some(call);
                self.set_state(&mut session, CallState::Negotiating);
                Ok(())
            }
            Err(e) => {
                warn!(remote_id, error = %e, "placing call failed");
                self.teardown_locked(&mut session).await;
                self.host.on_call_failed(&e.to_string());
                Err(ClientError::CallTransport(e.to_string()))
            }
        }
    }

    /// Claims the session for an inbound call, or rejects it when busy.
    /// Media acquisition and the answer continue in the background.
    pub async fn on_incoming(self: &Arc<Self>, call: Arc<dyn MediaCall>) {
        let attempt = {
            let mut session = self.session.lock().await;
            if session.state != CallState::Idle {
                drop(session);
                info!(remote_id = call.remote_id(), call_id = call.id(), "busy, rejecting incoming call");
                call.close().await;
                return;
            }
            session.attempt += 1;
            session.remote_id = Some(call.remote_id().to_string());
            session.call = Some(call.clone());
            self.set_state(&mut session, CallState::AcquiringMedia);
            session.attempt
        };
        info!(remote_id = call.remote_id(), call_id = call.id(), "incoming call");

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.answer(call, attempt).await;
        });
    }

    async fn answer(&self, call: Arc<dyn MediaCall>, attempt: u64) {
        let acquired = self.acquire().await;

        let mut session = self.session.lock().await;
        if session.attempt != attempt {
            if let Ok(stream) = acquired {
                stream.stop();
            }
            debug!(call_id = call.id(), "incoming call ended before answer");
            return;
        }

        let local = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                warn!(call_id = call.id(), reason = e.reason(), "cannot answer, media acquisition failed");
                self.teardown_locked(&mut session).await;
                self.host.on_call_failed(e.reason());
                return;
            }
        };
        session.local = Some(local.clone());
        self.host.on_media(MediaSlot::Local, Some(local.clone()));

        match call.answer(local).await {
            Ok(()) => self.set_state(&mut session, CallState::Negotiating),
            Err(e) => {
                warn!(call_id = call.id(), error = %e, "answer failed");
                self.teardown_locked(&mut session).await;
                self.host.on_call_failed(&e.to_string());
            }
        }
    }

    /// Remote media arrived; the only way into `Active`
    pub async fn on_stream(&self, call_id: &str, stream: Arc<dyn MediaStream>) {
        let mut session = self.session.lock().await;
        let expected = matches!(session.state, CallState::AcquiringMedia | CallState::Negotiating | CallState::Active);
        if !session.is_current_call(call_id) || !expected {
            debug!(call_id, "stream for a superseded call, releasing");
            stream.stop();
            return;
        }
        if let Some(previous) = session.remote.replace(stream.clone()) {
            if previous.id() != stream.id() {
                previous.stop();
            }
        }
        self.host.on_media(MediaSlot::Remote, Some(stream));
        self.set_state(&mut session, CallState::Active);
        info!(call_id, "call active");
    }

    /// Local hangup
    pub async fn end_call(&self) {
        let mut session = self.session.lock().await;
        self.teardown_locked(&mut session).await;
    }

    /// A remote peer is gone; drop a call still waiting on it
    pub async fn on_peer_unavailable(&self, remote_id: &str) {
        let mut session = self.session.lock().await;
        if session.remote_id.as_deref() != Some(remote_id) || session.state == CallState::Active {
            return;
        }
        warn!(remote_id, "call target is unavailable");
        self.teardown_locked(&mut session).await;
        self.host.on_call_failed("peer-unavailable");
    }

    async fn on_call_closed(&self, call_id: &str) {
        let mut session = self.session.lock().await;
        if !session.is_current_call(call_id) {
            return;
        }
        info!(call_id, "call closed by remote");
        self.teardown_locked(&mut session).await;
    }

    async fn on_call_error(&self, call_id: &str, error: &str) {
        let mut session = self.session.lock().await;
        if !session.is_current_call(call_id) {
            return;
        }
        let err = ClientError::CallTransport(error.to_string());
        warn!(call_id, error = %err, "tearing down call");
        self.teardown_locked(&mut session).await;
        self.host.on_call_failed(error);
    }

    async fn acquire(&self) -> Result<Arc<dyn MediaStream>, MediaError> {
        match timeout(self.media_timeout, self.devices.acquire(&self.constraints)).await {
            Ok(result) => result,
            Err(_) => Err(MediaError::Timeout),
        }
    }

    /// Releases media, clears bindings and returns to idle. Safe to repeat.
    async fn teardown_locked(&self, session: &mut CallSession) {
        session.attempt += 1;
        if session.state == CallState::Idle && session.local.is_none() && session.remote.is_none() && session.call.is_none() {
            return;
        }
        self.set_state(session, CallState::Closing);

        if let Some(local) = session.local.take() {
            local.stop();
            self.host.on_media(MediaSlot::Local, None);
        }
        if let Some(remote) = session.remote.take() {
            remote.stop();
            self.host.on_media(MediaSlot::Remote, None);
        }
        if let Some(call) = session.call.take() {
            call.close().await;
        }
        session.remote_id = None;
        self.set_state(session, CallState::Idle);
        debug!("call torn down");
    }

    fn set_state(&self, session: &mut CallSession, state: CallState) {
        if session.state != state {
            session.state = state;
            self.host.on_call_state(state);
        }
    }
}

#[async_trait]
impl EventHandler for CallManager {
    async fn on_close(&self, source: &str) {
        self.on_call_closed(source).await;
    }

    async fn on_error(&self, source: &str, error: &str) {
        self.on_call_error(source, error).await;
    }
}
