//! Identity/signaling client: registration, failover across broker endpoints,
//! reconnect on disconnect, and a periodic liveness check.

use crate::broker::{Broker, BrokerEndpoint, BrokerError, EventHandler, EventSender};
use crate::error::{ClientError, ClientResult};
use crate::host::HostHandler;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Registration state of the local identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal until the next `register`
    Error,
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityState::Disconnected => "disconnected",
            IdentityState::Connecting => "connecting",
            IdentityState::Connected => "connected",
            IdentityState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of this client's registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    local_id: Option<String>,
    state: IdentityState,
    endpoint: Option<BrokerEndpoint>,
    retries: u32,
}

impl PeerIdentity {
    fn logged_out() -> Self {
        Self {
            local_id: None,
            state: IdentityState::Disconnected,
            endpoint: None,
            retries: 0,
        }
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn state(&self) -> IdentityState {
        self.state
    }

    /// Broker endpoint of the last successful registration
    pub fn endpoint(&self) -> Option<&BrokerEndpoint> {
        self.endpoint.as_ref()
    }

    /// Failed registration attempts since the last success
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

struct IdentityInner {
    identity: PeerIdentity,
    /// Bumped by every register/logout; stale async steps compare against it
    generation: u64,
    registering: bool,
}

pub struct IdentityClient {
    broker: Arc<dyn Broker>,
    host: Arc<dyn HostHandler>,
    events: EventSender,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    liveness_interval: Duration,
    inner: Mutex<IdentityInner>,
    state_tx: watch::Sender<IdentityState>,
    liveness: Mutex<Option<JoinHandle<()>>>,
}

impl IdentityClient {
    pub fn new(
        broker: Arc<dyn Broker>,
        host: Arc<dyn HostHandler>,
        events: EventSender,
        policy: RetryPolicy,
        attempt_timeout: Duration,
        liveness_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(IdentityState::Disconnected);
        Self {
            broker,
            host,
            events,
            policy,
            attempt_timeout,
            liveness_interval,
            inner: Mutex::new(IdentityInner {
                identity: PeerIdentity::logged_out(),
                generation: 0,
                registering: false,
            }),
            state_tx,
            liveness: Mutex::new(None),
        }
    }

    pub fn state(&self) -> IdentityState {
        self.inner.lock().identity.state
    }

    pub fn snapshot(&self) -> PeerIdentity {
        self.inner.lock().identity.clone()
    }

    pub fn local_id(&self) -> Option<String> {
        self.inner.lock().identity.local_id.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.state_tx.subscribe()
    }

    /// Registers `local_id`, walking the endpoint list until an attempt
    /// succeeds or the retry budget is spent.
    pub async fn register(self: &Arc<Self>, local_id: &str) -> ClientResult<()> {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.registering = true;
            inner.identity = PeerIdentity {
                local_id: Some(local_id.to_string()),
                state: inner.identity.state,
                endpoint: None,
                retries: 0,
            };
            inner.generation
        };
        self.stop_liveness();
        self.transition(IdentityState::Connecting);

        let mut attempt = 0u32;
        loop {
            let Some(endpoint) = self.policy.candidate(attempt).cloned() else {
                self.finish_registering(generation);
                self.transition(IdentityState::Error);
                return Err(ClientError::config("no broker endpoints configured"));
            };
            info!(local_id, %endpoint, attempt, "registering with broker");

            let outcome = match timeout(
                self.attempt_timeout,
                self.broker.register(local_id, &endpoint, self.events.clone()),
            )
            .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no answer from {} within {:?}", endpoint, self.attempt_timeout)),
            };

            if !self.is_current(generation) {
                debug!(local_id, "registration superseded, dropping result");
                return Err(ClientError::cancelled("registration superseded"));
            }

            match outcome {
                Ok(()) => {
                    {
                        let mut inner = self.inner.lock();
                        inner.registering = false;
                        inner.identity.endpoint = Some(endpoint.clone());
                        inner.identity.retries = 0;
                    }
                    self.transition(IdentityState::Connected);
                    self.start_liveness(generation);
                    info!(local_id, %endpoint, "registered");
                    return Ok(());
                }
                Err(reason) => {
                    // partial registrations must not leak into the next attempt
                    self.broker.destroy().await;
                    let retries = {
                        let mut inner = self.inner.lock();
                        inner.identity.retries += 1;
                        inner.identity.retries
                    };
                    if self.policy.allows_retry(retries) {
                        let delay = self.policy.delay_for(retries);
                        warn!(local_id, %endpoint, retries, %reason, delay_ms = delay.as_millis() as u64, "registration failed, retrying");
                        sleep(delay).await;
                        if !self.is_current(generation) {
                            return Err(ClientError::cancelled("registration superseded"));
                        }
                        attempt += 1;
                        continue;
                    }
                    error!(local_id, retries, %reason, "registration failed, giving up");
                    self.finish_registering(generation);
                    self.transition(IdentityState::Error);
                    return Err(ClientError::Registration {
                        attempts: retries,
                        reason,
                    });
                }
            }
        }
    }

    /// Drops the registration; pending retries and the liveness loop stop
    pub async fn logout(&self) {
        {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.registering = false;
            inner.identity = PeerIdentity::logged_out();
        }
        self.stop_liveness();
        self.broker.destroy().await;
        self.publish(IdentityState::Disconnected);
        info!("logged out");
    }

    /// Resolves `true` once connected; `false` if the identity settles in any
    /// other state or `limit` passes first.
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let settled = timeout(limit, rx.wait_for(|s| *s != IdentityState::Connecting))
            .await
            .map(|r| r.map(|state| *state));
        matches!(settled, Ok(Ok(IdentityState::Connected)))
    }

    /// Broker link dropped: keep the identity, ask for a reconnect
    pub fn on_disconnected(&self) {
        if !self.is_active() {
            return;
        }
        warn!("broker link disconnected, reconnecting");
        self.transition(IdentityState::Connecting);
        self.broker.reconnect();
    }

    pub fn on_broker_error(&self, err: &BrokerError) {
        if err.is_fatal() {
            self.fail(&err.to_string());
        } else {
            debug!(error = %err, "non-fatal broker error");
        }
    }

    fn fail(&self, reason: &str) {
        if !self.is_active() {
            return;
        }
        error!(%reason, "broker failure");
        self.transition(IdentityState::Error);
    }

    fn handle_open(&self) {
        let reset = {
            let mut inner = self.inner.lock();
            if inner.identity.local_id.is_none() || inner.registering {
                return;
            }
            let reset = match inner.identity.state {
                IdentityState::Error => self.policy.reset_after_error,
                _ => true,
            };
            if reset {
                inner.identity.retries = 0;
            }
            reset
        };
        info!(retries_reset = reset, "broker link open");
        self.transition(IdentityState::Connected);
    }

    fn check_liveness(&self) {
        let state = self.state();
        if matches!(state, IdentityState::Connected | IdentityState::Connecting) && self.broker.is_disconnected() {
            warn!(%state, "liveness check found broker link down");
            self.transition(IdentityState::Connecting);
            self.broker.reconnect();
        }
    }

    fn start_liveness(self: &Arc<Self>, generation: u64) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.liveness_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else { break };
                if !client.is_current(generation) {
                    break;
                }
                client.check_liveness();
            }
        });
        if let Some(previous) = self.liveness.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_liveness(&self) {
        if let Some(handle) = self.liveness.lock().take() {
            handle.abort();
        }
    }

    fn finish_registering(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.registering = false;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    /// Logged in and not in the middle of `register`
    fn is_active(&self) -> bool {
        let inner = self.inner.lock();
        inner.identity.local_id.is_some() && !inner.registering
    }

    fn transition(&self, state: IdentityState) {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = inner.identity.state != state;
            inner.identity.state = state;
            changed
        };
        if changed {
            self.publish(state);
        }
    }

    fn publish(&self, state: IdentityState) {
        self.inner.lock().identity.state = state;
        self.state_tx.send_replace(state);
        self.host.on_status(state);
    }
}

#[async_trait]
impl EventHandler for IdentityClient {
    async fn on_open(&self, _source: &str) {
        self.handle_open();
    }

    async fn on_close(&self, source: &str) {
        if !self.is_active() {
            return;
        }
        warn!(source, "broker closed the registration");
        self.transition(IdentityState::Error);
    }

    async fn on_error(&self, source: &str, error: &str) {
        debug!(source, error, "broker error");
        self.fail(error);
    }
}

impl Drop for IdentityClient {
    fn drop(&mut self) {
        if let Some(handle) = self.liveness.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryNetwork;
    use crate::host::NullHost;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, Instant};

    fn client() -> Arc<IdentityClient> {
        let (events, _rx) = mpsc::unbounded_channel();
        Arc::new(IdentityClient::new(
            Arc::new(MemoryNetwork::new().broker()),
            Arc::new(NullHost),
            events,
            RetryPolicy::default(),
            Duration::from_secs(10),
            Duration::from_secs(15),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connected_sees_the_connecting_to_connected_edge() {
        let identity = client();
        identity.publish(IdentityState::Connecting);

        let flip = identity.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            flip.publish(IdentityState::Connected);
        });
        assert!(identity.wait_connected(Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_connected_gives_up_on_error_or_timeout() {
        let identity = client();
        identity.publish(IdentityState::Connecting);
        let started = Instant::now();
        assert!(!identity.wait_connected(Duration::from_secs(2)).await);
        assert!(started.elapsed() >= Duration::from_secs(2));

        identity.publish(IdentityState::Error);
        assert!(!identity.wait_connected(Duration::from_secs(2)).await);
    }
}
