//! WebSocket link to a PeerJS server: URL building, reader/writer tasks and heartbeat.

use crate::broker::BrokerEndpoint;
use crate::error::TransportError;
use crate::peer::types::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `{ws|wss}://host:port{path}peerjs?key=..&id=..&token=..`
pub fn server_url(endpoint: &BrokerEndpoint, key: &str, id: &str, token: &str) -> Result<Url, TransportError> {
    let scheme = if endpoint.secure { "wss" } else { "ws" };
    let mut path = endpoint.path.clone();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    if !path.ends_with('/') {
        path.push('/');
    }
    let mut url = Url::parse(&format!("{scheme}://{}:{}{path}peerjs", endpoint.host, endpoint.port))
        .map_err(|e| TransportError::Setup(format!("bad broker endpoint {endpoint}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("key", key)
        .append_pair("id", id)
        .append_pair("token", token);
    Ok(url)
}

/// Outbound frame queue shared by every connection of one broker.
/// Swapped to a fresh socket on reconnect.
#[derive(Default)]
pub struct Outbox {
    tx: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
}

impl Outbox {
    pub fn attach(&self, tx: mpsc::UnboundedSender<ClientMessage>) {
        *self.tx.lock() = Some(tx);
    }

    pub fn detach(&self) {
        self.tx.lock().take();
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let tx = self.tx.lock().clone().ok_or(TransportError::NotRegistered)?;
        tx.send(message)
            .map_err(|_| TransportError::Signaling("signaling socket closed".into()))
    }
}

/// Background tasks of one open socket; aborted on drop
pub struct SignalingTasks {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl Drop for SignalingTasks {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
        self.heartbeat.abort();
    }
}

/// Opens the socket and starts its tasks. Frames from the server arrive on the
/// returned receiver, which closes when the socket does.
pub async fn open(
    url: &Url,
    heartbeat: Duration,
) -> Result<(mpsc::UnboundedSender<ClientMessage>, mpsc::UnboundedReceiver<ServerMessage>, SignalingTasks), TransportError> {
    debug!(url = %redacted(url), "opening signaling socket");
    let (ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Signaling(format!("failed to connect: {e}")))?;
    let (write, read) = ws.split();

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(writer_task(write, out_rx));
    let reader = tokio::spawn(reader_task(read, in_tx));
    let heartbeat = tokio::spawn(heartbeat_task(out_tx.clone(), heartbeat));

    Ok((out_tx, in_rx, SignalingTasks { writer, reader, heartbeat }))
}

async fn writer_task(
    mut write: futures_util::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<ClientMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "unserializable signaling frame dropped");
                continue;
            }
        };
        trace!(kind = ?msg.kind, "signaling out");
        if let Err(e) = write.send(Message::Text(text)).await {
            error!(error = %e, "signaling write failed");
            break;
        }
    }
    let _ = write.close().await;
    debug!("signaling writer stopped");
}

async fn reader_task(mut read: futures_util::stream::SplitStream<WsStream>, tx: mpsc::UnboundedSender<ServerMessage>) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => {
                    trace!(kind = ?msg.kind, src = ?msg.src, "signaling in");
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "unparseable signaling frame"),
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "signaling socket closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "signaling read failed");
                break;
            }
        }
    }
    debug!("signaling reader stopped");
}

async fn heartbeat_task(tx: mpsc::UnboundedSender<ClientMessage>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if tx.send(ClientMessage::heartbeat()).is_err() {
            break;
        }
    }
}

// keep the reconnect token out of logs
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_follows_peerjs_layout() {
        let endpoint = BrokerEndpoint::new("0.peerjs.com", 443, "/", true);
        let url = server_url(&endpoint, "peerjs", "alice", "abc123").unwrap();
        assert_eq!(url.as_str(), "wss://0.peerjs.com/peerjs?key=peerjs&id=alice&token=abc123");

        let endpoint = BrokerEndpoint::new("localhost", 9000, "/myapp", false);
        let url = server_url(&endpoint, "peerjs", "bob", "t").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:9000/myapp/peerjs?key=peerjs&id=bob&token=t");
    }

    #[test]
    fn token_is_not_logged() {
        let endpoint = BrokerEndpoint::new("localhost", 9000, "/", false);
        let url = server_url(&endpoint, "peerjs", "bob", "secret").unwrap();
        let shown = redacted(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("id=bob"));
    }

    #[test]
    fn outbox_without_socket_reports_not_registered() {
        let outbox = Outbox::default();
        assert!(matches!(outbox.send(ClientMessage::heartbeat()), Err(TransportError::NotRegistered)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        outbox.attach(tx);
        outbox.send(ClientMessage::heartbeat()).unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
