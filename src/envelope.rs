//! Data channel payloads: the `{type, payload}` envelope and chat messages

use serde::{Deserialize, Serialize};

/// A chat message as exchanged between peers and stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub sender: String,
    pub receiver: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl Message {
    /// Stamps a new message with the current time; the id doubles as the timestamp
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, text: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: now,
            text: text.into(),
            sender: sender.into(),
            receiver: receiver.into(),
            timestamp: now,
        }
    }
}

/// Wire envelope carried by every data channel frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Envelope {
    Message(Message),
    Ping,
    Pong,
}

impl Envelope {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Message(_) => "message",
            Envelope::Ping => "ping",
            Envelope::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_envelope_matches_wire_shape() {
        let msg = Message {
            id: 1,
            text: "hi".into(),
            sender: "peerA".into(),
            receiver: "peerB".into(),
            timestamp: 1,
        };
        let value: serde_json::Value = serde_json::from_str(&Envelope::Message(msg).encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "payload": {"id": 1, "text": "hi", "sender": "peerA", "receiver": "peerB", "timestamp": 1}
            })
        );
    }

    #[test]
    fn ping_has_no_payload() {
        assert_eq!(Envelope::Ping.encode().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(Envelope::decode(br#"{"type":"pong"}"#).unwrap(), Envelope::Pong);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(Envelope::decode(br#"{"type":"file","payload":{}}"#).is_err());
        assert!(Envelope::decode(b"not json").is_err());
    }
}
