use serde::{Deserialize, Serialize};
use serde_json::Value;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Message types spoken on the PeerJS signaling socket
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum MessageType {
    Open,
    Error,
    IdTaken,
    InvalidKey,
    Leave,
    Expire,
    Offer,
    Answer,
    Candidate,
    Heartbeat,
    #[serde(other)]
    Unknown,
}

/// Frame received from the broker
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub dst: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl ServerMessage {
    /// Human readable reason carried by ERROR / ID-TAKEN / INVALID-KEY
    pub fn error_message(&self) -> String {
        self.payload
            .as_ref()
            .and_then(|p| p.get("msg"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", self.kind))
    }
}

/// Frame sent to the broker
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ClientMessage {
    pub fn heartbeat() -> Self {
        Self {
            kind: MessageType::Heartbeat,
            dst: None,
            payload: None,
        }
    }

    pub fn to(kind: MessageType, dst: &str, payload: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            dst: Some(dst.to_string()),
            payload: Some(serde_json::to_value(payload)?),
        })
    }
}

/// Which kind of PeerJS connection an offer belongs to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Data,
    Media,
}

impl ConnectionType {
    /// Connection id prefix used by stock PeerJS clients
    pub fn prefix(self) -> &'static str {
        match self {
            ConnectionType::Data => "dc_",
            ConnectionType::Media => "mc_",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub sdp: RTCSessionDescription,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub reliable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub sdp: RTCSessionDescription,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

/// ICE candidate as carried inside a CANDIDATE payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: IceCandidate,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub connection_id: String,
}

/// ICE server entry as configured by the user
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub id: String,
    pub r#type: String, // "stun" or "turn"
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}
