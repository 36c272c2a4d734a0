//! Error types for the peer client, its broker adapters and the local store

use std::time::Duration;
use thiserror::Error;

/// Result type for session operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to the host by session operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// The identity is not connected to a broker (or never became connected in time)
    #[error("Identity is not registered with the broker")]
    NotRegistered,

    /// Registration exhausted its retry budget
    #[error("Registration failed after {attempts} attempt(s): {reason}")]
    Registration { attempts: u32, reason: String },

    /// A new data channel did not open within the bound
    #[error("Channel to {remote_id} did not open within {timeout:?}")]
    ConnectTimeout { remote_id: String, timeout: Duration },

    /// Data channel failure (open rejected, closed mid-send, transport send error)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Local media could not be acquired
    #[error("Media acquisition failed: {0}")]
    Media(#[from] MediaError),

    /// The call transport failed; the session has been torn down
    #[error("Call transport error: {0}")]
    CallTransport(String),

    /// The operation was superseded (logout, re-register, hangup during setup)
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Whether a send retry policy may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Channel(_) | ClientError::ConnectTimeout { .. })
    }
}

/// Errors reported by broker adapters (signaling socket, webrtc, in-process network)
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("broker rejected registration: {0}")]
    Rejected(String),

    #[error("not registered with a broker")]
    NotRegistered,

    #[error("channel closed")]
    ChannelClosed,

    #[error("webrtc error: {0}")]
    WebRtc(String),

    #[error("setup error: {0}")]
    Setup(String),
}

impl From<webrtc::Error> for TransportError {
    fn from(err: webrtc::Error) -> Self {
        TransportError::WebRtc(err.to_string())
    }
}

/// Why local media could not be acquired; `Display` yields the user-facing reason code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("timeout")]
    Timeout,

    #[error("permission-denied")]
    PermissionDenied,

    #[error("no-device")]
    NoDevice,

    #[error("device error: {0}")]
    Device(String),
}

impl MediaError {
    /// Stable reason code reported to the host UI
    pub fn reason(&self) -> &'static str {
        match self {
            MediaError::Timeout => "timeout",
            MediaError::PermissionDenied => "permission-denied",
            MediaError::NoDevice => "no-device",
            MediaError::Device(_) => "device-error",
        }
    }
}

/// Local persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Username {0} is already taken")]
    UsernameTaken(String),

    #[error("Unknown user {0}")]
    UnknownUser(String),

    #[error("A user cannot add themselves as a contact")]
    SelfContact,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_reason_codes_are_stable() {
        assert_eq!(MediaError::Timeout.reason(), "timeout");
        assert_eq!(MediaError::PermissionDenied.to_string(), "permission-denied");
        assert_eq!(MediaError::NoDevice.reason(), "no-device");
        let err: ClientError = MediaError::PermissionDenied.into();
        assert_eq!(err.to_string(), "Media acquisition failed: permission-denied");
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(ClientError::channel("reset").is_retryable());
        assert!(ClientError::ConnectTimeout {
            remote_id: "peerB".into(),
            timeout: Duration::from_secs(5)
        }
        .is_retryable());
        assert!(!ClientError::NotRegistered.is_retryable());
        assert!(!ClientError::Media(MediaError::NoDevice).is_retryable());
    }
}
