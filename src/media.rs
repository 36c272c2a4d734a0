//! Media handles and capture devices used by call sessions

use crate::error::MediaError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Handle to a local capture or a remote incoming stream
pub trait MediaStream: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Stops every track of the stream; repeated calls are harmless
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Lets broker adapters recover their concrete stream type
    fn as_any(&self) -> &dyn Any;
}

/// Source of local audio/video capture
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaStream>, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self { audio: true, video: false }
    }

    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

/// Output a stream is bound to in the host UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSlot {
    /// Local preview
    Local,
    /// Remote playback
    Remote,
}
