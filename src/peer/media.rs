//! Media over webrtc: local sample tracks, remote track streams and PeerJS media connections.

use crate::broker::{BrokerEvent, CallEvent, CallMetadata, EventSender, MediaCall};
use crate::error::{MediaError, TransportError};
use crate::media::{MediaConstraints, MediaDevices, MediaStream};
use crate::peer::connection::PeerLeg;
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Local capture the host feeds with encoded samples (opus audio, VP8 video)
pub struct RtcMediaStream {
    id: String,
    audio: Option<Arc<TrackLocalStaticSample>>,
    video: Option<Arc<TrackLocalStaticSample>>,
    stopped: AtomicBool,
}

impl fmt::Debug for RtcMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcMediaStream")
            .field("id", &self.id)
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

impl RtcMediaStream {
    pub fn new(constraints: MediaConstraints) -> Arc<Self> {
        let id = format!("stream-{}", random_id());
        let track = |mime: &str, kind: &str| {
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime.to_owned(),
                    ..Default::default()
                },
                kind.to_owned(),
                id.clone(),
            ))
        };
        let audio = constraints.audio.then(|| track(MIME_TYPE_OPUS, "audio"));
        let video = constraints.video.then(|| track(MIME_TYPE_VP8, "video"));
        Arc::new(Self {
            id,
            audio,
            video,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>> {
        let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
        if let Some(audio) = &self.audio {
            tracks.push(audio.clone());
        }
        if let Some(video) = &self.video {
            tracks.push(video.clone());
        }
        tracks
    }

    pub async fn write_audio(&self, sample: &Sample) -> Result<(), MediaError> {
        Self::write(self.audio.as_ref(), self.is_stopped(), sample).await
    }

    pub async fn write_video(&self, sample: &Sample) -> Result<(), MediaError> {
        Self::write(self.video.as_ref(), self.is_stopped(), sample).await
    }

    async fn write(track: Option<&Arc<TrackLocalStaticSample>>, stopped: bool, sample: &Sample) -> Result<(), MediaError> {
        if stopped {
            return Err(MediaError::Device("stream stopped".into()));
        }
        let track = track.ok_or(MediaError::NoDevice)?;
        track
            .write_sample(sample)
            .await
            .map_err(|e| MediaError::Device(e.to_string()))
    }
}

impl MediaStream for RtcMediaStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Capture devices backed by sample tracks.
///
/// There is no camera or microphone access here; `available` says which
/// kinds the host can feed and `permitted` mirrors the user's consent.
pub struct RtcMediaDevices {
    available: MediaConstraints,
    permitted: AtomicBool,
}

impl Default for RtcMediaDevices {
    fn default() -> Self {
        Self::new(MediaConstraints::default())
    }
}

impl RtcMediaDevices {
    pub fn new(available: MediaConstraints) -> Self {
        Self {
            available,
            permitted: AtomicBool::new(true),
        }
    }

    pub fn set_permitted(&self, permitted: bool) {
        self.permitted.store(permitted, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaDevices for RtcMediaDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Arc<dyn MediaStream>, MediaError> {
        if !self.permitted.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        let granted = MediaConstraints {
            audio: constraints.audio && self.available.audio,
            video: constraints.video && self.available.video,
        };
        if granted.is_empty() {
            return Err(MediaError::NoDevice);
        }
        Ok(RtcMediaStream::new(granted))
    }
}

/// Media received from the remote peer
pub struct RemoteMediaStream {
    id: String,
    tracks: Mutex<Vec<Arc<TrackRemote>>>,
    stopped: AtomicBool,
}

impl fmt::Debug for RemoteMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.lock().len())
            .finish()
    }
}

impl RemoteMediaStream {
    fn new(id: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            tracks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Remote tracks; the host reads RTP from them
    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.lock().clone()
    }
}

impl MediaStream for RemoteMediaStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tracks.lock().clear();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// PeerJS media connection
pub struct RtcCall {
    leg: Arc<PeerLeg>,
    metadata: Option<CallMetadata>,
    remote_offer: Mutex<Option<RTCSessionDescription>>,
    remote: Mutex<Option<Arc<RemoteMediaStream>>>,
    closed: AtomicBool,
    events: EventSender,
}

impl fmt::Debug for RtcCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcCall")
            .field("id", &self.leg.connection_id)
            .field("remote_id", &self.leg.remote_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RtcCall {
    /// `remote_offer` is set for inbound calls and consumed by `answer`
    pub fn new(
        leg: Arc<PeerLeg>,
        metadata: Option<CallMetadata>,
        remote_offer: Option<RTCSessionDescription>,
        events: EventSender,
    ) -> Arc<Self> {
        let call = Arc::new(Self {
            leg,
            metadata,
            remote_offer: Mutex::new(remote_offer),
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
            events,
        });
        call.watch_tracks();
        call
    }

    pub fn leg(&self) -> &Arc<PeerLeg> {
        &self.leg
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Adds every track of `local` to the peer connection
    pub async fn add_local(&self, local: &RtcMediaStream) -> Result<(), TransportError> {
        for track in local.tracks() {
            self.leg.pc.add_track(track).await?;
        }
        Ok(())
    }

    fn watch_tracks(self: &Arc<Self>) {
        let call: Weak<Self> = Arc::downgrade(self);
        self.leg.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                if let Some(call) = call.upgrade() {
                    call.on_track(track);
                }
                Box::pin(async {})
            },
        ));
    }

    fn on_track(&self, track: Arc<TrackRemote>) {
        if self.is_closed() {
            return;
        }
        debug!(call_id = %self.leg.connection_id, kind = ?track.kind(), "remote track");
        let mut remote = self.remote.lock();
        match remote.as_ref() {
            Some(stream) => stream.tracks.lock().push(track),
            None => {
                let stream = RemoteMediaStream::new(format!("remote-{}", track.stream_id()));
                stream.tracks.lock().push(track);
                *remote = Some(stream.clone());
                // one stream event per call, on the first track
                self.notify(CallEvent::Stream(stream));
            }
        }
    }

    /// Reports a failure of the underlying peer connection
    pub fn fail(&self, reason: String) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notify(CallEvent::Error(reason));
        }
    }

    fn notify(&self, event: CallEvent) {
        let sent = self.events.send(BrokerEvent::Media {
            call_id: self.leg.connection_id.clone(),
            event,
        });
        if sent.is_err() {
            trace!(call_id = %self.leg.connection_id, "event loop gone, dropping call event");
        }
    }
}

#[async_trait]
impl MediaCall for RtcCall {
    fn id(&self) -> &str {
        &self.leg.connection_id
    }

    fn remote_id(&self) -> &str {
        &self.leg.remote_id
    }

    fn metadata(&self) -> Option<CallMetadata> {
        self.metadata.clone()
    }

    async fn answer(&self, local: Arc<dyn MediaStream>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let stream = local
            .as_any()
            .downcast_ref::<RtcMediaStream>()
            .ok_or_else(|| TransportError::Setup("local stream is not backed by webrtc tracks".into()))?;
        let offer = self
            .remote_offer
            .lock()
            .take()
            .ok_or_else(|| TransportError::Setup("call was already answered".into()))?;
        self.add_local(stream).await?;
        self.leg.accept_offer(offer).await?;
        info!(call_id = %self.leg.connection_id, remote_id = %self.leg.remote_id, "call answered");
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify(CallEvent::Close);
        if let Some(remote) = self.remote.lock().take() {
            remote.stop();
        }
        self.leg.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn devices_respect_permission_and_availability() {
        let devices = RtcMediaDevices::new(MediaConstraints::audio_only());
        let stream = devices.acquire(&MediaConstraints::default()).await.unwrap();
        let stream = stream.as_any().downcast_ref::<RtcMediaStream>().unwrap();
        assert_eq!(stream.tracks().len(), 1);

        let video_only = MediaConstraints { audio: false, video: true };
        assert_eq!(devices.acquire(&video_only).await.unwrap_err(), MediaError::NoDevice);

        devices.set_permitted(false);
        assert_eq!(devices.acquire(&MediaConstraints::default()).await.unwrap_err(), MediaError::PermissionDenied);
    }

    #[tokio::test]
    async fn stopped_stream_refuses_samples() {
        let stream = RtcMediaStream::new(MediaConstraints::default());
        stream.stop();
        let err = stream.write_audio(&Sample::default()).await.unwrap_err();
        assert!(matches!(err, MediaError::Device(_)));
    }
}
