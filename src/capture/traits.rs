//! Transport trait definitions
//!
//! Transport-agnostic traits for the media layer. Any WebRTC client can be
//! plugged in by implementing [`MediaTransportProvider`], [`TransportConnection`],
//! [`Conference`] and [`MediaTrack`]; nothing in the crate reaches for a
//! global transport object.

use super::track::{MediaType, TrackId, TrackKind, VideoType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Device acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device error: {0}")]
    Other(String),
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Conference join failed: {0}")]
    Join(String),

    #[error("Transport operation failed: {0}")]
    Operation(String),
}

/// Opaque handle to the hardware stream behind a track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    pub id: String,
    pub media_type: MediaType,
}

/// Listener invoked with the new muted state of a track
pub type MuteListener = Box<dyn Fn(bool) + Send + Sync>;

/// A single media track owned by the transport
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn media_type(&self) -> MediaType;

    /// Video sub-type, `None` for audio
    fn video_type(&self) -> Option<VideoType>;

    fn is_local(&self) -> bool;

    fn participant_id(&self) -> Option<String>;

    fn stream_id(&self) -> Option<String>;

    fn is_muted(&self) -> bool;

    async fn mute(&self) -> Result<(), TransportError>;

    async fn unmute(&self) -> Result<(), TransportError>;

    /// Release the hardware handle
    async fn dispose(&self) -> Result<(), TransportError>;

    /// The underlying stream, if the transport has finished wiring it up
    fn media_handle(&self) -> Option<MediaHandle>;

    fn on_mute_changed(&self, listener: MuteListener);

    fn kind(&self) -> TrackKind {
        TrackKind::classify(self.media_type(), self.video_type())
    }

    /// Stable identity, see [`TrackId::derive`]
    fn track_id(&self) -> TrackId {
        let participant = self
            .participant_id()
            .unwrap_or_else(|| TrackId::UNKNOWN_PARTICIPANT.to_string());
        let stream = self
            .stream_id()
            .unwrap_or_else(|| TrackId::UNKNOWN_STREAM.to_string());
        TrackId::derive(&participant, self.kind(), &stream)
    }
}

/// Identity of a conference object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConferenceId(pub u64);

/// Handle returned by [`Conference::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Conference events the coordinator consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConferenceEventKind {
    TrackAdded,
    TrackRemoved,
    DominantSpeakerChanged,
}

/// A conference event as delivered by the transport
#[derive(Clone)]
pub enum ConferenceEvent {
    TrackAdded(Arc<dyn MediaTrack>),
    TrackRemoved(Arc<dyn MediaTrack>),
    DominantSpeakerChanged(Option<String>),
}

impl ConferenceEvent {
    pub fn kind(&self) -> ConferenceEventKind {
        match self {
            ConferenceEvent::TrackAdded(_) => ConferenceEventKind::TrackAdded,
            ConferenceEvent::TrackRemoved(_) => ConferenceEventKind::TrackRemoved,
            ConferenceEvent::DominantSpeakerChanged(_) => {
                ConferenceEventKind::DominantSpeakerChanged
            }
        }
    }
}

impl fmt::Debug for ConferenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConferenceEvent::TrackAdded(track) => {
                f.debug_tuple("TrackAdded").field(&track.track_id()).finish()
            }
            ConferenceEvent::TrackRemoved(track) => {
                f.debug_tuple("TrackRemoved").field(&track.track_id()).finish()
            }
            ConferenceEvent::DominantSpeakerChanged(id) => {
                f.debug_tuple("DominantSpeakerChanged").field(id).finish()
            }
        }
    }
}

pub type ConferenceEventHandler = Arc<dyn Fn(ConferenceEvent) + Send + Sync>;

/// A joined (or joinable) multi-party conference
#[async_trait]
pub trait Conference: Send + Sync {
    fn id(&self) -> ConferenceId;

    fn subscribe(&self, kind: ConferenceEventKind, handler: ConferenceEventHandler) -> SubscriptionId;

    fn unsubscribe(&self, subscription: SubscriptionId);

    fn is_joined(&self) -> bool;

    async fn join(&self) -> Result<(), TransportError>;

    async fn leave(&self) -> Result<(), TransportError>;

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError>;

    async fn remove_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError>;

    /// Atomically swap `old` for `new` without renegotiating
    async fn replace_track(
        &self,
        old: Arc<dyn MediaTrack>,
        new: Arc<dyn MediaTrack>,
    ) -> Result<(), TransportError>;
}

/// Options passed when a conference object is created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceOptions {
    pub open_bridge_channel: bool,
}

impl Default for ConferenceOptions {
    fn default() -> Self {
        Self {
            open_bridge_channel: true,
        }
    }
}

/// An established transport connection
#[async_trait]
pub trait TransportConnection: Send + Sync {
    fn init_conference(
        &self,
        room_id: &str,
        options: &ConferenceOptions,
    ) -> Result<Arc<dyn Conference>, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Injected entry point into the media transport library
#[async_trait]
pub trait MediaTransportProvider: Send + Sync {
    async fn connect(
        &self,
        credentials: &JoinCredentials,
    ) -> Result<Arc<dyn TransportConnection>, TransportError>;

    async fn create_local_tracks(
        &self,
        request: &TrackRequest,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, DeviceError>;
}

/// Capture sources that can be requested from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureDevice {
    Audio,
    Video,
    Desktop,
}

impl CaptureDevice {
    /// Track kind produced by this capture source
    pub fn track_kind(&self) -> TrackKind {
        match self {
            CaptureDevice::Audio => TrackKind::Audio,
            CaptureDevice::Video => TrackKind::Video,
            CaptureDevice::Desktop => TrackKind::Screen,
        }
    }
}

/// Frame rate bounds for desktop capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRateRange {
    pub min: u32,
    pub max: u32,
}

/// Request for local tracks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    pub devices: Vec<CaptureDevice>,
    pub camera_device_id: Option<String>,
    pub mic_device_id: Option<String>,

    /// Vertical video resolution
    pub resolution: Option<u32>,

    pub desktop_frame_rate: Option<FrameRateRange>,
}

impl TrackRequest {
    pub fn new(devices: Vec<CaptureDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    pub fn camera(mut self, device_id: Option<String>) -> Self {
        self.camera_device_id = device_id;
        self
    }

    pub fn microphone(mut self, device_id: Option<String>) -> Self {
        self.mic_device_id = device_id;
        self
    }

    pub fn resolution(mut self, resolution: u32) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn desktop_frame_rate(mut self, range: FrameRateRange) -> Self {
        self.desktop_frame_rate = Some(range);
        self
    }
}

/// What the token/join endpoint hands back
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCredentials {
    pub room_id: String,
    pub credentials: String,

    /// Base websocket endpoint, e.g. `wss://meet.example.com/xmpp-websocket`
    pub transport_endpoint: String,

    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl JoinCredentials {
    /// Websocket URL with the room id attached
    pub fn service_url(&self) -> String {
        let separator = if self.transport_endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}room={}",
            self.transport_endpoint,
            separator,
            urlencoding::encode(&self.room_id)
        )
    }
}

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}
