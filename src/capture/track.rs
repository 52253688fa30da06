//! Track identity and classification
//!
//! A transport may deliver the same physical track several times (reconnects,
//! duplicate events). Everything downstream keys on [`TrackId`], which is
//! derived only from stable properties of the track.

use super::traits::MediaTrack;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media type reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

/// Video sub-type reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Camera,
    Desktop,
}

/// Logical kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    Screen,
}

impl TrackKind {
    /// Classify a transport track. Desktop video is a screen share.
    pub fn classify(media_type: MediaType, video_type: Option<VideoType>) -> Self {
        match (media_type, video_type) {
            (MediaType::Audio, _) => TrackKind::Audio,
            (MediaType::Video, Some(VideoType::Desktop)) => TrackKind::Screen,
            (MediaType::Video, _) => TrackKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
            TrackKind::Screen => "screen",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a track originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackOrigin {
    Local,
    Remote,
}

/// Stable identity of a track
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    /// Placeholder used when the transport does not know the owner
    pub const UNKNOWN_PARTICIPANT: &'static str = "unknown";

    /// Placeholder used when the transport exposes no stream id
    pub const UNKNOWN_STREAM: &'static str = "na";

    /// Derive the id from participant, kind and stream.
    pub fn derive(participant_id: &str, kind: TrackKind, stream_id: &str) -> Self {
        Self(format!("{participant_id}-{kind}-{stream_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time view of a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    pub origin: TrackOrigin,
    pub participant_id: String,
    pub muted: bool,
}

impl Track {
    /// Capture the current state of a track handle
    pub fn snapshot(track: &dyn MediaTrack) -> Self {
        Self {
            id: track.track_id(),
            kind: track.kind(),
            origin: if track.is_local() {
                TrackOrigin::Local
            } else {
                TrackOrigin::Remote
            },
            participant_id: track
                .participant_id()
                .unwrap_or_else(|| TrackId::UNKNOWN_PARTICIPANT.to_string()),
            muted: track.is_muted(),
        }
    }
}
