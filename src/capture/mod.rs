//! Local capture and the transport seam
//!
//! This module owns the local camera, microphone and screen-share tracks and
//! defines the traits a media transport implements.

pub mod gate;
pub mod manager;
pub mod track;
pub mod traits;

pub use gate::{ToggleGate, ToggleGuard};
pub use manager::{CaptureStatus, LocalAvOptions, LocalTracks, MediaCaptureManager};
pub use track::{MediaType, Track, TrackId, TrackKind, TrackOrigin, VideoType};
pub use traits::{
    CaptureDevice, Conference, ConferenceEvent, ConferenceEventHandler, ConferenceEventKind,
    ConferenceId, ConferenceOptions, DeviceError, JoinCredentials, MediaHandle, MediaTrack,
    MediaTransportProvider, SubscriptionId, TrackRequest, TransportConnection, TransportError,
};
