//! Rendering-layer callbacks
//!
//! The coordinator never draws anything. It tells the rendering layer when a
//! track should be shown or hidden and forwards speaking levels.

use crate::audio::level::AudioLevelSample;
use crate::capture::traits::MediaTrack;
use std::sync::Arc;

/// Callbacks implemented by the UI that renders tiles
pub trait MediaRenderer: Send + Sync {
    /// Show the local camera preview
    fn attach_local(&self, track: &Arc<dyn MediaTrack>);

    fn attach_remote(&self, track: &Arc<dyn MediaTrack>);

    fn detach_remote(&self, track: &Arc<dyn MediaTrack>);

    fn attach_share(&self, _track: &Arc<dyn MediaTrack>) {}

    fn detach_share(&self, _track: &Arc<dyn MediaTrack>) {}

    fn on_local_audio_level(&self, _sample: AudioLevelSample) {}

    /// Opt in to per-participant speaking levels
    fn wants_remote_levels(&self) -> bool {
        false
    }

    fn on_remote_audio_level(&self, _participant_id: &str, _sample: AudioLevelSample) {}

    fn on_remote_video_mute_changed(&self, _participant_id: &str, _muted: bool) {}

    /// Opt in to dominant speaker notifications
    fn wants_dominant_speaker(&self) -> bool {
        false
    }

    fn on_dominant(&self, _participant_id: Option<&str>) {}

    /// Human-readable capture/connection status
    fn set_status(&self, _status: &str) {}
}
