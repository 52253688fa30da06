//! Per-track speaking levels for remote audio

use super::level::AudioLevelSample;
use super::monitor::{AudioGraphFactory, AudioLevelMonitor, LevelSink};
use crate::capture::track::TrackId;
use crate::capture::traits::MediaTrack;
use crate::config::AudioSettings;
use crate::conference::renderer::MediaRenderer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;

struct RemoteMonitor {
    participant_id: String,
    monitor: AudioLevelMonitor,
}

/// One [`AudioLevelMonitor`] per remote audio track.
///
/// Samples are reported per participant, so a participant publishing two
/// audio tracks shows whichever sampled last.
pub struct RemoteLevelMonitors {
    factory: Arc<dyn AudioGraphFactory>,
    settings: AudioSettings,
    renderer: Arc<dyn MediaRenderer>,
    runtime: Option<Handle>,
    monitors: HashMap<TrackId, RemoteMonitor>,
}

impl RemoteLevelMonitors {
    pub fn new(
        factory: Arc<dyn AudioGraphFactory>,
        settings: AudioSettings,
        renderer: Arc<dyn MediaRenderer>,
    ) -> Self {
        Self {
            factory,
            settings,
            renderer,
            runtime: None,
            monitors: HashMap::new(),
        }
    }

    /// Runtime for monitors wired from transport callback threads
    pub fn bind_runtime(&mut self, runtime: Handle) {
        for remote in self.monitors.values_mut() {
            remote.monitor.bind_runtime(runtime.clone());
        }
        self.runtime = Some(runtime);
    }

    /// Monitor `track`, replacing an earlier monitor for the same track
    pub fn wire(&mut self, track: Arc<dyn MediaTrack>) {
        let participant_id = track
            .participant_id()
            .unwrap_or_else(|| TrackId::UNKNOWN_PARTICIPANT.to_string());

        let remote = self.monitors.entry(track.track_id()).or_insert_with(|| {
            let renderer = self.renderer.clone();
            let pid = participant_id.clone();
            let sink: LevelSink = Arc::new(move |sample: AudioLevelSample| {
                renderer.on_remote_audio_level(&pid, sample)
            });
            let mut monitor = AudioLevelMonitor::new(self.factory.clone(), self.settings.clone(), sink);
            if let Some(runtime) = &self.runtime {
                monitor.bind_runtime(runtime.clone());
            }
            RemoteMonitor {
                participant_id,
                monitor,
            }
        });
        remote.monitor.wire_mic_vu(track);
    }

    /// Reset the participant's indicator when a monitored track is muted.
    ///
    /// Returns whether a reset was pushed.
    pub fn mute_changed(&self, track_id: &TrackId, muted: bool) -> bool {
        let Some(remote) = self.monitors.get(track_id) else {
            return false;
        };
        if !muted {
            return false;
        }
        self.renderer
            .on_remote_audio_level(&remote.participant_id, AudioLevelSample::silent());
        true
    }

    /// Stop and forget the monitor for `track_id`
    pub fn stop(&mut self, track_id: &TrackId) -> bool {
        match self.monitors.remove(track_id) {
            Some(mut remote) => remote.monitor.stop_vu(),
            None => false,
        }
    }

    pub fn stop_all(&mut self) -> usize {
        self.monitors
            .drain()
            .map(|(_, mut remote)| remote.monitor.stop_vu())
            .filter(|stopped| *stopped)
            .count()
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}
