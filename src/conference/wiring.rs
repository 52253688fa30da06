//! Conference event wiring
//!
//! Subscribes the registry (and, when the renderer asks for them, remote level
//! monitors and dominant speaker notifications) to a conference's events.
//! Each conference instance is wired at most once until it is unwired.

use super::registry::TrackRegistry;
use super::renderer::MediaRenderer;
use crate::audio::monitor::AudioGraphFactory;
use crate::audio::remote::RemoteLevelMonitors;
use crate::capture::track::MediaType;
use crate::capture::traits::{
    Conference, ConferenceEvent, ConferenceEventHandler, ConferenceEventKind, ConferenceId,
    SubscriptionId,
};
use crate::config::AudioSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Routes transport events into the track registry
pub struct ConferenceEventWiring {
    registry: TrackRegistry,
    renderer: Arc<dyn MediaRenderer>,
    remote_levels: Option<Arc<Mutex<RemoteLevelMonitors>>>,
    wired: Mutex<HashMap<ConferenceId, Vec<SubscriptionId>>>,
}

impl ConferenceEventWiring {
    pub fn new(
        renderer: Arc<dyn MediaRenderer>,
        audio_graph: Arc<dyn AudioGraphFactory>,
        audio: AudioSettings,
    ) -> Self {
        let remote_levels = renderer.wants_remote_levels().then(|| {
            Arc::new(Mutex::new(RemoteLevelMonitors::new(
                audio_graph,
                audio,
                renderer.clone(),
            )))
        });

        Self {
            registry: TrackRegistry::new(renderer.clone()),
            renderer,
            remote_levels,
            wired: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn is_wired(&self, conference: &dyn Conference) -> bool {
        self.wired.lock().contains_key(&conference.id())
    }

    /// Subscribe to `conference` unless this instance is already wired.
    ///
    /// Returns whether new subscriptions were made.
    pub fn wire(&self, conference: &Arc<dyn Conference>) -> bool {
        let mut wired = self.wired.lock();
        let id = conference.id();
        if wired.contains_key(&id) {
            tracing::debug!("Conference {:?} already wired", id);
            return false;
        }

        // Track events may arrive on transport threads outside the runtime
        if let (Some(levels), Ok(runtime)) = (&self.remote_levels, Handle::try_current()) {
            levels.lock().bind_runtime(runtime);
        }

        let mut subscriptions = vec![
            conference.subscribe(ConferenceEventKind::TrackAdded, self.track_added_handler()),
            conference.subscribe(ConferenceEventKind::TrackRemoved, self.track_removed_handler()),
        ];

        if self.renderer.wants_dominant_speaker() {
            let renderer = self.renderer.clone();
            let handler: ConferenceEventHandler = Arc::new(move |event| {
                if let ConferenceEvent::DominantSpeakerChanged(participant) = event {
                    renderer.on_dominant(participant.as_deref());
                }
            });
            subscriptions.push(
                conference.subscribe(ConferenceEventKind::DominantSpeakerChanged, handler),
            );
        }

        tracing::info!(
            "Wired conference {:?} with {} subscriptions",
            id,
            subscriptions.len()
        );
        wired.insert(id, subscriptions);
        true
    }

    /// Drop every subscription made for `conference`.
    ///
    /// Returns whether the conference was wired.
    pub fn unwire(&self, conference: &dyn Conference) -> bool {
        let Some(subscriptions) = self.wired.lock().remove(&conference.id()) else {
            return false;
        };
        for subscription in subscriptions {
            conference.unsubscribe(subscription);
        }
        tracing::debug!("Unwired conference {:?}", conference.id());
        true
    }

    /// Stop every remote level monitor. Returns how many were running.
    pub fn stop_remote_levels(&self) -> usize {
        match &self.remote_levels {
            Some(levels) => levels.lock().stop_all(),
            None => 0,
        }
    }

    fn track_added_handler(&self) -> ConferenceEventHandler {
        let registry = self.registry.clone();
        let remote_levels = self.remote_levels.clone();

        Arc::new(move |event| {
            let ConferenceEvent::TrackAdded(track) = event else {
                return;
            };
            if track.is_local() {
                return;
            }

            let attached = registry.on_track_added(&track);

            if let (true, MediaType::Audio, Some(levels)) =
                (attached, track.media_type(), remote_levels.as_ref())
            {
                let weak = Arc::downgrade(levels);
                let id = track.track_id();
                track.on_mute_changed(Box::new(move |muted| {
                    if let Some(levels) = weak.upgrade() {
                        levels.lock().mute_changed(&id, muted);
                    }
                }));
                levels.lock().wire(track);
            }
        })
    }

    fn track_removed_handler(&self) -> ConferenceEventHandler {
        let registry = self.registry.clone();
        let remote_levels = self.remote_levels.clone();

        Arc::new(move |event| {
            let ConferenceEvent::TrackRemoved(track) = event else {
                return;
            };
            if track.is_local() {
                return;
            }

            let detached = registry.on_track_removed(&track);

            if let (true, MediaType::Audio, Some(levels)) =
                (detached, track.media_type(), remote_levels.as_ref())
            {
                levels.lock().stop(&track.track_id());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::MediaTrack;
    use crate::testing::{FakeAudioGraph, FakeConference, FakeTrack, RecordingRenderer, RenderCall};
    use std::time::Duration;

    fn wiring(renderer: &Arc<RecordingRenderer>) -> ConferenceEventWiring {
        ConferenceEventWiring::new(
            renderer.clone(),
            FakeAudioGraph::with_amplitude(32),
            AudioSettings {
                frame_interval_ms: 2,
                ..AudioSettings::default()
            },
        )
    }

    #[test]
    fn test_wire_subscribes_once_per_conference() {
        let renderer = RecordingRenderer::new();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();

        assert!(wiring.wire(&dyn_conference));
        assert!(!wiring.wire(&dyn_conference));
        assert_eq!(conference.subscription_count(), 2);
        assert!(wiring.is_wired(dyn_conference.as_ref()));
    }

    #[test]
    fn test_distinct_conferences_are_wired_separately() {
        let renderer = RecordingRenderer::new();
        let wiring = wiring(&renderer);
        let first: Arc<dyn Conference> = FakeConference::new(1);
        let second: Arc<dyn Conference> = FakeConference::new(2);

        assert!(wiring.wire(&first));
        assert!(wiring.wire(&second));
    }

    #[test]
    fn test_unwire_allows_rewiring() {
        let renderer = RecordingRenderer::new();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();

        wiring.wire(&dyn_conference);
        assert!(wiring.unwire(dyn_conference.as_ref()));
        assert!(!wiring.unwire(dyn_conference.as_ref()));
        assert_eq!(conference.subscription_count(), 0);

        assert!(wiring.wire(&dyn_conference));
        assert_eq!(conference.subscription_count(), 2);
    }

    #[test]
    fn test_duplicate_camera_events_attach_once() {
        let renderer = RecordingRenderer::new();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();
        wiring.wire(&dyn_conference);

        conference.emit(ConferenceEvent::TrackAdded(FakeTrack::remote_camera("p", "s1")));
        conference.emit(ConferenceEvent::TrackAdded(FakeTrack::remote_camera("p", "s1")));
        assert_eq!(renderer.count(|c| matches!(c, RenderCall::AttachRemote(_))), 1);

        let removed = FakeTrack::remote_camera("p", "s1");
        let id = removed.track_id();
        conference.emit(ConferenceEvent::TrackRemoved(removed));
        assert_eq!(renderer.count(|c| matches!(c, RenderCall::DetachRemote(_))), 1);
        assert!(!wiring.registry().is_registered(&id));
    }

    #[test]
    fn test_local_tracks_never_reach_renderer() {
        let renderer = RecordingRenderer::new();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();
        wiring.wire(&dyn_conference);

        conference.emit(ConferenceEvent::TrackAdded(FakeTrack::local_video("me", "cam")));
        conference.emit(ConferenceEvent::TrackRemoved(FakeTrack::local_video("me", "cam")));
        assert!(renderer.calls().is_empty());
    }

    #[test]
    fn test_unwired_conference_events_are_dropped() {
        let renderer = RecordingRenderer::new();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();
        wiring.wire(&dyn_conference);
        wiring.unwire(dyn_conference.as_ref());

        conference.emit(ConferenceEvent::TrackAdded(FakeTrack::remote_camera("p", "s1")));
        assert!(renderer.calls().is_empty());
    }

    #[test]
    fn test_dominant_speaker_requires_opt_in() {
        let renderer = RecordingRenderer::new();
        let plain = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();
        plain.wire(&dyn_conference);
        conference.emit(ConferenceEvent::DominantSpeakerChanged(Some("p".to_string())));
        assert!(renderer.calls().is_empty());

        let interested = RecordingRenderer::with_dominant_speaker();
        let wiring = wiring(&interested);
        let conference = FakeConference::new(2);
        let dyn_conference: Arc<dyn Conference> = conference.clone();
        wiring.wire(&dyn_conference);
        assert_eq!(conference.subscription_count(), 3);

        conference.emit(ConferenceEvent::DominantSpeakerChanged(Some("p".to_string())));
        conference.emit(ConferenceEvent::DominantSpeakerChanged(None));
        assert_eq!(
            interested.calls(),
            vec![
                RenderCall::Dominant(Some("p".to_string())),
                RenderCall::Dominant(None),
            ]
        );
    }

    #[tokio::test]
    async fn test_remote_audio_levels_follow_track_lifecycle() {
        let renderer = RecordingRenderer::with_remote_levels();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();
        wiring.wire(&dyn_conference);

        conference.emit(ConferenceEvent::TrackAdded(FakeTrack::remote_audio("alice", "a1")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(renderer.remote_levels().iter().any(|(_, s)| s.speaking));

        conference.emit(ConferenceEvent::TrackRemoved(FakeTrack::remote_audio("alice", "a1")));
        let last = renderer.remote_levels().last().cloned();
        assert_eq!(
            last,
            Some(("alice".to_string(), crate::audio::AudioLevelSample::silent()))
        );
        assert_eq!(wiring.stop_remote_levels(), 0);
    }

    #[tokio::test]
    async fn test_remote_audio_mute_resets_level() {
        let renderer = RecordingRenderer::with_remote_levels();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();
        wiring.wire(&dyn_conference);

        let track = FakeTrack::remote_audio("alice", "a1");
        conference.emit(ConferenceEvent::TrackAdded(track.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let before = renderer.remote_levels().len();
        track.fire_mute(true);
        let levels = renderer.remote_levels();
        assert!(levels.len() > before);
        assert!(levels[before..].contains(&(
            "alice".to_string(),
            crate::audio::AudioLevelSample::silent()
        )));
        wiring.stop_remote_levels();
    }

    #[test]
    fn test_remote_levels_run_for_events_from_foreign_threads() {
        let renderer = RecordingRenderer::with_remote_levels();
        let wiring = wiring(&renderer);
        let conference = FakeConference::new(1);
        let dyn_conference: Arc<dyn Conference> = conference.clone();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            wiring.wire(&dyn_conference);
        });

        let emitter = conference.clone();
        std::thread::spawn(move || {
            emitter.emit(ConferenceEvent::TrackAdded(FakeTrack::remote_audio("bob", "b1")));
        })
        .join()
        .unwrap();
        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(40)).await });

        assert!(renderer.remote_levels().iter().any(|(pid, s)| pid == "bob" && s.speaking));
        assert_eq!(wiring.stop_remote_levels(), 1);
    }
}
