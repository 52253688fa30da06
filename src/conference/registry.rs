//! Remote track registry
//!
//! Turns a stream of possibly redundant track events into exactly-once
//! attach/detach calls on the renderer. Camera and microphone tracks live in
//! one identity set, screen shares in another.
//!
//! Muting a remote video track detaches it and unmuting reattaches it, so a
//! renderer never keeps a frozen tile for a muted camera.

use super::renderer::MediaRenderer;
use crate::capture::track::{TrackId, TrackKind};
use crate::capture::traits::MediaTrack;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct RegistryState {
    remote: HashSet<TrackId>,
    shares: HashSet<TrackId>,

    /// Generation of the live mute listener per video track id
    mute_listeners: HashMap<TrackId, u64>,
    next_generation: u64,
}

struct RegistryInner {
    renderer: Arc<dyn MediaRenderer>,
    state: Mutex<RegistryState>,
}

/// Deduplicating registry of remote tracks
#[derive(Clone)]
pub struct TrackRegistry {
    inner: Arc<RegistryInner>,
}

impl TrackRegistry {
    pub fn new(renderer: Arc<dyn MediaRenderer>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                renderer,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Register a track delivered by the transport.
    ///
    /// Returns whether the renderer was asked to attach it.
    pub fn on_track_added(&self, track: &Arc<dyn MediaTrack>) -> bool {
        if track.is_local() {
            return false;
        }

        let id = track.track_id();
        let kind = track.kind();

        if kind == TrackKind::Screen {
            if !self.inner.state.lock().shares.insert(id.clone()) {
                tracing::debug!("Ignoring duplicate share track {}", id);
                return false;
            }
            tracing::debug!("Attaching share track {}", id);
            self.inner.renderer.attach_share(track);
            return true;
        }

        if !self.inner.state.lock().remote.insert(id.clone()) {
            tracing::debug!("Ignoring duplicate remote track {}", id);
            return false;
        }

        tracing::debug!("Attaching remote track {}", id);
        self.inner.renderer.attach_remote(track);

        if kind == TrackKind::Video {
            self.install_mute_listener(track, id);
        }
        true
    }

    /// Forget a track. Unknown ids are ignored.
    ///
    /// Returns whether the renderer was asked to detach it.
    pub fn on_track_removed(&self, track: &Arc<dyn MediaTrack>) -> bool {
        if track.is_local() {
            return false;
        }

        let id = track.track_id();

        if track.kind() == TrackKind::Screen {
            if !self.inner.state.lock().shares.remove(&id) {
                return false;
            }
            tracing::debug!("Detaching share track {}", id);
            self.inner.renderer.detach_share(track);
            return true;
        }

        let removed = {
            let mut state = self.inner.state.lock();
            state.mute_listeners.remove(&id);
            state.remote.remove(&id)
        };
        if !removed {
            return false;
        }

        tracing::debug!("Detaching remote track {}", id);
        self.inner.renderer.detach_remote(track);
        true
    }

    pub fn is_registered(&self, id: &TrackId) -> bool {
        let state = self.inner.state.lock();
        state.remote.contains(id) || state.shares.contains(id)
    }

    pub fn remote_count(&self) -> usize {
        self.inner.state.lock().remote.len()
    }

    pub fn share_count(&self) -> usize {
        self.inner.state.lock().shares.len()
    }

    /// Drop every registration without calling the renderer
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.remote.clear();
        state.shares.clear();
        state.mute_listeners.clear();
    }

    /// Install the mute listener once per registration of a video track.
    ///
    /// Listeners cannot be removed from a transport track, so each carries a
    /// generation; a listener from an earlier registration becomes inert
    /// once the track is removed or registered again.
    fn install_mute_listener(&self, track: &Arc<dyn MediaTrack>, id: TrackId) {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.mute_listeners.contains_key(&id) {
                return;
            }
            state.next_generation += 1;
            let generation = state.next_generation;
            state.mute_listeners.insert(id.clone(), generation);
            generation
        };

        let inner = Arc::downgrade(&self.inner);
        let weak_track: Weak<dyn MediaTrack> = Arc::downgrade(track);

        track.on_mute_changed(Box::new(move |muted| {
            let (Some(inner), Some(track)) = (inner.upgrade(), weak_track.upgrade()) else {
                return;
            };
            inner.handle_mute_change(&track, &id, generation, muted);
        }));
    }
}

impl RegistryInner {
    fn handle_mute_change(&self, track: &Arc<dyn MediaTrack>, id: &TrackId, generation: u64, muted: bool) {
        let changed = {
            let mut state = self.state.lock();
            if state.mute_listeners.get(id) != Some(&generation) {
                return;
            }
            if muted {
                state.remote.remove(id)
            } else {
                state.remote.insert(id.clone())
            }
        };

        if let Some(pid) = track.participant_id() {
            self.renderer.on_remote_video_mute_changed(&pid, muted);
        }

        if !changed {
            return;
        }
        if muted {
            tracing::debug!("Remote track {} muted, detaching", id);
            self.renderer.detach_remote(track);
        } else {
            tracing::debug!("Remote track {} unmuted, reattaching", id);
            self.renderer.attach_remote(track);
        }
    }
}
