//! In-memory test doubles for the transport, renderer and audio graph

use crate::audio::level::AudioLevelSample;
use crate::audio::monitor::{AudioAnalyser, AudioGraphError, AudioGraphFactory};
use crate::capture::track::{MediaType, TrackId, TrackKind, VideoType};
use crate::capture::traits::{
    Conference, ConferenceEvent, ConferenceEventHandler, ConferenceEventKind, ConferenceId,
    ConferenceOptions, DeviceError, JoinCredentials, MediaHandle, MediaTrack,
    MediaTransportProvider, MuteListener, SubscriptionId, TrackRequest, TransportConnection,
    TransportError,
};
use crate::conference::renderer::MediaRenderer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct FakeTrack {
    media_type: MediaType,
    video_type: Option<VideoType>,
    local: bool,
    participant_id: String,
    stream_id: String,
    muted: AtomicBool,
    disposed: AtomicBool,
    pending_handle_polls: AtomicU32,
    listeners: Mutex<Vec<MuteListener>>,
}

impl FakeTrack {
    pub fn new(kind: TrackKind, local: bool, participant_id: &str, stream_id: &str) -> Arc<Self> {
        let (media_type, video_type) = match kind {
            TrackKind::Audio => (MediaType::Audio, None),
            TrackKind::Video => (MediaType::Video, Some(VideoType::Camera)),
            TrackKind::Screen => (MediaType::Video, Some(VideoType::Desktop)),
        };
        Arc::new(Self {
            media_type,
            video_type,
            local,
            participant_id: participant_id.to_string(),
            stream_id: stream_id.to_string(),
            muted: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            pending_handle_polls: AtomicU32::new(0),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn remote_camera(participant_id: &str, stream_id: &str) -> Arc<Self> {
        Self::new(TrackKind::Video, false, participant_id, stream_id)
    }

    pub fn remote_audio(participant_id: &str, stream_id: &str) -> Arc<Self> {
        Self::new(TrackKind::Audio, false, participant_id, stream_id)
    }

    pub fn remote_screen(participant_id: &str, stream_id: &str) -> Arc<Self> {
        Self::new(TrackKind::Screen, false, participant_id, stream_id)
    }

    pub fn local_audio(participant_id: &str, stream_id: &str) -> Arc<Self> {
        Self::new(TrackKind::Audio, true, participant_id, stream_id)
    }

    pub fn local_video(participant_id: &str, stream_id: &str) -> Arc<Self> {
        Self::new(TrackKind::Video, true, participant_id, stream_id)
    }

    /// Make `media_handle` return `None` for the next `polls` calls.
    /// `u32::MAX` means never.
    pub fn delay_media_handle(&self, polls: u32) {
        self.pending_handle_polls.store(polls, Ordering::SeqCst);
    }

    pub fn set_muted_silently(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Change the muted state the way the transport does, notifying listeners
    pub fn fire_mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            listener(muted);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTrack for FakeTrack {
    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn video_type(&self) -> Option<VideoType> {
        self.video_type
    }

    fn is_local(&self) -> bool {
        self.local
    }

    fn participant_id(&self) -> Option<String> {
        Some(self.participant_id.clone())
    }

    fn stream_id(&self) -> Option<String> {
        Some(self.stream_id.clone())
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    async fn mute(&self) -> Result<(), TransportError> {
        self.fire_mute(true);
        Ok(())
    }

    async fn unmute(&self) -> Result<(), TransportError> {
        self.fire_mute(false);
        Ok(())
    }

    async fn dispose(&self) -> Result<(), TransportError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn media_handle(&self) -> Option<MediaHandle> {
        let pending = self.pending_handle_polls.load(Ordering::SeqCst);
        if pending > 0 {
            if pending != u32::MAX {
                self.pending_handle_polls.store(pending - 1, Ordering::SeqCst);
            }
            return None;
        }
        Some(MediaHandle {
            id: self.stream_id.clone(),
            media_type: self.media_type,
        })
    }

    fn on_mute_changed(&self, listener: MuteListener) {
        self.listeners.lock().push(listener);
    }
}

pub struct FakeConference {
    id: ConferenceId,
    tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
    handlers: Mutex<Vec<(SubscriptionId, ConferenceEventKind, ConferenceEventHandler)>>,
    next_subscription: AtomicU64,
    video_history: Mutex<Vec<usize>>,
    fail_add: AtomicBool,
    fail_replace: AtomicBool,
    fail_join: AtomicBool,
    joined: AtomicBool,
}

impl FakeConference {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ConferenceId(id),
            tracks: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            video_history: Mutex::new(Vec::new()),
            fail_add: AtomicBool::new(false),
            fail_replace: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            joined: AtomicBool::new(false),
        })
    }

    /// Deliver an event to every matching subscriber
    pub fn emit(&self, event: ConferenceEvent) {
        let kind = event.kind();
        let handlers: Vec<ConferenceEventHandler> = self
            .handlers
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks.lock().clone()
    }

    pub fn track_count(&self, kind: TrackKind) -> usize {
        self.tracks.lock().iter().filter(|t| t.kind() == kind).count()
    }

    /// Camera track count after every track mutation
    pub fn video_count_history(&self) -> Vec<usize> {
        self.video_history.lock().clone()
    }

    pub fn fail_add(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    pub fn fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    fn record_history(&self, tracks: &[Arc<dyn MediaTrack>]) {
        let videos = tracks.iter().filter(|t| t.kind() == TrackKind::Video).count();
        self.video_history.lock().push(videos);
    }
}

#[async_trait]
impl Conference for FakeConference {
    fn id(&self) -> ConferenceId {
        self.id
    }

    fn subscribe(&self, kind: ConferenceEventKind, handler: ConferenceEventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.handlers.lock().push((id, kind, handler));
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.handlers.lock().retain(|(id, _, _)| *id != subscription);
    }

    fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    async fn join(&self) -> Result<(), TransportError> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(TransportError::Join("conference refused".to_string()));
        }
        self.joined.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.joined.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(TransportError::Operation("add rejected".to_string()));
        }
        let mut tracks = self.tracks.lock();
        tracks.push(track);
        self.record_history(&tracks);
        Ok(())
    }

    async fn remove_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), TransportError> {
        let id = track.track_id();
        let mut tracks = self.tracks.lock();
        tracks.retain(|t| t.track_id() != id);
        self.record_history(&tracks);
        Ok(())
    }

    async fn replace_track(
        &self,
        old: Arc<dyn MediaTrack>,
        new: Arc<dyn MediaTrack>,
    ) -> Result<(), TransportError> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(TransportError::Operation("replace rejected".to_string()));
        }
        let id = old.track_id();
        let mut tracks = self.tracks.lock();
        let Some(slot) = tracks.iter_mut().find(|t| t.track_id() == id) else {
            return Err(TransportError::Operation(format!("{id} is not published")));
        };
        *slot = new;
        self.record_history(&tracks);
        Ok(())
    }
}

pub struct FakeConnection {
    conference: Arc<FakeConference>,
    rooms: Mutex<Vec<String>>,
    disconnected: AtomicBool,
}

impl FakeConnection {
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    fn init_conference(
        &self,
        room_id: &str,
        _options: &ConferenceOptions,
    ) -> Result<Arc<dyn Conference>, TransportError> {
        self.rooms.lock().push(room_id.to_string());
        Ok(self.conference.clone())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeProvider {
    connection: Arc<FakeConnection>,
    created: Mutex<Vec<Arc<FakeTrack>>>,
    requests: Mutex<Vec<TrackRequest>>,
    fail_next: Mutex<Option<DeviceError>>,
    fail_connect: AtomicBool,
    next_stream: AtomicU64,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connection: Arc::new(FakeConnection {
                conference: FakeConference::new(1),
                rooms: Mutex::new(Vec::new()),
                disconnected: AtomicBool::new(false),
            }),
            created: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            fail_connect: AtomicBool::new(false),
            next_stream: AtomicU64::new(1),
        })
    }

    pub fn connection(&self) -> Arc<FakeConnection> {
        self.connection.clone()
    }

    /// The conference every connection hands out
    pub fn conference(&self) -> Arc<FakeConference> {
        self.connection.conference.clone()
    }

    pub fn created(&self) -> Vec<Arc<FakeTrack>> {
        self.created.lock().clone()
    }

    pub fn requests(&self) -> Vec<TrackRequest> {
        self.requests.lock().clone()
    }

    /// Fail the next track request with `error`
    pub fn fail_next(&self, error: DeviceError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaTransportProvider for FakeProvider {
    async fn connect(
        &self,
        _credentials: &JoinCredentials,
    ) -> Result<Arc<dyn TransportConnection>, TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("server unreachable".to_string()));
        }
        Ok(self.connection.clone())
    }

    async fn create_local_tracks(
        &self,
        request: &TrackRequest,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, DeviceError> {
        self.requests.lock().push(request.clone());
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        for device in &request.devices {
            let kind = device.track_kind();
            let stream = format!("{kind}-{}", self.next_stream.fetch_add(1, Ordering::SeqCst));
            let track = FakeTrack::new(kind, true, "local", &stream);
            self.created.lock().push(track.clone());
            tracks.push(track);
        }
        Ok(tracks)
    }
}

/// Renderer callbacks, in call order. Levels and statuses are kept apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    AttachLocal(TrackId),
    AttachRemote(TrackId),
    DetachRemote(TrackId),
    AttachShare(TrackId),
    DetachShare(TrackId),
    RemoteVideoMute(String, bool),
    Dominant(Option<String>),
}

#[derive(Default)]
pub struct RecordingRenderer {
    calls: Mutex<Vec<RenderCall>>,
    statuses: Mutex<Vec<String>>,
    local_levels: Mutex<Vec<AudioLevelSample>>,
    remote_levels: Mutex<Vec<(String, AudioLevelSample)>>,
    wants_remote_levels: bool,
    wants_dominant_speaker: bool,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_remote_levels() -> Arc<Self> {
        Arc::new(Self {
            wants_remote_levels: true,
            ..Self::default()
        })
    }

    pub fn with_dominant_speaker() -> Arc<Self> {
        Arc::new(Self {
            wants_dominant_speaker: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&RenderCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().clone()
    }

    pub fn local_levels(&self) -> Vec<AudioLevelSample> {
        self.local_levels.lock().clone()
    }

    pub fn remote_levels(&self) -> Vec<(String, AudioLevelSample)> {
        self.remote_levels.lock().clone()
    }

    fn record(&self, call: RenderCall) {
        self.calls.lock().push(call);
    }
}

impl MediaRenderer for RecordingRenderer {
    fn attach_local(&self, track: &Arc<dyn MediaTrack>) {
        self.record(RenderCall::AttachLocal(track.track_id()));
    }

    fn attach_remote(&self, track: &Arc<dyn MediaTrack>) {
        self.record(RenderCall::AttachRemote(track.track_id()));
    }

    fn detach_remote(&self, track: &Arc<dyn MediaTrack>) {
        self.record(RenderCall::DetachRemote(track.track_id()));
    }

    fn attach_share(&self, track: &Arc<dyn MediaTrack>) {
        self.record(RenderCall::AttachShare(track.track_id()));
    }

    fn detach_share(&self, track: &Arc<dyn MediaTrack>) {
        self.record(RenderCall::DetachShare(track.track_id()));
    }

    fn on_local_audio_level(&self, sample: AudioLevelSample) {
        self.local_levels.lock().push(sample);
    }

    fn wants_remote_levels(&self) -> bool {
        self.wants_remote_levels
    }

    fn on_remote_audio_level(&self, participant_id: &str, sample: AudioLevelSample) {
        self.remote_levels
            .lock()
            .push((participant_id.to_string(), sample));
    }

    fn on_remote_video_mute_changed(&self, participant_id: &str, muted: bool) {
        self.record(RenderCall::RemoteVideoMute(participant_id.to_string(), muted));
    }

    fn wants_dominant_speaker(&self) -> bool {
        self.wants_dominant_speaker
    }

    fn on_dominant(&self, participant_id: Option<&str>) {
        self.record(RenderCall::Dominant(participant_id.map(str::to_string)));
    }

    fn set_status(&self, status: &str) {
        self.statuses.lock().push(status.to_string());
    }
}

/// Audio graph producing a constant square wave of the given amplitude
pub struct FakeAudioGraph {
    amplitude: Option<u8>,
    created: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl FakeAudioGraph {
    pub fn with_amplitude(amplitude: u8) -> Arc<Self> {
        Arc::new(Self {
            amplitude: Some(amplitude),
            created: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A platform without audio analysis
    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            amplitude: None,
            created: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AudioGraphFactory for FakeAudioGraph {
    fn create_analyser(
        &self,
        _source: &MediaHandle,
        _fft_size: usize,
        _smoothing: f64,
    ) -> Result<Box<dyn AudioAnalyser>, AudioGraphError> {
        let Some(amplitude) = self.amplitude else {
            return Err(AudioGraphError::Unsupported);
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SquareWave {
            amplitude,
            closed: self.closed.clone(),
            is_closed: false,
        }))
    }
}

struct SquareWave {
    amplitude: u8,
    closed: Arc<AtomicUsize>,
    is_closed: bool,
}

impl AudioAnalyser for SquareWave {
    fn read_time_domain(&mut self, buffer: &mut [u8]) {
        for (i, sample) in buffer.iter_mut().enumerate() {
            *sample = if i % 2 == 0 {
                128u8.saturating_add(self.amplitude)
            } else {
                128u8.saturating_sub(self.amplitude)
            };
        }
    }

    fn close(&mut self) {
        if !self.is_closed {
            self.is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
