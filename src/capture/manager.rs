//! Local media capture
//!
//! Owns the local camera, microphone and screen-share tracks. Device
//! acquisition failures never escape as errors; they are reported to the
//! renderer as a status and the operation returns `false`. Transport
//! failures while publishing a track are propagated.

use super::track::{Track, TrackId, TrackKind};
use super::traits::{
    CaptureDevice, Conference, DeviceError, MediaTrack, MediaTransportProvider, TrackRequest,
    TransportError,
};
use crate::audio::level::AudioLevelSample;
use crate::audio::monitor::{AudioGraphFactory, AudioLevelMonitor, LevelSink};
use crate::conference::renderer::MediaRenderer;
use crate::config::{CaptureSettings, CoordinatorConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Requested local devices for a join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalAvOptions {
    pub cam_id: Option<String>,
    pub mic_id: Option<String>,
    pub cam_on: bool,
    pub mic_on: bool,
}

impl Default for LocalAvOptions {
    fn default() -> Self {
        Self {
            cam_id: None,
            mic_id: None,
            cam_on: true,
            mic_on: true,
        }
    }
}

/// Outcome of the last capture operation, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Joined,
    DeviceError(DeviceError),
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStatus::Joined => f.write_str("joined room"),
            CaptureStatus::DeviceError(e) => write!(f, "device error: {e}"),
        }
    }
}

/// Snapshot of the held local tracks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTracks {
    pub video: Option<Track>,
    pub audio: Option<Track>,
    pub screen: Option<Track>,
}

/// Manages local camera, microphone and screen capture
pub struct MediaCaptureManager {
    provider: Arc<dyn MediaTransportProvider>,
    renderer: Arc<dyn MediaRenderer>,
    settings: CaptureSettings,

    video: Option<Arc<dyn MediaTrack>>,
    audio: Option<Arc<dyn MediaTrack>>,
    screen: Option<Arc<dyn MediaTrack>>,

    /// Local tracks currently added to the conference
    published: HashSet<TrackId>,

    /// Selected devices, reused when a track is created lazily
    cam_id: Option<String>,
    mic_id: Option<String>,

    mic_monitor: AudioLevelMonitor,
    last_status: Option<CaptureStatus>,
}

impl MediaCaptureManager {
    pub fn new(
        provider: Arc<dyn MediaTransportProvider>,
        renderer: Arc<dyn MediaRenderer>,
        audio_graph: Arc<dyn AudioGraphFactory>,
        config: &CoordinatorConfig,
    ) -> Self {
        let level_renderer = renderer.clone();
        let sink: LevelSink =
            Arc::new(move |sample: AudioLevelSample| level_renderer.on_local_audio_level(sample));

        Self {
            provider,
            renderer,
            settings: config.capture.clone(),
            video: None,
            audio: None,
            screen: None,
            published: HashSet::new(),
            cam_id: None,
            mic_id: None,
            mic_monitor: AudioLevelMonitor::new(audio_graph, config.audio.clone(), sink),
            last_status: None,
        }
    }

    pub fn status(&self) -> Option<&CaptureStatus> {
        self.last_status.as_ref()
    }

    pub fn is_mic_monitored(&self) -> bool {
        self.mic_monitor.is_running()
    }

    /// Acquire the requested local devices and publish them.
    ///
    /// Devices already held are reused (and published if they were created
    /// before joining); a device requested off is not acquired at all. The
    /// requested mute state is applied to whatever is held afterwards.
    pub async fn add_local_av(
        &mut self,
        conference: &dyn Conference,
        options: LocalAvOptions,
    ) -> Result<CaptureStatus, TransportError> {
        if options.cam_id.is_some() {
            self.cam_id = options.cam_id.clone();
        }
        if options.mic_id.is_some() {
            self.mic_id = options.mic_id.clone();
        }

        let mut devices = Vec::new();
        if options.cam_on && self.video.is_none() {
            devices.push(CaptureDevice::Video);
        }
        if options.mic_on && self.audio.is_none() {
            devices.push(CaptureDevice::Audio);
        }

        if !devices.is_empty() {
            tracing::info!("Acquiring local devices: {:?}", devices);
            let tracks = match self.provider.create_local_tracks(&self.request(devices)).await {
                Ok(tracks) => tracks,
                Err(e) => return Ok(self.report_device_error(e)),
            };

            for track in tracks {
                match track.kind() {
                    TrackKind::Video if self.video.is_none() => {
                        self.renderer.attach_local(&track);
                        self.video = Some(track);
                    }
                    TrackKind::Audio if self.audio.is_none() => {
                        self.audio = Some(track);
                    }
                    kind => {
                        tracing::debug!("Discarding unrequested local {} track", kind);
                        dispose_quietly(&track).await;
                    }
                }
            }
        }

        for track in [self.video.clone(), self.audio.clone()].into_iter().flatten() {
            if !self.published.contains(&track.track_id()) {
                self.publish(conference, &track).await?;
            }
        }

        if let Some(video) = &self.video {
            apply_mute(video, !options.cam_on).await;
        }
        if let Some(audio) = &self.audio {
            apply_mute(audio, !options.mic_on).await;
        }
        self.sync_mic_monitor();

        Ok(self.report(CaptureStatus::Joined))
    }

    /// Turn the camera on or off.
    ///
    /// Creates and publishes the camera track on first use. Returns whether
    /// the camera is on afterwards.
    pub async fn toggle_video(&mut self, conference: &dyn Conference) -> Result<bool, TransportError> {
        if let Some(video) = self.video.clone() {
            self.ensure_published(conference, &video).await?;
            apply_mute(&video, !video.is_muted()).await;
            return Ok(!video.is_muted());
        }

        let track = match self.create_track(CaptureDevice::Video).await {
            Ok(track) => track,
            Err(e) => {
                self.report_device_error(e);
                return Ok(false);
            }
        };

        if let Err(e) = self.publish(conference, &track).await {
            dispose_quietly(&track).await;
            return Err(e);
        }
        self.renderer.attach_local(&track);
        self.video = Some(track);
        Ok(true)
    }

    /// Turn the microphone on or off, creating it on first use
    pub async fn toggle_audio(&mut self, conference: &dyn Conference) -> Result<bool, TransportError> {
        if let Some(audio) = self.audio.clone() {
            self.ensure_published(conference, &audio).await?;
            apply_mute(&audio, !audio.is_muted()).await;
            self.sync_mic_monitor();
            return Ok(!audio.is_muted());
        }

        let track = match self.create_track(CaptureDevice::Audio).await {
            Ok(track) => track,
            Err(e) => {
                self.report_device_error(e);
                return Ok(false);
            }
        };

        if let Err(e) = self.publish(conference, &track).await {
            dispose_quietly(&track).await;
            return Err(e);
        }
        self.audio = Some(track);
        self.sync_mic_monitor();
        Ok(true)
    }

    /// Start or stop sharing the screen. Returns whether a share is active.
    pub async fn toggle_screen_share(
        &mut self,
        conference: &dyn Conference,
    ) -> Result<bool, TransportError> {
        if let Some(screen) = self.screen.take() {
            tracing::info!("Stopping screen share");
            self.renderer.detach_share(&screen);
            self.published.remove(&screen.track_id());
            remove_quietly(conference, &screen).await;
            dispose_quietly(&screen).await;
            return Ok(false);
        }

        let track = match self.create_track(CaptureDevice::Desktop).await {
            Ok(track) => track,
            Err(e) => {
                self.report_device_error(e);
                return Ok(false);
            }
        };

        if let Err(e) = self.publish(conference, &track).await {
            dispose_quietly(&track).await;
            return Err(e);
        }

        tracing::info!("Screen share started");
        self.renderer.attach_share(&track);
        self.screen = Some(track);
        Ok(true)
    }

    /// Swap the camera for `device_id` without dropping the published track.
    ///
    /// The old camera is released only once the transport accepted the new
    /// one. Returns `false` if the new device could not be opened.
    pub async fn switch_camera(
        &mut self,
        device_id: &str,
        conference: Option<&dyn Conference>,
    ) -> Result<bool, TransportError> {
        self.cam_id = Some(device_id.to_string());

        let new = match self.create_track(CaptureDevice::Video).await {
            Ok(track) => track,
            Err(e) => {
                self.report_device_error(e);
                return Ok(false);
            }
        };
        self.renderer.attach_local(&new);

        let old = self.video.clone();
        if let Some(old) = &old {
            apply_mute(&new, old.is_muted()).await;
        }

        if let Err(e) = self.publish_replacement(conference, old.as_ref(), &new).await {
            tracing::warn!("Camera switch to {} failed: {}", device_id, e);
            dispose_quietly(&new).await;
            if let Some(old) = &old {
                self.renderer.attach_local(old);
            }
            return Err(e);
        }

        self.video = Some(new);
        if let Some(old) = old {
            dispose_quietly(&old).await;
        }
        tracing::info!("Switched camera to {}", device_id);
        Ok(true)
    }

    /// Swap the microphone for `device_id`, moving the level monitor with it
    pub async fn switch_microphone(
        &mut self,
        device_id: &str,
        conference: Option<&dyn Conference>,
    ) -> Result<bool, TransportError> {
        self.mic_id = Some(device_id.to_string());

        let new = match self.create_track(CaptureDevice::Audio).await {
            Ok(track) => track,
            Err(e) => {
                self.report_device_error(e);
                return Ok(false);
            }
        };

        let old = self.audio.clone();
        if let Some(old) = &old {
            apply_mute(&new, old.is_muted()).await;
        }

        if let Err(e) = self.publish_replacement(conference, old.as_ref(), &new).await {
            tracing::warn!("Microphone switch to {} failed: {}", device_id, e);
            dispose_quietly(&new).await;
            return Err(e);
        }

        self.mic_monitor.stop_vu();
        self.audio = Some(new);
        if let Some(old) = old {
            dispose_quietly(&old).await;
        }
        self.sync_mic_monitor();
        tracing::info!("Switched microphone to {}", device_id);
        Ok(true)
    }

    /// Mute or unmute the camera. Returns whether a camera track is held.
    pub async fn set_video_muted(&mut self, muted: bool) -> bool {
        match &self.video {
            Some(video) => {
                apply_mute(video, muted).await;
                true
            }
            None => false,
        }
    }

    /// Mute or unmute the microphone. Returns whether a microphone track is held.
    pub async fn set_audio_muted(&mut self, muted: bool) -> bool {
        let Some(audio) = &self.audio else {
            return false;
        };
        apply_mute(audio, muted).await;
        self.sync_mic_monitor();
        true
    }

    pub fn local_tracks(&self) -> LocalTracks {
        LocalTracks {
            video: self.video.as_ref().map(|t| Track::snapshot(t.as_ref())),
            audio: self.audio.as_ref().map(|t| Track::snapshot(t.as_ref())),
            screen: self.screen.as_ref().map(|t| Track::snapshot(t.as_ref())),
        }
    }

    /// Release every local track.
    ///
    /// Screen, camera and microphone are removed from `conference` (when
    /// given) and disposed in that order. Every step is best-effort.
    /// Returns how many tracks were released.
    pub async fn dispose_local(&mut self, conference: Option<&dyn Conference>) -> usize {
        self.mic_monitor.stop_vu();

        let mut released = 0;
        if let Some(screen) = self.screen.take() {
            self.renderer.detach_share(&screen);
            release(conference, &screen).await;
            released += 1;
        }
        for track in [self.video.take(), self.audio.take()].into_iter().flatten() {
            release(conference, &track).await;
            released += 1;
        }

        self.published.clear();
        if released > 0 {
            tracing::info!("Released {} local tracks", released);
        }
        released
    }

    /// Run the level monitor only while an unmuted microphone is held
    fn sync_mic_monitor(&mut self) {
        match &self.audio {
            Some(audio) if !audio.is_muted() => {
                if !self.mic_monitor.is_running() {
                    self.mic_monitor.wire_mic_vu(audio.clone());
                }
            }
            _ => {
                self.mic_monitor.stop_vu();
            }
        }
    }

    /// Publish a held track that never made it onto the conference
    async fn ensure_published(
        &mut self,
        conference: &dyn Conference,
        track: &Arc<dyn MediaTrack>,
    ) -> Result<(), TransportError> {
        if self.published.contains(&track.track_id()) {
            return Ok(());
        }
        tracing::debug!("Publishing held track {}", track.track_id());
        self.publish(conference, track).await
    }

    async fn publish(
        &mut self,
        conference: &dyn Conference,
        track: &Arc<dyn MediaTrack>,
    ) -> Result<(), TransportError> {
        conference.add_track(track.clone()).await?;
        self.published.insert(track.track_id());
        Ok(())
    }

    /// Publish `new` in place of `old`.
    ///
    /// A published old track is swapped atomically by the transport;
    /// otherwise the new track is simply added. Without a conference there
    /// is nothing to publish.
    async fn publish_replacement(
        &mut self,
        conference: Option<&dyn Conference>,
        old: Option<&Arc<dyn MediaTrack>>,
        new: &Arc<dyn MediaTrack>,
    ) -> Result<(), TransportError> {
        let Some(conference) = conference else {
            return Ok(());
        };

        match old.filter(|old| self.published.contains(&old.track_id())) {
            Some(old) => {
                conference.replace_track(old.clone(), new.clone()).await?;
                self.published.remove(&old.track_id());
            }
            None => conference.add_track(new.clone()).await?,
        }
        self.published.insert(new.track_id());
        Ok(())
    }

    fn request(&self, devices: Vec<CaptureDevice>) -> TrackRequest {
        let mut request = TrackRequest::new(devices.clone());
        if devices.contains(&CaptureDevice::Video) {
            request = request
                .camera(self.cam_id.clone())
                .resolution(self.settings.video_resolution);
        }
        if devices.contains(&CaptureDevice::Audio) {
            request = request.microphone(self.mic_id.clone());
        }
        if devices.contains(&CaptureDevice::Desktop) {
            request = request.desktop_frame_rate(self.settings.desktop_frame_rate);
        }
        request
    }

    /// Create a single local track for `device`
    async fn create_track(&self, device: CaptureDevice) -> Result<Arc<dyn MediaTrack>, DeviceError> {
        let tracks = self.provider.create_local_tracks(&self.request(vec![device])).await?;

        let wanted = device.track_kind();
        let mut found = None;
        for track in tracks {
            if found.is_none() && track.kind() == wanted {
                found = Some(track);
            } else {
                dispose_quietly(&track).await;
            }
        }

        found.ok_or_else(|| DeviceError::NotFound(format!("no {wanted} track was created")))
    }

    fn report_device_error(&mut self, error: DeviceError) -> CaptureStatus {
        tracing::warn!("Local capture failed: {}", error);
        self.report(CaptureStatus::DeviceError(error))
    }

    fn report(&mut self, status: CaptureStatus) -> CaptureStatus {
        self.renderer.set_status(&status.to_string());
        self.last_status = Some(status.clone());
        status
    }
}

async fn apply_mute(track: &Arc<dyn MediaTrack>, muted: bool) {
    if track.is_muted() == muted {
        return;
    }
    let result = if muted {
        track.mute().await
    } else {
        track.unmute().await
    };
    if let Err(e) = result {
        tracing::debug!("Failed to set muted={} on {}: {}", muted, track.track_id(), e);
    }
}

async fn remove_quietly(conference: &dyn Conference, track: &Arc<dyn MediaTrack>) {
    if let Err(e) = conference.remove_track(track.clone()).await {
        tracing::debug!("Failed to remove {}: {}", track.track_id(), e);
    }
}

async fn dispose_quietly(track: &Arc<dyn MediaTrack>) {
    if let Err(e) = track.dispose().await {
        tracing::warn!("Failed to dispose {}: {}", track.track_id(), e);
    }
}

async fn release(conference: Option<&dyn Conference>, track: &Arc<dyn MediaTrack>) {
    if let Some(conference) = conference {
        remove_quietly(conference, track).await;
    }
    dispose_quietly(track).await;
}
