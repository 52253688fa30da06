//! Client conference session
//!
//! One [`ConferenceSession`] per join: it connects through the injected
//! transport provider, wires conference events, publishes local media and
//! tears everything down again in a fixed order.

use crate::audio::monitor::AudioGraphFactory;
use crate::capture::gate::{ToggleGate, ToggleGuard};
use crate::capture::manager::{CaptureStatus, LocalAvOptions, LocalTracks, MediaCaptureManager};
use crate::capture::track::TrackKind;
use crate::capture::traits::{
    Conference, ConferenceOptions, JoinCredentials, MediaTransportProvider, TransportConnection,
    TransportError,
};
use crate::conference::renderer::MediaRenderer;
use crate::conference::wiring::ConferenceEventWiring;
use crate::config::CoordinatorConfig;
use crate::utils::error::{CoordinatorError, CoordinatorResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Connection state of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Joined,
    Error(String),
}

struct Connected {
    connection: Arc<dyn TransportConnection>,
    conference: Arc<dyn Conference>,
}

/// Everything a client holds while in a conference
pub struct ConferenceSession {
    provider: Arc<dyn MediaTransportProvider>,
    renderer: Arc<dyn MediaRenderer>,
    capture: Arc<Mutex<MediaCaptureManager>>,
    wiring: ConferenceEventWiring,
    gate: ToggleGate,
    connected: parking_lot::Mutex<Option<Connected>>,
    status: parking_lot::Mutex<ConnectionStatus>,
}

impl ConferenceSession {
    pub fn new(
        provider: Arc<dyn MediaTransportProvider>,
        renderer: Arc<dyn MediaRenderer>,
        audio_graph: Arc<dyn AudioGraphFactory>,
        config: &CoordinatorConfig,
    ) -> Self {
        let capture = MediaCaptureManager::new(
            provider.clone(),
            renderer.clone(),
            audio_graph.clone(),
            config,
        );
        let wiring = ConferenceEventWiring::new(renderer.clone(), audio_graph, config.audio.clone());

        Self {
            provider,
            renderer,
            capture: Arc::new(Mutex::new(capture)),
            wiring,
            gate: ToggleGate::new(),
            connected: parking_lot::Mutex::new(None),
            status: parking_lot::Mutex::new(ConnectionStatus::Idle),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.lock().is_some()
    }

    /// Gate used by toggle and switch operations; UIs poll it to disable
    /// controls while an operation is in flight
    pub fn gate(&self) -> &ToggleGate {
        &self.gate
    }

    pub fn wiring(&self) -> &ConferenceEventWiring {
        &self.wiring
    }

    /// Connect, join the room and publish local media.
    ///
    /// Connection and join failures are returned. Device failures are not:
    /// they show up in the returned [`CaptureStatus`].
    pub async fn join(
        &self,
        credentials: &JoinCredentials,
        options: LocalAvOptions,
    ) -> CoordinatorResult<CaptureStatus> {
        if self.is_connected() {
            tracing::info!("Already in a conference, leaving before rejoining");
            self.leave().await;
        }

        self.set_status(ConnectionStatus::Connecting);
        tracing::info!("Connecting to {}", credentials.service_url());

        let connection = match self.provider.connect(credentials).await {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail(e)),
        };

        let conference =
            match connection.init_conference(&credentials.room_id, &ConferenceOptions::default()) {
                Ok(conference) => conference,
                Err(e) => {
                    disconnect_quietly(connection.as_ref()).await;
                    return Err(self.fail(e));
                }
            };

        self.wiring.wire(&conference);

        if let Err(e) = conference.join().await {
            self.wiring.unwire(conference.as_ref());
            disconnect_quietly(connection.as_ref()).await;
            return Err(self.fail(e));
        }

        *self.connected.lock() = Some(Connected {
            connection,
            conference: conference.clone(),
        });
        self.set_status(ConnectionStatus::Joined);
        tracing::info!("Joined room {}", credentials.room_id);

        let status = self
            .capture
            .lock()
            .await
            .add_local_av(conference.as_ref(), options)
            .await?;
        Ok(status)
    }

    pub async fn toggle_video(&self) -> CoordinatorResult<bool> {
        let _guard = self.begin(TrackKind::Video)?;
        let conference = self.conference()?;
        let on = self.capture.lock().await.toggle_video(conference.as_ref()).await?;
        Ok(on)
    }

    pub async fn toggle_audio(&self) -> CoordinatorResult<bool> {
        let _guard = self.begin(TrackKind::Audio)?;
        let conference = self.conference()?;
        let on = self.capture.lock().await.toggle_audio(conference.as_ref()).await?;
        Ok(on)
    }

    pub async fn toggle_screen_share(&self) -> CoordinatorResult<bool> {
        let _guard = self.begin(TrackKind::Screen)?;
        let conference = self.conference()?;
        let sharing = self
            .capture
            .lock()
            .await
            .toggle_screen_share(conference.as_ref())
            .await?;
        Ok(sharing)
    }

    /// Switch cameras. Works before joining too; the new track is then
    /// published on join.
    pub async fn switch_camera(&self, device_id: &str) -> CoordinatorResult<bool> {
        let _guard = self.begin(TrackKind::Video)?;
        let conference = self.conference().ok();
        let switched = self
            .capture
            .lock()
            .await
            .switch_camera(device_id, conference.as_deref())
            .await?;
        Ok(switched)
    }

    pub async fn switch_microphone(&self, device_id: &str) -> CoordinatorResult<bool> {
        let _guard = self.begin(TrackKind::Audio)?;
        let conference = self.conference().ok();
        let switched = self
            .capture
            .lock()
            .await
            .switch_microphone(device_id, conference.as_deref())
            .await?;
        Ok(switched)
    }

    pub async fn set_video_muted(&self, muted: bool) -> bool {
        self.capture.lock().await.set_video_muted(muted).await
    }

    pub async fn set_audio_muted(&self, muted: bool) -> bool {
        self.capture.lock().await.set_audio_muted(muted).await
    }

    pub async fn local_tracks(&self) -> LocalTracks {
        self.capture.lock().await.local_tracks()
    }

    /// Tear the session down.
    ///
    /// Stops level monitors, releases local media, unwires events, leaves
    /// the conference and disconnects, in that order. Every step is
    /// best-effort. Returns whether a conference was joined.
    pub async fn leave(&self) -> bool {
        let connected = self.connected.lock().take();
        let conference = connected.as_ref().map(|c| c.conference.clone());

        let stopped = self.wiring.stop_remote_levels();
        if stopped > 0 {
            tracing::debug!("Stopped {} remote level monitors", stopped);
        }

        self.capture
            .lock()
            .await
            .dispose_local(conference.as_deref())
            .await;

        let Some(Connected {
            connection,
            conference,
        }) = connected
        else {
            self.set_status(ConnectionStatus::Idle);
            return false;
        };

        self.wiring.unwire(conference.as_ref());
        self.wiring.registry().clear();

        if let Err(e) = conference.leave().await {
            tracing::warn!("Failed to leave conference: {}", e);
        }
        disconnect_quietly(connection.as_ref()).await;

        self.set_status(ConnectionStatus::Idle);
        tracing::info!("Left conference");
        true
    }

    fn conference(&self) -> CoordinatorResult<Arc<dyn Conference>> {
        self.connected
            .lock()
            .as_ref()
            .map(|c| c.conference.clone())
            .ok_or(CoordinatorError::NotConnected)
    }

    fn begin(&self, kind: TrackKind) -> CoordinatorResult<ToggleGuard> {
        self.gate
            .try_begin(kind)
            .ok_or(CoordinatorError::ToggleInFlight(kind))
    }

    fn set_status(&self, status: ConnectionStatus) {
        let label = match &status {
            ConnectionStatus::Idle => "idle".to_string(),
            ConnectionStatus::Connecting => "connecting".to_string(),
            ConnectionStatus::Joined => "connected".to_string(),
            ConnectionStatus::Error(reason) => format!("connection failed: {reason}"),
        };
        self.renderer.set_status(&label);
        *self.status.lock() = status;
    }

    fn fail(&self, error: TransportError) -> CoordinatorError {
        tracing::error!("Conference join failed: {}", error);
        self.set_status(ConnectionStatus::Error(error.to_string()));
        CoordinatorError::Transport(error)
    }
}

async fn disconnect_quietly(connection: &dyn TransportConnection) {
    if let Err(e) = connection.disconnect().await {
        tracing::warn!("Failed to disconnect: {}", e);
    }
}
