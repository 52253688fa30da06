//! Audio level monitor
//!
//! Builds a short-lived analysis graph on top of an audio track and samples
//! it on a fixed frame interval. One monitor serves one logical slot (the
//! local microphone, or one remote participant); wiring a new track always
//! stops the previous one first.

use super::level::{self, AudioLevelSample};
use crate::capture::track::MediaType;
use crate::capture::traits::{MediaHandle, MediaTrack};
use crate::config::{AudioSettings, ReadyRetryPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Audio graph errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioGraphError {
    #[error("Audio analysis is not supported on this platform")]
    Unsupported,

    #[error("Failed to build audio graph: {0}")]
    Creation(String),
}

/// A source connected to an analyser node
pub trait AudioAnalyser: Send {
    /// Fill `buffer` with the latest unsigned 8-bit time-domain samples
    fn read_time_domain(&mut self, buffer: &mut [u8]);

    /// Disconnect the nodes and close the underlying context
    fn close(&mut self);
}

/// Builds analysis graphs for media streams
pub trait AudioGraphFactory: Send + Sync {
    fn create_analyser(
        &self,
        source: &MediaHandle,
        fft_size: usize,
        smoothing: f64,
    ) -> Result<Box<dyn AudioAnalyser>, AudioGraphError>;
}

/// Receives every computed sample
pub type LevelSink = Arc<dyn Fn(AudioLevelSample) + Send + Sync>;

#[derive(Default)]
struct GraphSlot {
    analyser: Option<Box<dyn AudioAnalyser>>,
    stopped: bool,
}

struct RunningMonitor {
    task: JoinHandle<()>,
    graph: Arc<Mutex<GraphSlot>>,
}

/// Speaking-level monitor for a single audio slot
pub struct AudioLevelMonitor {
    factory: Arc<dyn AudioGraphFactory>,
    settings: AudioSettings,
    sink: LevelSink,
    runtime: Option<Handle>,
    running: Option<RunningMonitor>,
}

impl AudioLevelMonitor {
    /// Create a monitor.
    ///
    /// The monitor may be built outside a tokio runtime; the runtime is
    /// looked up again every time a track is wired.
    pub fn new(factory: Arc<dyn AudioGraphFactory>, settings: AudioSettings, sink: LevelSink) -> Self {
        Self {
            factory,
            settings,
            sink,
            runtime: Handle::try_current().ok(),
            running: None,
        }
    }

    /// Runtime used when `wire_mic_vu` is called from a thread that is not
    /// inside one, such as a transport callback thread
    pub fn bind_runtime(&mut self, runtime: Handle) {
        self.runtime = Some(runtime);
    }

    /// Whether a monitor is wired (it may still be waiting for the stream)
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start monitoring `track`, replacing any previous monitor.
    ///
    /// Non-audio tracks are ignored. If the track never exposes its stream
    /// within the retry policy, or the graph cannot be built, the monitor
    /// quietly produces nothing.
    pub fn wire_mic_vu(&mut self, track: Arc<dyn MediaTrack>) {
        self.stop_vu();

        if track.media_type() != MediaType::Audio {
            return;
        }
        let Some(runtime) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            tracing::warn!(
                "No async runtime available, speaking level for {} is disabled",
                track.track_id()
            );
            return;
        };
        self.runtime = Some(runtime.clone());

        let graph = Arc::new(Mutex::new(GraphSlot::default()));
        let task = runtime.spawn(run_monitor(
            track,
            self.factory.clone(),
            self.settings.clone(),
            self.sink.clone(),
            graph.clone(),
        ));

        self.running = Some(RunningMonitor { task, graph });
    }

    /// Stop the current monitor.
    ///
    /// Returns whether a monitor was running. Calling it again is a no-op.
    pub fn stop_vu(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };

        running.task.abort();

        // The reset sample is pushed under the slot lock so no frame
        // computed before the stop can land after it.
        let mut slot = running.graph.lock();
        slot.stopped = true;
        if let Some(mut analyser) = slot.analyser.take() {
            analyser.close();
        }
        (self.sink)(AudioLevelSample::silent());
        true
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        self.stop_vu();
    }
}

/// Poll the track for its stream using the retry policy
async fn resolve_media_handle(track: &dyn MediaTrack, policy: &ReadyRetryPolicy) -> Option<MediaHandle> {
    let mut attempt = 0;
    loop {
        if let Some(handle) = track.media_handle() {
            return Some(handle);
        }
        if attempt >= policy.max_retries {
            return None;
        }
        tokio::time::sleep(policy.delay_for(attempt)).await;
        attempt += 1;
    }
}

async fn run_monitor(
    track: Arc<dyn MediaTrack>,
    factory: Arc<dyn AudioGraphFactory>,
    settings: AudioSettings,
    sink: LevelSink,
    graph: Arc<Mutex<GraphSlot>>,
) {
    let Some(handle) = resolve_media_handle(track.as_ref(), &settings.ready_retry).await else {
        tracing::debug!("Audio stream for {} never became ready", track.track_id());
        return;
    };

    let mut analyser = match factory.create_analyser(&handle, settings.fft_size, settings.smoothing) {
        Ok(analyser) => analyser,
        Err(e) => {
            tracing::warn!("Speaking indicator disabled for {}: {}", track.track_id(), e);
            return;
        }
    };

    {
        let mut slot = graph.lock();
        if slot.stopped {
            analyser.close();
            return;
        }
        slot.analyser = Some(analyser);
    }

    tracing::debug!("Audio level monitor running for {}", track.track_id());

    let mut buffer = vec![0u8; settings.frequency_bin_count()];
    let mut ticker = tokio::time::interval(settings.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let mut slot = graph.lock();
        if slot.stopped {
            return;
        }
        let Some(analyser) = slot.analyser.as_mut() else {
            return;
        };
        analyser.read_time_domain(&mut buffer);
        sink(level::sample_from_time_domain(&buffer, settings.speaking_threshold));
    }
}
