//! Coordinator configuration
//!
//! Every field has a default so a partial JSON document (or none at all)
//! yields a working configuration.

use crate::capture::traits::FrameRateRange;
use crate::utils::error::{CoordinatorError, CoordinatorResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    pub capture: CaptureSettings,
    pub audio: AudioSettings,
    pub session: SessionSettings,
}

impl CoordinatorConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> CoordinatorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json(&content)?;
        tracing::debug!("Loaded coordinator config from {:?}", path);
        Ok(config)
    }

    pub fn from_json(content: &str) -> CoordinatorResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CoordinatorResult<()> {
        let fft = self.audio.fft_size;
        if fft < 32 || !fft.is_power_of_two() {
            return Err(CoordinatorError::Config(format!(
                "fftSize must be a power of two >= 32, got {fft}"
            )));
        }
        if !(0.0..1.0).contains(&self.audio.smoothing) {
            return Err(CoordinatorError::Config(format!(
                "smoothing must be in [0, 1), got {}",
                self.audio.smoothing
            )));
        }
        let rate = self.capture.desktop_frame_rate;
        if rate.min == 0 || rate.min > rate.max {
            return Err(CoordinatorError::Config(format!(
                "invalid desktop frame rate {}..{}",
                rate.min, rate.max
            )));
        }
        Ok(())
    }
}

/// Local capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Requested camera resolution (vertical lines)
    pub video_resolution: u32,

    pub desktop_frame_rate: FrameRateRange,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            video_resolution: 720,
            desktop_frame_rate: FrameRateRange { min: 5, max: 30 },
        }
    }
}

/// Speaking-level analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    pub fft_size: usize,
    pub smoothing: f64,

    /// Level above which a participant counts as speaking
    pub speaking_threshold: f32,

    /// Sampling period of the level loop
    pub frame_interval_ms: u64,

    pub ready_retry: ReadyRetryPolicy,
}

impl AudioSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Samples delivered per analyser read
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            speaking_threshold: 0.12,
            frame_interval_ms: 16,
            ready_retry: ReadyRetryPolicy::default(),
        }
    }
}

/// Retry policy for tracks whose media stream is not queryable yet
///
/// A freshly created track may not expose its stream immediately. The
/// monitor polls up to `max_retries` more times, waiting
/// `initial_delay_ms * backoff_factor^n` (capped at `max_delay_ms`) between
/// attempts, and then gives up without reporting an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadyRetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl ReadyRetryPolicy {
    /// Delay before retry number `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let millis = (self.initial_delay_ms as f64 * factor).round() as u64;
        Duration::from_millis(millis.min(self.max_delay_ms))
    }
}

impl Default for ReadyRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_delay_ms: 50,
            backoff_factor: 1.5,
            max_delay_ms: 400,
        }
    }
}

/// Server-side session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Applied when a session is created without an explicit limit
    pub default_max_participants: Option<u32>,

    /// Events kept per live session for reporting
    pub recent_event_capacity: usize,

    /// Capacity of the broadcast channel for session events
    pub event_channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_max_participants: None,
            recent_event_capacity: 64,
            event_channel_capacity: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_analyser_constants() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.audio.fft_size, 256);
        assert_eq!(config.audio.frequency_bin_count(), 128);
        assert!((config.audio.smoothing - 0.8).abs() < f64::EPSILON);
        assert!((config.audio.speaking_threshold - 0.12).abs() < f32::EPSILON);
        assert_eq!(config.capture.video_resolution, 720);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config =
            CoordinatorConfig::from_json(r#"{"audio": {"speakingThreshold": 0.2}}"#).unwrap();
        assert!((config.audio.speaking_threshold - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.audio.fft_size, 256);
        assert_eq!(config.session.recent_event_capacity, 64);
    }

    #[test]
    fn test_rejects_invalid_fft_size() {
        let result = CoordinatorConfig::from_json(r#"{"audio": {"fftSize": 300}}"#);
        assert!(matches!(result, Err(CoordinatorError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coordinator.json");
        std::fs::write(
            &path,
            r#"{"capture": {"videoResolution": 1080, "desktopFrameRate": {"min": 10, "max": 15}}}"#,
        )
        .unwrap();

        let config = CoordinatorConfig::load(&path).unwrap();
        assert_eq!(config.capture.video_resolution, 1080);
        assert_eq!(config.capture.desktop_frame_rate.max, 15);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = CoordinatorConfig::load(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(CoordinatorError::Io(_))));
    }

    #[test]
    fn test_retry_delays_grow_and_cap() {
        let policy = ReadyRetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(75));
        assert!(policy.delay_for(3) > policy.delay_for(2));
        assert_eq!(policy.delay_for(10), Duration::from_millis(400));
    }
}
