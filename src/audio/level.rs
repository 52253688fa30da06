//! Level computation from time-domain samples

use serde::{Deserialize, Serialize};

/// Midpoint of unsigned 8-bit PCM
const SILENCE: f32 = 128.0;

/// One speaking-level reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioLevelSample {
    /// Normalized level in 0.0..=1.0
    pub level: f32,
    pub speaking: bool,
}

impl AudioLevelSample {
    pub fn silent() -> Self {
        Self {
            level: 0.0,
            speaking: false,
        }
    }

    /// Build a sample from an already-normalized level
    pub fn from_level(level: f32, threshold: f32) -> Self {
        let level = level.clamp(0.0, 1.0);
        Self {
            level,
            speaking: level > threshold,
        }
    }
}

/// Root-mean-square of unsigned 8-bit samples, centered and scaled to -1..1
pub fn rms(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples
        .iter()
        .map(|&b| {
            let v = (b as f32 - SILENCE) / SILENCE;
            v * v
        })
        .sum();

    (sum / samples.len() as f32).sqrt()
}

/// Compute a sample from one analyser read.
///
/// Speech rarely exceeds an RMS of 0.5, so the level doubles it and clamps.
pub fn sample_from_time_domain(samples: &[u8], threshold: f32) -> AudioLevelSample {
    AudioLevelSample::from_level((rms(samples) * 2.0).min(1.0), threshold)
}
