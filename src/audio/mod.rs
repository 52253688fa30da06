//! Speaking-level detection
//!
//! Derives a live 0..1 level and a speaking flag from microphone and remote
//! audio tracks.

pub mod level;
pub mod monitor;
pub mod remote;

pub use level::AudioLevelSample;
pub use monitor::{AudioAnalyser, AudioGraphError, AudioGraphFactory, AudioLevelMonitor, LevelSink};
pub use remote::RemoteLevelMonitors;
