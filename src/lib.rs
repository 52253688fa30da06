//! Conference Coordinator - real-time conference orchestration.
//!
//! Client side, this crate manages local capture, deduplicates remote tracks
//! and derives speaking levels on top of an injected WebRTC transport.
//! Server side, it enforces the meeting session, participant and recording
//! lifecycle a signaling backend owns.

pub mod audio;
pub mod capture;
pub mod client;
pub mod conference;
pub mod config;
pub mod session;
pub mod utils;

#[cfg(test)]
mod testing;

pub use client::{ConferenceSession, ConnectionStatus};
pub use config::CoordinatorConfig;
pub use session::SessionCoordinator;
pub use utils::error::{CoordinatorError, CoordinatorResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Does nothing if a subscriber is
/// already installed.
pub fn init_tracing() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conference_coordinator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Conference coordinator v{}", env!("CARGO_PKG_VERSION"));
    }
}
