//! Remote side of a conference
//!
//! Transport events are wired into a deduplicating track registry which
//! drives the rendering layer.

pub mod registry;
pub mod renderer;
pub mod wiring;

pub use registry::TrackRegistry;
pub use renderer::MediaRenderer;
pub use wiring::ConferenceEventWiring;
