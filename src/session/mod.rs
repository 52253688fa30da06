//! Server-side session lifecycle
//!
//! This module implements the state a signaling backend enforces:
//! - MeetingSession and Participant lifecycles
//! - Recording lifecycle, including external recorder callbacks
//! - SessionCoordinator as the single owner of that state

pub mod context;
pub mod coordinator;
pub mod state;

pub use context::SessionContext;
pub use coordinator::SessionCoordinator;
pub use state::{
    MeetingSession, Participant, ParticipantRole, ParticipantStatus, RecorderStatus,
    RecorderWebhook, Recording, RecordingStatus, SessionError, SessionEvent, SessionResult,
    SessionStats, SessionStatus,
};
