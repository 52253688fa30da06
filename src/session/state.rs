//! Session state definitions
//!
//! Meeting sessions, participants and recordings, with the transitions the
//! coordinator allows between their states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session and recording lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: RecordingStatus,
        to: RecordingStatus,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Lifecycle of a meeting session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Created, nobody has joined yet
    Waiting,
    Active,
    /// Terminal
    Ended,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    Host,
    Moderator,
    Participant,
    #[default]
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Joined,
    Left,
}

/// Lifecycle of a recording
///
/// `Pending` and `Recording` are the active states; at most one recording
/// per session may be in either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    Pending,
    Recording,
    Stopped,
    Processing,
    Completed,
    Failed,
}

impl RecordingStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RecordingStatus::Pending | RecordingStatus::Recording)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingStatus::Completed | RecordingStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RecordingStatus) -> bool {
        use RecordingStatus::*;
        matches!(
            (self, next),
            (Pending, Recording)
                | (Pending, Stopped)
                | (Pending, Failed)
                | (Recording, Stopped)
                | (Recording, Failed)
                | (Stopped, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

/// A meeting session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSession {
    pub id: String,
    pub room_id: String,
    pub host_user_id: String,

    /// Set when the host first joins
    pub host_participant_id: Option<String>,

    pub status: SessionStatus,
    pub locked: bool,
    pub max_participants: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub ended_by: Option<String>,
}

impl MeetingSession {
    pub fn new(room_id: &str, host_user_id: &str, max_participants: Option<u32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            host_user_id: host_user_id.to_string(),
            host_participant_id: None,
            status: SessionStatus::Waiting,
            locked: false,
            max_participants,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            ended_by: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }
}

/// A user's presence in a session
///
/// Immutable once `left_at` is set. A user who rejoins gets a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub kicked_by: Option<String>,
    pub kick_reason: Option<String>,
}

impl Participant {
    pub fn new(session_id: &str, user_id: &str, display_name: &str, role: ParticipantRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            role,
            status: ParticipantStatus::Joined,
            joined_at: Utc::now(),
            left_at: None,
            kicked_by: None,
            kick_reason: None,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.status == ParticipantStatus::Joined
    }

    /// Mark the participant as gone. No-op once left.
    pub fn mark_left(&mut self, at: DateTime<Utc>) {
        if self.is_joined() {
            self.status = ParticipantStatus::Left;
            self.left_at = Some(at);
        }
    }
}

/// A recording of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub session_id: String,

    /// Session key handed to the external recorder
    pub recorder_key: String,

    pub status: RecordingStatus,
    pub started_by: String,
    pub stopped_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,

    /// `stopped_at - started_at`
    pub duration_ms: Option<i64>,

    pub file_location: Option<String>,
    pub error: Option<String>,
}

impl Recording {
    pub fn new(session_id: &str, started_by: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            recorder_key: format!("rec-{}-{}", session_id, now.timestamp_millis()),
            status: RecordingStatus::Pending,
            started_by: started_by.to_string(),
            stopped_by: None,
            started_at: now,
            stopped_at: None,
            duration_ms: None,
            file_location: None,
            error: None,
        }
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&mut self, next: RecordingStatus) -> SessionResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Stop an active recording and fix its duration
    pub fn stop(&mut self, stopped_by: Option<&str>, at: DateTime<Utc>) -> SessionResult<()> {
        self.transition(RecordingStatus::Stopped)?;
        self.stopped_by = stopped_by.map(str::to_string);
        self.stopped_at = Some(at);
        self.duration_ms = Some((at - self.started_at).num_milliseconds().max(0));
        Ok(())
    }
}

/// Notifications about everything that happens to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionCreated {
        session_id: String,
        room_id: String,
    },
    SessionStarted {
        session_id: String,
    },
    SessionEnded {
        session_id: String,
        ended_by: Option<String>,
        auto_ended: bool,
    },
    ParticipantJoined {
        session_id: String,
        participant_id: String,
        user_id: String,
    },
    ParticipantLeft {
        session_id: String,
        participant_id: String,
        user_id: String,
    },
    ParticipantKicked {
        session_id: String,
        participant_id: String,
        user_id: String,
        kicked_by: String,
        reason: Option<String>,
    },
    SessionLocked {
        session_id: String,
        by: String,
    },
    SessionUnlocked {
        session_id: String,
        by: String,
    },
    RecordingStarted {
        session_id: String,
        recording_id: String,
        recorder_key: String,
    },
    RecordingStopped {
        session_id: String,
        recording_id: String,
        duration_ms: i64,
    },
    RecordingStatusChanged {
        session_id: String,
        recording_id: String,
        status: RecordingStatus,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::SessionCreated { session_id, .. }
            | SessionEvent::SessionStarted { session_id }
            | SessionEvent::SessionEnded { session_id, .. }
            | SessionEvent::ParticipantJoined { session_id, .. }
            | SessionEvent::ParticipantLeft { session_id, .. }
            | SessionEvent::ParticipantKicked { session_id, .. }
            | SessionEvent::SessionLocked { session_id, .. }
            | SessionEvent::SessionUnlocked { session_id, .. }
            | SessionEvent::RecordingStarted { session_id, .. }
            | SessionEvent::RecordingStopped { session_id, .. }
            | SessionEvent::RecordingStatusChanged { session_id, .. } => session_id,
        }
    }
}

/// Summary counters for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub room_id: String,
    pub status: SessionStatus,
    pub active_participants: usize,
    pub total_participants: usize,

    /// Time since the session started, or its full length once ended
    pub duration_ms: i64,

    pub recordings: usize,
    pub locked: bool,
}

/// Status reported by the external recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    Started,
    Stopped,
    Failed,
}

/// Callback payload from the external recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderWebhook {
    pub recorder_key: String,
    pub status: RecorderStatus,
    #[serde(default)]
    pub file_location: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
