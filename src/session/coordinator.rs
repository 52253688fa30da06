//! Session coordinator
//!
//! Authoritative state machine for meeting sessions, their participants and
//! their recordings. Every mutation emits a [`SessionEvent`] before the call
//! returns.

use super::context::SessionContext;
use super::state::{
    MeetingSession, Participant, ParticipantRole, RecorderStatus, RecorderWebhook, Recording,
    RecordingStatus, SessionError, SessionEvent, SessionResult, SessionStats, SessionStatus,
};
use crate::config::SessionSettings;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

#[derive(Default)]
struct Store {
    sessions: HashMap<String, MeetingSession>,

    /// Room id to session id, for sessions that have not ended
    open_rooms: HashMap<String, String>,

    /// Participants per session in join order, including those who left
    participants: HashMap<String, Vec<Participant>>,

    recordings: HashMap<String, Recording>,

    /// Recording ids per session in start order
    session_recordings: HashMap<String, Vec<String>>,

    recorder_keys: HashMap<String, String>,
    contexts: HashMap<String, SessionContext>,
}

impl Store {
    fn session(&self, session_id: &str) -> SessionResult<&MeetingSession> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(format!("Session {session_id}")))
    }

    fn session_mut(&mut self, session_id: &str) -> SessionResult<&mut MeetingSession> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(format!("Session {session_id}")))
    }

    fn joined_mut(&mut self, session_id: &str, user_id: &str) -> Option<&mut Participant> {
        self.participants
            .get_mut(session_id)?
            .iter_mut()
            .find(|p| p.user_id == user_id && p.is_joined())
    }

    fn joined_count(&self, session_id: &str) -> usize {
        self.participants
            .get(session_id)
            .map(|list| list.iter().filter(|p| p.is_joined()).count())
            .unwrap_or(0)
    }

    fn active_recording_id(&self, session_id: &str) -> Option<String> {
        self.session_recordings
            .get(session_id)?
            .iter()
            .find(|id| {
                self.recordings
                    .get(*id)
                    .map(|r| r.status.is_active())
                    .unwrap_or(false)
            })
            .cloned()
    }
}

/// Owns every session, participant and recording
pub struct SessionCoordinator {
    settings: SessionSettings,
    store: RwLock<Store>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionCoordinator {
    pub fn new(settings: SessionSettings) -> Self {
        let (event_tx, _) = broadcast::channel(settings.event_channel_capacity.max(1));
        Self {
            settings,
            store: RwLock::new(Store::default()),
            event_tx,
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, store: &mut Store, event: SessionEvent) {
        tracing::debug!("Session event: {:?}", event);
        if let Some(context) = store.contexts.get_mut(event.session_id()) {
            context.push(event.clone());
        }
        let _ = self.event_tx.send(event);
    }

    /// Create a session for `room_id` in the waiting state
    pub fn create_session(
        &self,
        room_id: &str,
        host_user_id: &str,
        max_participants: Option<u32>,
    ) -> SessionResult<MeetingSession> {
        let mut store = self.store.write();
        if store.open_rooms.contains_key(room_id) {
            return Err(SessionError::Conflict(format!(
                "Room {room_id} already has a live session"
            )));
        }

        let session = MeetingSession::new(
            room_id,
            host_user_id,
            max_participants.or(self.settings.default_max_participants),
        );
        let id = session.id.clone();

        store.open_rooms.insert(room_id.to_string(), id.clone());
        store.participants.insert(id.clone(), Vec::new());
        store.session_recordings.insert(id.clone(), Vec::new());
        store
            .contexts
            .insert(id.clone(), SessionContext::new(self.settings.recent_event_capacity));
        store.sessions.insert(id.clone(), session.clone());

        tracing::info!("Created session {} for room {}", id, room_id);
        self.emit(
            &mut store,
            SessionEvent::SessionCreated {
                session_id: id,
                room_id: room_id.to_string(),
            },
        );
        Ok(session)
    }

    /// Add `user_id` to a session.
    ///
    /// Joining again while joined returns the existing record. The first
    /// join starts the session.
    pub fn join(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        role: ParticipantRole,
    ) -> SessionResult<Participant> {
        let mut store = self.store.write();
        let session = store.session(session_id)?.clone();

        if session.is_ended() {
            return Err(SessionError::Forbidden("Session has ended".to_string()));
        }
        if let Some(existing) = store.joined_mut(session_id, user_id) {
            return Ok(existing.clone());
        }
        if session.locked && session.host_user_id != user_id {
            return Err(SessionError::Forbidden("Session is locked".to_string()));
        }
        if let Some(max) = session.max_participants {
            if store.joined_count(session_id) >= max as usize {
                return Err(SessionError::Forbidden("Session is full".to_string()));
            }
        }

        let participant = Participant::new(session_id, user_id, display_name, role);
        store
            .participants
            .entry(session_id.to_string())
            .or_default()
            .push(participant.clone());

        let started = {
            let session = store.session_mut(session_id)?;
            if session.host_user_id == user_id && session.host_participant_id.is_none() {
                session.host_participant_id = Some(participant.id.clone());
            }
            if session.status == SessionStatus::Waiting {
                session.status = SessionStatus::Active;
                session.started_at = Some(participant.joined_at);
                true
            } else {
                false
            }
        };

        tracing::info!("User {} joined session {}", user_id, session_id);
        if started {
            self.emit(
                &mut store,
                SessionEvent::SessionStarted {
                    session_id: session_id.to_string(),
                },
            );
        }
        self.emit(
            &mut store,
            SessionEvent::ParticipantJoined {
                session_id: session_id.to_string(),
                participant_id: participant.id.clone(),
                user_id: user_id.to_string(),
            },
        );
        Ok(participant)
    }

    /// Remove `user_id` from a session.
    ///
    /// Returns the participant that left, or `None` if the user was not in
    /// the session. The session ends once the last participant leaves.
    pub fn leave(&self, session_id: &str, user_id: &str) -> SessionResult<Option<Participant>> {
        let mut store = self.store.write();
        store.session(session_id)?;

        let Some(participant) = store.joined_mut(session_id, user_id) else {
            return Ok(None);
        };
        participant.mark_left(Utc::now());
        let participant = participant.clone();

        tracing::info!("User {} left session {}", user_id, session_id);
        self.emit(
            &mut store,
            SessionEvent::ParticipantLeft {
                session_id: session_id.to_string(),
                participant_id: participant.id.clone(),
                user_id: user_id.to_string(),
            },
        );

        let status = store.session(session_id)?.status;
        if status == SessionStatus::Active && store.joined_count(session_id) == 0 {
            tracing::info!("Last participant left, ending session {}", session_id);
            self.finish_session(&mut store, session_id, None, true)?;
        }
        Ok(Some(participant))
    }

    /// Remove a participant on someone else's behalf
    pub fn kick_participant(
        &self,
        session_id: &str,
        target_user_id: &str,
        kicked_by: &str,
        reason: Option<&str>,
    ) -> SessionResult<Participant> {
        let mut store = self.store.write();
        store.session(session_id)?;

        let participant = store
            .joined_mut(session_id, target_user_id)
            .ok_or_else(|| SessionError::NotFound(format!("Participant {target_user_id}")))?;
        participant.mark_left(Utc::now());
        participant.kicked_by = Some(kicked_by.to_string());
        participant.kick_reason = reason.map(str::to_string);
        let participant = participant.clone();

        tracing::info!("User {} kicked from session {} by {}", target_user_id, session_id, kicked_by);
        self.emit(
            &mut store,
            SessionEvent::ParticipantKicked {
                session_id: session_id.to_string(),
                participant_id: participant.id.clone(),
                user_id: target_user_id.to_string(),
                kicked_by: kicked_by.to_string(),
                reason: participant.kick_reason.clone(),
            },
        );
        Ok(participant)
    }

    /// Block new joins other than the host's
    pub fn lock_session(&self, session_id: &str, by: &str) -> SessionResult<MeetingSession> {
        self.set_locked(session_id, by, true)
    }

    pub fn unlock_session(&self, session_id: &str, by: &str) -> SessionResult<MeetingSession> {
        self.set_locked(session_id, by, false)
    }

    fn set_locked(&self, session_id: &str, by: &str, locked: bool) -> SessionResult<MeetingSession> {
        let mut store = self.store.write();
        let session = store.session_mut(session_id)?;
        if session.is_ended() {
            return Err(SessionError::InvalidState("Session has ended".to_string()));
        }
        if session.locked == locked {
            return Ok(session.clone());
        }
        session.locked = locked;
        let session = session.clone();

        let event = if locked {
            SessionEvent::SessionLocked {
                session_id: session_id.to_string(),
                by: by.to_string(),
            }
        } else {
            SessionEvent::SessionUnlocked {
                session_id: session_id.to_string(),
                by: by.to_string(),
            }
        };
        self.emit(&mut store, event);
        Ok(session)
    }

    /// End a session for everyone
    pub fn end_session(&self, session_id: &str, ended_by: &str) -> SessionResult<MeetingSession> {
        let mut store = self.store.write();
        if store.session(session_id)?.is_ended() {
            return Err(SessionError::Conflict("Session already ended".to_string()));
        }
        self.finish_session(&mut store, session_id, Some(ended_by), false)
    }

    fn finish_session(
        &self,
        store: &mut Store,
        session_id: &str,
        ended_by: Option<&str>,
        auto_ended: bool,
    ) -> SessionResult<MeetingSession> {
        let now = Utc::now();

        if let Some(participants) = store.participants.get_mut(session_id) {
            for participant in participants.iter_mut() {
                participant.mark_left(now);
            }
        }

        if let Some(recording_id) = store.active_recording_id(session_id) {
            if let Some(recording) = store.recordings.get_mut(&recording_id) {
                recording.stop(ended_by, now)?;
                let duration_ms = recording.duration_ms.unwrap_or(0);
                tracing::info!("Stopped recording {} with the session", recording_id);
                self.emit(
                    store,
                    SessionEvent::RecordingStopped {
                        session_id: session_id.to_string(),
                        recording_id,
                        duration_ms,
                    },
                );
            }
        }

        let session = store.session_mut(session_id)?;
        session.status = SessionStatus::Ended;
        session.ended_at = Some(now);
        session.ended_by = ended_by.map(str::to_string);
        let session = session.clone();
        store.open_rooms.remove(&session.room_id);

        tracing::info!("Session {} ended", session_id);
        self.emit(
            store,
            SessionEvent::SessionEnded {
                session_id: session_id.to_string(),
                ended_by: session.ended_by.clone(),
                auto_ended,
            },
        );
        store.contexts.remove(session_id);
        Ok(session)
    }

    /// Start a recording of an active session
    pub fn start_recording(&self, session_id: &str, user_id: &str) -> SessionResult<Recording> {
        let mut store = self.store.write();
        let status = store.session(session_id)?.status;

        if store.active_recording_id(session_id).is_some() {
            return Err(SessionError::Conflict(
                "Recording already in progress".to_string(),
            ));
        }
        if status != SessionStatus::Active {
            return Err(SessionError::InvalidState("Session is not active".to_string()));
        }

        let recording = Recording::new(session_id, user_id);
        store
            .session_recordings
            .entry(session_id.to_string())
            .or_default()
            .push(recording.id.clone());
        store
            .recorder_keys
            .insert(recording.recorder_key.clone(), recording.id.clone());
        store.recordings.insert(recording.id.clone(), recording.clone());

        tracing::info!(
            "Starting recording {} for session {}",
            recording.recorder_key,
            session_id
        );
        self.emit(
            &mut store,
            SessionEvent::RecordingStarted {
                session_id: session_id.to_string(),
                recording_id: recording.id.clone(),
                recorder_key: recording.recorder_key.clone(),
            },
        );
        Ok(recording)
    }

    /// Stop a pending or running recording
    pub fn stop_recording(&self, recording_id: &str, user_id: &str) -> SessionResult<Recording> {
        let mut store = self.store.write();
        let recording = store
            .recordings
            .get_mut(recording_id)
            .ok_or_else(|| SessionError::NotFound(format!("Recording {recording_id}")))?;

        if !recording.status.is_active() {
            return Err(SessionError::Conflict("Recording is not active".to_string()));
        }
        recording.stop(Some(user_id), Utc::now())?;
        let recording = recording.clone();

        tracing::info!(
            "Stopped recording {} after {}ms",
            recording.id,
            recording.duration_ms.unwrap_or(0)
        );
        self.emit(
            &mut store,
            SessionEvent::RecordingStopped {
                session_id: recording.session_id.clone(),
                recording_id: recording.id.clone(),
                duration_ms: recording.duration_ms.unwrap_or(0),
            },
        );
        Ok(recording)
    }

    /// The recorder has started writing
    pub fn mark_recording(&self, recording_id: &str) -> SessionResult<Recording> {
        self.update_recording(recording_id, |r| r.transition(RecordingStatus::Recording))
    }

    /// The recorder has finished writing and is post-processing
    pub fn mark_processing(&self, recording_id: &str) -> SessionResult<Recording> {
        self.update_recording(recording_id, |r| r.transition(RecordingStatus::Processing))
    }

    pub fn complete_recording(&self, recording_id: &str, file_location: &str) -> SessionResult<Recording> {
        self.update_recording(recording_id, |r| {
            r.transition(RecordingStatus::Completed)?;
            r.file_location = Some(file_location.to_string());
            Ok(())
        })
    }

    pub fn fail_recording(&self, recording_id: &str, error: &str) -> SessionResult<Recording> {
        self.update_recording(recording_id, |r| fail(r, error))
    }

    /// Apply a status callback from the external recorder.
    ///
    /// Repeated `started` callbacks are ignored. `stopped` stops an active
    /// recording, moves it to processing, and completes it when a file
    /// location is supplied.
    pub fn apply_recorder_webhook(&self, webhook: &RecorderWebhook) -> SessionResult<Recording> {
        let recording_id = self
            .store
            .read()
            .recorder_keys
            .get(&webhook.recorder_key)
            .cloned()
            .ok_or_else(|| {
                SessionError::NotFound(format!("Recording with key {}", webhook.recorder_key))
            })?;

        tracing::debug!(
            "Recorder webhook for {}: {:?}",
            webhook.recorder_key,
            webhook.status
        );

        self.update_recording(&recording_id, |r| match webhook.status {
            RecorderStatus::Started => {
                if r.status == RecordingStatus::Recording {
                    return Ok(());
                }
                r.transition(RecordingStatus::Recording)
            }
            RecorderStatus::Stopped => {
                if r.status.is_active() {
                    r.stop(None, Utc::now())?;
                }
                if r.status == RecordingStatus::Stopped {
                    r.transition(RecordingStatus::Processing)?;
                }
                if let Some(location) = &webhook.file_location {
                    r.transition(RecordingStatus::Completed)?;
                    r.file_location = Some(location.clone());
                }
                Ok(())
            }
            RecorderStatus::Failed => fail(r, webhook.error.as_deref().unwrap_or("recorder failed")),
        })
    }

    /// Apply `change` to a copy of the recording and commit it on success
    fn update_recording<F>(&self, recording_id: &str, change: F) -> SessionResult<Recording>
    where
        F: FnOnce(&mut Recording) -> SessionResult<()>,
    {
        let mut store = self.store.write();
        let mut recording = store
            .recordings
            .get(recording_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("Recording {recording_id}")))?;

        let before = recording.status;
        change(&mut recording)?;
        store
            .recordings
            .insert(recording_id.to_string(), recording.clone());

        if recording.status != before {
            tracing::info!(
                "Recording {} is now {:?}",
                recording_id,
                recording.status
            );
            self.emit(
                &mut store,
                SessionEvent::RecordingStatusChanged {
                    session_id: recording.session_id.clone(),
                    recording_id: recording_id.to_string(),
                    status: recording.status,
                },
            );
        }
        Ok(recording)
    }

    pub fn session(&self, session_id: &str) -> SessionResult<MeetingSession> {
        self.store.read().session(session_id).cloned()
    }

    /// The live session for a room, if any
    pub fn session_by_room(&self, room_id: &str) -> Option<MeetingSession> {
        let store = self.store.read();
        let session_id = store.open_rooms.get(room_id)?;
        store.sessions.get(session_id).cloned()
    }

    /// Sessions that have not ended
    pub fn open_sessions(&self) -> Vec<MeetingSession> {
        let store = self.store.read();
        store
            .open_rooms
            .values()
            .filter_map(|id| store.sessions.get(id).cloned())
            .collect()
    }

    pub fn active_participants(&self, session_id: &str) -> SessionResult<Vec<Participant>> {
        Ok(self
            .participants(session_id)?
            .into_iter()
            .filter(|p| p.is_joined())
            .collect())
    }

    /// Every participant record, in join order
    pub fn participants(&self, session_id: &str) -> SessionResult<Vec<Participant>> {
        let store = self.store.read();
        store.session(session_id)?;
        Ok(store.participants.get(session_id).cloned().unwrap_or_default())
    }

    pub fn recording(&self, recording_id: &str) -> SessionResult<Recording> {
        self.store
            .read()
            .recordings
            .get(recording_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("Recording {recording_id}")))
    }

    /// Recordings of a session, newest first
    pub fn recordings_for_session(&self, session_id: &str) -> SessionResult<Vec<Recording>> {
        let store = self.store.read();
        store.session(session_id)?;
        Ok(store
            .session_recordings
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| store.recordings.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn active_recording(&self, session_id: &str) -> SessionResult<Option<Recording>> {
        let store = self.store.read();
        store.session(session_id)?;
        Ok(store
            .active_recording_id(session_id)
            .and_then(|id| store.recordings.get(&id).cloned()))
    }

    pub fn session_stats(&self, session_id: &str) -> SessionResult<SessionStats> {
        let store = self.store.read();
        let session = store.session(session_id)?;
        let participants = store.participants.get(session_id);

        let duration_ms = session
            .started_at
            .map(|started| {
                let end = session.ended_at.unwrap_or_else(Utc::now);
                (end - started).num_milliseconds().max(0)
            })
            .unwrap_or(0);

        Ok(SessionStats {
            session_id: session.id.clone(),
            room_id: session.room_id.clone(),
            status: session.status,
            active_participants: store.joined_count(session_id),
            total_participants: participants.map(Vec::len).unwrap_or(0),
            duration_ms,
            recordings: store
                .session_recordings
                .get(session_id)
                .map(Vec::len)
                .unwrap_or(0),
            locked: session.locked,
        })
    }

    /// Recent events of a live session, oldest first. Empty once ended.
    pub fn recent_events(&self, session_id: &str) -> SessionResult<Vec<SessionEvent>> {
        let store = self.store.read();
        store.session(session_id)?;
        Ok(store
            .contexts
            .get(session_id)
            .map(SessionContext::recent_events)
            .unwrap_or_default())
    }
}

fn fail(recording: &mut Recording, error: &str) -> SessionResult<()> {
    let was_active = recording.status.is_active();
    recording.transition(RecordingStatus::Failed)?;
    recording.error = Some(error.to_string());
    if was_active && recording.stopped_at.is_none() {
        let now = Utc::now();
        recording.stopped_at = Some(now);
        recording.duration_ms = Some((now - recording.started_at).num_milliseconds().max(0));
    }
    Ok(())
}
