//! In-flight toggle tracking
//!
//! Toggle and switch operations are not reentrant for the same media kind.
//! A UI holds a [`ToggleGuard`] for as long as the operation runs and uses
//! [`ToggleGate::is_busy`] to disable the control that triggered it.

use super::track::TrackKind;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Tracks which media kinds have an operation in flight
#[derive(Debug, Clone, Default)]
pub struct ToggleGate {
    in_flight: Arc<Mutex<HashSet<TrackKind>>>,
}

impl ToggleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `kind`. Returns `None` while another guard for it is alive.
    pub fn try_begin(&self, kind: TrackKind) -> Option<ToggleGuard> {
        if !self.in_flight.lock().insert(kind) {
            tracing::debug!("Rejecting {} toggle: one is already in flight", kind);
            return None;
        }
        Some(ToggleGuard {
            gate: self.clone(),
            kind,
        })
    }

    pub fn is_busy(&self, kind: TrackKind) -> bool {
        self.in_flight.lock().contains(&kind)
    }
}

/// Releases its media kind on drop
#[derive(Debug)]
pub struct ToggleGuard {
    gate: ToggleGate,
    kind: TrackKind,
}

impl ToggleGuard {
    pub fn kind(&self) -> TrackKind {
        self.kind
    }
}

impl Drop for ToggleGuard {
    fn drop(&mut self) {
        self.gate.in_flight.lock().remove(&self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_rejected_until_release() {
        let gate = ToggleGate::new();
        let guard = gate.try_begin(TrackKind::Video).unwrap();
        assert!(gate.is_busy(TrackKind::Video));
        assert!(gate.try_begin(TrackKind::Video).is_none());

        drop(guard);
        assert!(!gate.is_busy(TrackKind::Video));
        assert!(gate.try_begin(TrackKind::Video).is_some());
    }

    #[test]
    fn test_kinds_are_independent() {
        let gate = ToggleGate::new();
        let _video = gate.try_begin(TrackKind::Video).unwrap();
        let audio = gate.try_begin(TrackKind::Audio);
        assert!(audio.is_some());
        assert_eq!(audio.unwrap().kind(), TrackKind::Audio);
    }
}
