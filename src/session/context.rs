//! Per-session runtime context
//!
//! Lives from `create_session` until the session ends.

use super::state::SessionEvent;
use std::collections::VecDeque;

pub struct SessionContext {
    recent: VecDeque<SessionEvent>,
    capacity: usize,
}

impl SessionContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Remember an event, dropping the oldest once full
    pub fn push(&mut self, event: SessionEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(event);
    }

    /// Oldest first
    pub fn recent_events(&self) -> Vec<SessionEvent> {
        self.recent.iter().cloned().collect()
    }
}
