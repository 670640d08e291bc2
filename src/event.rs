use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    NotReady,
    Ready,
}

/// Caller-owned completion signal a primitive marks ready after executing.
#[derive(Debug)]
pub struct Event {
    state: Mutex<EventState>,
    cv: Condvar,
}

impl Default for Event {
    fn default() -> Self { Self::new() }
}

impl Event {
    pub fn new() -> Self { Self { state: Mutex::new(EventState::NotReady), cv: Condvar::new() } }

    pub fn state(&self) -> EventState { *self.lock() }

    pub fn is_ready(&self) -> bool { self.state() == EventState::Ready }

    pub fn set_state(&self, state: EventState) {
        *self.lock() = state;
        if state == EventState::Ready { self.cv.notify_all(); }
    }

    pub fn reset(&self) { self.set_state(EventState::NotReady); }

    /// Blocks until the event is ready.
    pub fn wait(&self) {
        let mut g = self.lock();
        while *g != EventState::Ready {
            g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EventState> {
        // State is a plain enum; a poisoned lock still holds a valid value.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
