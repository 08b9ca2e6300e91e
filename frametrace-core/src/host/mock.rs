//! Mock host for testing
//!
//! Records every callback (un)registration for inspection in tests and in
//! the simulator.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use super::{HostCallbacks, MarkerId};

/// Snapshot of the registrations a `MockHost` has seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockHostState {
    pub category_callback: bool,
    pub marker_callback: bool,
    /// Markers with a live event callback
    pub marker_event_callbacks: BTreeSet<MarkerId>,
    /// Number of register calls of any kind
    pub registrations: u32,
    /// Number of unregister calls of any kind
    pub unregistrations: u32,
}

/// Host that only records registrations
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<MockHostState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MockHostState {
        self.state.lock().clone()
    }

    /// Whether the lifecycle callbacks are currently registered
    pub fn callbacks_registered(&self) -> bool {
        let state = self.state.lock();
        state.category_callback && state.marker_callback
    }

    pub fn has_marker_event_callback(&self, marker: MarkerId) -> bool {
        self.state.lock().marker_event_callbacks.contains(&marker)
    }

    /// Forget all recorded registrations
    pub fn clear(&self) {
        *self.state.lock() = MockHostState::default();
    }
}

impl HostCallbacks for MockHost {
    fn register_category_callback(&self) {
        let mut state = self.state.lock();
        state.category_callback = true;
        state.registrations += 1;
    }

    fn unregister_category_callback(&self) {
        let mut state = self.state.lock();
        state.category_callback = false;
        state.unregistrations += 1;
    }

    fn register_marker_callback(&self) {
        let mut state = self.state.lock();
        state.marker_callback = true;
        state.registrations += 1;
    }

    fn unregister_marker_callback(&self) {
        let mut state = self.state.lock();
        state.marker_callback = false;
        state.unregistrations += 1;
    }

    fn register_marker_event_callback(&self, marker: MarkerId) {
        let mut state = self.state.lock();
        state.marker_event_callbacks.insert(marker);
        state.registrations += 1;
    }

    fn unregister_marker_event_callbacks(&self) {
        let mut state = self.state.lock();
        state.marker_event_callbacks.clear();
        state.unregistrations += 1;
    }
}
