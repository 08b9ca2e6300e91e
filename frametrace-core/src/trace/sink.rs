//! Trace sink capability
//!
//! Every destination for section events implements [`TraceSink`]. The
//! dispatcher holds the populated subset and asks each one per event whether
//! it is currently tracing.

use std::sync::Arc;

use parking_lot::Mutex;

use super::event::{EventKind, EventRecord, SectionInfo};

/// A destination for section enter/leave events
///
/// `enter_section` and `leave_section` are called concurrently from host
/// worker threads and must not block. `flip` and `unload` are called from the
/// single thread that drives frames.
pub trait TraceSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether the sink wants events right now
    fn is_tracing(&self) -> bool;

    fn enter_section(&self, section: &SectionInfo<'_>);

    fn leave_section(&self, section: &SectionInfo<'_>);

    /// Frame boundary; sinks without a frame concept keep the default
    fn flip(&self) {}

    /// Release owned resources before the plugin goes away
    fn unload(&self) {}
}

/// In-memory sink that keeps every event it receives
///
/// Useful as an external tracer in tests and tools.
pub struct MemorySink {
    events: Arc<Mutex<Vec<EventRecord>>>,
    tracing: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            tracing: true,
        }
    }

    /// A sink that reports itself inactive
    pub fn inactive() -> Self {
        Self {
            tracing: false,
            ..Self::new()
        }
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    fn push(&self, kind: EventKind, section: &SectionInfo<'_>) {
        self.events.lock().push(EventRecord::new(kind, section, 0));
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_tracing(&self) -> bool {
        self.tracing
    }

    fn enter_section(&self, section: &SectionInfo<'_>) {
        self.push(EventKind::EnterSection, section);
    }

    fn leave_section(&self, section: &SectionInfo<'_>) {
        self.push(EventKind::LeaveSection, section);
    }
}
