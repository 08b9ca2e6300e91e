//! Event records and boundary structs
//!
//! These types are shared by raw memory layout with the host: `EventRecord`
//! is written straight into caller-owned buffers and read back by the
//! consumer without any decoding step.
//!
//! ```text
//! EventRecord (72 bytes, align 8)
//! ┌──────────────┬──────────────┬──────────────┬────────────┬────────┬────────┐
//! │ name [32]    │ group [16]   │ timestamp_ns │ thread_id  │ kind   │ color  │
//! │ NUL-termed   │ NUL-termed   │ u64          │ u64        │ u32    │ u32    │
//! └──────────────┴──────────────┴──────────────┴────────────┴────────┴────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Size of the section name field, terminator included
pub const SECTION_NAME_CAPACITY: usize = 32;

/// Size of the group name field, terminator included
pub const GROUP_NAME_CAPACITY: usize = 16;

/// Kind of trace event
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Section enter event
    EnterSection = 0,
    /// Section leave event
    LeaveSection = 1,
}

impl EventKind {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(EventKind::EnterSection),
            1 => Some(EventKind::LeaveSection),
            _ => None,
        }
    }
}

/// Section metadata resolved for a single event
///
/// Built per event by the dispatcher; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo<'a> {
    /// Group (category) name
    pub group_name: &'a str,
    /// Section name
    pub name: &'a str,
    /// Reporting thread
    pub thread_id: u64,
    /// RGBA color
    pub color: u32,
}

/// Fixed-size trace event as laid out in exchanged buffers
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Section name as null-terminated UTF-8
    pub name: [u8; SECTION_NAME_CAPACITY],
    /// Group name as null-terminated UTF-8
    pub group_name: [u8; GROUP_NAME_CAPACITY],
    /// Offset since the last frame boundary in nanoseconds
    pub timestamp_ns: u64,
    /// Reporting thread
    pub thread_id: u64,
    /// Raw `EventKind`
    pub kind: u32,
    /// RGBA color
    pub color: u32,
}

const _: () = assert!(std::mem::size_of::<EventRecord>() == 72);
const _: () = assert!(std::mem::align_of::<EventRecord>() == 8);

impl EventRecord {
    /// All-zero record
    pub const EMPTY: EventRecord = EventRecord {
        name: [0; SECTION_NAME_CAPACITY],
        group_name: [0; GROUP_NAME_CAPACITY],
        timestamp_ns: 0,
        thread_id: 0,
        kind: 0,
        color: 0,
    };

    /// Build a record, truncating names to their field widths
    pub fn new(kind: EventKind, section: &SectionInfo<'_>, timestamp_ns: u64) -> Self {
        let mut record = EventRecord::EMPTY;
        copy_bounded(&mut record.name, section.name);
        copy_bounded(&mut record.group_name, section.group_name);
        record.timestamp_ns = timestamp_ns;
        record.thread_id = section.thread_id;
        record.kind = kind as u32;
        record.color = section.color;
        record
    }

    /// Section name up to the terminator
    pub fn name(&self) -> &str {
        field_str(&self.name)
    }

    /// Group name up to the terminator
    pub fn group_name(&self) -> &str {
        field_str(&self.group_name)
    }

    /// Decoded event kind, `None` for foreign garbage
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_raw(self.kind)
    }

    /// Owned, serializable view
    pub fn to_view(&self) -> EventView {
        EventView {
            name: self.name().to_string(),
            group: self.group_name().to_string(),
            timestamp_ns: self.timestamp_ns,
            thread_id: self.thread_id,
            kind: self.kind(),
            color: self.color,
        }
    }
}

impl Default for EventRecord {
    fn default() -> Self {
        EventRecord::EMPTY
    }
}

impl std::fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecord")
            .field("name", &self.name())
            .field("group_name", &self.group_name())
            .field("timestamp_ns", &self.timestamp_ns)
            .field("thread_id", &self.thread_id)
            .field("kind", &self.kind())
            .field("color", &format_args!("{:#08x}", self.color))
            .finish()
    }
}

/// Serializable copy of an `EventRecord`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventView {
    pub name: String,
    pub group: String,
    pub timestamp_ns: u64,
    pub thread_id: u64,
    pub kind: Option<EventKind>,
    pub color: u32,
}

/// Info handed to the flip callback on each frame exchange
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    /// Index of the traced frame
    pub frame_index: u64,
    /// Duration of the traced frame in milliseconds
    pub frame_duration_ms: u32,
    /// Number of records in the handed-over buffer
    pub event_count: u32,
    /// Non-zero if events were dropped for lack of space
    pub did_run_out_of_event_memory: u32,
}

impl FrameInfo {
    pub fn overflowed(&self) -> bool {
        self.did_run_out_of_event_memory != 0
    }
}

/// Summary returned when a capture is disabled
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceInfo {
    /// Time since the last frame boundary in nanoseconds
    pub duration_ns: u64,
    /// Number of records written
    pub event_count: u32,
    /// Non-zero if events were dropped for lack of space
    pub did_run_out_of_event_memory: u32,
}

impl TraceInfo {
    pub fn overflowed(&self) -> bool {
        self.did_run_out_of_event_memory != 0
    }
}

/// Copy `input` into a fixed field, always leaving a terminating NUL
///
/// Truncates on a UTF-8 character boundary and zero-fills the remainder.
pub fn copy_bounded(out: &mut [u8], input: &str) {
    if out.is_empty() {
        return;
    }
    let max = out.len() - 1;
    let mut len = input.len().min(max);
    while !input.is_char_boundary(len) {
        len -= 1;
    }
    out[..len].copy_from_slice(&input.as_bytes()[..len]);
    out[len..].fill(0);
}

fn field_str(field: &[u8]) -> &str {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let bytes = &field[..end];
    match std::str::from_utf8(bytes) {
        Ok(s) => s,
        // Foreign writers may split a character; keep the valid prefix.
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    }
}
