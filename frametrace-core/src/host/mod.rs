//! Host event source
//!
//! The host application owns categories and markers and delivers their
//! lifecycle to the plugin through callbacks. This module describes what the
//! host hands over and the registration surface the dispatcher drives.
//!
//! Descriptors borrow from the host; nothing here is retained past the
//! callback except what the registry copies.

mod mock;

pub use mock::{MockHost, MockHostState};

/// Host category identifier
pub type CategoryId = u16;

/// Identity of a host marker, stable for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u64);

/// A category as created by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryDesc<'a> {
    pub id: CategoryId,
    pub name: &'a str,
    /// RGBA color
    pub color: u32,
}

/// A marker as created by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerDesc<'a> {
    pub id: MarkerId,
    pub category_id: CategoryId,
    pub name: &'a str,
}

/// Begin or end of a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerEventKind {
    Begin,
    End,
}

/// One typed payload element attached to a marker event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerData<'a> {
    /// Host-defined payload type tag
    pub kind: u8,
    pub bytes: &'a [u8],
}

/// A begin/end event delivered for a registered marker
#[derive(Debug, Clone, Copy)]
pub struct MarkerEvent<'a> {
    pub marker: MarkerDesc<'a>,
    pub kind: MarkerEventKind,
    /// Reporting thread, when the host supplies one
    pub thread_id: Option<u64>,
    pub data: &'a [MarkerData<'a>],
}

impl<'a> MarkerEvent<'a> {
    pub fn begin(marker: MarkerDesc<'a>) -> Self {
        Self {
            marker,
            kind: MarkerEventKind::Begin,
            thread_id: None,
            data: &[],
        }
    }

    pub fn end(marker: MarkerDesc<'a>) -> Self {
        Self {
            kind: MarkerEventKind::End,
            ..Self::begin(marker)
        }
    }

    pub fn on_thread(mut self, thread_id: u64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_data(mut self, data: &'a [MarkerData<'a>]) -> Self {
        self.data = data;
        self
    }
}

/// Callback registration surface of the host
///
/// The dispatcher registers only while some sink is tracing, so the host
/// pays nothing per marker otherwise.
pub trait HostCallbacks: Send + Sync {
    fn register_category_callback(&self);

    fn unregister_category_callback(&self);

    /// Marker creation callback
    fn register_marker_callback(&self);

    fn unregister_marker_callback(&self);

    /// Begin/end callback for a single marker
    fn register_marker_event_callback(&self, marker: MarkerId);

    /// Drop every marker event callback at once
    fn unregister_marker_event_callbacks(&self);
}
