//! # Frametrace Core
//!
//! In-process tracing bridge between a host's marker callbacks and up to
//! three section sinks:
//!
//! - **Native**: the OS tracer, loaded dynamically when present
//! - **Capture**: a lock-free fixed-capacity buffer, either one-shot or
//!   exchanged with a consumer at every frame boundary
//! - **External**: a tracer installed by the embedding process
//!
//! The host announces categories and markers; the [`Dispatcher`] resolves
//! each marker event to a [`SectionInfo`] and fans it out to every sink
//! that is currently tracing. Host callbacks stay registered only while
//! some sink is active.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use frametrace_core::host::{CategoryDesc, MarkerDesc, MarkerEvent, MarkerId, MockHost};
//! use frametrace_core::PluginContext;
//!
//! let host = Arc::new(MockHost::new());
//! let context = PluginContext::builder(host.clone())
//!     .without_native_tracer()
//!     .without_extern_trace()
//!     .build()
//!     .unwrap();
//!
//! // Start a one-shot capture; the next frame boundary attaches the host.
//! context.capture().begin_trace(16).unwrap();
//! context.flip_frame();
//! assert!(host.callbacks_registered());
//!
//! let dispatcher = context.dispatcher();
//! dispatcher.on_create_category(&CategoryDesc { id: 0, name: "Physics", color: 0xff0000 });
//! let marker = MarkerDesc { id: MarkerId(1), category_id: 0, name: "Update" };
//! dispatcher.on_create_marker(&marker);
//! dispatcher.on_marker_event(&MarkerEvent::begin(marker));
//! dispatcher.on_marker_event(&MarkerEvent::end(marker));
//!
//! let trace = context.capture().end_trace().unwrap();
//! assert_eq!(trace.info.event_count, 2);
//! assert_eq!(trace.events[0].group_name(), "Physics");
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod plugin;
pub mod timing;
pub mod trace;
pub mod utils;

#[cfg(feature = "ffi")]
pub mod ffi;

// Re-export main types
pub use config::TraceConfig;
pub use dispatch::{Dispatcher, SinkSet};
pub use error::{ErrorCode, Result, TraceError};
pub use host::{HostCallbacks, MarkerEvent, MarkerId};
pub use plugin::{PluginContext, PluginContextBuilder};
pub use timing::{Clock, FrameTimer, MockClock, MonotonicClock};
pub use trace::{
    CaptureMode, CaptureSink, CapturedFrame, CompletedTrace, EventKind, EventRecord,
    FrameChannel, FrameExchange, FrameInfo, MemorySink, SectionInfo, TraceInfo, TraceSink,
};
pub use utils::{HostUtils, SystemUtils, Utf8Buffer};
