//! Event capture and trace sinks
//!
//! ## Architecture
//!
//! ```text
//! Host worker threads              Frame thread
//! ───────────────────              ────────────
//! enter/leave ──► Dispatcher ──┬─► NativeTracer  (name only)
//!                              ├─► CaptureSink ──► EventRingBuffer
//!                              │      (lock-free)        │
//!                              └─► extern TraceSink      │ flip()
//!                                                        ▼
//!                                                 FrameExchange
//! ```
//!
//! Every sink implements [`TraceSink`]. The capture sink is always present;
//! the native and external tracers are optional and probed once.

mod buffer;
mod capture;
mod event;
mod exchange;
pub mod external;
mod native;
mod registry;
mod sink;

pub use buffer::{EventRingBuffer, Slot};
pub use capture::{CaptureMode, CaptureSink, CompletedTrace};
pub use event::{
    copy_bounded, EventKind, EventRecord, EventView, FrameInfo, SectionInfo, TraceInfo,
    GROUP_NAME_CAPACITY, SECTION_NAME_CAPACITY,
};
pub use exchange::{CapturedFrame, FrameChannel, FrameExchange, FrameSummary};
pub use external::{extern_trace, install_extern_trace};
pub use native::{NativeSymbols, NativeTracer};
pub use registry::{SectionGroup, SectionGroupRegistry, DEFAULT_GROUP_COLOR};
pub use sink::{MemorySink, TraceSink};
