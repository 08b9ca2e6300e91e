//! FFI (Foreign Function Interface) for frametrace
//!
//! C-compatible API used when the crate is loaded as a native plugin.
//!
//! ## Lifecycle
//!
//! 1. Optionally `frametrace_install_extern_trace` (before load).
//! 2. `frametrace_plugin_load` with the host's callback table.
//! 3. `frametrace_plugin_flip_frame` once per host frame.
//! 4. `frametrace_plugin_unload`. The plugin cannot be loaded again in the
//!    same process.
//!
//! ## Error Handling
//!
//! - Functions return an `ErrorCode` as `i32` (`0` on success).
//! - Use `frametrace_last_error` to retrieve the message of the last failure
//!   on the calling thread; free it with `frametrace_free_string`.
//!
//! ## Memory Management
//!
//! Event buffers passed to `frametrace_trace_begin` and returned from the
//! flip callback stay owned by the caller and must outlive their use.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use crate::config::TraceConfig;
use crate::error::{ErrorCode, Result, TraceError};
use crate::host::{
    CategoryDesc, CategoryId, HostCallbacks, MarkerData, MarkerDesc, MarkerEvent,
    MarkerEventKind, MarkerId,
};
use crate::plugin::{self, PluginContext};
use crate::trace::{
    install_extern_trace, CaptureMode, EventRecord, FrameExchange, FrameInfo, SectionInfo,
    TraceInfo, TraceSink,
};
use crate::utils::Utf8Buffer;

// Thread-local storage for error messages
thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg);
    });
}

/// Clear the last error
fn clear_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Record a failure and turn a result into a status code
fn status(result: Result<()>) -> i32 {
    let code = ErrorCode::of(&result);
    if let Err(err) = result {
        set_error(err.to_string());
    }
    code.as_raw()
}

/// Run `f` against the live plugin context
fn with_context(f: impl FnOnce(&PluginContext) -> Result<()>) -> i32 {
    clear_error();
    match plugin::get() {
        Some(context) => status(f(context)),
        None => status(Err(TraceError::NotAvailable {
            capability: "plugin context",
        })),
    }
}

/// Borrow a C string, treating null and invalid UTF-8 as empty
unsafe fn c_str<'a>(s: *const c_char) -> &'a str {
    if s.is_null() {
        return "";
    }
    CStr::from_ptr(s).to_str().unwrap_or_default()
}

// ============================================================================
// String Helpers
// ============================================================================

/// Get the last error message.
///
/// Returns null if no error occurred.
/// The returned string must be freed with `frametrace_free_string`.
#[no_mangle]
pub extern "C" fn frametrace_last_error() -> *mut c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(msg) => CString::new(msg.as_str())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut()),
        None => ptr::null_mut(),
    })
}

/// Free a string returned by this API.
#[no_mangle]
pub extern "C" fn frametrace_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

// ============================================================================
// Host Callbacks
// ============================================================================

/// Category descriptor as delivered by the host
#[repr(C)]
#[derive(Debug)]
pub struct CCategoryDesc {
    pub id: u16,
    pub flags: u16,
    /// RGBA color
    pub rgba_color: u32,
    pub name: *const c_char,
}

/// Marker descriptor as delivered by the host
///
/// The descriptor's address identifies the marker.
#[repr(C)]
#[derive(Debug)]
pub struct CMarkerDesc {
    pub category_id: u16,
    pub flags: u16,
    pub reserved: u32,
    pub name: *const c_char,
}

/// One payload element of a marker event
#[repr(C)]
#[derive(Debug)]
pub struct CMarkerData {
    pub kind: u8,
    pub reserved: [u8; 3],
    /// Size of the payload in bytes
    pub size: u32,
    pub ptr: *const c_void,
}

/// Begin event kind in `MarkerEventHandler`
pub const MARKER_EVENT_BEGIN: u16 = 0;
/// End event kind in `MarkerEventHandler`
pub const MARKER_EVENT_END: u16 = 1;

/// Max payload elements forwarded per marker event
const MAX_MARKER_DATA: usize = 4;

pub type CreateCategoryHandler = unsafe extern "C" fn(*const CCategoryDesc, *mut c_void);
pub type CreateMarkerHandler = unsafe extern "C" fn(*const CMarkerDesc, *mut c_void);
pub type MarkerEventHandler =
    unsafe extern "C" fn(*const CMarkerDesc, u16, u16, *const CMarkerData, *mut c_void);

/// Registration entry points exported by the host
///
/// Every entry is optional; a missing one is simply never called. The
/// `unregister_marker_event` entry receives a null descriptor to mean "all
/// markers".
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostCallbackTable {
    pub user_data: *mut c_void,
    pub register_create_category:
        Option<unsafe extern "C" fn(CreateCategoryHandler, *mut c_void) -> i32>,
    pub unregister_create_category:
        Option<unsafe extern "C" fn(CreateCategoryHandler, *mut c_void) -> i32>,
    pub register_create_marker:
        Option<unsafe extern "C" fn(CreateMarkerHandler, *mut c_void) -> i32>,
    pub unregister_create_marker:
        Option<unsafe extern "C" fn(CreateMarkerHandler, *mut c_void) -> i32>,
    pub register_marker_event:
        Option<unsafe extern "C" fn(*const CMarkerDesc, MarkerEventHandler, *mut c_void) -> i32>,
    pub unregister_marker_event:
        Option<unsafe extern "C" fn(*const CMarkerDesc, MarkerEventHandler, *mut c_void) -> i32>,
}

/// Host reached through a C callback table
struct FfiHost {
    table: HostCallbackTable,
}

// SAFETY: the host promises its registration entry points and user data can
// be used from the frame thread.
unsafe impl Send for FfiHost {}
unsafe impl Sync for FfiHost {}

impl HostCallbacks for FfiHost {
    fn register_category_callback(&self) {
        if let Some(register) = self.table.register_create_category {
            unsafe { register(handle_create_category, self.table.user_data) };
        }
    }

    fn unregister_category_callback(&self) {
        if let Some(unregister) = self.table.unregister_create_category {
            unsafe { unregister(handle_create_category, self.table.user_data) };
        }
    }

    fn register_marker_callback(&self) {
        if let Some(register) = self.table.register_create_marker {
            unsafe { register(handle_create_marker, self.table.user_data) };
        }
    }

    fn unregister_marker_callback(&self) {
        if let Some(unregister) = self.table.unregister_create_marker {
            unsafe { unregister(handle_create_marker, self.table.user_data) };
        }
    }

    fn register_marker_event_callback(&self, marker: MarkerId) {
        if let Some(register) = self.table.register_marker_event {
            let desc = marker.0 as usize as *const CMarkerDesc;
            unsafe { register(desc, handle_marker_event, self.table.user_data) };
        }
    }

    fn unregister_marker_event_callbacks(&self) {
        if let Some(unregister) = self.table.unregister_marker_event {
            unsafe { unregister(ptr::null(), handle_marker_event, self.table.user_data) };
        }
    }
}

unsafe fn marker_desc<'a>(desc: *const CMarkerDesc) -> Option<MarkerDesc<'a>> {
    let raw = desc.as_ref()?;
    Some(MarkerDesc {
        id: MarkerId(desc as usize as u64),
        category_id: raw.category_id as CategoryId,
        name: c_str(raw.name),
    })
}

unsafe fn marker_data<'a>(data: &CMarkerData) -> MarkerData<'a> {
    let bytes = if data.ptr.is_null() || data.size == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data.ptr.cast::<u8>(), data.size as usize)
    };
    MarkerData {
        kind: data.kind,
        bytes,
    }
}

unsafe extern "C" fn handle_create_category(desc: *const CCategoryDesc, _user: *mut c_void) {
    let (Some(context), Some(desc)) = (plugin::get(), desc.as_ref()) else {
        return;
    };
    context.dispatcher().on_create_category(&CategoryDesc {
        id: desc.id,
        name: c_str(desc.name),
        color: desc.rgba_color,
    });
}

unsafe extern "C" fn handle_create_marker(desc: *const CMarkerDesc, _user: *mut c_void) {
    let (Some(context), Some(marker)) = (plugin::get(), marker_desc(desc)) else {
        return;
    };
    context.dispatcher().on_create_marker(&marker);
}

unsafe extern "C" fn handle_marker_event(
    desc: *const CMarkerDesc,
    kind: u16,
    data_count: u16,
    data: *const CMarkerData,
    _user: *mut c_void,
) {
    let (Some(context), Some(marker)) = (plugin::get(), marker_desc(desc)) else {
        return;
    };
    let kind = match kind {
        MARKER_EVENT_BEGIN => MarkerEventKind::Begin,
        MARKER_EVENT_END => MarkerEventKind::End,
        _ => return,
    };

    let raw = if data.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(data, usize::from(data_count))
    };
    let mut payload = [MarkerData {
        kind: 0,
        bytes: &[],
    }; MAX_MARKER_DATA];
    let count = raw.len().min(MAX_MARKER_DATA);
    for (out, item) in payload.iter_mut().zip(raw) {
        *out = marker_data(item);
    }

    context.dispatcher().on_marker_event(&MarkerEvent {
        marker,
        kind,
        thread_id: None,
        data: &payload[..count],
    });
}

// ============================================================================
// Plugin API
// ============================================================================

fn load(table: *const HostCallbackTable, config: TraceConfig) -> i32 {
    let Some(table) = (unsafe { table.as_ref() }) else {
        return status(Err(TraceError::invalid_argument("host callback table is null")));
    };
    let host = Arc::new(FfiHost { table: *table });
    let builder = PluginContext::builder(host).config(config);
    status(plugin::create_with(builder).map(|_| ()))
}

/// Load the plugin with default configuration.
///
/// Idempotent while loaded; fails with `InvalidState` after unload.
#[no_mangle]
pub extern "C" fn frametrace_plugin_load(table: *const HostCallbackTable) -> i32 {
    clear_error();
    load(table, TraceConfig::default())
}

/// Load the plugin with a JSON configuration (null for defaults).
#[no_mangle]
pub extern "C" fn frametrace_plugin_load_with_config(
    table: *const HostCallbackTable,
    config_json: *const c_char,
) -> i32 {
    clear_error();
    if config_json.is_null() {
        return load(table, TraceConfig::default());
    }
    let json = match unsafe { CStr::from_ptr(config_json) }.to_str() {
        Ok(json) => json,
        Err(_) => {
            return status(Err(TraceError::invalid_argument(
                "configuration is not valid UTF-8",
            )))
        }
    };
    match TraceConfig::from_json(json) {
        Ok(config) => load(table, config),
        Err(err) => status(Err(err)),
    }
}

/// Unload the plugin. No-op if not loaded.
#[no_mangle]
pub extern "C" fn frametrace_plugin_unload() {
    plugin::unload();
}

/// Check that the plugin is loaded.
///
/// Returns `NotAvailable` if there is no live context.
#[no_mangle]
pub extern "C" fn frametrace_plugin_initialize() -> i32 {
    with_context(|_| Ok(()))
}

/// Frame boundary. No-op if the plugin is not loaded.
#[no_mangle]
pub extern "C" fn frametrace_plugin_flip_frame() {
    if let Some(context) = plugin::get() {
        context.flip_frame();
    }
}

/// Alias of `frametrace_plugin_flip_frame`.
#[no_mangle]
pub extern "C" fn frametrace_plugin_update() {
    frametrace_plugin_flip_frame();
}

/// 1 if the OS tracer was found, 0 otherwise.
#[no_mangle]
pub extern "C" fn frametrace_supports_native_trace() -> i32 {
    plugin::get().map_or(0, |context| i32::from(context.supports_native_trace()))
}

/// 1 if an external tracer is attached, 0 otherwise.
#[no_mangle]
pub extern "C" fn frametrace_supports_extern_trace() -> i32 {
    plugin::get().map_or(0, |context| i32::from(context.supports_extern_trace()))
}

// ============================================================================
// Trace API
// ============================================================================

/// Flip callback: receives the finished frame and returns the next buffer.
///
/// `events` is null when there is no previous buffer (first call).
pub type FlipFrameFn = unsafe extern "C" fn(FrameInfo, *mut EventRecord) -> *mut EventRecord;

struct CallbackExchange {
    flip: FlipFrameFn,
    capacity: usize,
}

// SAFETY: the caller of `frametrace_trace_enable` guarantees every buffer the
// callback returns holds `capacity` records until the next call.
unsafe impl FrameExchange for CallbackExchange {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn exchange(&mut self, info: FrameInfo, events: Option<&[EventRecord]>) -> *mut EventRecord {
        let events = events.map_or(ptr::null_mut(), |e| e.as_ptr().cast_mut());
        unsafe { (self.flip)(info, events) }
    }
}

fn rate_seconds_to_ms(rate_s: f32) -> u32 {
    if rate_s.is_nan() || rate_s <= 0.0 {
        return 0;
    }
    // Float-to-int `as` saturates.
    (rate_s * 1000.0) as u32
}

fn ensure_capture_disabled(context: &PluginContext) -> Result<()> {
    match context.capture().mode() {
        CaptureMode::Disabled => Ok(()),
        mode => Err(TraceError::invalid_state(format!(
            "capture is already enabled ({mode:?})"
        ))),
    }
}

/// Begin a one-shot capture into `buffer` (`capacity` records).
#[no_mangle]
pub extern "C" fn frametrace_trace_begin(buffer: *mut EventRecord, capacity: i32) -> i32 {
    with_context(|context| unsafe { context.capture().begin_trace_raw(buffer, capacity) })
}

/// End a one-shot capture, writing its summary to `info`.
#[no_mangle]
pub extern "C" fn frametrace_trace_end(info: *mut TraceInfo) -> i32 {
    with_context(|context| {
        let capture = context.capture();
        if capture.mode() != CaptureMode::OneShot {
            return Err(TraceError::invalid_state("one-shot capture is not enabled"));
        }
        if info.is_null() {
            return Err(TraceError::invalid_argument("trace info pointer is null"));
        }
        let completed = capture.end_trace()?;
        unsafe { info.write(completed.info) };
        Ok(())
    })
}

/// Enable frame capture driven by `flip`.
///
/// `rate_s` is the sampling interval in seconds; zero, negative or NaN
/// exchanges on every frame.
#[no_mangle]
pub extern "C" fn frametrace_trace_enable(
    flip: Option<FlipFrameFn>,
    capacity: i32,
    rate_s: f32,
) -> i32 {
    with_context(|context| {
        ensure_capture_disabled(context)?;
        let flip = flip.ok_or_else(|| TraceError::invalid_argument("flip callback is null"))?;
        let capacity = usize::try_from(capacity)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| TraceError::invalid_argument("buffer capacity must be positive"))?;

        let exchange = CallbackExchange { flip, capacity };
        context
            .capture()
            .enable(Box::new(exchange), rate_seconds_to_ms(rate_s))
    })
}

/// Disable frame capture, writing its summary to `info` if non-null.
#[no_mangle]
pub extern "C" fn frametrace_trace_disable(info: *mut TraceInfo) -> i32 {
    with_context(|context| {
        let summary = context.capture().disable()?;
        if !info.is_null() {
            unsafe { info.write(summary) };
        }
        Ok(())
    })
}

// ============================================================================
// External Tracer
// ============================================================================

/// Section info handed to an external tracer
#[repr(C)]
#[derive(Debug)]
pub struct CSectionInfo {
    /// Null-terminated UTF-8
    pub group_name: *const c_char,
    /// Null-terminated UTF-8
    pub name: *const c_char,
    pub thread_id: u64,
    /// RGBA color
    pub color: u32,
    pub padding: u32,
}

/// External tracer implemented in C
///
/// `is_tracing`, `enter_section` and `leave_section` are required.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExternTraceVTable {
    pub user_data: *mut c_void,
    pub is_tracing: Option<unsafe extern "C" fn(*mut c_void) -> bool>,
    pub flip: Option<unsafe extern "C" fn(*mut c_void)>,
    pub enter_section: Option<unsafe extern "C" fn(*mut c_void, *const CSectionInfo)>,
    pub leave_section: Option<unsafe extern "C" fn(*mut c_void, *const CSectionInfo)>,
    pub unload: Option<unsafe extern "C" fn(*mut c_void)>,
}

struct VTableSink {
    user_data: *mut c_void,
    is_tracing: unsafe extern "C" fn(*mut c_void) -> bool,
    enter_section: unsafe extern "C" fn(*mut c_void, *const CSectionInfo),
    leave_section: unsafe extern "C" fn(*mut c_void, *const CSectionInfo),
    flip: Option<unsafe extern "C" fn(*mut c_void)>,
    unload: Option<unsafe extern "C" fn(*mut c_void)>,
}

// SAFETY: an installed tracer must accept calls from any host thread.
unsafe impl Send for VTableSink {}
unsafe impl Sync for VTableSink {}

impl VTableSink {
    fn forward(
        &self,
        f: unsafe extern "C" fn(*mut c_void, *const CSectionInfo),
        section: &SectionInfo<'_>,
    ) {
        let group_name = Utf8Buffer::from_str_truncated(section.group_name);
        let name = Utf8Buffer::from_str_truncated(section.name);
        let info = CSectionInfo {
            group_name: group_name.as_c_ptr(),
            name: name.as_c_ptr(),
            thread_id: section.thread_id,
            color: section.color,
            padding: 0,
        };
        unsafe { f(self.user_data, &info) };
    }
}

impl TraceSink for VTableSink {
    fn name(&self) -> &'static str {
        "extern"
    }

    fn is_tracing(&self) -> bool {
        unsafe { (self.is_tracing)(self.user_data) }
    }

    fn enter_section(&self, section: &SectionInfo<'_>) {
        self.forward(self.enter_section, section);
    }

    fn leave_section(&self, section: &SectionInfo<'_>) {
        self.forward(self.leave_section, section);
    }

    fn flip(&self) {
        if let Some(flip) = self.flip {
            unsafe { flip(self.user_data) };
        }
    }

    fn unload(&self) {
        if let Some(unload) = self.unload {
            unsafe { unload(self.user_data) };
        }
    }
}

/// Install an external tracer. Must happen before `frametrace_plugin_load`.
#[no_mangle]
pub extern "C" fn frametrace_install_extern_trace(vtable: *const ExternTraceVTable) -> i32 {
    clear_error();
    let Some(vtable) = (unsafe { vtable.as_ref() }) else {
        return status(Err(TraceError::invalid_argument("extern trace vtable is null")));
    };
    let (Some(is_tracing), Some(enter_section), Some(leave_section)) =
        (vtable.is_tracing, vtable.enter_section, vtable.leave_section)
    else {
        return status(Err(TraceError::invalid_argument(
            "extern trace vtable is missing a required entry",
        )));
    };

    let sink = VTableSink {
        user_data: vtable.user_data,
        is_tracing,
        enter_section,
        leave_section,
        flip: vtable.flip,
        unload: vtable.unload,
    };
    status(install_extern_trace(Arc::new(sink)))
}
