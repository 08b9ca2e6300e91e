//! Native OS tracer
//!
//! Forwards section names to the platform's system tracer (`ATrace_*` on
//! Android). The library is probed once with `dlopen`; the tracer only
//! exists when all three entry points resolve, so there is never a
//! half-loaded handle.

use std::ffi::c_void;
use std::os::raw::c_char;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use tracing::{debug, info};

use super::event::SectionInfo;
use super::sink::TraceSink;
use crate::utils::Utf8Buffer;

/// Resolved entry points of the OS tracer
#[derive(Debug, Clone, Copy)]
pub struct NativeSymbols {
    pub is_enabled: unsafe extern "C" fn() -> bool,
    pub begin_section: unsafe extern "C" fn(*const c_char),
    pub end_section: unsafe extern "C" fn(),
}

/// Sink forwarding to the OS tracer
pub struct NativeTracer {
    symbols: NativeSymbols,
    library: AtomicPtr<c_void>,
    loaded: AtomicBool,
}

// SAFETY: the library handle is only touched by `unload`, which swaps it out
// atomically; the symbols are plain function pointers.
unsafe impl Send for NativeTracer {}
unsafe impl Sync for NativeTracer {}

impl NativeTracer {
    /// Open `library` and resolve the tracer entry points
    ///
    /// Returns `None` when the library or any symbol is missing.
    #[cfg(unix)]
    pub fn probe(library: &str) -> Option<Self> {
        let name = std::ffi::CString::new(library).ok()?;

        // SAFETY: `name` is a valid C string.
        let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            debug!(library, "Native tracer library not present");
            return None;
        }

        // SAFETY: `handle` is a live handle returned by dlopen.
        match unsafe { resolve(handle) } {
            Some(symbols) => {
                info!(library, "Native tracer loaded");
                Some(Self {
                    symbols,
                    library: AtomicPtr::new(handle),
                    loaded: AtomicBool::new(true),
                })
            }
            None => {
                debug!(library, "Native tracer symbols missing");
                // SAFETY: nothing resolved from the handle outlives it.
                unsafe { libc::dlclose(handle) };
                None
            }
        }
    }

    #[cfg(not(unix))]
    pub fn probe(library: &str) -> Option<Self> {
        debug!(library, "Native tracer probing unsupported on this platform");
        None
    }

    /// Build a tracer from already resolved entry points
    ///
    /// # Safety
    ///
    /// The functions must be callable from any thread for as long as the
    /// tracer is loaded.
    pub unsafe fn from_symbols(symbols: NativeSymbols) -> Self {
        Self {
            symbols,
            library: AtomicPtr::new(ptr::null_mut()),
            loaded: AtomicBool::new(true),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }
}

#[cfg(unix)]
unsafe fn resolve(handle: *mut c_void) -> Option<NativeSymbols> {
    let is_enabled = symbol(handle, c"ATrace_isEnabled")?;
    let begin_section = symbol(handle, c"ATrace_beginSection")?;
    let end_section = symbol(handle, c"ATrace_endSection")?;

    Some(NativeSymbols {
        is_enabled: std::mem::transmute::<*mut c_void, unsafe extern "C" fn() -> bool>(
            is_enabled,
        ),
        begin_section: std::mem::transmute::<*mut c_void, unsafe extern "C" fn(*const c_char)>(
            begin_section,
        ),
        end_section: std::mem::transmute::<*mut c_void, unsafe extern "C" fn()>(end_section),
    })
}

#[cfg(unix)]
unsafe fn symbol(handle: *mut c_void, name: &std::ffi::CStr) -> Option<*mut c_void> {
    let address = libc::dlsym(handle, name.as_ptr());
    (!address.is_null()).then_some(address)
}

#[cfg(unix)]
unsafe fn close(handle: *mut c_void) {
    libc::dlclose(handle);
}

#[cfg(not(unix))]
unsafe fn close(_handle: *mut c_void) {}

impl TraceSink for NativeTracer {
    fn name(&self) -> &'static str {
        "native"
    }

    fn is_tracing(&self) -> bool {
        // SAFETY: symbols stay valid while loaded.
        self.is_loaded() && unsafe { (self.symbols.is_enabled)() }
    }

    fn enter_section(&self, section: &SectionInfo<'_>) {
        if !self.is_loaded() {
            return;
        }
        // The OS tracer only takes a name.
        let name = Utf8Buffer::from_str_truncated(section.name);
        // SAFETY: `name` is NUL-terminated and outlives the call.
        unsafe { (self.symbols.begin_section)(name.as_c_ptr()) }
    }

    fn leave_section(&self, _section: &SectionInfo<'_>) {
        if !self.is_loaded() {
            return;
        }
        // SAFETY: symbols stay valid while loaded.
        unsafe { (self.symbols.end_section)() }
    }

    fn unload(&self) {
        if !self.loaded.swap(false, Ordering::AcqRel) {
            return;
        }
        let handle = self.library.swap(ptr::null_mut(), Ordering::AcqRel);
        if !handle.is_null() {
            // SAFETY: the handle came from dlopen and is closed exactly once.
            unsafe { close(handle) };
        }
        info!("Native tracer unloaded");
    }
}

impl std::fmt::Debug for NativeTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTracer")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
