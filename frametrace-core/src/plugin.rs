//! Plugin context
//!
//! Aggregates the sinks, the registry and the host handle. A process has at
//! most one context, created once on plugin load and torn down once on
//! unload; after that [`create`] fails closed with `ContextTornDown` instead
//! of building a fresh one.
//!
//! ```rust
//! use std::sync::Arc;
//! use frametrace_core::host::MockHost;
//! use frametrace_core::plugin::PluginContext;
//!
//! let context = PluginContext::builder(Arc::new(MockHost::new()))
//!     .without_native_tracer()
//!     .without_extern_trace()
//!     .build()
//!     .unwrap();
//! assert!(context.is_valid());
//! assert!(!context.supports_native_trace());
//!
//! context.unload();
//! assert!(!context.is_valid());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam::channel::Receiver;
use tracing::info;

use crate::config::TraceConfig;
use crate::dispatch::{Dispatcher, SinkSet};
use crate::error::{Result, TraceError};
use crate::host::HostCallbacks;
use crate::timing::{Clock, MonotonicClock};
use crate::trace::{
    extern_trace, CaptureSink, CapturedFrame, FrameChannel, NativeTracer, TraceSink,
};
use crate::utils::{HostUtils, SystemUtils};

static PLUGIN: OnceLock<PluginContext> = OnceLock::new();

enum NativeSource {
    Probe,
    Disabled,
    Provided(Arc<NativeTracer>),
}

enum ExternalSource {
    Installed,
    Disabled,
    Provided(Arc<dyn TraceSink>),
}

/// Builder for a [`PluginContext`]
pub struct PluginContextBuilder {
    host: Arc<dyn HostCallbacks>,
    config: TraceConfig,
    native: NativeSource,
    external: ExternalSource,
    utils: Option<Arc<dyn HostUtils>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PluginContextBuilder {
    pub fn new(host: Arc<dyn HostCallbacks>) -> Self {
        Self {
            host,
            config: TraceConfig::default(),
            native: NativeSource::Probe,
            external: ExternalSource::Installed,
            utils: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: TraceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this tracer instead of probing the OS library
    pub fn native_tracer(mut self, tracer: Arc<NativeTracer>) -> Self {
        self.native = NativeSource::Provided(tracer);
        self
    }

    pub fn without_native_tracer(mut self) -> Self {
        self.native = NativeSource::Disabled;
        self
    }

    /// Use this sink instead of the process-wide installed one
    pub fn extern_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.external = ExternalSource::Provided(sink);
        self
    }

    pub fn without_extern_trace(mut self) -> Self {
        self.external = ExternalSource::Disabled;
        self
    }

    /// Replace the thread id / string conversion utilities
    pub fn utils(mut self, utils: Arc<dyn HostUtils>) -> Self {
        self.utils = Some(utils);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<PluginContext> {
        self.config.validate()?;

        let native = match self.native {
            NativeSource::Probe if self.config.probe_native_tracer => {
                NativeTracer::probe(&self.config.native_library).map(Arc::new)
            }
            NativeSource::Provided(tracer) => Some(tracer),
            NativeSource::Probe | NativeSource::Disabled => None,
        };
        let external = match self.external {
            ExternalSource::Installed => extern_trace(),
            ExternalSource::Provided(sink) => Some(sink),
            ExternalSource::Disabled => None,
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let utils = self.utils.unwrap_or_else(|| Arc::new(SystemUtils));

        info!(
            native = native.is_some(),
            external = external.is_some(),
            clock = clock.name(),
            "Plugin context created"
        );

        let sinks = SinkSet {
            native,
            capture: Arc::new(CaptureSink::new(clock)),
            external,
        };
        let dispatcher = Dispatcher::new(self.host, sinks, utils, &self.config);

        Ok(PluginContext {
            dispatcher,
            config: self.config,
            bound: AtomicBool::new(true),
        })
    }
}

/// Everything the plugin needs between load and unload
pub struct PluginContext {
    dispatcher: Dispatcher,
    config: TraceConfig,
    bound: AtomicBool,
}

impl PluginContext {
    pub fn builder(host: Arc<dyn HostCallbacks>) -> PluginContextBuilder {
        PluginContextBuilder::new(host)
    }

    /// True until `unload`
    pub fn is_valid(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn capture(&self) -> &Arc<CaptureSink> {
        self.dispatcher.capture()
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Start frame capture through a [`FrameChannel`]
    ///
    /// The channel buffers up to `frame_queue_depth` undelivered frames;
    /// completed frames arrive on the returned receiver.
    pub fn enable_frame_capture(
        &self,
        capacity: usize,
        rate_ms: u32,
    ) -> Result<Receiver<CapturedFrame>> {
        let (channel, frames) = FrameChannel::new(capacity, self.config.frame_queue_depth);
        self.capture().enable(Box::new(channel), rate_ms)?;
        Ok(frames)
    }

    pub fn supports_native_trace(&self) -> bool {
        self.dispatcher.native().is_some()
    }

    pub fn supports_extern_trace(&self) -> bool {
        self.dispatcher.external().is_some()
    }

    /// Frame boundary; no-op once unloaded
    pub fn flip_frame(&self) {
        if self.is_valid() {
            self.dispatcher.flip_frame();
        }
    }

    /// Detach from the host and release optional sinks
    ///
    /// Idempotent. The context stays invalid for the rest of the process.
    pub fn unload(&self) {
        if !self.bound.swap(false, Ordering::AcqRel) {
            return;
        }
        self.dispatcher.detach_host();
        self.dispatcher.unload_sinks();
        info!("Plugin context unloaded");
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("valid", &self.is_valid())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Create the process-wide context with default settings
pub fn create(host: Arc<dyn HostCallbacks>) -> Result<&'static PluginContext> {
    create_with(PluginContext::builder(host))
}

/// Create the process-wide context
///
/// Returns the existing context if one is live, and `ContextTornDown` once
/// it has been unloaded.
pub fn create_with(builder: PluginContextBuilder) -> Result<&'static PluginContext> {
    if let Some(context) = PLUGIN.get() {
        return live(context);
    }
    // Losing a creation race drops our context in favor of the winner's.
    let _ = PLUGIN.set(builder.build()?);
    match PLUGIN.get() {
        Some(context) => live(context),
        None => Err(TraceError::ContextTornDown),
    }
}

/// The live process-wide context
pub fn get() -> Option<&'static PluginContext> {
    PLUGIN.get().filter(|context| context.is_valid())
}

/// Unload the process-wide context, if any
pub fn unload() {
    if let Some(context) = PLUGIN.get() {
        context.unload();
    }
}

fn live(context: &'static PluginContext) -> Result<&'static PluginContext> {
    if context.is_valid() {
        Ok(context)
    } else {
        Err(TraceError::ContextTornDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::host::MockHost;
    use crate::timing::MockClock;
    use crate::trace::{MemorySink, NativeSymbols};
    use std::os::raw::c_char;
    use std::sync::atomic::AtomicUsize;

    static UTILS_UNLOADS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn disabled() -> bool {
        false
    }
    unsafe extern "C" fn ignore_name(_: *const c_char) {}
    unsafe extern "C" fn ignore() {}

    struct CountingUtils;

    impl HostUtils for CountingUtils {
        fn thread_id(&self) -> u64 {
            1
        }

        fn utf16_to_utf8(&self, input: &[u16]) -> crate::utils::Utf8Buffer {
            crate::utils::decode_utf16(input)
        }

        fn unload(&self) {
            UTILS_UNLOADS.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn builder(host: Arc<MockHost>) -> PluginContextBuilder {
        PluginContext::builder(host)
            .without_native_tracer()
            .without_extern_trace()
            .clock(Arc::new(MockClock::new()))
    }

    #[test]
    fn test_capabilities_reflect_builder() {
        let host = Arc::new(MockHost::new());
        let native = unsafe {
            NativeTracer::from_symbols(NativeSymbols {
                is_enabled: disabled,
                begin_section: ignore_name,
                end_section: ignore,
            })
        };
        let context = builder(host)
            .native_tracer(Arc::new(native))
            .extern_trace(Arc::new(MemorySink::new()))
            .build()
            .unwrap();

        assert!(context.supports_native_trace());
        assert!(context.supports_extern_trace());
    }

    #[test]
    fn test_invalid_config_fails_build() {
        let err = builder(Arc::new(MockHost::new()))
            .config(TraceConfig::default().section_group_capacity(0))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_unload_detaches_and_is_idempotent() {
        let host = Arc::new(MockHost::new());
        let context = builder(host.clone())
            .utils(Arc::new(CountingUtils))
            .build()
            .unwrap();

        context.capture().begin_trace(4).unwrap();
        context.flip_frame();
        assert!(host.callbacks_registered());

        context.unload();
        context.unload();
        assert!(!context.is_valid());
        assert!(!host.callbacks_registered());
        assert_eq!(UTILS_UNLOADS.load(Ordering::SeqCst), 1);

        // Flipping an unloaded context does nothing.
        let before = host.state();
        context.flip_frame();
        assert_eq!(host.state(), before);
    }

    #[test]
    fn test_frame_capture_queue_follows_config() {
        let context = builder(Arc::new(MockHost::new()))
            .config(TraceConfig::default().frame_queue_depth(2))
            .build()
            .unwrap();
        let frames = context.enable_frame_capture(4, 0).unwrap();
        assert_eq!(frames.capacity(), Some(2));

        // Frames beyond the queue depth are dropped, not blocked on.
        for _ in 0..4 {
            context.capture().flip();
        }
        assert_eq!(frames.len(), 2);
        context.capture().disable().unwrap();

        let err = context.enable_frame_capture(0, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
