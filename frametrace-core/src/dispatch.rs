//! Dispatch layer
//!
//! Bridges host category/marker callbacks to the sink set:
//!
//! - category creation fills the section group registry
//! - marker creation subscribes to the marker's begin/end events
//! - begin/end events are resolved into a [`SectionInfo`] and fanned out to
//!   every sink that currently reports itself as tracing
//! - the frame boundary (un)registers host callbacks when overall activity
//!   changes, then flips every sink
//!
//! Sinks are visited in a fixed order: native, capture, external.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::config::TraceConfig;
use crate::host::{CategoryDesc, HostCallbacks, MarkerDesc, MarkerEvent, MarkerEventKind, MarkerId};
use crate::trace::{
    CaptureSink, NativeTracer, SectionGroup, SectionGroupRegistry, SectionInfo, TraceSink,
};
use crate::utils::{utf16_units, HostUtils, Utf8Buffer, UTF8_BUFFER_CAPACITY};

/// The sinks a dispatcher forwards to
pub struct SinkSet {
    pub native: Option<Arc<NativeTracer>>,
    pub capture: Arc<CaptureSink>,
    pub external: Option<Arc<dyn TraceSink>>,
}

impl SinkSet {
    /// Only the capture sink
    pub fn capture_only(capture: Arc<CaptureSink>) -> Self {
        Self {
            native: None,
            capture,
            external: None,
        }
    }

    fn ordered(&self) -> Vec<Arc<dyn TraceSink>> {
        let mut sinks: Vec<Arc<dyn TraceSink>> = Vec::with_capacity(3);
        if let Some(native) = &self.native {
            sinks.push(native.clone());
        }
        sinks.push(self.capture.clone());
        if let Some(external) = &self.external {
            sinks.push(external.clone());
        }
        sinks
    }
}

/// Routes host events to the active sinks
pub struct Dispatcher {
    host: Arc<dyn HostCallbacks>,
    sinks: SinkSet,
    ordered: Vec<Arc<dyn TraceSink>>,
    registry: SectionGroupRegistry,
    utils: Arc<dyn HostUtils>,
    default_marker_name: String,
    default_group_color: u32,
    default_marker: OnceLock<MarkerId>,
    callbacks_registered: AtomicBool,
    host_attached: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        host: Arc<dyn HostCallbacks>,
        sinks: SinkSet,
        utils: Arc<dyn HostUtils>,
        config: &TraceConfig,
    ) -> Self {
        let ordered = sinks.ordered();
        Self {
            host,
            sinks,
            ordered,
            registry: SectionGroupRegistry::new(config.section_group_capacity),
            utils,
            default_marker_name: config.default_marker_name.clone(),
            default_group_color: config.default_group_color,
            default_marker: OnceLock::new(),
            callbacks_registered: AtomicBool::new(false),
            host_attached: AtomicBool::new(true),
        }
    }

    /// Host created a category
    ///
    /// Categories whose id is already populated are replays and ignored.
    pub fn on_create_category(&self, category: &CategoryDesc<'_>) {
        let group = SectionGroup::new(category.name, category.color);
        // Ids beyond the capacity are logged and counted by the registry.
        if let Ok(false) = self.registry.add(usize::from(category.id), group) {
            debug!(id = category.id, "Category already registered");
        }
    }

    /// Host created a marker
    pub fn on_create_marker(&self, marker: &MarkerDesc<'_>) {
        if marker.name == self.default_marker_name && self.default_marker.set(marker.id).is_ok() {
            debug!(marker = marker.name, "Default marker found");
        }
        self.host.register_marker_event_callback(marker.id);
    }

    /// Host reported a marker begin or end
    pub fn on_marker_event(&self, event: &MarkerEvent<'_>) {
        let (group_name, color) = match self.registry.get(usize::from(event.marker.category_id)) {
            Some(group) => (group.name.as_str(), group.color),
            None => ("", self.default_group_color),
        };
        let thread_id = event
            .thread_id
            .unwrap_or_else(|| self.utils.thread_id());

        let mut section = SectionInfo {
            group_name,
            name: event.marker.name,
            thread_id,
            color,
        };

        // The default marker carries its real name as UTF-16 in the second
        // payload element.
        let decoded: Utf8Buffer;
        if event.kind == MarkerEventKind::Begin
            && event.data.len() > 1
            && self.is_default_marker(event.marker.id)
        {
            let mut units = [0u16; UTF8_BUFFER_CAPACITY];
            let count = utf16_units(event.data[1].bytes, &mut units);
            decoded = self.utils.utf16_to_utf8(&units[..count]);
            section.name = decoded.as_str();
        }

        match event.kind {
            MarkerEventKind::Begin => {
                for sink in &self.ordered {
                    if sink.is_tracing() {
                        sink.enter_section(&section);
                    }
                }
            }
            MarkerEventKind::End => {
                for sink in &self.ordered {
                    if sink.is_tracing() {
                        sink.leave_section(&section);
                    }
                }
            }
        }
    }

    /// Frame boundary
    pub fn flip_frame(&self) {
        let active = self.any_active();
        if self.host_attached.load(Ordering::Acquire)
            && active != self.callbacks_registered.load(Ordering::Acquire)
        {
            if active {
                self.host.register_category_callback();
                self.host.register_marker_callback();
                info!("Host callbacks registered");
            } else {
                self.unregister_host_callbacks();
                info!("Host callbacks unregistered");
            }
            self.callbacks_registered.store(active, Ordering::Release);
        }

        for sink in &self.ordered {
            sink.flip();
        }
    }

    /// Whether any sink is tracing
    pub fn any_active(&self) -> bool {
        self.ordered.iter().any(|sink| sink.is_tracing())
    }

    /// Drop every host callback and stop talking to the host
    pub fn detach_host(&self) {
        if self.host_attached.swap(false, Ordering::AcqRel) {
            self.unregister_host_callbacks();
            self.callbacks_registered.store(false, Ordering::Release);
        }
    }

    /// Give the optional sinks a chance to release their resources
    pub fn unload_sinks(&self) {
        if let Some(native) = &self.sinks.native {
            native.unload();
        }
        if let Some(external) = &self.sinks.external {
            external.unload();
        }
        self.utils.unload();
    }

    pub fn callbacks_registered(&self) -> bool {
        self.callbacks_registered.load(Ordering::Acquire)
    }

    pub fn is_default_marker(&self, marker: MarkerId) -> bool {
        self.default_marker.get() == Some(&marker)
    }

    pub fn registry(&self) -> &SectionGroupRegistry {
        &self.registry
    }

    pub fn capture(&self) -> &Arc<CaptureSink> {
        &self.sinks.capture
    }

    pub fn native(&self) -> Option<&Arc<NativeTracer>> {
        self.sinks.native.as_ref()
    }

    pub fn external(&self) -> Option<&Arc<dyn TraceSink>> {
        self.sinks.external.as_ref()
    }

    pub fn utils(&self) -> &Arc<dyn HostUtils> {
        &self.utils
    }

    fn unregister_host_callbacks(&self) {
        self.host.unregister_marker_event_callbacks();
        self.host.unregister_marker_callback();
        self.host.unregister_category_callback();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "sinks",
                &self.ordered.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("registry", &self.registry)
            .field("callbacks_registered", &self.callbacks_registered())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MarkerData, MockHost};
    use crate::timing::MockClock;
    use crate::trace::{EventKind, MemorySink, DEFAULT_GROUP_COLOR};
    use crate::utils::SystemUtils;

    struct FixedThread(u64);

    impl HostUtils for FixedThread {
        fn thread_id(&self) -> u64 {
            self.0
        }

        fn utf16_to_utf8(&self, input: &[u16]) -> Utf8Buffer {
            crate::utils::decode_utf16(input)
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        host: Arc<MockHost>,
        external: Arc<MemorySink>,
    }

    fn fixture(external: MemorySink) -> Fixture {
        let host = Arc::new(MockHost::new());
        let external = Arc::new(external);
        let sinks = SinkSet {
            native: None,
            capture: Arc::new(CaptureSink::new(Arc::new(MockClock::new()))),
            external: Some(external.clone()),
        };
        let dispatcher = Dispatcher::new(
            host.clone(),
            sinks,
            Arc::new(FixedThread(42)),
            &TraceConfig::default(),
        );
        Fixture {
            dispatcher,
            host,
            external,
        }
    }

    fn marker(id: u64, category_id: u16, name: &str) -> MarkerDesc<'_> {
        MarkerDesc {
            id: MarkerId(id),
            category_id,
            name,
        }
    }

    fn utf16_bytes(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_ne_bytes).collect()
    }

    #[test]
    fn test_category_creation_fills_registry_and_ignores_replays() {
        let f = fixture(MemorySink::new());
        let physics = CategoryDesc {
            id: 0,
            name: "Physics",
            color: 0xff0000,
        };

        f.dispatcher.on_create_category(&physics);
        f.dispatcher.on_create_category(&physics);

        assert_eq!(f.dispatcher.registry().len(), 1);
        assert_eq!(f.dispatcher.registry().get(0).unwrap().name, "Physics");
    }

    #[test]
    fn test_out_of_order_categories_resolve_by_id() {
        let f = fixture(MemorySink::new());
        f.dispatcher.on_create_category(&CategoryDesc {
            id: 1,
            name: "Render",
            color: 0x00ff00,
        });
        f.dispatcher.on_create_category(&CategoryDesc {
            id: 0,
            name: "Physics",
            color: 0xff0000,
        });
        assert_eq!(f.dispatcher.registry().len(), 2);

        f.dispatcher.on_marker_event(&MarkerEvent::begin(marker(1, 0, "Step")));
        f.dispatcher.on_marker_event(&MarkerEvent::begin(marker(2, 1, "Draw")));

        let events = f.external.events();
        assert_eq!(events[0].group_name(), "Physics");
        assert_eq!(events[0].color, 0xff0000);
        assert_eq!(events[1].group_name(), "Render");
        assert_eq!(events[1].color, 0x00ff00);
    }

    #[test]
    fn test_events_resolve_group_and_thread() {
        let f = fixture(MemorySink::new());
        f.dispatcher.on_create_category(&CategoryDesc {
            id: 0,
            name: "Physics",
            color: 0xff0000,
        });
        let update = marker(1, 0, "Update");

        f.dispatcher.on_marker_event(&MarkerEvent::begin(update).on_thread(7));
        f.dispatcher.on_marker_event(&MarkerEvent::end(update));

        let events = f.external.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].group_name(), "Physics");
        assert_eq!(events[0].color, 0xff0000);
        assert_eq!(events[0].thread_id, 7);
        assert_eq!(events[1].kind(), Some(EventKind::LeaveSection));
        assert_eq!(events[1].thread_id, 42);
    }

    #[test]
    fn test_unknown_category_uses_default_group() {
        let f = fixture(MemorySink::new());
        f.dispatcher.on_marker_event(&MarkerEvent::begin(marker(1, 9, "Orphan")));

        let events = f.external.events();
        assert_eq!(events[0].group_name(), "");
        assert_eq!(events[0].color, DEFAULT_GROUP_COLOR);
    }

    #[test]
    fn test_default_marker_payload_overrides_name_on_begin() {
        let f = fixture(MemorySink::new());
        let default = marker(5, 0, "Profiler.Default");
        f.dispatcher.on_create_marker(&default);
        assert!(f.dispatcher.is_default_marker(MarkerId(5)));
        assert!(f.host.has_marker_event_callback(MarkerId(5)));

        let name = utf16_bytes("LoadScene");
        let data = [
            MarkerData { kind: 0, bytes: &[] },
            MarkerData {
                kind: 1,
                bytes: &name,
            },
        ];
        f.dispatcher
            .on_marker_event(&MarkerEvent::begin(default).with_data(&data));
        f.dispatcher
            .on_marker_event(&MarkerEvent::end(default).with_data(&data));

        let events = f.external.events();
        assert_eq!(events[0].name(), "LoadScene");
        assert_eq!(events[1].name(), "Profiler.Default");
    }

    #[test]
    fn test_long_payload_name_is_truncated_not_emptied() {
        let f = fixture(MemorySink::new());
        let default = marker(5, 0, "Profiler.Default");
        f.dispatcher.on_create_marker(&default);

        let name = utf16_bytes(&format!("{}😀", "a".repeat(127)));
        let data = [
            MarkerData { kind: 0, bytes: &[] },
            MarkerData {
                kind: 1,
                bytes: &name,
            },
        ];
        f.dispatcher
            .on_marker_event(&MarkerEvent::begin(default).with_data(&data));

        // The record field is narrower still; the decoded name was not lost.
        let events = f.external.events();
        assert_eq!(events[0].name(), "a".repeat(31));
    }

    #[test]
    fn test_default_marker_match_is_exact() {
        let f = fixture(MemorySink::new());
        f.dispatcher
            .on_create_marker(&marker(5, 0, "Profiler.DefaultX"));
        assert!(!f.dispatcher.is_default_marker(MarkerId(5)));
    }

    #[test]
    fn test_inactive_sinks_receive_nothing() {
        let f = fixture(MemorySink::inactive());
        f.dispatcher.on_marker_event(&MarkerEvent::begin(marker(1, 0, "Idle")));
        assert_eq!(f.external.event_count(), 0);
        assert!(!f.dispatcher.any_active());
    }

    #[test]
    fn test_flip_toggles_host_callbacks_with_activity() {
        let f = fixture(MemorySink::inactive());
        f.dispatcher.flip_frame();
        assert!(!f.host.callbacks_registered());

        f.dispatcher.capture().begin_trace(8).unwrap();
        f.dispatcher.flip_frame();
        assert!(f.host.callbacks_registered());
        assert!(f.dispatcher.callbacks_registered());

        f.dispatcher.flip_frame();
        assert_eq!(f.host.state().registrations, 2);

        f.dispatcher.capture().end_trace().unwrap();
        f.dispatcher.flip_frame();
        assert!(!f.host.callbacks_registered());
        assert_eq!(f.host.state().unregistrations, 3);
    }

    #[test]
    fn test_detach_host_unregisters_once() {
        let host = Arc::new(MockHost::new());
        let capture = Arc::new(CaptureSink::new(Arc::new(MockClock::new())));
        let dispatcher = Dispatcher::new(
            host.clone(),
            SinkSet::capture_only(capture.clone()),
            Arc::new(SystemUtils),
            &TraceConfig::default(),
        );

        capture.begin_trace(4).unwrap();
        dispatcher.flip_frame();
        dispatcher.detach_host();
        dispatcher.detach_host();
        assert!(!host.callbacks_registered());
        assert_eq!(host.state().unregistrations, 3);

        // A detached dispatcher never re-registers.
        dispatcher.flip_frame();
        assert!(!host.callbacks_registered());
    }
}
