//! Capture sink
//!
//! The sink driven by an in-process consumer. It records timestamped
//! [`EventRecord`]s into storage it is handed and supports two modes:
//!
//! - **One-shot**: `begin_trace` / `end_trace` into a single flat buffer.
//! - **Frame exchange**: `enable` / `disable` with a [`FrameExchange`] that
//!   trades the filled buffer for a fresh one on sampled flips.
//!
//! Only one mode can be active at a time.
//!
//! ## Hot path
//!
//! `enter_section` / `leave_section` read one atomic flag, bump the ring
//! buffer cursor and write the record. They never lock, log or allocate.
//! Everything else goes through the control mutex and is expected to be
//! called from a single control thread.
//!
//! ## Teardown
//!
//! Writers register on an in-flight counter for the duration of a record.
//! `end_trace` and `disable` clear the enabled flag and wait for the counter
//! to drain before reading the final count or releasing storage, so no slot
//! outlives the buffer it points into.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::{Backoff, CachePadded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::buffer::EventRingBuffer;
use super::event::{EventKind, EventRecord, FrameInfo, SectionInfo, TraceInfo};
use super::exchange::FrameExchange;
use super::sink::TraceSink;
use crate::error::{Result, TraceError};
use crate::timing::{Clock, FrameTimer, MonotonicClock};

/// Active capture mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Disabled,
    OneShot,
    Frame,
}

/// Result of a finished one-shot capture
#[derive(Debug, Clone)]
pub struct CompletedTrace {
    pub info: TraceInfo,
    /// Recorded events; empty when the caller supplied the storage
    pub events: Vec<EventRecord>,
}

/// Heap storage owned by the sink for safe one-shot capture
struct OwnedStorage {
    records: NonNull<[EventRecord]>,
}

// SAFETY: the storage is uniquely owned; other threads only reach it through
// slots handed out by the ring buffer.
unsafe impl Send for OwnedStorage {}

impl OwnedStorage {
    fn new(capacity: usize) -> Self {
        let records = vec![EventRecord::EMPTY; capacity].into_boxed_slice();
        Self {
            records: NonNull::from(Box::leak(records)),
        }
    }

    fn base(&self) -> *mut EventRecord {
        self.records.as_ptr() as *mut EventRecord
    }
}

impl Drop for OwnedStorage {
    fn drop(&mut self) {
        // SAFETY: built from `Box::leak` in `new` and freed only here.
        unsafe { drop(Box::from_raw(self.records.as_ptr())) }
    }
}

struct Control {
    mode: CaptureMode,
    capacity: u32,
    frame_index: u64,
    rate_ns: u64,
    accumulated_ns: u64,
    exchange: Option<Box<dyn FrameExchange>>,
    owned: Option<OwnedStorage>,
}

impl Control {
    fn new() -> Self {
        Self {
            mode: CaptureMode::Disabled,
            capacity: 0,
            frame_index: 0,
            rate_ns: 0,
            accumulated_ns: 0,
            exchange: None,
            owned: None,
        }
    }

    fn ensure_disabled(&self) -> Result<()> {
        match self.mode {
            CaptureMode::Disabled => Ok(()),
            mode => Err(TraceError::invalid_state(format!(
                "capture is already enabled ({mode:?})"
            ))),
        }
    }
}

/// Registration of a thread that may hold a slot
struct WriterGuard<'a>(&'a AtomicUsize);

impl<'a> WriterGuard<'a> {
    #[inline]
    fn enter(writers: &'a AtomicUsize) -> Self {
        writers.fetch_add(1, Ordering::SeqCst);
        Self(writers)
    }
}

impl Drop for WriterGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

fn checked_capacity(capacity: usize) -> Result<u32> {
    if capacity == 0 {
        return Err(TraceError::invalid_argument("buffer capacity must be positive"));
    }
    u32::try_from(capacity).map_err(|_| {
        TraceError::invalid_argument(format!("buffer capacity {capacity} exceeds u32::MAX"))
    })
}

/// Sink recording events for an in-process consumer
pub struct CaptureSink {
    enabled: AtomicBool,
    overflowed: AtomicBool,
    /// Threads between the enabled check and the record write
    writers: CachePadded<AtomicUsize>,
    events: EventRingBuffer,
    /// Reference point of record timestamps; reset on every exchange
    frame_timer: FrameTimer,
    /// Drives the sampling accumulator; reset on every flip
    tick_timer: FrameTimer,
    control: Mutex<Control>,
}

impl CaptureSink {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            overflowed: AtomicBool::new(false),
            writers: CachePadded::new(AtomicUsize::new(0)),
            events: EventRingBuffer::new(),
            frame_timer: FrameTimer::new(clock.clone()),
            tick_timer: FrameTimer::new(clock),
            control: Mutex::new(Control::new()),
        }
    }

    /// Start a one-shot capture into sink-owned storage
    pub fn begin_trace(&self, capacity: usize) -> Result<()> {
        let mut control = self.control.lock();
        control.ensure_disabled()?;
        let capacity = checked_capacity(capacity)?;

        let storage = OwnedStorage::new(capacity as usize);
        // SAFETY: the storage holds `capacity` records and is kept in
        // `control.owned` until `end_trace` detaches the buffer.
        unsafe { self.events.initialize(storage.base(), capacity) };
        control.owned = Some(storage);
        control.capacity = capacity;
        self.start(&mut control, CaptureMode::OneShot);
        Ok(())
    }

    /// Start a one-shot capture into caller-owned storage
    ///
    /// # Safety
    ///
    /// A non-null `buffer` must be valid for writes of `capacity` records
    /// until `end_trace` returns. No write reaches it after that.
    pub unsafe fn begin_trace_raw(&self, buffer: *mut EventRecord, capacity: i32) -> Result<()> {
        let mut control = self.control.lock();
        control.ensure_disabled()?;
        if buffer.is_null() {
            return Err(TraceError::invalid_argument("trace buffer is null"));
        }
        let capacity = usize::try_from(capacity)
            .map_err(|_| TraceError::invalid_argument("buffer capacity must be positive"))
            .and_then(checked_capacity)?;

        self.events.initialize(buffer, capacity);
        control.capacity = capacity;
        self.start(&mut control, CaptureMode::OneShot);
        Ok(())
    }

    /// Stop a one-shot capture and return its summary
    pub fn end_trace(&self) -> Result<CompletedTrace> {
        let mut control = self.control.lock();
        if control.mode != CaptureMode::OneShot {
            return Err(TraceError::invalid_state("one-shot capture is not enabled"));
        }
        self.quiesce();

        let info = self.trace_info();
        let events = match &control.owned {
            Some(storage) => {
                // SAFETY: the first `event_count` slots of the owned storage
                // were handed out and written by the ring buffer.
                let recorded = unsafe {
                    std::slice::from_raw_parts(storage.base(), info.event_count as usize)
                };
                recorded.to_vec()
            }
            None => Vec::new(),
        };

        self.events.detach();
        self.overflowed.store(false, Ordering::Release);
        // No writer is in flight, so the storage can go.
        control.owned = None;
        control.mode = CaptureMode::Disabled;

        info!(
            events = info.event_count,
            overflowed = info.overflowed(),
            "One-shot capture ended"
        );
        Ok(CompletedTrace { info, events })
    }

    /// Start frame-exchange capture
    ///
    /// Storage for the first frame comes from an initial `exchange` call with
    /// no events. `rate_ms` gates how often a sampled flip exchanges buffers;
    /// zero exchanges on every flip.
    pub fn enable(&self, mut exchange: Box<dyn FrameExchange>, rate_ms: u32) -> Result<()> {
        let mut control = self.control.lock();
        control.ensure_disabled()?;
        let capacity = checked_capacity(exchange.capacity())?;

        let base = exchange.exchange(FrameInfo::default(), None);
        if base.is_null() {
            return Err(TraceError::invalid_argument(
                "flip callback returned no storage for the first frame",
            ));
        }

        // SAFETY: `FrameExchange` guarantees `base` holds `capacity` records
        // until the next exchange.
        unsafe { self.events.initialize(base, capacity) };
        control.exchange = Some(exchange);
        control.capacity = capacity;
        control.frame_index = 0;
        control.rate_ns = u64::from(rate_ms) * 1_000_000;
        control.accumulated_ns = 0;
        self.start(&mut control, CaptureMode::Frame);
        Ok(())
    }

    /// Stop frame-exchange capture
    ///
    /// Waits for in-flight writers, then hands the partially filled buffer to
    /// the exchange's `finish` hook before the sink detaches and drops it.
    pub fn disable(&self) -> Result<TraceInfo> {
        let mut control = self.control.lock();
        if control.mode != CaptureMode::Frame {
            return Err(TraceError::invalid_state("frame capture is not enabled"));
        }
        self.quiesce();

        let info = self.trace_info();
        let frame_index = control.frame_index;
        let base = self.events.base();
        let frame = FrameInfo {
            frame_index,
            frame_duration_ms: self.frame_timer.flip_ms(),
            event_count: info.event_count,
            did_run_out_of_event_memory: info.did_run_out_of_event_memory,
        };

        if let Some(mut exchange) = control.exchange.take() {
            let events = (!base.is_null()).then(|| {
                // SAFETY: the exchange still owns the storage; the first
                // `event_count` records were written this frame.
                unsafe { std::slice::from_raw_parts(base, info.event_count as usize) }
            });
            exchange.finish(frame, events);
        }

        self.events.detach();
        self.overflowed.store(false, Ordering::Release);
        control.mode = CaptureMode::Disabled;

        info!(
            frames = frame_index,
            events = info.event_count,
            overflowed = info.overflowed(),
            "Frame capture disabled"
        );
        Ok(info)
    }

    /// Frame boundary
    ///
    /// Accumulates elapsed time and, once the sampling rate is reached,
    /// exchanges the filled buffer for fresh storage. Between sampled flips
    /// recording continues into the same buffer.
    pub fn flip(&self) {
        let mut control = self.control.lock();
        if control.mode != CaptureMode::Frame {
            return;
        }

        let accumulated = control
            .accumulated_ns
            .saturating_add(self.tick_timer.flip_ns());
        if accumulated < control.rate_ns {
            control.accumulated_ns = accumulated;
            return;
        }

        let event_count = self.events.recorded();
        let info = FrameInfo {
            frame_index: control.frame_index,
            frame_duration_ms: self.frame_timer.flip_ms(),
            event_count,
            did_run_out_of_event_memory: u32::from(self.overflowed.load(Ordering::Acquire)),
        };
        let base = self.events.base();
        let events = (!base.is_null()).then(|| {
            // SAFETY: storage from the previous exchange, still owned by it;
            // the first `event_count` records were written this frame.
            unsafe { std::slice::from_raw_parts(base, event_count as usize) }
        });

        let capacity = control.capacity;
        let next = match control.exchange.as_mut() {
            Some(exchange) => exchange.exchange(info, events),
            None => std::ptr::null_mut(),
        };

        if next.is_null() {
            warn!(
                frame_index = info.frame_index,
                "Flip callback returned no storage; events dropped until next exchange"
            );
            self.events.detach();
        } else {
            // SAFETY: `FrameExchange` guarantees `next` holds `capacity`
            // records until the following exchange.
            unsafe { self.events.initialize(next, capacity) };
        }
        self.overflowed.store(false, Ordering::Release);

        control.frame_index += 1;
        control.accumulated_ns = match control.rate_ns {
            0 => 0,
            rate => accumulated % rate,
        };
        debug!(
            frame_index = info.frame_index,
            events = event_count,
            "Frame exchanged"
        );
    }

    pub fn is_tracing(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> CaptureMode {
        self.control.lock().mode
    }

    /// Index of the frame currently being recorded
    pub fn frame_index(&self) -> u64 {
        self.control.lock().frame_index
    }

    /// Records written since the last exchange
    pub fn recorded(&self) -> u32 {
        self.events.recorded()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    fn start(&self, control: &mut Control, mode: CaptureMode) {
        self.overflowed.store(false, Ordering::Release);
        self.frame_timer.reset();
        self.tick_timer.reset();
        control.mode = mode;
        self.enabled.store(true, Ordering::Release);
        info!(?mode, capacity = control.capacity, "Capture enabled");
    }

    /// Stop new records and wait until every in-flight writer has finished
    fn quiesce(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        let backoff = Backoff::new();
        while self.writers.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
    }

    fn trace_info(&self) -> TraceInfo {
        TraceInfo {
            duration_ns: self.frame_timer.timestamp_ns(),
            event_count: self.events.recorded(),
            did_run_out_of_event_memory: u32::from(self.overflowed.load(Ordering::Acquire)),
        }
    }

    #[inline]
    fn record(&self, kind: EventKind, section: &SectionInfo<'_>) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let _writer = WriterGuard::enter(&self.writers);
        // Either `quiesce` sees this writer or this load sees the teardown.
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        match self.events.allocate() {
            Some(slot) => {
                slot.write(EventRecord::new(kind, section, self.frame_timer.timestamp_ns()))
            }
            None => self.overflowed.store(true, Ordering::Relaxed),
        }
    }
}

impl Default for CaptureSink {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::new()))
    }
}

impl TraceSink for CaptureSink {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn is_tracing(&self) -> bool {
        CaptureSink::is_tracing(self)
    }

    fn enter_section(&self, section: &SectionInfo<'_>) {
        self.record(EventKind::EnterSection, section);
    }

    fn leave_section(&self, section: &SectionInfo<'_>) {
        self.record(EventKind::LeaveSection, section);
    }

    fn flip(&self) {
        CaptureSink::flip(self);
    }
}

impl std::fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSink")
            .field("enabled", &self.is_tracing())
            .field("overflowed", &self.overflowed())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::timing::MockClock;
    use crate::trace::exchange::FrameChannel;
    use crossbeam::channel::{self, Receiver, Sender};
    use std::thread;
    use std::time::Duration;

    const SECTION: SectionInfo<'static> = SectionInfo {
        group_name: "Physics",
        name: "Update",
        thread_id: 7,
        color: 0xff0000,
    };

    fn sink() -> (CaptureSink, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        (CaptureSink::new(clock.clone()), clock)
    }

    /// Clock that parks the first read after it is armed until released
    struct GatedClock {
        armed: AtomicBool,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl Clock for GatedClock {
        fn now_ns(&self) -> u64 {
            if self.armed.swap(false, Ordering::SeqCst) {
                let _ = self.entered.send(());
                let _ = self.release.recv();
            }
            0
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    /// Returns the clock, a receiver signalled once a reader is parked and
    /// the sender that releases it
    fn gated_clock() -> (Arc<GatedClock>, Receiver<()>, Sender<()>) {
        let (entered, parked) = channel::bounded(1);
        let (release, released) = channel::bounded(1);
        let clock = Arc::new(GatedClock {
            armed: AtomicBool::new(false),
            entered,
            release: released,
        });
        (clock, parked, release)
    }

    const STRAGGLER: SectionInfo<'static> = SectionInfo {
        thread_id: 999,
        ..SECTION
    };

    /// Exchange that hands out a single buffer once, then null
    struct OneBuffer {
        storage: Vec<EventRecord>,
        calls: usize,
    }

    unsafe impl FrameExchange for OneBuffer {
        fn capacity(&self) -> usize {
            self.storage.len()
        }

        fn exchange(&mut self, _: FrameInfo, _: Option<&[EventRecord]>) -> *mut EventRecord {
            self.calls += 1;
            if self.calls == 1 {
                self.storage.as_mut_ptr()
            } else {
                std::ptr::null_mut()
            }
        }
    }

    #[test]
    fn test_one_shot_round_trip() {
        let (sink, clock) = sink();
        sink.begin_trace(10).unwrap();

        sink.enter_section(&SECTION);
        clock.advance(Duration::from_nanos(500_000));
        sink.leave_section(&SECTION);

        let trace = sink.end_trace().unwrap();
        assert_eq!(trace.info.event_count, 2);
        assert_eq!(trace.info.duration_ns, 500_000);
        assert!(!trace.info.overflowed());
        assert_eq!(trace.events[0].kind(), Some(EventKind::EnterSection));
        assert_eq!(trace.events[1].timestamp_ns, 500_000);
        assert!(!sink.is_tracing());
    }

    #[test]
    fn test_one_shot_overflow() {
        let (sink, _) = sink();
        sink.begin_trace(3).unwrap();
        for _ in 0..5 {
            sink.enter_section(&SECTION);
        }
        assert!(sink.overflowed());

        let trace = sink.end_trace().unwrap();
        assert_eq!(trace.info.event_count, 3);
        assert!(trace.info.overflowed());
        assert!(!sink.overflowed());
    }

    #[test]
    fn test_raw_begin_rejects_bad_arguments_and_keeps_state() {
        let (sink, _) = sink();
        let mut storage = vec![EventRecord::EMPTY; 4];

        let null = unsafe { sink.begin_trace_raw(std::ptr::null_mut(), 4) };
        assert_eq!(null.unwrap_err().code(), ErrorCode::InvalidArgument);
        let zero = unsafe { sink.begin_trace_raw(storage.as_mut_ptr(), 0) };
        assert_eq!(zero.unwrap_err().code(), ErrorCode::InvalidArgument);
        let negative = unsafe { sink.begin_trace_raw(storage.as_mut_ptr(), -5) };
        assert_eq!(negative.unwrap_err().code(), ErrorCode::InvalidArgument);
        assert_eq!(sink.mode(), CaptureMode::Disabled);

        unsafe { sink.begin_trace_raw(storage.as_mut_ptr(), 4) }.unwrap();
        sink.enter_section(&SECTION);
        let trace = sink.end_trace().unwrap();
        assert_eq!(trace.info.event_count, 1);
        assert!(trace.events.is_empty());
        assert_eq!(storage[0].name(), "Update");
    }

    #[test]
    fn test_modes_are_exclusive() {
        let (sink, _) = sink();
        sink.begin_trace(4).unwrap();

        let (channel, _rx) = FrameChannel::new(4, 1);
        let err = sink.enable(Box::new(channel), 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert_eq!(sink.disable().unwrap_err().code(), ErrorCode::InvalidState);
        assert_eq!(sink.begin_trace(4).unwrap_err().code(), ErrorCode::InvalidState);
        sink.end_trace().unwrap();
    }

    #[test]
    fn test_double_enable_and_disable_while_disabled() {
        let (sink, _) = sink();
        assert_eq!(sink.disable().unwrap_err().code(), ErrorCode::InvalidState);
        assert_eq!(sink.end_trace().unwrap_err().code(), ErrorCode::InvalidState);

        let (first, _rx1) = FrameChannel::new(4, 1);
        let (second, _rx2) = FrameChannel::new(4, 1);
        sink.enable(Box::new(first), 0).unwrap();
        let err = sink.enable(Box::new(second), 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        sink.disable().unwrap();
    }

    #[test]
    fn test_enable_rejects_zero_capacity() {
        let (sink, _) = sink();
        let (channel, _rx) = FrameChannel::new(0, 1);
        let err = sink.enable(Box::new(channel), 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(!sink.is_tracing());
    }

    #[test]
    fn test_flip_exchanges_and_delivers_frames() {
        let (sink, clock) = sink();
        let (channel, rx) = FrameChannel::new(8, 4);
        sink.enable(Box::new(channel), 0).unwrap();

        sink.enter_section(&SECTION);
        sink.leave_section(&SECTION);
        clock.advance(Duration::from_millis(16));
        sink.flip();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.info.frame_index, 0);
        assert_eq!(frame.info.event_count, 2);
        assert_eq!(frame.info.frame_duration_ms, 16);
        assert_eq!(frame.events[0].group_name(), "Physics");
        assert_eq!(sink.frame_index(), 1);
        assert_eq!(sink.recorded(), 0);

        sink.enter_section(&SECTION);
        let info = sink.disable().unwrap();
        assert_eq!(info.event_count, 1);

        let last = rx.try_recv().unwrap();
        assert!(last.is_final);
        assert_eq!(last.info.frame_index, 1);
        assert_eq!(last.events.len(), 1);
    }

    #[test]
    fn test_sampling_rate_gates_exchange() {
        let (sink, clock) = sink();
        let (channel, rx) = FrameChannel::new(16, 4);
        sink.enable(Box::new(channel), 50).unwrap();

        for _ in 0..3 {
            sink.enter_section(&SECTION);
            clock.advance(Duration::from_millis(16));
            sink.flip();
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.frame_index(), 0);
        assert_eq!(sink.recorded(), 3);

        // 64ms accumulated: one exchange, 14ms carried over
        clock.advance(Duration::from_millis(16));
        sink.flip();
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.info.event_count, 3);
        assert_eq!(frame.info.frame_duration_ms, 64);
        assert_eq!(sink.frame_index(), 1);

        // 14 + 36 = 50 reaches the rate again
        clock.advance(Duration::from_millis(36));
        sink.flip();
        assert_eq!(sink.frame_index(), 2);
        sink.disable().unwrap();
    }

    #[test]
    fn test_overflow_is_reported_per_frame() {
        let (sink, clock) = sink();
        let (channel, rx) = FrameChannel::new(2, 4);
        sink.enable(Box::new(channel), 0).unwrap();

        for _ in 0..5 {
            sink.enter_section(&SECTION);
        }
        clock.advance(Duration::from_millis(1));
        sink.flip();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.info.event_count, 2);
        assert!(frame.info.overflowed());
        assert!(!sink.overflowed());

        sink.enter_section(&SECTION);
        let info = sink.disable().unwrap();
        assert_eq!(info.event_count, 1);
        assert!(!info.overflowed());
    }

    #[test]
    fn test_null_first_storage_rejected() {
        let (sink, _) = sink();
        struct NoStorage;
        unsafe impl FrameExchange for NoStorage {
            fn capacity(&self) -> usize {
                4
            }
            fn exchange(&mut self, _: FrameInfo, _: Option<&[EventRecord]>) -> *mut EventRecord {
                std::ptr::null_mut()
            }
        }

        let err = sink.enable(Box::new(NoStorage), 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(sink.mode(), CaptureMode::Disabled);
    }

    #[test]
    fn test_null_storage_after_flip_drops_events() {
        let (sink, clock) = sink();
        let exchange = OneBuffer {
            storage: vec![EventRecord::EMPTY; 4],
            calls: 0,
        };
        sink.enable(Box::new(exchange), 0).unwrap();

        clock.advance(Duration::from_millis(1));
        sink.flip();
        sink.enter_section(&SECTION);

        assert!(sink.overflowed());
        let info = sink.disable().unwrap();
        assert_eq!(info.event_count, 0);
        assert!(info.overflowed());
    }

    #[test]
    fn test_events_ignored_while_disabled() {
        let (sink, _) = sink();
        sink.enter_section(&SECTION);
        sink.flip();
        assert_eq!(sink.recorded(), 0);
        assert!(!sink.overflowed());
    }

    #[test]
    fn test_end_trace_waits_for_writer_holding_a_slot() {
        let (clock, parked, release) = gated_clock();
        let sink = CaptureSink::new(clock.clone());
        sink.begin_trace(4).unwrap();
        clock.armed.store(true, Ordering::SeqCst);

        thread::scope(|s| {
            let sink = &sink;
            // The writer has its slot and stalls reading the timestamp.
            s.spawn(move || sink.enter_section(&STRAGGLER));
            parked.recv().unwrap();

            let (done, finished) = channel::bounded(1);
            s.spawn(move || done.send(sink.end_trace().unwrap()).unwrap());
            assert!(finished.recv_timeout(Duration::from_millis(50)).is_err());

            release.send(()).unwrap();
            let trace = finished.recv().unwrap();
            assert_eq!(trace.info.event_count, 1);
            assert_eq!(trace.events[0].thread_id, 999);
        });

        // The next trace is untouched by the previous one.
        sink.begin_trace(4).unwrap();
        sink.enter_section(&SECTION);
        let trace = sink.end_trace().unwrap();
        assert_eq!(trace.info.event_count, 1);
        assert_eq!(trace.events[0].thread_id, 7);
    }

    #[test]
    fn test_disable_waits_for_writer_holding_a_slot() {
        let (clock, parked, release) = gated_clock();
        let sink = CaptureSink::new(clock.clone());
        let (exchange, rx) = FrameChannel::new(4, 2);
        sink.enable(Box::new(exchange), 0).unwrap();
        clock.armed.store(true, Ordering::SeqCst);

        thread::scope(|s| {
            let sink = &sink;
            s.spawn(move || sink.enter_section(&STRAGGLER));
            parked.recv().unwrap();

            let (done, finished) = channel::bounded(1);
            s.spawn(move || done.send(sink.disable().unwrap()).unwrap());
            assert!(finished.recv_timeout(Duration::from_millis(50)).is_err());

            release.send(()).unwrap();
            assert_eq!(finished.recv().unwrap().event_count, 1);
        });

        let last = rx.try_recv().unwrap();
        assert!(last.is_final);
        assert_eq!(last.events[0].thread_id, 999);
        assert!(!sink.is_tracing());
    }

    #[test]
    fn test_writers_after_teardown_are_ignored() {
        let (sink, _) = sink();
        sink.begin_trace(4).unwrap();
        sink.end_trace().unwrap();
        sink.enter_section(&SECTION);
        assert_eq!(sink.writers.load(Ordering::SeqCst), 0);
        assert_eq!(sink.recorded(), 0);
    }
}
