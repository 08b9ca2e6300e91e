//! Frame exchange
//!
//! The capture sink does not own its event storage in frame mode. On every
//! sampled flip it hands the filled buffer to a [`FrameExchange`] and gets
//! back the storage for the next frame.
//!
//! [`FrameChannel`] is the safe exchange for Rust consumers: it keeps two
//! buffers, alternates between them, and ships each completed frame as a
//! [`CapturedFrame`] over a bounded channel.
//!
//! ```text
//!   flip ──► exchange(info, filled) ──► copy ──► try_send ──► Receiver
//!              │
//!              └──► returns the other buffer for the next frame
//! ```

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::warn;

use super::event::{EventRecord, EventView, FrameInfo};

/// Storage provider for frame-mode capture
///
/// # Safety
///
/// Every non-null pointer returned by `exchange` must be valid for writes of
/// `capacity()` records, and must stay valid until the next `exchange` call
/// (or `finish`) has returned. Storage returned by one call must not be
/// handed out again while the previous frame is still being written.
pub unsafe trait FrameExchange: Send {
    /// Number of records in each buffer handed out
    fn capacity(&self) -> usize;

    /// Receive a completed frame and return storage for the next one
    ///
    /// `events` is `None` when the sink had no storage: on the very first
    /// call, and after a previous exchange returned null. Returning null
    /// leaves the sink without storage until the next exchange.
    fn exchange(&mut self, info: FrameInfo, events: Option<&[EventRecord]>) -> *mut EventRecord;

    /// Receive the final, possibly partial, frame when capture is disabled
    fn finish(&mut self, info: FrameInfo, events: Option<&[EventRecord]>) {
        let _ = (info, events);
    }
}

/// A completed frame as delivered by `FrameChannel`
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub info: FrameInfo,
    pub events: Vec<EventRecord>,
    /// Set on the frame delivered by `finish`
    pub is_final: bool,
}

impl CapturedFrame {
    pub fn to_summary(&self) -> FrameSummary {
        FrameSummary {
            info: self.info,
            is_final: self.is_final,
            events: self.events.iter().map(EventRecord::to_view).collect(),
        }
    }
}

/// Serializable form of a `CapturedFrame`
#[derive(Debug, Clone, Serialize)]
pub struct FrameSummary {
    pub info: FrameInfo,
    pub is_final: bool,
    pub events: Vec<EventView>,
}

/// Double-buffered exchange that forwards frames over a channel
pub struct FrameChannel {
    // Writers hold raw pointers into these across `exchange` calls.
    buffers: [Vec<EventRecord>; 2],
    current: usize,
    sender: Sender<CapturedFrame>,
    dropped: u64,
}

impl FrameChannel {
    /// Create a channel with two buffers of `capacity` records and room for
    /// `depth` undelivered frames
    pub fn new(capacity: usize, depth: usize) -> (Self, Receiver<CapturedFrame>) {
        let (sender, receiver) = channel::bounded(depth);
        let buffer = || vec![EventRecord::EMPTY; capacity];
        let exchange = Self {
            buffers: [buffer(), buffer()],
            current: 0,
            sender,
            dropped: 0,
        };
        (exchange, receiver)
    }

    /// Frames dropped because the receiver lagged or went away
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    fn send(&mut self, frame: CapturedFrame) {
        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.dropped += 1;
                warn!(
                    frame_index = frame.info.frame_index,
                    dropped = self.dropped,
                    "Frame channel full, dropping frame"
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
            }
        }
    }
}

// SAFETY: both buffers are owned by the channel and live as long as it does;
// `exchange` always returns the buffer that was not just handed back.
unsafe impl FrameExchange for FrameChannel {
    fn capacity(&self) -> usize {
        self.buffers[0].len()
    }

    fn exchange(&mut self, info: FrameInfo, events: Option<&[EventRecord]>) -> *mut EventRecord {
        if let Some(events) = events {
            self.send(CapturedFrame {
                info,
                events: events.to_vec(),
                is_final: false,
            });
            self.current ^= 1;
        }
        self.buffers[self.current].as_mut_ptr()
    }

    fn finish(&mut self, info: FrameInfo, events: Option<&[EventRecord]>) {
        self.send(CapturedFrame {
            info,
            events: events.map(<[EventRecord]>::to_vec).unwrap_or_default(),
            is_final: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(index: u64, count: u32) -> FrameInfo {
        FrameInfo {
            frame_index: index,
            frame_duration_ms: 16,
            event_count: count,
            did_run_out_of_event_memory: 0,
        }
    }

    #[test]
    fn test_first_exchange_hands_out_storage_without_sending() {
        let (mut exchange, receiver) = FrameChannel::new(4, 2);
        let base = exchange.exchange(FrameInfo::default(), None);

        assert!(!base.is_null());
        assert_eq!(exchange.capacity(), 4);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_exchange_alternates_buffers() {
        let (mut exchange, receiver) = FrameChannel::new(2, 4);
        let first = exchange.exchange(FrameInfo::default(), None);
        let second = exchange.exchange(info(0, 0), Some(&[]));
        let third = exchange.exchange(info(1, 0), Some(&[]));

        assert_ne!(first, second);
        assert_eq!(first, third);
        assert_eq!(receiver.len(), 2);
    }

    #[test]
    fn test_full_channel_drops_frames() {
        let (mut exchange, receiver) = FrameChannel::new(1, 1);
        exchange.exchange(FrameInfo::default(), None);
        exchange.exchange(info(0, 0), Some(&[]));
        exchange.exchange(info(1, 0), Some(&[]));

        assert_eq!(exchange.dropped_frames(), 1);
        assert_eq!(receiver.recv().unwrap().info.frame_index, 0);
    }

    #[test]
    fn test_finish_sends_final_frame() {
        let (mut exchange, receiver) = FrameChannel::new(1, 1);
        let record = EventRecord::EMPTY;
        exchange.finish(info(3, 1), Some(&[record]));

        let frame = receiver.recv().unwrap();
        assert!(frame.is_final);
        assert_eq!(frame.events.len(), 1);
        let json = serde_json::to_string(&frame.to_summary()).unwrap();
        assert!(json.contains("\"frame_index\":3"));
    }
}
