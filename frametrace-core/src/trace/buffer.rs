//! Lock-free event allocator
//!
//! A non-growing bump allocator over storage it does not own. Any number of
//! threads may call [`EventRingBuffer::allocate`] concurrently; each gets a
//! distinct slot or `None` once capacity is exhausted. There is no
//! reclamation: slots are consumed by being read after the buffer is handed
//! back to its owner.
//!
//! # Design
//!
//! ```text
//!            state: AtomicU64
//!   ┌────────────────┬────────────────┐
//!   │ generation u32 │   cursor u32   │◄── fetch_add(1) per allocation
//!   └───────┬────────┴────────────────┘
//!           │ generation & 1
//!           ▼
//!   bases: [AtomicPtr; 2] ──► caller storage for that generation
//! ```
//!
//! The generation and the cursor move together in one atomic word, so a slot
//! index is always resolved against the base of the generation it was
//! acquired in. A writer that races a rebase lands in the previous buffer,
//! never at an index of the new one.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use super::event::EventRecord;

const CURSOR_MASK: u64 = 0xffff_ffff;

#[inline]
fn split(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, (state & CURSOR_MASK) as u32)
}

#[inline]
fn pack(generation: u32, cursor: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(cursor)
}

/// A slot handed out by [`EventRingBuffer::allocate`]
#[derive(Debug)]
pub struct Slot {
    ptr: NonNull<EventRecord>,
    index: u32,
    generation: u32,
}

impl Slot {
    /// Index of the slot within its buffer
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation the slot was acquired in
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Write the record into the slot
    #[inline]
    pub fn write(self, record: EventRecord) {
        // SAFETY: the pointer lies inside storage the owner promised to keep
        // valid for `capacity` records when it called `initialize`, and the
        // index was handed out exactly once.
        unsafe { self.ptr.as_ptr().write(record) }
    }
}

/// Concurrent bump allocator for event records
pub struct EventRingBuffer {
    state: CachePadded<AtomicU64>,
    bases: [AtomicPtr<EventRecord>; 2],
    capacity: AtomicU32,
}

// SAFETY: the raw bases are only dereferenced through `Slot::write`, whose
// validity is guaranteed by the `initialize` contract.
unsafe impl Send for EventRingBuffer {}
unsafe impl Sync for EventRingBuffer {}

impl EventRingBuffer {
    /// An empty buffer; every allocation fails until `initialize`
    pub const fn new() -> Self {
        Self {
            state: CachePadded::new(AtomicU64::new(0)),
            bases: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
            capacity: AtomicU32::new(0),
        }
    }

    /// Point the buffer at new storage and reset the cursor
    ///
    /// Starts a new generation. Not meant to race other `initialize`/`rebase`
    /// calls; concurrent `allocate` calls are tolerated.
    ///
    /// # Safety
    ///
    /// `base` must be null or valid for writes of `capacity` records, and must
    /// stay allocated until every thread that may still hold a slot from this
    /// generation has finished writing (the caller quiesces reporting threads
    /// around the exchange).
    pub unsafe fn initialize(&self, base: *mut EventRecord, capacity: u32) {
        let (generation, _) = split(self.state.load(Ordering::Acquire));
        let next = generation.wrapping_add(1);

        self.bases[(next & 1) as usize].store(base, Ordering::Release);
        self.capacity.store(capacity, Ordering::Release);
        self.state.store(pack(next, 0), Ordering::Release);
    }

    /// Rebase onto new storage with the same capacity
    ///
    /// # Safety
    ///
    /// Same contract as [`EventRingBuffer::initialize`].
    pub unsafe fn rebase(&self, base: *mut EventRecord) {
        self.initialize(base, self.capacity());
    }

    /// Stop handing out slots until the next `initialize`
    pub fn detach(&self) {
        // SAFETY: a null base with zero capacity is never dereferenced.
        unsafe { self.initialize(ptr::null_mut(), 0) }
    }

    /// Acquire a slot, or `None` when the buffer is exhausted
    #[inline]
    pub fn allocate(&self) -> Option<Slot> {
        let capacity = self.capacity.load(Ordering::Acquire);

        // Keep the cursor from creeping into the generation bits once full.
        let (_, cursor) = split(self.state.load(Ordering::Relaxed));
        if cursor >= capacity {
            return None;
        }

        let (generation, index) = split(self.state.fetch_add(1, Ordering::AcqRel));
        if index >= capacity {
            return None;
        }

        let base = self.bases[(generation & 1) as usize].load(Ordering::Acquire);
        let base = NonNull::new(base)?;

        // SAFETY: index < capacity of this generation's storage.
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(index as usize)) };
        Some(Slot {
            ptr,
            index,
            generation,
        })
    }

    /// Current cursor; may exceed capacity after an overflow
    pub fn len(&self) -> u32 {
        split(self.state.load(Ordering::Acquire)).1
    }

    /// Number of slots actually handed out (cursor clamped to capacity)
    pub fn recorded(&self) -> u32 {
        self.len().min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u32 {
        split(self.state.load(Ordering::Acquire)).0
    }

    /// Base of the current generation
    pub fn base(&self) -> *mut EventRecord {
        let generation = self.generation();
        self.bases[(generation & 1) as usize].load(Ordering::Acquire)
    }
}

impl Default for EventRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRingBuffer")
            .field("generation", &self.generation())
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
