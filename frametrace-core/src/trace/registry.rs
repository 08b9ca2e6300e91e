//! Section group registry
//!
//! Maps a host category id to a display name and color. Slot `id` holds the
//! category with that id; ids beyond the capacity are dropped and counted.
//! Entries are published once through a `OnceLock` per slot, so readers on
//! any thread see either nothing or a fully built entry.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TraceError};

/// Color used for sections whose category is unknown
pub const DEFAULT_GROUP_COLOR: u32 = 0x2d89ef;

static DEFAULT_GROUP: SectionGroup = SectionGroup {
    name: String::new(),
    color: DEFAULT_GROUP_COLOR,
};

/// Display metadata for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionGroup {
    pub name: String,
    pub color: u32,
}

impl SectionGroup {
    pub fn new(name: impl Into<String>, color: u32) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }
}

impl Default for SectionGroup {
    fn default() -> Self {
        DEFAULT_GROUP.clone()
    }
}

/// Bounded table of section groups keyed by category id
pub struct SectionGroupRegistry {
    slots: Box<[OnceLock<SectionGroup>]>,
    populated: AtomicUsize,
    dropped: AtomicU64,
}

impl SectionGroupRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            populated: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Store the entry for category `id`
    ///
    /// Returns `true` if the entry was stored and `false` if `id` was
    /// already populated, in which case the first entry is kept. Ids outside
    /// the capacity fail with `RegistryFull` and are counted in
    /// [`SectionGroupRegistry::dropped_count`].
    pub fn add(&self, id: usize, entry: SectionGroup) -> Result<bool> {
        let capacity = self.slots.len();
        let Some(slot) = self.slots.get(id) else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed);
            if dropped == 0 {
                warn!(
                    capacity,
                    id,
                    category = %entry.name,
                    "Category id beyond section group registry capacity, dropping"
                );
            }
            return Err(TraceError::RegistryFull {
                capacity,
                name: entry.name,
            });
        };

        let stored = slot.set(entry).is_ok();
        if stored {
            self.populated.fetch_add(1, Ordering::AcqRel);
        }
        Ok(stored)
    }

    /// Entry for category `id` if it has been published
    pub fn get(&self, id: usize) -> Option<&SectionGroup> {
        self.slots.get(id).and_then(OnceLock::get)
    }

    /// Entry for category `id`, or an empty-named entry with the default color
    pub fn get_or_default(&self, id: usize) -> &SectionGroup {
        self.get(id).unwrap_or(&DEFAULT_GROUP)
    }

    /// Number of published entries
    pub fn len(&self) -> usize {
        self.populated.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of categories rejected because their id exceeds the capacity
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SectionGroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionGroupRegistry")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_add_and_get() {
        let registry = SectionGroupRegistry::new(4);
        assert!(registry.add(0, SectionGroup::new("Physics", 0xff0000)).unwrap());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0).unwrap().name, "Physics");
        assert_eq!(registry.get_or_default(0).color, 0xff0000);
    }

    #[test]
    fn test_out_of_order_ids_resolve_by_id() {
        let registry = SectionGroupRegistry::new(8);
        registry.add(5, SectionGroup::new("Audio", 3)).unwrap();
        registry.add(1, SectionGroup::new("Render", 2)).unwrap();
        registry.add(0, SectionGroup::new("Physics", 1)).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get_or_default(0).name, "Physics");
        assert_eq!(registry.get_or_default(1).name, "Render");
        assert_eq!(registry.get_or_default(5).name, "Audio");
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn test_replayed_id_keeps_first_entry() {
        let registry = SectionGroupRegistry::new(4);
        assert!(registry.add(2, SectionGroup::new("Physics", 1)).unwrap());
        assert!(!registry.add(2, SectionGroup::new("Other", 9)).unwrap());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(2).unwrap(), &SectionGroup::new("Physics", 1));
        assert_eq!(registry.dropped_count(), 0);
    }

    #[test]
    fn test_unpopulated_id_falls_back_to_default() {
        let registry = SectionGroupRegistry::new(4);
        registry.add(0, SectionGroup::new("Audio", 1)).unwrap();

        let missing = registry.get_or_default(3);
        assert_eq!(missing.name, "");
        assert_eq!(missing.color, DEFAULT_GROUP_COLOR);

        let out_of_range = registry.get_or_default(1000);
        assert_eq!(out_of_range, &SectionGroup::default());
    }

    #[test]
    fn test_id_beyond_capacity_reports_and_counts() {
        let registry = SectionGroupRegistry::new(2);
        registry.add(0, SectionGroup::new("A", 1)).unwrap();
        registry.add(1, SectionGroup::new("B", 2)).unwrap();

        let err = registry.add(2, SectionGroup::new("C", 3)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert_eq!(err.error_code(), "REGISTRY_FULL");

        registry.add(40, SectionGroup::new("D", 4)).unwrap_err();
        assert_eq!(registry.dropped_count(), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get_or_default(1).name, "B");
    }

    #[test]
    fn test_concurrent_adds_store_each_id_once() {
        let registry = SectionGroupRegistry::new(16);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let registry = &registry;
                scope.spawn(move || {
                    for id in 0..20 {
                        let _ = registry.add(id, SectionGroup::new(format!("g{t}"), t));
                    }
                });
            }
        });

        assert_eq!(registry.len(), 16);
        assert_eq!(registry.dropped_count(), 16);
        assert!((0..16).all(|id| registry.get(id).is_some()));
    }
}
