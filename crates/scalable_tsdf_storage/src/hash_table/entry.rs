use scalable_tsdf_core::prelude::*;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};

/// A live mapping from a block key to its slot in the voxel pools.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct HashEntry {
    pub key: Point3i,
    pub slot: u32,
}

impl HashEntry {
    #[inline]
    pub fn new(key: Point3i, slot: u32) -> Self {
        Self { key, slot }
    }
}

const EMPTY_SLOT: i32 = -1;

/// Atomic storage for one `HashEntry`.
///
/// Writers store the key first and commit the slot last with `Release`. Readers load the slot with `Acquire`, so a reader
/// that sees a committed slot also sees its key.
pub(crate) struct EntryCell {
    key: [AtomicI32; 3],
    slot: AtomicI32,
}

impl Default for EntryCell {
    fn default() -> Self {
        Self {
            key: [AtomicI32::new(0), AtomicI32::new(0), AtomicI32::new(0)],
            slot: AtomicI32::new(EMPTY_SLOT),
        }
    }
}

impl EntryCell {
    #[inline]
    pub fn load(&self) -> Option<HashEntry> {
        let slot = self.slot.load(Ordering::Acquire);
        if slot == EMPTY_SLOT {
            return None;
        }

        Some(HashEntry::new(
            PointN([
                self.key[0].load(Ordering::Relaxed),
                self.key[1].load(Ordering::Relaxed),
                self.key[2].load(Ordering::Relaxed),
            ]),
            slot as u32,
        ))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.load(Ordering::Acquire) == EMPTY_SLOT
    }

    #[inline]
    pub fn store(&self, entry: HashEntry) {
        for (dst, src) in self.key.iter().zip(entry.key.0.iter()) {
            dst.store(*src, Ordering::Relaxed);
        }
        self.slot.store(entry.slot as i32, Ordering::Release);
    }

    #[inline]
    pub fn clear(&mut self) {
        *self.slot.get_mut() = EMPTY_SLOT;
    }
}
