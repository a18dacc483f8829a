use crate::hash_table::{EntryCell, HashEntry};

use rayon::prelude::*;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

const UNASSIGNED: i32 = -1;
// Reserved by a worker that has not yet claimed its position.
const CLAIMING: i32 = -2;

/// A dense, per-pass snapshot of the blocks relevant to the current pass, plus the reverse map from slot to position.
///
/// Entries are appended concurrently: each worker claims a unique position with an atomic counter, so their order is
/// unspecified. The array must be `reset` before it is reused.
pub struct ActiveEntryArray {
    entries: Box<[EntryCell]>,
    len: AtomicUsize,
    // slot -> position in `entries`
    reverse_index: Box<[AtomicI32]>,
    // slot -> the last frame in which the block was collected in a camera frustum
    last_visible_frame: Box<[AtomicI32]>,
}

impl ActiveEntryArray {
    pub fn new(value_capacity: usize) -> Self {
        Self {
            entries: (0..value_capacity).map(|_| EntryCell::default()).collect(),
            len: AtomicUsize::new(0),
            reverse_index: (0..value_capacity)
                .map(|_| AtomicI32::new(UNASSIGNED))
                .collect(),
            last_visible_frame: (0..value_capacity)
                .map(|_| AtomicI32::new(UNASSIGNED))
                .collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).min(self.capacity())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks every slot unassigned and empties the array.
    pub fn reset(&self) {
        self.reverse_index
            .par_iter()
            .for_each(|i| i.store(UNASSIGNED, Ordering::Relaxed));
        self.len.store(0, Ordering::Release);
    }

    /// Appends `entry`, returning its position. Returns `None` if the slot is already active or the array is full.
    pub fn activate(&self, entry: HashEntry, frame_id: Option<i32>) -> Option<usize> {
        let slot = entry.slot as usize;
        let reverse = self.reverse_index.get(slot)?;
        reverse
            .compare_exchange(UNASSIGNED, CLAIMING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        let position = self.len.fetch_add(1, Ordering::AcqRel);
        if position >= self.capacity() {
            reverse.store(UNASSIGNED, Ordering::Release);
            return None;
        }

        self.entries[position].store(entry);
        reverse.store(position as i32, Ordering::Release);
        if let Some(frame_id) = frame_id {
            self.last_visible_frame[slot].store(frame_id, Ordering::Relaxed);
        }

        Some(position)
    }

    /// The entry at `position`.
    #[inline]
    pub fn get(&self, position: usize) -> Option<HashEntry> {
        if position >= self.len() {
            return None;
        }

        self.entries[position].load()
    }

    /// The position of the block in `slot`, if it is active.
    #[inline]
    pub fn position_of_slot(&self, slot: u32) -> Option<usize> {
        let p = self.reverse_index.get(slot as usize)?.load(Ordering::Acquire);

        (p >= 0).then(|| p as usize)
    }

    #[inline]
    pub fn is_slot_active(&self, slot: u32) -> bool {
        self.position_of_slot(slot).is_some()
    }

    /// The last frame in which `slot` was collected in a camera frustum.
    pub fn last_visible_frame(&self, slot: u32) -> Option<i32> {
        let f = self
            .last_visible_frame
            .get(slot as usize)?
            .load(Ordering::Relaxed);

        (f != UNASSIGNED).then(|| f)
    }

    /// Deactivates `slot` and forgets its visibility history, e.g. after it is freed.
    pub(crate) fn forget_slot(&mut self, slot: u32) {
        let slot = slot as usize;
        if let Some(r) = self.reverse_index.get_mut(slot) {
            let position = std::mem::replace(r.get_mut(), UNASSIGNED);
            if position >= 0 {
                if let Some(e) = self.entries.get_mut(position as usize) {
                    e.clear();
                }
            }
        }
        if let Some(f) = self.last_visible_frame.get_mut(slot) {
            *f.get_mut() = UNASSIGNED;
        }
    }

    pub(crate) fn forget_all(&mut self) {
        for f in self.last_visible_frame.iter_mut() {
            *f.get_mut() = UNASSIGNED;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = HashEntry> + '_ {
        (0..self.len()).filter_map(move |i| self.entries[i].load())
    }

    pub fn par_iter(&self) -> impl ParallelIterator<Item = HashEntry> + '_ {
        (0..self.len())
            .into_par_iter()
            .filter_map(move |i| self.entries[i].load())
    }

    /// A copy of the active entries, in array order.
    pub fn to_vec(&self) -> Vec<HashEntry> {
        self.iter().collect()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    use scalable_tsdf_core::prelude::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn reverse_index_tracks_positions() {
        let active = ActiveEntryArray::new(8);
        let entries: Vec<_> = (0..5).map(|i| HashEntry::new(PointN([i, 0, 0]), 7 - i as u32)).collect();

        entries.par_iter().for_each(|e| {
            active.activate(*e, Some(3));
        });

        assert_eq!(active.len(), 5);
        for e in entries.iter() {
            let p = active.position_of_slot(e.slot).unwrap();
            assert_eq!(active.get(p), Some(*e));
            assert_eq!(active.last_visible_frame(e.slot), Some(3));
        }
        assert_eq!(active.position_of_slot(0), None);
    }

    #[test]
    fn activating_twice_keeps_one_copy() {
        let active = ActiveEntryArray::new(4);
        let e = HashEntry::new(PointN([1, 2, 3]), 2);

        assert_eq!(active.activate(e, None), Some(0));
        assert_eq!(active.activate(e, None), None);
        assert_eq!(active.to_vec(), vec![e]);
    }

    #[test]
    fn reset_empties_array_but_keeps_visibility() {
        let active = ActiveEntryArray::new(4);
        active.activate(HashEntry::new(Point3i::ZERO, 1), Some(9));

        active.reset();

        assert!(active.is_empty());
        assert!(!active.is_slot_active(1));
        assert_eq!(active.last_visible_frame(1), Some(9));
    }

    #[test]
    fn forgotten_slot_leaves_the_array() {
        let mut active = ActiveEntryArray::new(4);
        let kept = HashEntry::new(PointN([1, 0, 0]), 0);
        let freed = HashEntry::new(PointN([2, 0, 0]), 3);
        active.activate(kept, Some(1));
        active.activate(freed, Some(1));

        active.forget_slot(freed.slot);

        assert!(!active.is_slot_active(freed.slot));
        assert_eq!(active.last_visible_frame(freed.slot), None);
        assert_eq!(active.to_vec(), vec![kept]);
        assert_eq!(active.get(1), None);
    }
}
