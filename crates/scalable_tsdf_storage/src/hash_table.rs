//! A concurrent, fixed-capacity map from block keys to voxel pool slots.
//!
//! The table is an array of buckets. Each bucket holds an inline chain of `BUCKET_SIZE` entries and an overflow list whose
//! nodes live in a shared, index-addressed node pool. Insertion takes the bucket lock with a single compare-exchange and
//! fails immediately if it is held; the caller decides whether to retry (see `upload`). Lookups never lock.
//!
//! ```
//! use scalable_tsdf_core::prelude::*;
//! use scalable_tsdf_storage::{InsertFailure, SpatialHashTable};
//!
//! let table = SpatialHashTable::new(16, 2);
//!
//! let a = table.try_insert(PointN([1, 2, 3])).unwrap();
//! assert_eq!(table.try_insert(PointN([1, 2, 3])), Ok(a));
//! assert_eq!(table.find(PointN([1, 2, 3])), Some(a));
//!
//! table.try_insert(PointN([4, 5, 6])).unwrap();
//! assert_eq!(table.try_insert(PointN([7, 8, 9])), Err(InsertFailure::Exhausted));
//! ```

mod entry;
mod heap;

pub use entry::HashEntry;
pub use heap::SlotHeap;

pub(crate) use entry::EntryCell;

use scalable_tsdf_core::prelude::*;

use rayon::prelude::*;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// The number of entries stored inline in each bucket before spilling into the overflow list.
pub const BUCKET_SIZE: usize = 10;

const NULL_NODE: i32 = -1;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Why `SpatialHashTable::try_insert` did not insert a key. Neither case modifies the table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertFailure {
    /// Another worker holds the bucket lock. Retrying later may succeed.
    Contended,
    /// There are no free slots (or this round's allocation quota is spent).
    Exhausted,
}

/// The spatial hash of a block key.
#[inline]
pub fn spatial_hash(key: Point3i) -> u32 {
    (key.x().wrapping_mul(73_856_093)
        ^ key.y().wrapping_mul(19_349_669)
        ^ key.z().wrapping_mul(83_492_791)) as u32
}

struct OverflowNode {
    entry: EntryCell,
    next: AtomicI32,
}

impl Default for OverflowNode {
    fn default() -> Self {
        Self {
            entry: EntryCell::default(),
            next: AtomicI32::new(NULL_NODE),
        }
    }
}

pub struct SpatialHashTable {
    locks: Box<[AtomicU32]>,
    // bucket_count * BUCKET_SIZE
    entries: Box<[EntryCell]>,
    overflow_heads: Box<[AtomicI32]>,
    nodes: Box<[OverflowNode]>,
    node_heap: SlotHeap,
    slot_heap: SlotHeap,
}

/// Releases the bucket lock when dropped.
struct BucketGuard<'a> {
    lock: &'a AtomicU32,
}

impl<'a> BucketGuard<'a> {
    #[inline]
    fn try_acquire(lock: &'a AtomicU32) -> Option<Self> {
        lock.compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { lock })
    }
}

impl Drop for BucketGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.store(UNLOCKED, Ordering::Release);
    }
}

impl SpatialHashTable {
    /// Allocates a table with `bucket_count` buckets that can hold at most `value_capacity` entries.
    pub fn new(bucket_count: usize, value_capacity: usize) -> Self {
        Self {
            locks: (0..bucket_count).map(|_| AtomicU32::new(UNLOCKED)).collect(),
            entries: (0..bucket_count * BUCKET_SIZE)
                .map(|_| EntryCell::default())
                .collect(),
            overflow_heads: (0..bucket_count)
                .map(|_| AtomicI32::new(NULL_NODE))
                .collect(),
            // Every overflow node holds a live entry, so this many nodes can never run out before the slots do.
            nodes: (0..value_capacity).map(|_| OverflowNode::default()).collect(),
            node_heap: SlotHeap::new(value_capacity),
            slot_heap: SlotHeap::new(value_capacity),
        }
    }

    /// A table with no capacity. Every insertion fails with `Exhausted`.
    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    /// Limit the number of slots that can be allocated between calls to `reset_locks`.
    pub fn set_allocations_per_round(&mut self, quota: Option<usize>) {
        self.slot_heap.set_round_quota(quota);
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.locks.len()
    }

    #[inline]
    pub fn value_capacity(&self) -> usize {
        self.slot_heap.capacity()
    }

    /// The number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.slot_heap.counter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no more slots can be allocated.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.slot_heap.is_exhausted()
    }

    #[inline]
    fn bucket_of(&self, key: Point3i) -> usize {
        spatial_hash(key) as usize % self.bucket_count()
    }

    #[inline]
    fn bucket_entries(&self, bucket: usize) -> &[EntryCell] {
        &self.entries[bucket * BUCKET_SIZE..(bucket + 1) * BUCKET_SIZE]
    }

    fn overflow_iter(&self, bucket: usize) -> impl Iterator<Item = &OverflowNode> {
        let mut next = self.overflow_heads[bucket].load(Ordering::Acquire);

        std::iter::from_fn(move || {
            if next == NULL_NODE {
                return None;
            }
            let node = &self.nodes[next as usize];
            next = node.next.load(Ordering::Acquire);

            Some(node)
        })
    }

    /// Every committed entry in `bucket`.
    fn bucket_iter(&self, bucket: usize) -> impl Iterator<Item = HashEntry> + '_ {
        self.bucket_entries(bucket)
            .iter()
            .filter_map(EntryCell::load)
            .chain(self.overflow_iter(bucket).filter_map(|n| n.entry.load()))
    }

    /// Returns the slot of `key`, allocating one if `key` is absent.
    ///
    /// Inserting a key that is already present returns its existing slot without allocating, so concurrent insertions of the
    /// same key all observe the same slot (as long as they don't fail).
    pub fn try_insert(&self, key: Point3i) -> Result<u32, InsertFailure> {
        if self.bucket_count() == 0 {
            return Err(InsertFailure::Exhausted);
        }

        let bucket = self.bucket_of(key);
        let _guard = BucketGuard::try_acquire(&self.locks[bucket]).ok_or(InsertFailure::Contended)?;

        let mut vacant_cell = None;
        for cell in self.bucket_entries(bucket) {
            match cell.load() {
                Some(entry) if entry.key == key => return Ok(entry.slot),
                None if vacant_cell.is_none() => vacant_cell = Some(cell),
                _ => (),
            }
        }
        if let Some(entry) = self
            .overflow_iter(bucket)
            .filter_map(|n| n.entry.load())
            .find(|e| e.key == key)
        {
            return Ok(entry.slot);
        }

        let slot = self.slot_heap.allocate().ok_or(InsertFailure::Exhausted)?;
        let entry = HashEntry::new(key, slot);

        if let Some(cell) = vacant_cell {
            cell.store(entry);
            return Ok(slot);
        }

        let node_index = match self.node_heap.allocate() {
            Some(i) => i,
            None => {
                debug_assert!(false, "overflow node pool exhausted before the slot heap");
                return Err(InsertFailure::Exhausted);
            }
        };
        let node = &self.nodes[node_index as usize];
        node.entry.store(entry);
        node.next
            .store(self.overflow_heads[bucket].load(Ordering::Acquire), Ordering::Release);
        self.overflow_heads[bucket].store(node_index as i32, Ordering::Release);

        Ok(slot)
    }

    /// The slot of `key`, if it was inserted.
    pub fn find(&self, key: Point3i) -> Option<u32> {
        if self.bucket_count() == 0 {
            return None;
        }

        self.bucket_iter(self.bucket_of(key))
            .find(|e| e.key == key)
            .map(|e| e.slot)
    }

    /// Removes `key` and frees its slot. Returns `false` if `key` was absent.
    pub fn remove(&mut self, key: Point3i) -> bool {
        if self.bucket_count() == 0 {
            return false;
        }
        let bucket = self.bucket_of(key);

        let inline = &mut self.entries[bucket * BUCKET_SIZE..(bucket + 1) * BUCKET_SIZE];
        for cell in inline.iter_mut() {
            if let Some(entry) = cell.load().filter(|e| e.key == key) {
                cell.clear();
                self.slot_heap.free(entry.slot);
                return true;
            }
        }

        let mut prev = NULL_NODE;
        let mut next = *self.overflow_heads[bucket].get_mut();
        while next != NULL_NODE {
            let node = &mut self.nodes[next as usize];
            let after = *node.next.get_mut();
            if let Some(entry) = node.entry.load().filter(|e| e.key == key) {
                node.entry.clear();
                *node.next.get_mut() = NULL_NODE;
                if prev == NULL_NODE {
                    *self.overflow_heads[bucket].get_mut() = after;
                } else {
                    *self.nodes[prev as usize].next.get_mut() = after;
                }
                self.node_heap.free(next as u32);
                self.slot_heap.free(entry.slot);
                return true;
            }
            prev = next;
            next = after;
        }

        false
    }

    /// Releases every bucket lock and starts a new allocation round.
    pub fn reset_locks(&self) {
        self.locks
            .par_iter()
            .for_each(|l| l.store(UNLOCKED, Ordering::Release));
        self.slot_heap.reset_round();
    }

    /// A dense snapshot of all live entries, in unspecified order.
    pub fn compact_all(&self) -> Vec<HashEntry> {
        (0..self.bucket_count())
            .into_par_iter()
            .flat_map_iter(|b| self.bucket_iter(b))
            .collect()
    }

    /// The keys of all live entries, in unspecified order.
    pub fn keys(&self) -> Vec<Point3i> {
        (0..self.bucket_count())
            .into_par_iter()
            .flat_map_iter(|b| self.bucket_iter(b).map(|e| e.key))
            .collect()
    }

    /// Calls `f` on every live entry, in parallel over buckets.
    pub fn par_for_each_entry(&self, f: impl Fn(HashEntry) + Sync + Send) {
        (0..self.bucket_count())
            .into_par_iter()
            .for_each(|b| self.bucket_iter(b).for_each(&f));
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        for cell in self.entries.iter_mut() {
            cell.clear();
        }
        for head in self.overflow_heads.iter_mut() {
            *head.get_mut() = NULL_NODE;
        }
        for node in self.nodes.iter_mut() {
            node.entry.clear();
            *node.next.get_mut() = NULL_NODE;
        }
        for lock in self.locks.iter_mut() {
            *lock.get_mut() = UNLOCKED;
        }
        self.node_heap.clear();
        self.slot_heap.clear();
    }

    /// Holds the lock of the bucket that `key` hashes to until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) fn lock_bucket_of(&self, key: Point3i) -> Option<impl Drop + '_> {
        BucketGuard::try_acquire(&self.locks[self.bucket_of(key)])
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

    use ahash::AHashSet;
    use pretty_assertions::assert_eq;

    #[test]
    fn insert_is_idempotent() {
        let table = SpatialHashTable::new(8, 8);

        let first = table.try_insert(PointN([-3, 0, 9])).unwrap();
        for _ in 0..10 {
            assert_eq!(table.try_insert(PointN([-3, 0, 9])), Ok(first));
        }

        assert_eq!(table.len(), 1);
        assert_eq!(table.compact_all(), vec![HashEntry::new(PointN([-3, 0, 9]), first)]);
    }

    #[test]
    fn single_bucket_spills_into_overflow_list() {
        let table = SpatialHashTable::new(1, 3 * BUCKET_SIZE);
        let keys: Vec<_> = (0..3 * BUCKET_SIZE as i32).map(|i| PointN([i, -i, 2 * i])).collect();

        let slots: Vec<_> = keys.iter().map(|k| table.try_insert(*k).unwrap()).collect();

        for (k, s) in keys.iter().zip(slots.iter()) {
            assert_eq!(table.find(*k), Some(*s));
        }
        let unique: AHashSet<_> = slots.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert_eq!(table.compact_all().len(), keys.len());
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let mut table = SpatialHashTable::new(1, BUCKET_SIZE + 2);
        let keys: Vec<_> = (0..BUCKET_SIZE as i32 + 2).map(|i| PointN([i, 0, 0])).collect();
        for k in keys.iter() {
            table.try_insert(*k).unwrap();
        }
        assert_eq!(table.try_insert(PointN([100, 0, 0])), Err(InsertFailure::Exhausted));

        // One inline entry and one overflow entry.
        let inline_slot = table.find(keys[0]).unwrap();
        let overflow_slot = table.find(keys[BUCKET_SIZE]).unwrap();
        assert!(table.remove(keys[0]));
        assert!(table.remove(keys[BUCKET_SIZE]));
        assert!(!table.remove(keys[0]));

        assert_eq!(table.find(keys[0]), None);
        assert!(table.find(keys[BUCKET_SIZE + 1]).is_some());
        let a = table.try_insert(PointN([100, 0, 0])).unwrap();
        let b = table.try_insert(PointN([101, 0, 0])).unwrap();
        let mut reused = vec![a, b];
        reused.sort_unstable();
        let mut freed = vec![inline_slot, overflow_slot];
        freed.sort_unstable();
        assert_eq!(reused, freed);
    }

    #[test]
    fn held_lock_reports_contention_until_reset() {
        let table = SpatialHashTable::new(4, 4);
        let key = PointN([1, 1, 1]);

        let guard = table.lock_bucket_of(key).unwrap();
        assert_eq!(table.try_insert(key), Err(InsertFailure::Contended));
        std::mem::forget(guard);
        assert_eq!(table.try_insert(key), Err(InsertFailure::Contended));

        table.reset_locks();
        assert!(table.try_insert(key).is_ok());
    }

    #[test]
    fn empty_table_rejects_everything() {
        let table = SpatialHashTable::empty();

        assert_eq!(table.try_insert(Point3i::ZERO), Err(InsertFailure::Exhausted));
        assert_eq!(table.find(Point3i::ZERO), None);
        assert!(table.compact_all().is_empty());
    }
}
