use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// A fixed-capacity free list of slot addresses in `[0, capacity)`.
///
/// `heap[..counter]` are the allocated addresses and `heap[counter..]` are free. Allocation is a capped atomic increment of
/// `counter`, so it never blocks and fails deterministically once the heap is empty. Freeing requires exclusive access.
///
/// An optional per-round quota limits how many allocations can succeed between calls to `reset_round`. Bulk loading uses it
/// to bound the work done per round.
pub struct SlotHeap {
    heap: Box<[AtomicU32]>,
    counter: AtomicUsize,
    quota: Option<usize>,
    round_allocations: AtomicUsize,
}

impl SlotHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: (0..capacity as u32).map(AtomicU32::new).collect(),
            counter: AtomicUsize::new(0),
            quota: None,
            round_allocations: AtomicUsize::new(0),
        }
    }

    /// Limit the number of successful allocations per round to `quota`.
    pub fn set_round_quota(&mut self, quota: Option<usize>) {
        self.quota = quota;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.heap.len()
    }

    /// The number of allocated addresses.
    #[inline]
    pub fn counter(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.counter() >= self.capacity()
    }

    /// Claim a free address, or `None` if the heap (or this round's quota) is exhausted.
    #[inline]
    pub fn allocate(&self) -> Option<u32> {
        if let Some(quota) = self.quota {
            self.round_allocations
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < quota).then(|| n + 1)
                })
                .ok()?;
        }

        let capacity = self.capacity();
        let index = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c < capacity).then(|| c + 1)
            })
            .ok()?;

        Some(self.heap[index].load(Ordering::Acquire))
    }

    /// Return `address` to the free list.
    pub fn free(&mut self, address: u32) {
        let counter = self.counter.get_mut();
        debug_assert!(*counter > 0, "freed more addresses than were allocated");
        if *counter == 0 {
            return;
        }
        *counter -= 1;
        *self.heap[*counter].get_mut() = address;
    }

    /// Start a new allocation round.
    pub fn reset_round(&self) {
        self.round_allocations.store(0, Ordering::Release);
    }

    /// Free every address.
    pub fn clear(&mut self) {
        for (i, a) in self.heap.iter_mut().enumerate() {
            *a.get_mut() = i as u32;
        }
        *self.counter.get_mut() = 0;
        *self.round_allocations.get_mut() = 0;
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

    use pretty_assertions::assert_eq;

    #[test]
    fn allocation_fails_once_full() {
        let heap = SlotHeap::new(3);

        let slots: Vec<_> = (0..4).map(|_| heap.allocate()).collect();

        assert_eq!(slots, vec![Some(0), Some(1), Some(2), None]);
        assert!(heap.is_exhausted());
    }

    #[test]
    fn freed_address_is_reused() {
        let mut heap = SlotHeap::new(2);
        heap.allocate();
        let b = heap.allocate().unwrap();

        heap.free(b);

        assert_eq!(heap.counter(), 1);
        assert_eq!(heap.allocate(), Some(b));
    }

    #[test]
    fn quota_limits_each_round() {
        let mut heap = SlotHeap::new(10);
        heap.set_round_quota(Some(2));

        assert!(heap.allocate().is_some());
        assert!(heap.allocate().is_some());
        assert_eq!(heap.allocate(), None);

        heap.reset_round();

        assert!(heap.allocate().is_some());
        assert_eq!(heap.counter(), 3);
    }
}
