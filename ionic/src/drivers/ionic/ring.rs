//! Descriptor ring
//!
//! A power-of-two array of hardware descriptors plus a side table holding the
//! buffer that belongs to each posted slot. `head` is the next slot software
//! fills; `tail` is the oldest slot the hardware has not yet given back.
//! All `capacity` slots are usable: free slots are `capacity - outstanding`.

use crate::dma::DmaRegion;
use crate::error::NetError;
use alloc::vec::Vec;
use log::warn;

/// A post refused because the ring had no free slot; carries the handle back
#[derive(Debug)]
pub struct RingFull<B>(pub B);

impl<B> From<RingFull<B>> for NetError {
    fn from(_: RingFull<B>) -> Self {
        NetError::QueueFull
    }
}

/// Descriptor ring of `D` with per-slot handles of `B`
pub struct Ring<D: Copy, B> {
    descs: DmaRegion<D>,
    slots: Vec<Option<B>>,
    head: usize,
    tail: usize,
    outstanding: usize,
}

impl<D: Copy, B> Ring<D, B> {
    /// Allocate a ring of `capacity` zeroed descriptors
    ///
    /// # Errors
    /// * `NetError::InvalidConfig` if `capacity` is not a power of two
    /// * `NetError::AllocationFailure` if descriptor memory is exhausted
    pub fn new(capacity: usize) -> Result<Self, NetError> {
        if !capacity.is_power_of_two() {
            return Err(NetError::InvalidConfig(format!(
                "ring capacity {} is not a power of two",
                capacity
            )));
        }

        let descs = DmaRegion::new(capacity)?;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| NetError::AllocationFailure("ring side table"))?;
        slots.resize_with(capacity, || None);

        Ok(Self {
            descs,
            slots,
            head: 0,
            tail: 0,
            outstanding: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn mask(&self) -> usize {
        self.capacity() - 1
    }

    /// Next slot to fill; this is the producer index the doorbell carries
    pub fn head(&self) -> usize {
        self.head
    }

    /// Oldest slot still owned by the hardware
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Posted descriptors not yet reaped
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn free_slots(&self) -> usize {
        self.capacity() - self.outstanding
    }

    /// Whether `n` more descriptors can be posted
    pub fn has_space(&self, n: usize) -> bool {
        self.free_slots() >= n
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding == 0
    }

    /// Bus address of the descriptor array
    pub fn bus_addr(&self) -> u64 {
        self.descs.bus_addr()
    }

    /// Descriptor currently stored in `index`
    pub fn desc(&self, index: usize) -> D {
        self.descs.read(index & self.mask())
    }

    /// Write `desc` at `head`, park `handle` beside it and advance `head`
    ///
    /// The hardware does not see the descriptor until the doorbell is rung.
    ///
    /// # Returns
    /// The slot index that was filled
    ///
    /// # Errors
    /// Returns `RingFull` with the handle if no slot is free
    pub fn post(&mut self, desc: D, handle: B) -> Result<usize, RingFull<B>> {
        if !self.has_space(1) {
            return Err(RingFull(handle));
        }

        let index = self.head;
        debug_assert!(self.slots[index].is_none(), "slot {} still in flight", index);

        self.descs.write(index, desc);
        self.slots[index] = Some(handle);
        self.head = (self.head + 1) & self.mask();
        self.outstanding += 1;
        Ok(index)
    }

    /// Reap every slot from `tail` up to and including `last`
    ///
    /// # Returns
    /// The handles of the reaped slots, oldest first. A `last` outside the
    /// outstanding range is a stale completion and reaps nothing.
    pub fn reap_through(&mut self, last: usize) -> Vec<B> {
        let last = last & self.mask();
        let count = ((last + self.capacity() - self.tail) & self.mask()) + 1;
        if count > self.outstanding {
            warn!(
                "ignoring completion for slot {} (tail {}, outstanding {})",
                last, self.tail, self.outstanding
            );
            return Vec::new();
        }
        self.reap(count)
    }

    /// Advance `tail` to `new_tail`, reaping the slots in between
    ///
    /// `new_tail == tail` reaps nothing, so a full ring cannot be drained in
    /// one step here; use `reap_through` with the last consumed slot instead.
    ///
    /// # Returns
    /// The handles freed in the advanced range, oldest first
    pub fn reap_to(&mut self, new_tail: usize) -> Vec<B> {
        let new_tail = new_tail & self.mask();
        if new_tail == self.tail {
            return Vec::new();
        }
        self.reap_through(new_tail.wrapping_sub(1))
    }

    /// Reap everything outstanding, e.g. when the queue is torn down
    pub fn drain(&mut self) -> Vec<B> {
        self.reap(self.outstanding)
    }

    fn reap(&mut self, count: usize) -> Vec<B> {
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(handle) = self.slots[self.tail].take() {
                handles.push(handle);
            }
            self.tail = (self.tail + 1) & self.mask();
        }
        self.outstanding -= count;
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> Ring<u64, u32> {
        Ring::new(capacity).unwrap()
    }

    #[test]
    fn test_new_ring_is_empty() {
        let ring = ring(8);
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.tail(), 0);
        assert!(ring.is_empty());
        assert!(ring.has_space(8));
        assert!(!ring.has_space(9));
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(matches!(
            Ring::<u64, u32>::new(6),
            Err(NetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fill_then_reap_three() {
        let mut ring = ring(8);
        for i in 0..8 {
            assert_eq!(ring.post(0x100 + i as u64, i).unwrap(), i as usize);
        }
        assert!(!ring.has_space(1));
        assert_eq!(ring.head(), 0);

        let reaped = ring.reap_to(3);
        assert_eq!(reaped, vec![0, 1, 2]);
        assert!(ring.has_space(1));
        assert!(ring.has_space(3));
        assert!(!ring.has_space(4));
    }

    #[test]
    fn test_post_on_full_ring_returns_handle() {
        let mut ring = ring(2);
        ring.post(1, 10).unwrap();
        ring.post(2, 20).unwrap();

        let RingFull(handle) = ring.post(3, 30).unwrap_err();
        assert_eq!(handle, 30);
        // Nothing was overwritten
        assert_eq!(ring.desc(0), 1);
        assert_eq!(ring.desc(1), 2);
        assert_eq!(ring.drain(), vec![10, 20]);
    }

    #[test]
    fn test_free_slots_tracks_outstanding() {
        let mut ring = ring(4);
        let mut next = 0u32;
        for step in 0..40 {
            if step % 3 == 2 {
                let tail = ring.tail();
                ring.reap_through(tail);
            } else if ring.has_space(1) {
                ring.post(next as u64, next).unwrap();
                next += 1;
            }
            assert_eq!(ring.free_slots(), ring.capacity() - ring.outstanding());
            assert_eq!(ring.has_space(1), ring.outstanding() < ring.capacity());
        }
    }

    #[test]
    fn test_reap_through_full_ring() {
        let mut ring = ring(4);
        for i in 0..4 {
            ring.post(0, i).unwrap();
        }
        // The last descriptor sits just behind head when the ring is full
        assert_eq!(ring.reap_through(3), vec![0, 1, 2, 3]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_stale_completion_reaps_nothing() {
        let mut ring = ring(8);
        ring.post(0, 1).unwrap();
        ring.post(0, 2).unwrap();
        assert_eq!(ring.reap_through(1), vec![1, 2]);

        // Same completion index again must not free anything twice
        assert!(ring.reap_through(1).is_empty());
        assert!(ring.reap_through(5).is_empty());
        assert_eq!(ring.outstanding(), 0);
    }

    #[test]
    fn test_wraparound_keeps_fifo_order() {
        let mut ring = ring(4);
        for i in 0..3 {
            ring.post(0, i).unwrap();
        }
        assert_eq!(ring.reap_through(1), vec![0, 1]);
        for i in 3..6 {
            ring.post(0, i).unwrap();
        }
        assert_eq!(ring.head(), 2);
        assert_eq!(ring.reap_to(0), vec![2, 3]);
        assert_eq!(ring.reap_to(2), vec![4, 5]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_reap_to_tail_on_full_ring_reaps_nothing() {
        let mut ring = ring(4);
        for i in 0..4 {
            ring.post(0, i).unwrap();
        }
        assert_eq!(ring.head(), ring.tail());
        assert!(ring.reap_to(0).is_empty());
        assert_eq!(ring.outstanding(), 4);

        assert_eq!(ring.reap_through(3), vec![0, 1, 2, 3]);
        assert!(ring.is_empty());
    }
}
