//! Completion queue
//!
//! The NIC writes completion records here and stamps each with the color of
//! its current pass over the queue. Software expects color `true` on the
//! first pass and flips its expectation every time its tail wraps, so a
//! record left over from the previous pass never looks fresh.

use super::desc::Completion;
use crate::dma::DmaRegion;
use crate::error::NetError;
use core::sync::atomic::{fence, Ordering};

/// Completion ring of `C` records
pub struct CompletionQueue<C: Completion> {
    records: DmaRegion<C>,
    tail: usize,
    color: bool,
}

impl<C: Completion> CompletionQueue<C> {
    /// Allocate `capacity` zeroed records
    ///
    /// Zeroed records carry color `false` and are never consumed on the first
    /// pass.
    pub fn new(capacity: usize) -> Result<Self, NetError> {
        if !capacity.is_power_of_two() {
            return Err(NetError::InvalidConfig(format!(
                "completion queue capacity {} is not a power of two",
                capacity
            )));
        }
        Ok(Self {
            records: DmaRegion::new(capacity)?,
            tail: 0,
            color: true,
        })
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Next record to consume
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Color a fresh record must carry on the current pass
    pub fn expected_color(&self) -> bool {
        self.color
    }

    pub fn bus_addr(&self) -> u64 {
        self.records.bus_addr()
    }

    /// Take the next completion if the NIC has written it
    ///
    /// Never blocks; `None` means nothing new on this pass.
    pub fn poll_one(&mut self) -> Option<C> {
        let raw = self.records.read_byte(self.tail, C::COLOR_OFFSET);
        if C::color_bit(raw) != self.color {
            return None;
        }
        // The color byte is written last; the rest of the record is only
        // valid once it has been observed.
        fence(Ordering::Acquire);
        let record = self.records.read(self.tail);

        self.tail = (self.tail + 1) & (self.capacity() - 1);
        if self.tail == 0 {
            self.color = !self.color;
        }
        Some(record)
    }

    /// Consume up to `budget` pending completions without looking at them
    ///
    /// # Returns
    /// The number of records skipped
    pub fn drain(&mut self, budget: usize) -> usize {
        let mut skipped = 0;
        while skipped < budget && self.poll_one().is_some() {
            skipped += 1;
        }
        skipped
    }
}
