//! DMA-visible memory
//!
//! `DmaRegion` backs descriptor rings, completion queues and the LIF status
//! block: a zeroed, page-aligned array the NIC reads or writes behind our
//! back, so every slot access goes through a volatile pointer.
//!
//! `IoBuffer` is a packet buffer. While it sits in a ring slot the ring owns
//! it; it goes back to the network stack only once the hardware has reported
//! completion (or the queue is flushed).

use crate::error::NetError;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;
use volatile::VolatilePtr;

/// Alignment of DMA regions (one page)
const DMA_ALIGN: usize = 4096;

/// Zeroed, page-aligned array of `T` shared with the device
pub struct DmaRegion<T: Copy> {
    ptr: NonNull<T>,
    len: usize,
    layout: Layout,
    _marker: PhantomData<T>,
}

// The region exclusively owns its allocation.
unsafe impl<T: Copy + Send> Send for DmaRegion<T> {}

impl<T: Copy> DmaRegion<T> {
    /// Allocate `len` zeroed slots
    ///
    /// # Errors
    /// Returns `NetError::AllocationFailure` if the allocator is exhausted
    pub fn new(len: usize) -> Result<Self, NetError> {
        if len == 0 || size_of::<T>() == 0 {
            return Err(NetError::AllocationFailure("empty DMA region"));
        }

        let size = size_of::<T>()
            .checked_mul(len)
            .ok_or(NetError::AllocationFailure("DMA region size overflow"))?;
        let layout = Layout::from_size_align(size, DMA_ALIGN)
            .map_err(|_| NetError::AllocationFailure("invalid DMA region layout"))?;

        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw as *mut T)
            .ok_or(NetError::AllocationFailure("DMA region"))?;

        Ok(Self {
            ptr,
            len,
            layout,
            _marker: PhantomData,
        })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bus address of slot 0 as programmed into the device
    ///
    /// Host memory is identity mapped for device access.
    pub fn bus_addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    fn slot(&self, index: usize) -> VolatilePtr<'_, T> {
        assert!(index < self.len, "DMA slot {} out of range {}", index, self.len);
        // SAFETY: index is in bounds of a live allocation of `len` slots.
        unsafe { VolatilePtr::new(NonNull::new_unchecked(self.ptr.as_ptr().add(index))) }
    }

    /// Read slot `index`
    pub fn read(&self, index: usize) -> T {
        self.slot(index).read()
    }

    /// Write slot `index`
    pub fn write(&mut self, index: usize, value: T) {
        self.slot(index).write(value)
    }

    /// Read a single byte of slot `index`
    ///
    /// Used to sample a completion's color byte before the rest of the record.
    pub fn read_byte(&self, index: usize, offset: usize) -> u8 {
        assert!(offset < size_of::<T>());
        assert!(index < self.len);
        // SAFETY: both index and offset are in bounds.
        unsafe {
            let byte = (self.ptr.as_ptr().add(index) as *mut u8).add(offset);
            VolatilePtr::new(NonNull::new_unchecked(byte)).read()
        }
    }
}

impl<T: Copy> Drop for DmaRegion<T> {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) }
    }
}

impl<T: Copy> core::fmt::Debug for DmaRegion<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaRegion")
            .field("bus_addr", &format_args!("{:#x}", self.bus_addr()))
            .field("len", &self.len)
            .finish()
    }
}

/// Packet buffer exchanged with the network stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoBuffer {
    data: Vec<u8>,
    dma: Option<u64>,
}

impl IoBuffer {
    /// A zero-filled buffer of `len` bytes
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: vec![0; len],
            dma: None,
        }
    }

    /// A buffer holding a copy of `frame`
    pub fn from_slice(frame: &[u8]) -> Self {
        Self {
            data: frame.to_vec(),
            dma: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Start of the payload, for mappers that translate host addresses
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// Trim to the received length
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Bus address while mapped for the device
    pub fn dma_addr(&self) -> Option<u64> {
        self.dma
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn set_dma_addr(&mut self, addr: Option<u64>) {
        self.dma = addr;
    }
}

impl From<Vec<u8>> for IoBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, dma: None }
    }
}

/// Buffer allocation and DMA mapping, provided by the platform
pub trait DmaMapper {
    /// Allocate a receive buffer of `len` bytes
    ///
    /// # Returns
    /// `None` when memory is exhausted; the RX ring then runs short until a
    /// later refill succeeds
    fn alloc(&mut self, len: usize) -> Option<IoBuffer> {
        Some(IoBuffer::zeroed(len))
    }

    /// Make `iobuf` visible to the device and return its bus address
    ///
    /// # Errors
    /// Returns `NetError::MapError` if the buffer cannot be mapped
    fn map(&mut self, iobuf: &mut IoBuffer) -> Result<u64, NetError>;

    /// Tear down a mapping created by `map`
    fn unmap(&mut self, iobuf: &mut IoBuffer, addr: u64);
}

/// Mapper for platforms where host memory is identity mapped for DMA
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityDma;

impl DmaMapper for IdentityDma {
    fn map(&mut self, iobuf: &mut IoBuffer) -> Result<u64, NetError> {
        if iobuf.is_empty() {
            return Err(NetError::MapError);
        }
        Ok(iobuf.as_mut_ptr() as u64)
    }

    fn unmap(&mut self, _iobuf: &mut IoBuffer, _addr: u64) {}
}
