//! Transmit and receive data path
//!
//! Buffers live in a ring's side table from the moment they are posted until
//! the NIC reports them complete (or the queue is flushed). Reaping is the
//! only place a posted buffer leaves the ring, so each one is released once.

use super::desc::{RxDesc, TxDesc, COMP_STATUS_OK};
use super::lif::{RxQcq, TxQcq};
use super::regs::Bar;
use super::ring::RingFull;
use crate::dma::{DmaMapper, IoBuffer};
use crate::drivers::NetStack;
use crate::error::{NetError, TransmitError};
use log::{error, warn};

/// What one reaping pass found
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    /// Completions consumed
    pub completions: usize,
    /// Buffers handed back
    pub buffers: usize,
    /// Completions that matched no outstanding descriptor
    pub stale: usize,
}

/// Undo the DMA mapping of a buffer leaving the ring
pub(crate) fn unmap(dma: &mut impl DmaMapper, iobuf: &mut IoBuffer) {
    if let Some(addr) = iobuf.dma_addr() {
        dma.unmap(iobuf, addr);
        iobuf.set_dma_addr(None);
    }
}

/// Post one frame on the TX ring and ring the doorbell
///
/// The buffer stays in the ring until `poll_tx` reaps it.
///
/// # Errors
/// The buffer comes back inside `TransmitError` when the ring is full, the
/// frame cannot be described, or it cannot be mapped.
pub fn transmit(
    txq: &mut TxQcq,
    bar: &mut impl Bar,
    dma: &mut impl DmaMapper,
    mut iobuf: IoBuffer,
    vlan: Option<u16>,
) -> Result<(), TransmitError> {
    if !txq.ctl.is_initialized() {
        return Err(TransmitError::new(NetError::DeviceNotInitialized, iobuf));
    }

    if !txq.ring.has_space(1) {
        txq.stats.full += 1;
        return Err(TransmitError::new(NetError::QueueFull, iobuf));
    }

    let Ok(len) = u16::try_from(iobuf.len()) else {
        let reason = format!("frame of {} bytes exceeds descriptor length", iobuf.len());
        return Err(TransmitError::new(NetError::InvalidPacket(reason), iobuf));
    };

    let addr = match dma.map(&mut iobuf) {
        Ok(addr) => addr,
        Err(e) => {
            txq.stats.map_err += 1;
            return Err(TransmitError::new(e, iobuf));
        }
    };
    iobuf.set_dma_addr(Some(addr));

    if let Err(RingFull(mut iobuf)) = txq.ring.post(TxDesc::new(addr, len, vlan), iobuf) {
        unmap(dma, &mut iobuf);
        txq.stats.full += 1;
        return Err(TransmitError::new(NetError::QueueFull, iobuf));
    }
    txq.stats.posted += 1;

    if let Err(e) = txq.ring_doorbell(bar) {
        error!("tx doorbell failed: {}", e);
    }
    Ok(())
}

/// Reap TX completions and hand finished buffers back to the stack
pub fn poll_tx(txq: &mut TxQcq, dma: &mut impl DmaMapper, stack: &mut impl NetStack) -> Reaped {
    let mut reaped = Reaped::default();

    while reaped.completions < txq.cq.capacity() {
        let Some(comp) = txq.cq.poll_one() else {
            break;
        };
        reaped.completions += 1;
        txq.stats.completions += 1;

        if comp.status != COMP_STATUS_OK {
            txq.stats.errors += 1;
            warn!("tx completion {} status {}", comp.comp_index, comp.status);
        }

        let done = txq.ring.reap_through(u16::from_le(comp.comp_index) as usize);
        if done.is_empty() {
            reaped.stale += 1;
            continue;
        }
        for mut iobuf in done {
            unmap(dma, &mut iobuf);
            stack.tx_complete(iobuf, Ok(()));
            reaped.buffers += 1;
        }
    }

    reaped
}

/// Top up the RX ring with `buf_len` byte buffers, one doorbell per batch
///
/// Allocation and mapping failures are counted; the ring then runs short
/// until a later fill succeeds.
///
/// # Returns
/// The number of buffers posted
pub fn fill_rx(
    rxq: &mut RxQcq,
    bar: &mut impl Bar,
    dma: &mut impl DmaMapper,
    buf_len: usize,
) -> Result<usize, NetError> {
    let desc_len = u16::try_from(buf_len)
        .map_err(|_| NetError::InvalidConfig(format!("rx buffer of {} bytes", buf_len)))?;
    let mut posted = 0;

    while rxq.ring.has_space(1) {
        let Some(mut iobuf) = dma.alloc(buf_len) else {
            rxq.stats.alloc_fail += 1;
            break;
        };
        let addr = match dma.map(&mut iobuf) {
            Ok(addr) => addr,
            Err(_) => {
                rxq.stats.map_err += 1;
                break;
            }
        };
        iobuf.set_dma_addr(Some(addr));

        if let Err(RingFull(mut iobuf)) = rxq.ring.post(RxDesc::new(addr, desc_len), iobuf) {
            unmap(dma, &mut iobuf);
            break;
        }
        rxq.stats.posted += 1;
        posted += 1;
    }

    if posted > 0 {
        rxq.ring_doorbell(bar)?;
    }
    Ok(posted)
}

/// Reap RX completions and pass received frames up
pub fn poll_rx(rxq: &mut RxQcq, dma: &mut impl DmaMapper, stack: &mut impl NetStack) -> Reaped {
    let mut reaped = Reaped::default();

    while reaped.completions < rxq.cq.capacity() {
        let Some(comp) = rxq.cq.poll_one() else {
            break;
        };
        reaped.completions += 1;
        rxq.stats.completions += 1;

        let mut done = rxq.ring.reap_through(u16::from_le(comp.comp_index) as usize);
        let Some(mut iobuf) = done.pop() else {
            reaped.stale += 1;
            continue;
        };
        for mut skipped in done {
            // Descriptors the NIC completed without a record of their own
            unmap(dma, &mut skipped);
            rxq.stats.errors += 1;
        }
        unmap(dma, &mut iobuf);

        let len = u16::from_le(comp.len) as usize;
        if comp.status != COMP_STATUS_OK || len > iobuf.len() {
            rxq.stats.errors += 1;
            warn!(
                "rx completion {} dropped: status {} len {}",
                comp.comp_index, comp.status, len
            );
            continue;
        }

        iobuf.truncate(len);
        stack.receive(iobuf);
        reaped.buffers += 1;
    }

    reaped
}

/// Return every outstanding TX buffer to the stack as cancelled
pub fn flush_tx(txq: &mut TxQcq, dma: &mut impl DmaMapper, stack: &mut impl NetStack) -> usize {
    let pending = txq.ring.drain();
    let count = pending.len();
    for mut iobuf in pending {
        unmap(dma, &mut iobuf);
        stack.tx_complete(iobuf, Err(NetError::Cancelled));
    }
    count
}

/// Unmap and drop every posted receive buffer
pub fn flush_rx(rxq: &mut RxQcq, dma: &mut impl DmaMapper) -> usize {
    let pending = rxq.ring.drain();
    let count = pending.len();
    for mut iobuf in pending {
        unmap(dma, &mut iobuf);
    }
    count
}
