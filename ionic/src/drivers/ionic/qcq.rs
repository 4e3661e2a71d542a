//! Queue/completion-queue pairs
//!
//! A `Qcq` couples a descriptor ring with its completion queue and knows the
//! hardware queue id its doorbell carries. The admin queue is itself a `Qcq`
//! and carries the commands that initialize and toggle every other queue.

use super::cmd::{Command, QInitFlags, QueueOper, QueueType};
use super::cq::CompletionQueue;
use super::desc::{AdminCmd, CmdComp, Completion, NotifyEvent, COMP_STATUS_OK};
use super::regs::{Bar, Doorbell};
use super::ring::Ring;
use crate::error::NetError;
use core::sync::atomic::{fence, Ordering};
use log::{debug, warn};

/// Per-queue diagnostic counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Descriptors posted
    pub posted: u64,
    /// Doorbell writes
    pub doorbells: u64,
    /// Completions consumed
    pub completions: u64,
    /// Posts refused because the ring was full
    pub full: u64,
    /// Buffer allocation failures while filling
    pub alloc_fail: u64,
    /// Buffers that could not be mapped for DMA
    pub map_err: u64,
    /// Completions reporting an error status, or commands that failed
    pub errors: u64,
}

/// Hardware identity and enable state of one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCtl {
    pub qtype: QueueType,
    /// Software queue index within its type
    pub index: u32,
    hw_index: Option<u32>,
    enabled: bool,
}

impl QueueCtl {
    pub fn new(qtype: QueueType, index: u32) -> Self {
        Self {
            qtype,
            index,
            hw_index: None,
            enabled: false,
        }
    }

    /// Hardware queue id assigned by `QInit`
    pub fn hw_index(&self) -> Option<u32> {
        self.hw_index
    }

    pub fn is_initialized(&self) -> bool {
        self.hw_index.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record the result of a successful `QInit`
    pub fn set_initialized(&mut self, hw_index: u32, enabled: bool) {
        self.hw_index = Some(hw_index);
        self.enabled = enabled;
    }

    /// Start hardware processing; enabling an enabled queue does nothing
    pub fn enable(
        &mut self,
        adminq: &mut AdminQcq,
        bar: &mut impl Bar,
        lif_index: u16,
        budget: u32,
    ) -> Result<(), NetError> {
        if self.enabled {
            debug!("{:?} queue {} already enabled", self.qtype, self.index);
            return Ok(());
        }
        self.control(adminq, bar, lif_index, QueueOper::Enable, budget)?;
        self.enabled = true;
        Ok(())
    }

    /// Stop hardware processing; disabling a disabled queue does nothing
    pub fn disable(
        &mut self,
        adminq: &mut AdminQcq,
        bar: &mut impl Bar,
        lif_index: u16,
        budget: u32,
    ) -> Result<(), NetError> {
        if !self.enabled {
            debug!("{:?} queue {} already disabled", self.qtype, self.index);
            return Ok(());
        }
        // The queue is treated as stopped even if firmware does not answer
        self.enabled = false;
        self.control(adminq, bar, lif_index, QueueOper::Disable, budget)
    }

    fn control(
        &self,
        adminq: &mut AdminQcq,
        bar: &mut impl Bar,
        lif_index: u16,
        oper: QueueOper,
        budget: u32,
    ) -> Result<(), NetError> {
        let hw_index = self.hw_index.ok_or(NetError::DeviceNotInitialized)?;
        adminq.command(
            bar,
            &Command::QControl {
                lif_index,
                qtype: self.qtype,
                hw_index,
                oper,
            },
            budget,
        )?;
        Ok(())
    }
}

/// Descriptor ring of `D` with handles `B`, and its completion queue of `C`
pub struct Qcq<D: Copy, C: Completion, B> {
    pub ctl: QueueCtl,
    pub ring: Ring<D, B>,
    pub cq: CompletionQueue<C>,
    pub stats: QueueStats,
}

impl<D: Copy, C: Completion, B> Qcq<D, C, B> {
    /// Allocate a ring and a completion queue of `capacity` entries each
    pub fn new(qtype: QueueType, index: u32, capacity: usize) -> Result<Self, NetError> {
        Ok(Self {
            ctl: QueueCtl::new(qtype, index),
            ring: Ring::new(capacity)?,
            cq: CompletionQueue::new(capacity)?,
            stats: QueueStats::default(),
        })
    }

    /// `QInit` describing this pair to firmware
    pub fn init_command(&self, lif_index: u16, flags: QInitFlags) -> Command {
        Command::QInit {
            lif_index,
            qtype: self.ctl.qtype,
            index: self.ctl.index,
            flags,
            ring_size_log2: self.ring.capacity().trailing_zeros() as u8,
            ring_base: self.ring.bus_addr(),
            cq_ring_base: self.cq.bus_addr(),
        }
    }

    /// Initialize through the admin queue; the queue stays disabled
    pub fn init(
        &mut self,
        adminq: &mut AdminQcq,
        bar: &mut impl Bar,
        lif_index: u16,
        budget: u32,
    ) -> Result<(), NetError> {
        let comp = adminq.command(bar, &self.init_command(lif_index, QInitFlags::empty()), budget)?;
        self.ctl.set_initialized(comp.hw_index(), false);
        Ok(())
    }

    /// Publish everything posted so far
    ///
    /// Descriptors must be fully written before this is called; the fence
    /// orders them ahead of the doorbell write.
    pub fn ring_doorbell(&mut self, bar: &mut impl Bar) -> Result<(), NetError> {
        let hw_index = self.ctl.hw_index.ok_or(NetError::DeviceNotInitialized)?;
        fence(Ordering::Release);
        bar.write_doorbell(
            self.ctl.qtype,
            Doorbell::new(hw_index, 0, self.ring.head() as u16),
        );
        self.stats.doorbells += 1;
        Ok(())
    }
}

/// Admin queue: commands out, command completions back
pub type AdminQcq = Qcq<AdminCmd, CmdComp, ()>;

impl AdminQcq {
    /// Run one LIF command through the admin queue
    ///
    /// Polls the admin completion queue at most `budget` times. Completions
    /// of earlier commands that timed out are reaped and skipped.
    ///
    /// # Errors
    /// * `NetError::QueueFull` if earlier commands never completed
    /// * `NetError::CommandTimeout` if no matching completion arrives
    /// * `NetError::CommandFailed` if firmware rejects the command
    pub fn command(
        &mut self,
        bar: &mut impl Bar,
        cmd: &Command,
        budget: u32,
    ) -> Result<CmdComp, NetError> {
        let opcode = cmd.opcode();

        // Pick up late completions before looking for room
        while let Some(late) = self.cq.poll_one() {
            self.stats.completions += 1;
            self.ring.reap_through(u16::from_le(late.comp_index) as usize);
        }

        let slot = self.ring.post(AdminCmd::from(cmd), ()).map_err(|full| {
            self.stats.full += 1;
            NetError::from(full)
        })?;
        self.stats.posted += 1;
        self.ring_doorbell(bar)?;

        for _ in 0..budget {
            let Some(comp) = self.cq.poll_one() else {
                core::hint::spin_loop();
                continue;
            };
            self.stats.completions += 1;
            let index = u16::from_le(comp.comp_index) as usize;
            self.ring.reap_through(index);

            if index != slot {
                debug!("skipping late admin completion {}", index);
                continue;
            }
            if comp.status != COMP_STATUS_OK {
                self.stats.errors += 1;
                return Err(NetError::CommandFailed {
                    opcode,
                    status: comp.status,
                });
            }
            return Ok(comp);
        }

        self.stats.errors += 1;
        warn!("admin command {:?} timed out after {} polls", opcode, budget);
        Err(NetError::CommandTimeout { opcode })
    }
}

/// Notify queue: firmware events written into a colored event ring
pub struct NotifyQcq {
    pub ctl: QueueCtl,
    pub cq: CompletionQueue<NotifyEvent>,
    pub stats: QueueStats,
    last_eid: Option<u64>,
}

impl NotifyQcq {
    pub fn new(index: u32, capacity: usize) -> Result<Self, NetError> {
        Ok(Self {
            ctl: QueueCtl::new(QueueType::Notify, index),
            cq: CompletionQueue::new(capacity)?,
            stats: QueueStats::default(),
            last_eid: None,
        })
    }

    /// `QInit` for the event ring; events are written straight into it
    pub fn init_command(&self, lif_index: u16) -> Command {
        Command::QInit {
            lif_index,
            qtype: QueueType::Notify,
            index: self.ctl.index,
            flags: QInitFlags::empty(),
            ring_size_log2: self.cq.capacity().trailing_zeros() as u8,
            ring_base: self.cq.bus_addr(),
            cq_ring_base: self.cq.bus_addr(),
        }
    }

    /// Id of the last event consumed
    pub fn last_eid(&self) -> Option<u64> {
        self.last_eid
    }

    /// Next pending event, if any
    pub fn next_event(&mut self) -> Option<NotifyEvent> {
        let event = self.cq.poll_one()?;
        self.stats.completions += 1;

        if let Some(last) = self.last_eid {
            if event.eid != last.wrapping_add(1) {
                warn!("notify event gap: expected eid {}, got {}", last.wrapping_add(1), event.eid);
                self.stats.errors += 1;
            }
        }
        self.last_eid = Some(event.eid);
        Some(event)
    }

    /// Skip up to `budget` pending events
    pub fn drain(&mut self, budget: usize) -> usize {
        let mut skipped = 0;
        while skipped < budget && self.next_event().is_some() {
            skipped += 1;
        }
        skipped
    }
}
