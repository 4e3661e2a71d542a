//! Register interface
//!
//! BAR0 holds the device info block (firmware status) followed by the device
//! command registers. The doorbell page lives in BAR2; within a page each
//! queue type has its own 64-bit doorbell.

use super::cmd::{Command, QueueType, CMD_LEN};
use super::desc::{CmdComp, COMP_STATUS_OK};
use crate::error::NetError;
use bitflags::bitflags;
use core::ptr::NonNull;
use log::debug;
use volatile::VolatilePtr;

/// Offset of the device info block in BAR0
pub const DEV_INFO_OFFSET: usize = 0x000;
/// Offset of the firmware status byte in BAR0
pub const FW_STATUS_OFFSET: usize = DEV_INFO_OFFSET + 7;
/// Offset of the device command registers in BAR0
pub const DEV_CMD_OFFSET: usize = 0x800;

const DEV_CMD_DOORBELL: usize = DEV_CMD_OFFSET;
const DEV_CMD_DONE: usize = DEV_CMD_OFFSET + 0x4;
const DEV_CMD_CMD: usize = DEV_CMD_OFFSET + 0x8;
const DEV_CMD_COMP: usize = DEV_CMD_OFFSET + 0x48;

/// Size of one doorbell page
pub const DB_PAGE_SIZE: usize = 4096;

/// Firmware status value read from a device that fell off the bus
pub const FW_STATUS_BAD_READ: u8 = 0xff;

bitflags! {
    /// Firmware status byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FwStatus: u8 {
        const RUNNING = 1 << 0;
    }
}

/// Whether a raw firmware status byte means the firmware can take work
///
/// All-ones is what a failed PCI read returns, so it never counts as running
/// even though the running bit is set.
pub fn firmware_live(raw: u8) -> bool {
    raw != FW_STATUS_BAD_READ && FwStatus::from_bits_retain(raw).contains(FwStatus::RUNNING)
}

/// Doorbell value: `p_index` in bits 0..16, ring selector in 16..24, queue id
/// low byte in 24..32 and high bits in 32..48
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Doorbell {
    pub qid: u32,
    pub ring: u8,
    pub p_index: u16,
}

impl Doorbell {
    pub fn new(qid: u32, ring: u8, p_index: u16) -> Self {
        Self { qid, ring, p_index }
    }

    pub fn to_u64(self) -> u64 {
        let qid_lo = (self.qid & 0xff) as u64;
        let qid_hi = ((self.qid >> 8) & 0xffff) as u64;
        self.p_index as u64 | (self.ring as u64) << 16 | qid_lo << 24 | qid_hi << 32
    }

    pub fn from_u64(raw: u64) -> Self {
        let qid_lo = ((raw >> 24) & 0xff) as u32;
        let qid_hi = ((raw >> 32) & 0xffff) as u32;
        Self {
            qid: qid_lo | qid_hi << 8,
            ring: ((raw >> 16) & 0xff) as u8,
            p_index: (raw & 0xffff) as u16,
        }
    }
}

/// Register access for one NIC function
pub trait Bar {
    /// Read the raw firmware status byte
    fn read_fw_status(&self) -> u8;

    /// Ring the doorbell of the queue type `qtype`
    fn write_doorbell(&mut self, qtype: QueueType, db: Doorbell);

    /// Clear `done`, write a command and ring the command doorbell
    fn devcmd_post(&mut self, cmd: &[u8; CMD_LEN]);

    /// Whether the firmware finished the last posted command
    fn devcmd_done(&self) -> bool;

    /// Completion of the last finished command
    fn devcmd_comp(&self) -> CmdComp;

    /// Run a device command, polling for completion at most `budget` times
    ///
    /// # Errors
    /// * `NetError::CommandTimeout` if `done` never shows up
    /// * `NetError::CommandFailed` if the firmware reports a non-zero status
    fn dev_cmd(&mut self, cmd: &Command, budget: u32) -> Result<CmdComp, NetError> {
        let opcode = cmd.opcode();
        self.devcmd_post(&cmd.to_bytes());

        for _ in 0..budget {
            if self.devcmd_done() {
                let comp = self.devcmd_comp();
                if comp.status != COMP_STATUS_OK {
                    return Err(NetError::CommandFailed {
                        opcode,
                        status: comp.status,
                    });
                }
                return Ok(comp);
            }
            core::hint::spin_loop();
        }

        debug!("devcmd {:?} timed out after {} polls", opcode, budget);
        Err(NetError::CommandTimeout { opcode })
    }
}

/// Memory-mapped BARs of a real device
#[derive(Debug)]
pub struct MmioBar {
    regs: NonNull<u8>,
    db_page: NonNull<u8>,
}

// The mapping is owned by one driver instance.
unsafe impl Send for MmioBar {}

impl MmioBar {
    /// Wrap mapped BARs
    ///
    /// # Safety
    /// `regs` must map BAR0 and `doorbells` must map BAR2, both for the
    /// lifetime of the returned value; `db_page` must be a page inside BAR2.
    ///
    /// # Errors
    /// Returns `NetError::BarMapFailed` if either mapping is null
    pub unsafe fn new(regs: *mut u8, doorbells: *mut u8, db_page: u32) -> Result<Self, NetError> {
        let regs = NonNull::new(regs).ok_or(NetError::BarMapFailed(0))?;
        let doorbells = NonNull::new(doorbells).ok_or(NetError::BarMapFailed(2))?;
        let db_page = NonNull::new_unchecked(
            doorbells
                .as_ptr()
                .add(db_page as usize * DB_PAGE_SIZE),
        );
        Ok(Self { regs, db_page })
    }

    fn reg<T>(&self, offset: usize) -> VolatilePtr<'_, T> {
        // SAFETY: offsets are fixed register locations inside BAR0.
        unsafe { VolatilePtr::new(NonNull::new_unchecked(self.regs.as_ptr().add(offset) as *mut T)) }
    }
}

impl Bar for MmioBar {
    fn read_fw_status(&self) -> u8 {
        self.reg::<u8>(FW_STATUS_OFFSET).read()
    }

    fn write_doorbell(&mut self, qtype: QueueType, db: Doorbell) {
        // SAFETY: each queue type has an 8-byte doorbell inside the page.
        let ptr = unsafe {
            VolatilePtr::new(NonNull::new_unchecked(
                self.db_page.as_ptr().add(qtype as usize * 8) as *mut u64,
            ))
        };
        ptr.write(db.to_u64());
    }

    fn devcmd_post(&mut self, cmd: &[u8; CMD_LEN]) {
        self.reg::<u32>(DEV_CMD_DONE).write(0);
        for (i, word) in cmd.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.reg::<u32>(DEV_CMD_CMD + i * 4).write(value);
        }
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        self.reg::<u32>(DEV_CMD_DOORBELL).write(1);
    }

    fn devcmd_done(&self) -> bool {
        self.reg::<u32>(DEV_CMD_DONE).read() & 1 != 0
    }

    fn devcmd_comp(&self) -> CmdComp {
        let mut raw = [0u8; 16];
        for i in 0..4 {
            let word = self.reg::<u32>(DEV_CMD_COMP + i * 4).read();
            raw[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        CmdComp::from_bytes(raw)
    }
}
