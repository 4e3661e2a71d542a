//! Hardware descriptor and completion formats
//!
//! All records are little-endian and fixed-size. Completions carry a color
//! bit in the top bit of their last byte; the NIC flips the color it writes on
//! every pass over the completion ring.

use super::cmd::{Command, CMD_LEN};
use bitflags::bitflags;

/// Color bit within a completion's color byte
pub const COMP_COLOR_MASK: u8 = 0x80;

/// Status value of a successful completion
pub const COMP_STATUS_OK: u8 = 0;

const TXQ_DESC_OPCODE_MASK: u64 = 0xf;
const TXQ_DESC_OPCODE_SHIFT: u64 = 4;
const TXQ_DESC_FLAGS_MASK: u64 = 0xf;
const TXQ_DESC_FLAGS_SHIFT: u64 = 0;
const TXQ_DESC_NSGE_MASK: u64 = 0xf;
const TXQ_DESC_NSGE_SHIFT: u64 = 8;
const TXQ_DESC_ADDR_MASK: u64 = (1 << 52) - 1;
const TXQ_DESC_ADDR_SHIFT: u64 = 12;

/// TX descriptor opcodes (checksum offload mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxOpcode {
    CsumNone = 0,
    CsumPartial = 1,
    CsumHw = 2,
    Tso = 3,
}

bitflags! {
    /// TX descriptor flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxFlags: u8 {
        /// `vlan_tci` is valid and should be inserted
        const VLAN = 1 << 0;
        const ENCAP = 1 << 1;
    }
}

/// Pack opcode, flags, SG element count and buffer address into a TX `cmd`
pub fn encode_txq_desc_cmd(opcode: TxOpcode, flags: TxFlags, nsge: u8, addr: u64) -> u64 {
    ((opcode as u64 & TXQ_DESC_OPCODE_MASK) << TXQ_DESC_OPCODE_SHIFT)
        | ((flags.bits() as u64 & TXQ_DESC_FLAGS_MASK) << TXQ_DESC_FLAGS_SHIFT)
        | ((nsge as u64 & TXQ_DESC_NSGE_MASK) << TXQ_DESC_NSGE_SHIFT)
        | ((addr & TXQ_DESC_ADDR_MASK) << TXQ_DESC_ADDR_SHIFT)
}

/// Unpack a TX `cmd` into (opcode bits, flags, nsge, address)
pub fn decode_txq_desc_cmd(cmd: u64) -> (u8, TxFlags, u8, u64) {
    (
        ((cmd >> TXQ_DESC_OPCODE_SHIFT) & TXQ_DESC_OPCODE_MASK) as u8,
        TxFlags::from_bits_retain(((cmd >> TXQ_DESC_FLAGS_SHIFT) & TXQ_DESC_FLAGS_MASK) as u8),
        ((cmd >> TXQ_DESC_NSGE_SHIFT) & TXQ_DESC_NSGE_MASK) as u8,
        (cmd >> TXQ_DESC_ADDR_SHIFT) & TXQ_DESC_ADDR_MASK,
    )
}

/// TX descriptor (16 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TxDesc {
    pub cmd: u64,
    pub len: u16,
    /// VLAN TCI when `TxFlags::VLAN` is set, otherwise zero
    pub vlan_tci: u16,
    pub hword1: u16,
    pub hword2: u16,
}

impl TxDesc {
    /// Single-buffer descriptor without checksum offload
    pub fn new(addr: u64, len: u16, vlan: Option<u16>) -> Self {
        let (flags, vlan_tci) = match vlan {
            Some(tci) => (TxFlags::VLAN, tci),
            None => (TxFlags::empty(), 0),
        };
        Self {
            cmd: encode_txq_desc_cmd(TxOpcode::CsumNone, flags, 0, addr).to_le(),
            len: len.to_le(),
            vlan_tci: vlan_tci.to_le(),
            hword1: 0,
            hword2: 0,
        }
    }

    pub fn addr(&self) -> u64 {
        decode_txq_desc_cmd(u64::from_le(self.cmd)).3
    }

    pub fn flags(&self) -> TxFlags {
        decode_txq_desc_cmd(u64::from_le(self.cmd)).1
    }
}

/// RX descriptor opcode for a single contiguous buffer
pub const RXQ_DESC_OPCODE_SIMPLE: u8 = 0;

/// RX descriptor (16 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RxDesc {
    pub opcode: u8,
    pub rsvd: [u8; 5],
    pub len: u16,
    pub addr: u64,
}

impl RxDesc {
    pub fn new(addr: u64, len: u16) -> Self {
        Self {
            opcode: RXQ_DESC_OPCODE_SIMPLE,
            rsvd: [0; 5],
            len: len.to_le(),
            addr: addr.to_le(),
        }
    }
}

/// Admin queue descriptor: one encoded command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct AdminCmd(pub [u8; CMD_LEN]);

impl From<&Command> for AdminCmd {
    fn from(cmd: &Command) -> Self {
        AdminCmd(cmd.to_bytes())
    }
}

/// A completion record written by the NIC
pub trait Completion: Copy {
    /// Offset of the byte holding the color bit
    const COLOR_OFFSET: usize;

    fn color_bit(raw: u8) -> bool {
        raw & COMP_COLOR_MASK != 0
    }

    fn color(&self) -> bool;
}

/// TX completion (16 bytes)
///
/// `comp_index` is the ring index of the last descriptor completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TxComp {
    pub status: u8,
    pub rsvd: u8,
    pub comp_index: u16,
    pub rsvd2: [u8; 11],
    pub color: u8,
}

impl Completion for TxComp {
    const COLOR_OFFSET: usize = 15;

    fn color(&self) -> bool {
        Self::color_bit(self.color)
    }
}

/// RX completion (16 bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RxComp {
    pub status: u8,
    pub num_sg_elems: u8,
    pub comp_index: u16,
    pub rss_hash: u32,
    pub csum: u16,
    pub vlan_tci: u16,
    pub len: u16,
    pub csum_flags: u8,
    pub pkt_type_color: u8,
}

impl Completion for RxComp {
    const COLOR_OFFSET: usize = 15;

    fn color(&self) -> bool {
        Self::color_bit(self.pkt_type_color)
    }
}

/// Command completion (16 bytes), used by both the command registers and
/// the admin completion queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CmdComp {
    pub status: u8,
    pub rsvd: u8,
    pub comp_index: u16,
    pub data: [u8; 11],
    pub color: u8,
}

impl CmdComp {
    pub fn from_bytes(raw: [u8; 16]) -> Self {
        let mut data = [0u8; 11];
        data.copy_from_slice(&raw[4..15]);
        Self {
            status: raw[0],
            rsvd: raw[1],
            comp_index: u16::from_le_bytes([raw[2], raw[3]]),
            data,
            color: raw[15],
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut raw = [0u8; 16];
        raw[0] = self.status;
        raw[1] = self.rsvd;
        raw[2..4].copy_from_slice(&self.comp_index.to_le_bytes());
        raw[4..15].copy_from_slice(&self.data);
        raw[15] = self.color;
        raw
    }

    /// Hardware queue index returned by `QInit`
    pub fn hw_index(&self) -> u32 {
        u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    /// MAC address returned by `LifGetAttr(Mac)`
    pub fn mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.data[..6]);
        mac
    }
}

impl Completion for CmdComp {
    const COLOR_OFFSET: usize = 15;

    fn color(&self) -> bool {
        Self::color_bit(self.color)
    }
}

/// Notify event codes
pub const EVENT_LINK_CHANGE: u16 = 1;
pub const EVENT_RESET: u16 = 2;
pub const EVENT_HEARTBEAT: u16 = 3;
pub const EVENT_LOG: u16 = 4;

/// Firmware event (64 bytes) on the notify queue
///
/// `eid` increases by one per event across the life of the LIF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct NotifyEvent {
    pub eid: u64,
    pub ecode: u16,
    pub data: [u8; 53],
    pub color: u8,
}

impl Default for NotifyEvent {
    fn default() -> Self {
        Self {
            eid: 0,
            ecode: 0,
            data: [0; 53],
            color: 0,
        }
    }
}

impl Completion for NotifyEvent {
    const COLOR_OFFSET: usize = 63;

    fn color(&self) -> bool {
        Self::color_bit(self.color)
    }
}
