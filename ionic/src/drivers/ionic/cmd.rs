//! Firmware command set
//!
//! Device commands are written to the BAR0 command registers; LIF commands
//! travel as admin queue descriptors. Both use the same 64-byte little-endian
//! layout with the opcode in byte 0.

use bitflags::bitflags;

/// Size of an encoded command
pub const CMD_LEN: usize = 64;

/// Command opcodes understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Identify = 1,
    Init = 2,
    Reset = 3,
    LifInit = 21,
    LifReset = 22,
    LifGetAttr = 23,
    LifSetAttr = 24,
    RxModeSet = 31,
    QInit = 40,
    QControl = 41,
}

impl Opcode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Opcode::Nop,
            1 => Opcode::Identify,
            2 => Opcode::Init,
            3 => Opcode::Reset,
            21 => Opcode::LifInit,
            22 => Opcode::LifReset,
            23 => Opcode::LifGetAttr,
            24 => Opcode::LifSetAttr,
            31 => Opcode::RxModeSet,
            40 => Opcode::QInit,
            41 => Opcode::QControl,
            _ => return None,
        })
    }
}

/// Hardware queue types; also selects the doorbell within a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QueueType {
    Admin = 0,
    Notify = 1,
    Rx = 2,
    Tx = 3,
}

impl QueueType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(QueueType::Admin),
            1 => Some(QueueType::Notify),
            2 => Some(QueueType::Rx),
            3 => Some(QueueType::Tx),
            _ => None,
        }
    }
}

bitflags! {
    /// RX filter mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxMode: u16 {
        const UNICAST = 1 << 0;
        const MULTICAST = 1 << 1;
        const BROADCAST = 1 << 2;
        const PROMISC = 1 << 3;
        const ALLMULTI = 1 << 4;
    }
}

bitflags! {
    /// Queue init flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QInitFlags: u16 {
        /// Enable the queue as part of init (admin queue only)
        const ENABLE = 1 << 0;
    }
}

bitflags! {
    /// LIF features pushed to firmware
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LifFeatures: u64 {
        /// Insert the VLAN tag carried in TX descriptors
        const VLAN_TX_TAG = 1 << 0;
        /// Out-of-band management traffic shares this LIF
        const OOB_MGMT = 1 << 1;
    }
}

/// LIF administrative state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifState {
    Quiesce = 0,
    Enable = 1,
    Disable = 2,
}

/// LIF attributes that can be read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifAttr {
    State = 0,
    Mtu = 2,
    Mac = 3,
    Features = 4,
}

/// LIF attribute updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifSetting {
    State(LifState),
    Mtu(u32),
    Features(LifFeatures),
}

impl LifSetting {
    fn attr(&self) -> LifAttr {
        match self {
            LifSetting::State(_) => LifAttr::State,
            LifSetting::Mtu(_) => LifAttr::Mtu,
            LifSetting::Features(_) => LifAttr::Features,
        }
    }

    fn value(&self) -> u64 {
        match *self {
            LifSetting::State(state) => state as u64,
            LifSetting::Mtu(mtu) => mtu as u64,
            LifSetting::Features(features) => features.bits(),
        }
    }
}

/// Queue control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueOper {
    Enable = 1,
    Disable = 2,
}

/// A firmware command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Identify,
    Init,
    Reset,
    LifInit {
        lif_index: u16,
        info_pa: u64,
    },
    LifReset {
        lif_index: u16,
    },
    LifGetAttr {
        lif_index: u16,
        attr: LifAttr,
    },
    LifSetAttr {
        lif_index: u16,
        setting: LifSetting,
    },
    RxModeSet {
        lif_index: u16,
        mode: RxMode,
    },
    QInit {
        lif_index: u16,
        qtype: QueueType,
        index: u32,
        flags: QInitFlags,
        ring_size_log2: u8,
        ring_base: u64,
        cq_ring_base: u64,
    },
    QControl {
        lif_index: u16,
        qtype: QueueType,
        hw_index: u32,
        oper: QueueOper,
    },
}

fn put_u16(buf: &mut [u8; CMD_LEN], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8; CMD_LEN], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8; CMD_LEN], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u16(buf: &[u8; CMD_LEN], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn get_u32(buf: &[u8; CMD_LEN], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn get_u64(buf: &[u8; CMD_LEN], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Identify => Opcode::Identify,
            Command::Init => Opcode::Init,
            Command::Reset => Opcode::Reset,
            Command::LifInit { .. } => Opcode::LifInit,
            Command::LifReset { .. } => Opcode::LifReset,
            Command::LifGetAttr { .. } => Opcode::LifGetAttr,
            Command::LifSetAttr { .. } => Opcode::LifSetAttr,
            Command::RxModeSet { .. } => Opcode::RxModeSet,
            Command::QInit { .. } => Opcode::QInit,
            Command::QControl { .. } => Opcode::QControl,
        }
    }

    /// Encode into the 64-byte wire format
    pub fn to_bytes(&self) -> [u8; CMD_LEN] {
        let mut buf = [0u8; CMD_LEN];
        buf[0] = self.opcode() as u8;

        match *self {
            Command::Identify | Command::Init | Command::Reset => {}
            Command::LifInit { lif_index, info_pa } => {
                put_u16(&mut buf, 2, lif_index);
                put_u64(&mut buf, 8, info_pa);
            }
            Command::LifReset { lif_index } => {
                put_u16(&mut buf, 2, lif_index);
            }
            Command::LifGetAttr { lif_index, attr } => {
                buf[1] = attr as u8;
                put_u16(&mut buf, 2, lif_index);
            }
            Command::LifSetAttr { lif_index, setting } => {
                buf[1] = setting.attr() as u8;
                put_u16(&mut buf, 2, lif_index);
                put_u64(&mut buf, 8, setting.value());
            }
            Command::RxModeSet { lif_index, mode } => {
                put_u16(&mut buf, 2, lif_index);
                put_u16(&mut buf, 4, mode.bits());
            }
            Command::QInit {
                lif_index,
                qtype,
                index,
                flags,
                ring_size_log2,
                ring_base,
                cq_ring_base,
            } => {
                put_u16(&mut buf, 2, lif_index);
                buf[4] = qtype as u8;
                put_u32(&mut buf, 8, index);
                put_u16(&mut buf, 12, flags.bits());
                buf[14] = ring_size_log2;
                put_u64(&mut buf, 16, ring_base);
                put_u64(&mut buf, 24, cq_ring_base);
            }
            Command::QControl {
                lif_index,
                qtype,
                hw_index,
                oper,
            } => {
                buf[1] = qtype as u8;
                put_u16(&mut buf, 2, lif_index);
                put_u32(&mut buf, 4, hw_index);
                buf[8] = oper as u8;
            }
        }

        buf
    }

    /// Decode the 64-byte wire format
    ///
    /// # Returns
    /// `None` for unknown opcodes or out-of-range fields
    pub fn from_bytes(buf: &[u8; CMD_LEN]) -> Option<Self> {
        let lif_index = get_u16(buf, 2);
        Some(match Opcode::from_u8(buf[0])? {
            Opcode::Nop => return None,
            Opcode::Identify => Command::Identify,
            Opcode::Init => Command::Init,
            Opcode::Reset => Command::Reset,
            Opcode::LifInit => Command::LifInit {
                lif_index,
                info_pa: get_u64(buf, 8),
            },
            Opcode::LifReset => Command::LifReset { lif_index },
            Opcode::LifGetAttr => Command::LifGetAttr {
                lif_index,
                attr: match buf[1] {
                    0 => LifAttr::State,
                    2 => LifAttr::Mtu,
                    3 => LifAttr::Mac,
                    4 => LifAttr::Features,
                    _ => return None,
                },
            },
            Opcode::LifSetAttr => {
                let value = get_u64(buf, 8);
                let setting = match buf[1] {
                    0 => LifSetting::State(match value {
                        0 => LifState::Quiesce,
                        1 => LifState::Enable,
                        2 => LifState::Disable,
                        _ => return None,
                    }),
                    2 => LifSetting::Mtu(value as u32),
                    4 => LifSetting::Features(LifFeatures::from_bits_retain(value)),
                    _ => return None,
                };
                Command::LifSetAttr { lif_index, setting }
            }
            Opcode::RxModeSet => Command::RxModeSet {
                lif_index,
                mode: RxMode::from_bits_retain(get_u16(buf, 4)),
            },
            Opcode::QInit => Command::QInit {
                lif_index,
                qtype: QueueType::from_u8(buf[4])?,
                index: get_u32(buf, 8),
                flags: QInitFlags::from_bits_retain(get_u16(buf, 12)),
                ring_size_log2: buf[14],
                ring_base: get_u64(buf, 16),
                cq_ring_base: get_u64(buf, 24),
            },
            Opcode::QControl => Command::QControl {
                lif_index,
                qtype: QueueType::from_u8(buf[1])?,
                hw_index: get_u32(buf, 4),
                oper: match buf[8] {
                    1 => QueueOper::Enable,
                    2 => QueueOper::Disable,
                    _ => return None,
                },
            },
        })
    }
}
