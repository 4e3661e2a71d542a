// PCI identification and BAR mapping for ionic functions
//
// Configuration space access itself belongs to the platform; this module only
// decodes what the platform read and maps the two BARs the driver uses.

use crate::drivers::ionic::regs::MmioBar;
use crate::error::NetError;
use log::{debug, error};

/// PCI vendor ID for Pensando Systems
pub const PENSANDO_VENDOR_ID: u16 = 0x1DD8;

/// Ethernet physical function
pub const IONIC_ENET_PF_DEVICE_ID: u16 = 0x1002;

/// Ethernet virtual function
pub const IONIC_ENET_VF_DEVICE_ID: u16 = 0x1003;

/// BAR holding the device info block and command registers
pub const REGS_BAR: usize = 0;

/// BAR holding the doorbell pages
pub const DOORBELL_BAR: usize = 2;

/// Which kind of ionic function this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IonicFunction {
    PhysicalFunction,
    VirtualFunction,
}

/// A PCI function as read from configuration space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciFunction {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    /// Raw base address registers
    pub bars: [u32; 6],
}

impl PciFunction {
    /// Whether the ionic driver handles this function
    pub fn ionic_kind(&self) -> Option<IonicFunction> {
        if self.vendor_id != PENSANDO_VENDOR_ID {
            return None;
        }
        match self.device_id {
            IONIC_ENET_PF_DEVICE_ID => Some(IonicFunction::PhysicalFunction),
            IONIC_ENET_VF_DEVICE_ID => Some(IonicFunction::VirtualFunction),
            _ => None,
        }
    }

    /// Memory address decoded from BAR `index`
    ///
    /// # Returns
    /// `None` for I/O BARs, unset BARs and indices past the last BAR
    pub fn bar_address(&self, index: usize) -> Option<u64> {
        let low = *self.bars.get(index)?;
        if low & 0x1 != 0 {
            // I/O space
            return None;
        }

        let address = if low & 0x6 == 0x4 {
            // 64-bit BAR: the next register holds the high half
            let high = *self.bars.get(index + 1)? as u64;
            (high << 32) | (low & 0xFFFF_FFF0) as u64
        } else {
            (low & 0xFFFF_FFF0) as u64
        };

        (address != 0).then_some(address)
    }
}

/// Map the register and doorbell BARs of `func`
///
/// `map` turns a bus address into a virtual mapping and returns `None` if it
/// cannot. `db_page` selects the doorbell page within the doorbell BAR.
///
/// # Safety
/// Mappings returned by `map` must stay valid for the lifetime of the
/// returned `MmioBar` and must cover each BAR.
///
/// # Errors
/// Returns `NetError::BarMapFailed` with the index of the first BAR that has
/// no address or could not be mapped
pub unsafe fn map_bars(
    func: &PciFunction,
    db_page: u32,
    mut map: impl FnMut(u64) -> Option<*mut u8>,
) -> Result<MmioBar, NetError> {
    let mut mapped = [core::ptr::null_mut(); 2];

    for (slot, bar) in [REGS_BAR, DOORBELL_BAR].into_iter().enumerate() {
        let vaddr = func
            .bar_address(bar)
            .and_then(&mut map)
            .filter(|vaddr| !vaddr.is_null());
        let Some(vaddr) = vaddr else {
            error!(
                "{:02x}:{:02x}.{}: cannot map BAR {}",
                func.bus, func.device, func.function, bar
            );
            return Err(NetError::BarMapFailed(bar));
        };
        debug!("BAR {} mapped at {:p}", bar, vaddr);
        mapped[slot] = vaddr;
    }

    MmioBar::new(mapped[0], mapped[1], db_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn function(device_id: u16, bars: [u32; 6]) -> PciFunction {
        PciFunction {
            bus: 3,
            device: 0,
            function: 0,
            vendor_id: PENSANDO_VENDOR_ID,
            device_id,
            bars,
        }
    }

    #[test]
    fn test_ionic_kind() {
        assert_eq!(
            function(0x1002, [0; 6]).ionic_kind(),
            Some(IonicFunction::PhysicalFunction)
        );
        assert_eq!(
            function(0x1003, [0; 6]).ionic_kind(),
            Some(IonicFunction::VirtualFunction)
        );
        assert_eq!(function(0x1004, [0; 6]).ionic_kind(), None);

        let mut other = function(0x1002, [0; 6]);
        other.vendor_id = 0x1AF4;
        assert_eq!(other.ionic_kind(), None);
    }

    #[test]
    fn test_bar_decoding() {
        let func = function(
            0x1002,
            [0xfe00_000c, 0x0000_0001, 0xfd00_0000, 0, 0xe001, 0],
        );
        // 64-bit prefetchable
        assert_eq!(func.bar_address(0), Some(0x1_fe00_0000));
        assert_eq!(func.bar_address(2), Some(0xfd00_0000));
        // Unset and I/O BARs
        assert_eq!(func.bar_address(3), None);
        assert_eq!(func.bar_address(4), None);
        assert_eq!(func.bar_address(6), None);
    }

    #[test]
    fn test_map_bars_uses_bars_zero_and_two() {
        let func = function(0x1002, [0xa000_0000, 0, 0xb000_0000, 0, 0, 0]);
        let mut regs: Vec<u64> = vec![0; 512];
        let mut doorbells: Vec<u64> = vec![0; 512];
        let (regs_ptr, db_ptr) = (regs.as_mut_ptr() as *mut u8, doorbells.as_mut_ptr() as *mut u8);

        let mut requested = Vec::new();
        let bar = unsafe {
            map_bars(&func, 0, |addr| {
                requested.push(addr);
                match addr {
                    0xa000_0000 => Some(regs_ptr),
                    0xb000_0000 => Some(db_ptr),
                    _ => None,
                }
            })
        };
        assert!(bar.is_ok());
        assert_eq!(requested, vec![0xa000_0000, 0xb000_0000]);
    }

    #[test]
    fn test_map_bars_reports_failing_bar() {
        let func = function(0x1002, [0xa000_0000, 0, 0xb000_0000, 0, 0, 0]);
        let mut regs: Vec<u64> = vec![0; 512];
        let regs_ptr = regs.as_mut_ptr() as *mut u8;

        let err = unsafe {
            map_bars(&func, 0, |addr| (addr == 0xa000_0000).then_some(regs_ptr))
        };
        assert_eq!(err.unwrap_err(), NetError::BarMapFailed(2));

        let unset = function(0x1002, [0; 6]);
        let err = unsafe { map_bars(&unset, 0, |_| Some(regs_ptr)) };
        assert_eq!(err.unwrap_err(), NetError::BarMapFailed(0));
    }
}
