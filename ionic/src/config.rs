//! Driver configuration
//!
//! Ring geometry, MTU, command poll budgets and the LIF features pushed to
//! firmware at bring-up. There is no persisted form; the embedding code builds
//! a `DriverConfig` and hands it to `IonicDevice::probe`.

use crate::drivers::ionic::cmd::RxMode;
use crate::error::NetError;
use alloc::string::ToString;

/// Ethernet header length
pub const ETH_HLEN: usize = 14;

/// Largest VLAN id the firmware accepts
pub const VLAN_ID_MAX: u16 = 4094;

pub const MIN_MTU: u16 = 68;
pub const MAX_MTU: u16 = 9194;

const MIN_RING_SIZE: u16 = 2;
const MAX_RING_SIZE: u16 = 32768;

/// Configuration for one ionic LIF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Logical interface index on the NIC function
    pub lif_index: u16,
    /// Maximum transmission unit (payload, without Ethernet header)
    pub mtu: u16,
    /// TX descriptor ring size (power of two)
    pub tx_ring_size: u16,
    /// RX descriptor ring size (power of two)
    pub rx_ring_size: u16,
    /// Admin queue ring size (power of two)
    pub adminq_ring_size: u16,
    /// Notify queue event ring size (power of two)
    pub notifyq_ring_size: u16,
    /// Iterations to poll the device command `done` register
    pub devcmd_poll_budget: u32,
    /// Iterations to poll the admin completion queue per command
    pub adminq_poll_budget: u32,
    /// RX filter mode applied when the queues start
    pub rx_mode: RxMode,
    /// VLAN id inserted on transmit, if any
    pub vlan: Option<u16>,
    /// Out-of-band management enabled on the LIF
    pub oob_management: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            lif_index: 0,
            mtu: 1500,
            tx_ring_size: 64,
            rx_ring_size: 64,
            adminq_ring_size: 16,
            notifyq_ring_size: 64,
            devcmd_poll_budget: 100_000,
            adminq_poll_budget: 100_000,
            rx_mode: RxMode::UNICAST | RxMode::MULTICAST | RxMode::BROADCAST | RxMode::ALLMULTI,
            vlan: None,
            oob_management: false,
        }
    }
}

impl DriverConfig {
    /// Set the MTU
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the TX and RX ring sizes
    pub fn with_ring_sizes(mut self, tx: u16, rx: u16) -> Self {
        self.tx_ring_size = tx;
        self.rx_ring_size = rx;
        self
    }

    /// Set both command poll budgets
    pub fn with_poll_budget(mut self, iterations: u32) -> Self {
        self.devcmd_poll_budget = iterations;
        self.adminq_poll_budget = iterations;
        self
    }

    /// Tag transmitted frames with `vlan`
    pub fn with_vlan(mut self, vlan: u16) -> Self {
        self.vlan = Some(vlan);
        self
    }

    pub fn with_oob_management(mut self, enabled: bool) -> Self {
        self.oob_management = enabled;
        self
    }

    /// Size of a receive buffer: Ethernet header, MTU and a VLAN tag.
    pub fn rx_buffer_len(&self) -> usize {
        ETH_HLEN + self.mtu as usize + 4
    }

    /// Check the configuration before it reaches the hardware
    ///
    /// # Errors
    /// Returns `NetError::InvalidConfig` naming the first offending field
    pub fn validate(&self) -> Result<(), NetError> {
        for (name, size) in [
            ("tx_ring_size", self.tx_ring_size),
            ("rx_ring_size", self.rx_ring_size),
            ("adminq_ring_size", self.adminq_ring_size),
            ("notifyq_ring_size", self.notifyq_ring_size),
        ] {
            if !size.is_power_of_two() || !(MIN_RING_SIZE..=MAX_RING_SIZE).contains(&size) {
                return Err(NetError::InvalidConfig(format!(
                    "{} must be a power of two in {}..={}, got {}",
                    name, MIN_RING_SIZE, MAX_RING_SIZE, size
                )));
            }
        }

        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(NetError::InvalidConfig(format!(
                "mtu must be in {}..={}, got {}",
                MIN_MTU, MAX_MTU, self.mtu
            )));
        }

        if let Some(vlan) = self.vlan {
            validate_vlan(vlan)?;
        }

        if self.devcmd_poll_budget == 0 || self.adminq_poll_budget == 0 {
            return Err(NetError::InvalidConfig(
                "poll budgets must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn validate_vlan(vlan: u16) -> Result<(), NetError> {
    if vlan > VLAN_ID_MAX {
        return Err(NetError::InvalidConfig(format!(
            "vlan id must be in 0..={}, got {}",
            VLAN_ID_MAX, vlan
        )));
    }
    Ok(())
}
