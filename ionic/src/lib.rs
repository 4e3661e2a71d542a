#![no_std]

// Polling-mode data plane for Pensando ionic Ethernet NICs
// Provides descriptor rings, completion reaping, the doorbell protocol and
// firmware liveness recovery, plus smoltcp integration

#[macro_use]
extern crate alloc;

pub mod config;
pub mod dma;
pub mod drivers;
pub mod error;
pub mod pci;
pub mod stack;

// Re-export commonly used types
pub use config::DriverConfig;
pub use dma::{DmaMapper, DmaRegion, IdentityDma, IoBuffer};
pub use drivers::ionic::{DeviceState, DeviceStats, IonicDevice, SkipReason, Transition};
pub use drivers::{NetStack, NetworkDriver};
pub use error::{NetError, TransmitError};
pub use stack::{NetworkStack, PacketQueue};
