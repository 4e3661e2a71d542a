// Error types for the ionic data plane

use crate::drivers::ionic::cmd::Opcode;
use crate::dma::IoBuffer;
use alloc::string::String;
use thiserror::Error;

/// Driver errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// Not enough free descriptor slots; the caller retries later
    #[error("Queue full")]
    QueueFull,

    /// The buffer could not be prepared for device DMA access
    #[error("Buffer could not be mapped for DMA")]
    MapError,

    #[error("Allocation failure: {0}")]
    AllocationFailure(&'static str),

    /// The firmware did not answer within the poll budget
    #[error("Command {opcode:?} timed out")]
    CommandTimeout { opcode: Opcode },

    #[error("Command {opcode:?} failed with status {status}")]
    CommandFailed { opcode: Opcode, status: u8 },

    #[error("Firmware is not running")]
    FirmwareDown,

    #[error("BAR {0} could not be mapped")]
    BarMapFailed(usize),

    #[error("Device not initialized")]
    DeviceNotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// An in-flight transmit was flushed during queue teardown
    #[error("Operation cancelled")]
    Cancelled,
}

/// A transmit the driver refused; the buffer goes back to the caller.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct TransmitError {
    pub error: NetError,
    pub iobuf: IoBuffer,
}

impl TransmitError {
    pub fn new(error: NetError, iobuf: IoBuffer) -> Self {
        Self { error, iobuf }
    }

    /// Take the buffer back, e.g. to retry after `QueueFull`.
    pub fn into_buffer(self) -> IoBuffer {
        self.iobuf
    }
}
