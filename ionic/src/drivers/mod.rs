// Network driver implementations

pub mod ionic;

use crate::dma::IoBuffer;
use crate::error::{NetError, TransmitError};

/// Trait for network drivers
///
/// The contract the surrounding network stack drives. Every method returns
/// immediately: waiting for hardware is expressed as a later `poll`.
pub trait NetworkDriver {
    /// Bring the device up for traffic
    ///
    /// # Returns
    /// * `Ok(())` if the device is ready (queues run once the link is up)
    /// * `Err(NetError)` if the device could not be started; nothing is left
    ///   half-initialized
    fn open(&mut self) -> Result<(), NetError>;

    /// Tear the data path down in reverse order of `open`
    fn close(&mut self);

    /// Queue a frame for transmission
    ///
    /// # Arguments
    /// * `iobuf` - The Ethernet frame to send (including Ethernet header)
    ///
    /// # Returns
    /// * `Ok(())` if the frame was posted; it comes back through
    ///   `NetStack::tx_complete` once the hardware is done with it
    /// * `Err(TransmitError)` if it was refused; the buffer is handed back
    fn transmit(&mut self, iobuf: IoBuffer) -> Result<(), TransmitError>;

    /// Run one poll cycle (must be called regularly)
    ///
    /// This checks firmware liveness, reaps TX and RX completions, refills
    /// the receive ring, tracks link changes and drains firmware events.
    fn poll(&mut self);

    /// Get the MAC address of the network interface
    fn mac_address(&self) -> [u8; 6];

    /// Check if the network link is up
    fn is_link_up(&self) -> bool;
}

/// Events a driver delivers to the network stack above it
pub trait NetStack {
    /// The link went up
    fn link_up(&mut self);

    /// The link went down
    fn link_down(&mut self);

    /// A frame was received, trimmed to its length on the wire
    fn receive(&mut self, iobuf: IoBuffer);

    /// A transmitted buffer is released by the driver
    ///
    /// `status` is `Err(NetError::Cancelled)` when the frame was flushed
    /// from the ring instead of being sent.
    fn tx_complete(&mut self, iobuf: IoBuffer, status: Result<(), NetError>) {
        let _ = (iobuf, status);
    }
}
