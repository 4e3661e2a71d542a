// smoltcp network stack integration
// Runs TCP/IP over an ionic device using the smoltcp library

use crate::config::ETH_HLEN;
use crate::dma::{DmaMapper, IoBuffer};
use crate::drivers::ionic::regs::Bar;
use crate::drivers::ionic::IonicDevice;
use crate::drivers::NetStack;
use crate::error::NetError;
use alloc::vec::Vec;
use heapless::Deque;
use log::{debug, warn};
use smoltcp::iface::{Config, Interface, SocketSet};
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress, IpCidr, Ipv4Address};

/// Received frames held between a driver poll and the interface poll
pub const RX_BACKLOG: usize = 64;

/// Upstream side of the driver as seen by smoltcp
///
/// Buffers received frames until smoltcp asks for them and tracks link
/// state and transmit completions.
#[derive(Default)]
pub struct PacketQueue {
    rx: Deque<IoBuffer, RX_BACKLOG>,
    link_up: bool,
    /// Frames dropped because the backlog was full
    pub rx_dropped: u64,
    /// Transmits the NIC completed
    pub tx_done: u64,
    /// Transmits flushed before the NIC sent them
    pub tx_cancelled: u64,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest received frame
    pub fn pop(&mut self) -> Option<IoBuffer> {
        self.rx.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }
}

impl NetStack for PacketQueue {
    fn link_up(&mut self) {
        self.link_up = true;
    }

    fn link_down(&mut self) {
        self.link_up = false;
    }

    fn receive(&mut self, iobuf: IoBuffer) {
        if self.rx.push_back(iobuf).is_err() {
            self.rx_dropped += 1;
        }
    }

    fn tx_complete(&mut self, _iobuf: IoBuffer, status: Result<(), NetError>) {
        match status {
            Ok(()) => self.tx_done += 1,
            Err(_) => self.tx_cancelled += 1,
        }
    }
}

/// Device wrapper that adapts an ionic device to smoltcp's Device trait
struct DeviceWrapper<R: Bar, M: DmaMapper> {
    device: IonicDevice<R, M, PacketQueue>,
}

/// RX token implementation for smoltcp
struct RxTokenWrapper {
    iobuf: IoBuffer,
}

impl RxToken for RxTokenWrapper {
    fn consume<T, F>(mut self, f: F) -> T
    where
        F: FnOnce(&mut [u8]) -> T,
    {
        f(self.iobuf.as_mut_slice())
    }
}

/// TX token implementation for smoltcp
struct TxTokenWrapper<'a, R: Bar, M: DmaMapper> {
    device: &'a mut IonicDevice<R, M, PacketQueue>,
}

impl<'a, R: Bar, M: DmaMapper> TxToken for TxTokenWrapper<'a, R, M> {
    fn consume<T, F>(self, len: usize, f: F) -> T
    where
        F: FnOnce(&mut [u8]) -> T,
    {
        let mut iobuf = IoBuffer::zeroed(len);
        let result = f(iobuf.as_mut_slice());

        // smoltcp has no way to retry a consumed token
        if let Err(e) = self.device.transmit(iobuf) {
            warn!("dropping outgoing frame: {}", e);
        }

        result
    }
}

impl<R: Bar, M: DmaMapper> Device for DeviceWrapper<R, M> {
    type RxToken<'a> = RxTokenWrapper where Self: 'a;
    type TxToken<'a> = TxTokenWrapper<'a, R, M> where Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let iobuf = self.device.stack_mut().pop()?;
        Some((
            RxTokenWrapper { iobuf },
            TxTokenWrapper {
                device: &mut self.device,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if !self.device.tx_ready() {
            return None;
        }
        Some(TxTokenWrapper {
            device: &mut self.device,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = ETH_HLEN + self.device.config().mtu as usize;
        caps.max_burst_size = Some(1);
        caps.medium = Medium::Ethernet;
        caps
    }
}

/// Network stack using smoltcp
///
/// Owns the ionic device; every `poll` runs one driver poll cycle and then
/// lets smoltcp process what it delivered.
pub struct NetworkStack<R: Bar, M: DmaMapper> {
    /// smoltcp interface
    iface: Interface,
    /// Socket set for TCP/UDP sockets
    sockets: SocketSet<'static>,
    device: DeviceWrapper<R, M>,
}

impl<R: Bar, M: DmaMapper> NetworkStack<R, M> {
    /// Open `device` and build a smoltcp interface on top of it
    ///
    /// # Arguments
    /// * `device` - A probed ionic device
    /// * `ip_config` - Optional static IPv4 address and prefix (if None, use 0.0.0.0/0)
    ///
    /// # Errors
    /// Whatever `open` reports
    pub fn new(
        mut device: IonicDevice<R, M, PacketQueue>,
        ip_config: Option<(Ipv4Address, u8)>,
    ) -> Result<Self, NetError> {
        device.open()?;

        let mac_address = EthernetAddress::from_bytes(&device.mac());
        let mut device = DeviceWrapper { device };

        let config = Config::new(HardwareAddress::Ethernet(mac_address));
        let mut iface = Interface::new(config, &mut device, Instant::from_millis(0));

        let (ip, prefix_len) = ip_config.unwrap_or((Ipv4Address::UNSPECIFIED, 0));
        iface.update_ip_addrs(|ip_addrs| {
            if ip_addrs.push(IpCidr::new(IpAddress::Ipv4(ip), prefix_len)).is_err() {
                warn!("no room for address {}/{}", ip, prefix_len);
            }
        });
        debug!("interface {} up with {}/{}", mac_address, ip, prefix_len);

        Ok(NetworkStack {
            iface,
            sockets: SocketSet::new(Vec::new()),
            device,
        })
    }

    /// Poll the driver, then the smoltcp interface
    ///
    /// # Arguments
    /// * `timestamp_ms` - Current timestamp in milliseconds since boot
    ///
    /// # Returns
    /// Whether smoltcp changed any socket state
    pub fn poll(&mut self, timestamp_ms: i64) -> bool {
        self.device.device.poll();
        self.iface.poll(
            Instant::from_millis(timestamp_ms),
            &mut self.device,
            &mut self.sockets,
        )
    }

    /// Get a reference to the interface
    pub fn interface(&self) -> &Interface {
        &self.iface
    }

    /// Get a mutable reference to the interface
    pub fn interface_mut(&mut self) -> &mut Interface {
        &mut self.iface
    }

    pub fn sockets(&self) -> &SocketSet<'static> {
        &self.sockets
    }

    pub fn sockets_mut(&mut self) -> &mut SocketSet<'static> {
        &mut self.sockets
    }

    pub fn device(&self) -> &IonicDevice<R, M, PacketQueue> {
        &self.device.device
    }

    pub fn device_mut(&mut self) -> &mut IonicDevice<R, M, PacketQueue> {
        &mut self.device.device
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.device.device.mac()
    }

    pub fn is_link_up(&self) -> bool {
        self.device.device.stack().is_link_up()
    }

    /// Close the device and hand it back
    pub fn into_device(mut self) -> IonicDevice<R, M, PacketQueue> {
        self.device.device.close();
        self.device.device
    }
}
