// Pensando ionic network driver
// Polling-mode data plane with firmware crash/restart recovery

pub mod cmd;
pub mod cq;
pub mod desc;
pub mod lif;
pub mod qcq;
pub mod regs;
pub mod ring;
pub mod txrx;

use crate::config::{validate_vlan, DriverConfig};
use crate::dma::{DmaMapper, IoBuffer};
use crate::drivers::{NetStack, NetworkDriver};
use crate::error::{NetError, TransmitError};
use cmd::Command;
use lif::{lif_features, Lif};
use log::{debug, error, info, warn};
use qcq::QueueStats;
use regs::{firmware_live, Bar};

/// Where the device is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No firmware, no queues
    Down,
    /// Firmware up, LIF built, TX/RX not running
    Running,
    /// Firmware up, TX/RX enabled
    QueuesRunning,
}

/// Why a lifecycle operation did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FirmwareDown,
    LinkDown,
}

/// Outcome of a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The device moved to a new state
    Changed,
    /// Already in the requested state
    Unchanged,
    /// Preconditions not met; nothing was touched
    Skipped(SkipReason),
}

/// Device-level diagnostic counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub fw_up: u64,
    pub fw_down: u64,
    pub link_up: u64,
    pub link_down: u64,
    /// Every transmit attempt, accepted or not
    pub tx_total: u64,
    /// Completions that matched no outstanding descriptor
    pub stale_completions: u64,
}

/// What `Identify` reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub asic_type: u8,
    pub asic_rev: u8,
    pub nlifs: u16,
}

impl DeviceIdentity {
    fn from_comp(comp: &desc::CmdComp) -> Self {
        Self {
            asic_type: comp.data[0],
            asic_rev: comp.data[1],
            nlifs: u16::from_le_bytes([comp.data[2], comp.data[3]]),
        }
    }
}

/// One ionic NIC function
///
/// Owns the register interface, the DMA mapper, the upstream stack and the
/// LIF. `fw_running` is only true while a LIF exists; `queues_running` only
/// while `fw_running` is.
pub struct IonicDevice<R: Bar, M: DmaMapper, S: NetStack> {
    bar: R,
    dma: M,
    stack: S,
    config: DriverConfig,
    lif: Option<Lif>,
    identity: Option<DeviceIdentity>,
    mac: [u8; 6],
    fw_running: bool,
    queues_running: bool,
    open: bool,
    /// Link state last reported to the stack
    link_up: bool,
    stats: DeviceStats,
}

impl<R: Bar, M: DmaMapper, S: NetStack> IonicDevice<R, M, S> {
    /// Take ownership of a mapped function and start its firmware
    ///
    /// # Errors
    /// * `NetError::InvalidConfig` if `config` does not validate
    /// * any error from `start_device`; nothing is left allocated
    pub fn probe(bar: R, dma: M, stack: S, config: DriverConfig) -> Result<Self, NetError> {
        config.validate()?;

        let mut device = Self {
            bar,
            dma,
            stack,
            config,
            lif: None,
            identity: None,
            mac: [0; 6],
            fw_running: false,
            queues_running: false,
            open: false,
            link_up: false,
            stats: DeviceStats::default(),
        };

        if let Err(e) = device.start_device() {
            error!("ionic: cannot start device: {}", e);
            return Err(e);
        }
        info!("ionic: probe done, mtu {}", device.config.mtu);
        Ok(device)
    }

    /// Stop everything and hand the collaborators back
    pub fn remove(mut self) -> (R, M, S) {
        if self.open {
            self.close();
        } else {
            self.stop_device();
        }
        (self.bar, self.dma, self.stack)
    }

    pub fn state(&self) -> DeviceState {
        match (self.fw_running, self.queues_running) {
            (false, _) => DeviceState::Down,
            (true, false) => DeviceState::Running,
            (true, true) => DeviceState::QueuesRunning,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Initialize the NIC, identify it and build the LIF
    ///
    /// # Returns
    /// * `Ok(Transition::Unchanged)` if firmware was already running
    /// * `Ok(Transition::Changed)` once the LIF is up
    ///
    /// # Errors
    /// The failing command's error; partial allocations are released and the
    /// NIC is reset, leaving the device `Down`.
    pub fn start_device(&mut self) -> Result<Transition, NetError> {
        if self.fw_running {
            debug!("ionic: device already running");
            return Ok(Transition::Unchanged);
        }

        let budget = self.config.devcmd_poll_budget;
        self.bar.dev_cmd(&Command::Init, budget)?;

        match self.build_lif() {
            Ok(lif) => {
                self.mac = lif.mac();
                self.lif = Some(lif);
                self.fw_running = true;
                info!("ionic: device started");
                Ok(Transition::Changed)
            }
            Err(e) => {
                error!("ionic: device start failed: {}", e);
                if let Err(e) = self.bar.dev_cmd(&Command::Reset, budget) {
                    warn!("ionic: unable to reset card: {}", e);
                }
                Err(e)
            }
        }
    }

    fn build_lif(&mut self) -> Result<Lif, NetError> {
        let comp = self
            .bar
            .dev_cmd(&Command::Identify, self.config.devcmd_poll_budget)?;
        let identity = DeviceIdentity::from_comp(&comp);
        debug!(
            "ionic: asic type {} rev {} nlifs {}",
            identity.asic_type, identity.asic_rev, identity.nlifs
        );
        self.identity = Some(identity);

        let mut lif = Lif::alloc(&self.config)?;
        lif.init(&mut self.bar, &self.config)?;
        Ok(lif)
    }

    /// Tear the LIF down and reset the NIC
    ///
    /// Running queues are stopped and TX/RX released first. Failures along
    /// the way are logged; the device always ends `Down`.
    pub fn stop_device(&mut self) -> Transition {
        if !self.fw_running {
            debug!("ionic: device already down");
            return Transition::Unchanged;
        }

        self.stop_queues();
        if self.lif.as_ref().is_some_and(Lif::has_rxtx) {
            self.rxtx_deinit();
        }

        if let Some(mut lif) = self.lif.take() {
            if let Err(e) = lif.disable_notifyq(&mut self.bar) {
                warn!("ionic: unable to disable notifyq: {}", e);
            }
            if let Err(e) = lif.reset(&mut self.bar) {
                warn!("ionic: unable to reset lif: {}", e);
            }
        }

        if let Err(e) = self
            .bar
            .dev_cmd(&Command::Reset, self.config.devcmd_poll_budget)
        {
            warn!("ionic: unable to reset card: {}", e);
        }

        self.fw_running = false;
        info!("ionic: device stopped");
        Transition::Changed
    }

    /// Allocate and initialize the TX/RX pair
    pub fn rxtx_init(&mut self) -> Result<(), NetError> {
        let lif = self.lif.as_mut().ok_or(NetError::DeviceNotInitialized)?;
        lif.rxtx_init(&mut self.bar, &self.config)
    }

    /// Flush and free the TX/RX pair
    ///
    /// Refused while the queues run. Outstanding TX buffers go back to the
    /// stack as cancelled.
    pub fn rxtx_deinit(&mut self) {
        if self.queues_running {
            error!("ionic: queues are not stopped, keeping tx/rx");
            return;
        }
        let Some(lif) = self.lif.as_mut() else {
            return;
        };

        if let Some(mut txq) = lif.txq.take() {
            let flushed = txrx::flush_tx(&mut txq, &mut self.dma, &mut self.stack);
            debug!("ionic: flushed {} tx buffers", flushed);
        }
        if let Some(mut rxq) = lif.rxq.take() {
            let flushed = txrx::flush_rx(&mut rxq, &mut self.dma);
            debug!("ionic: flushed {} rx buffers", flushed);
        }
    }

    /// Enable TX, set the RX filter, enable RX and fill the RX ring
    ///
    /// # Returns
    /// * `Ok(Transition::Skipped(_))` if firmware or link is down
    /// * `Ok(Transition::Unchanged)` if the queues already run
    ///
    /// # Errors
    /// The failing command's error; TX is disabled again and the device
    /// stays `Running`.
    pub fn start_queues(&mut self) -> Result<Transition, NetError> {
        if self.queues_running {
            debug!("ionic: queues already running");
            return Ok(Transition::Unchanged);
        }
        if !self.fw_running {
            debug!("ionic: fw not running, not starting queues");
            return Ok(Transition::Skipped(SkipReason::FirmwareDown));
        }

        let lif = self.lif.as_mut().ok_or(NetError::DeviceNotInitialized)?;
        if !lif.is_link_up() {
            debug!("ionic: link is down, not starting queues");
            return Ok(Transition::Skipped(SkipReason::LinkDown));
        }

        lif.drain_notifyq();
        lif.start_queues(&mut self.bar, self.config.rx_mode)?;
        self.queues_running = true;
        info!("ionic: queues started");

        self.refill();
        Ok(Transition::Changed)
    }

    /// Disable RX then TX and quiesce the LIF
    ///
    /// Disable failures are logged; the queues count as stopped regardless.
    pub fn stop_queues(&mut self) -> Transition {
        if !self.queues_running {
            debug!("ionic: queues already stopped");
            return Transition::Unchanged;
        }
        self.queues_running = false;

        if let Some(lif) = self.lif.as_mut() {
            lif.stop_queues(&mut self.bar);
        }
        info!("ionic: queues stopped");
        Transition::Changed
    }

    /// Rebuild the data path after firmware came back
    pub fn handle_fw_up(&mut self) {
        info!("ionic: firmware up");
        if let Err(e) = self.start_device() {
            error!("ionic: restart after firmware up failed: {}", e);
            return;
        }
        self.stats.fw_up += 1;

        if self.open {
            if let Err(e) = self.rxtx_init() {
                error!("ionic: rx/tx init failed: {}", e);
                self.stop_device();
                return;
            }
            if let Err(e) = self.start_queues() {
                error!("ionic: starting queues failed: {}", e);
                self.rxtx_deinit();
                self.stop_device();
                return;
            }
        }
        self.check_link();
    }

    /// Drop everything that depended on the firmware
    pub fn handle_fw_down(&mut self) {
        info!("ionic: firmware down");
        self.stats.fw_down += 1;

        if self.link_up {
            self.link_up = false;
            self.stats.link_down += 1;
            self.stack.link_down();
        }

        self.stop_queues();
        if self.open {
            self.rxtx_deinit();
        }
        self.stop_device();
    }

    /// Compare the link status block with what the stack was last told
    ///
    /// Each edge is reported once. An up edge on an open device starts the
    /// queues; a down edge stops them.
    pub fn check_link(&mut self) {
        let Some(lif) = self.lif.as_ref() else {
            return;
        };
        let up = lif.is_link_up();
        if up == self.link_up {
            return;
        }
        self.link_up = up;

        if up {
            info!("ionic: link up");
            self.stats.link_up += 1;
            self.stack.link_up();
            if self.open {
                if let Err(e) = self.start_queues() {
                    warn!("ionic: unable to start queues on link up: {}", e);
                }
            }
        } else {
            info!("ionic: link down");
            self.stats.link_down += 1;
            self.stack.link_down();
            self.stop_queues();
        }
    }

    fn refill(&mut self) {
        if !self.queues_running {
            return;
        }
        let buf_len = self.config.rx_buffer_len();
        let Some(rxq) = self.lif.as_mut().and_then(|lif| lif.rxq.as_mut()) else {
            return;
        };
        if let Err(e) = txrx::fill_rx(rxq, &mut self.bar, &mut self.dma, buf_len) {
            warn!("ionic: rx fill failed: {}", e);
        }
    }

    /// One poll cycle: liveness, completions, refill, link, events
    pub fn poll(&mut self) {
        if !self.open {
            return;
        }

        let live = firmware_live(self.bar.read_fw_status());
        if live != self.fw_running {
            if live {
                self.handle_fw_up();
            } else {
                self.handle_fw_down();
            }
        }
        if !self.fw_running {
            return;
        }

        if let Some(lif) = self.lif.as_mut() {
            if let Some(txq) = lif.txq.as_mut() {
                let reaped = txrx::poll_tx(txq, &mut self.dma, &mut self.stack);
                self.stats.stale_completions += reaped.stale as u64;
            }
            if let Some(rxq) = lif.rxq.as_mut() {
                let reaped = txrx::poll_rx(rxq, &mut self.dma, &mut self.stack);
                self.stats.stale_completions += reaped.stale as u64;
            }
        }

        self.refill();
        self.check_link();

        if let Some(lif) = self.lif.as_mut() {
            lif.poll_notifyq();
        }
    }

    /// Open for traffic: start firmware if needed, build TX/RX and start
    /// the queues if the link is up
    ///
    /// # Errors
    /// Any failure is reported once; the device is left `Down` and closed.
    pub fn open(&mut self) -> Result<(), NetError> {
        if self.open {
            return Ok(());
        }
        info!("ionic: open, mtu {}", self.config.mtu);

        if !firmware_live(self.bar.read_fw_status()) {
            if self.fw_running {
                self.handle_fw_down();
            }
            return Err(NetError::FirmwareDown);
        }

        self.start_device()?;
        if let Err(e) = self.rxtx_init() {
            error!("ionic: cannot init rx/tx: {}", e);
            self.stop_device();
            return Err(e);
        }

        self.open = true;
        if let Err(e) = self.start_queues() {
            error!("ionic: cannot start queues: {}", e);
            self.open = false;
            self.rxtx_deinit();
            self.stop_device();
            return Err(e);
        }

        self.check_link();
        Ok(())
    }

    /// Close: stop queues, release TX/RX, stop the device
    pub fn close(&mut self) {
        if !self.open {
            return;
        }

        if let Some(tx) = self.tx_stats() {
            info!(
                "ionic: tx posted {} doorbells {} done {} full {} map_err {}",
                tx.posted, tx.doorbells, tx.completions, tx.full, tx.map_err
            );
        }
        if let Some(rx) = self.rx_stats() {
            info!(
                "ionic: rx posted {} doorbells {} done {} alloc_fail {} errors {}",
                rx.posted, rx.doorbells, rx.completions, rx.alloc_fail, rx.errors
            );
        }
        info!(
            "ionic: tx_total {} stale {} fw_up {} fw_down {}",
            self.stats.tx_total, self.stats.stale_completions, self.stats.fw_up, self.stats.fw_down
        );

        self.stop_queues();
        self.rxtx_deinit();
        self.stop_device();
        self.open = false;
    }

    /// Queue a frame on the TX ring
    ///
    /// # Errors
    /// The buffer comes back with `FirmwareDown` while firmware is gone,
    /// `DeviceNotInitialized` before `open`, or the data path's error.
    pub fn transmit(&mut self, iobuf: IoBuffer) -> Result<(), TransmitError> {
        self.stats.tx_total += 1;

        if !self.fw_running {
            return Err(TransmitError::new(NetError::FirmwareDown, iobuf));
        }
        let Some(txq) = self.lif.as_mut().and_then(|lif| lif.txq.as_mut()) else {
            return Err(TransmitError::new(NetError::DeviceNotInitialized, iobuf));
        };
        txrx::transmit(txq, &mut self.bar, &mut self.dma, iobuf, self.config.vlan)
    }

    /// Change the VLAN tag inserted on transmit
    pub fn set_vlan(&mut self, vlan: Option<u16>) -> Result<(), NetError> {
        if let Some(id) = vlan {
            validate_vlan(id)?;
        }
        self.config.vlan = vlan;
        self.push_features()
    }

    pub fn set_oob_management(&mut self, enabled: bool) -> Result<(), NetError> {
        self.config.oob_management = enabled;
        self.push_features()
    }

    fn push_features(&mut self) -> Result<(), NetError> {
        let features = lif_features(&self.config);
        match self.lif.as_mut() {
            Some(lif) if self.fw_running => lif.set_features(&mut self.bar, features),
            // Applied by the next start_device
            _ => Ok(()),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn dma(&self) -> &M {
        &self.dma
    }

    pub fn bar(&self) -> &R {
        &self.bar
    }

    pub fn lif(&self) -> Option<&Lif> {
        self.lif.as_ref()
    }

    /// MAC address read from the LIF at the last device start
    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn tx_stats(&self) -> Option<QueueStats> {
        self.lif.as_ref()?.txq.as_ref().map(|q| q.stats)
    }

    pub fn rx_stats(&self) -> Option<QueueStats> {
        self.lif.as_ref()?.rxq.as_ref().map(|q| q.stats)
    }

    /// Whether the TX ring can take another frame
    pub fn tx_ready(&self) -> bool {
        self.fw_running
            && self
                .lif
                .as_ref()
                .and_then(|lif| lif.txq.as_ref())
                .is_some_and(|txq| txq.ring.has_space(1))
    }
}

impl<R: Bar, M: DmaMapper, S: NetStack> NetworkDriver for IonicDevice<R, M, S> {
    fn open(&mut self) -> Result<(), NetError> {
        IonicDevice::open(self)
    }

    fn close(&mut self) {
        IonicDevice::close(self)
    }

    fn transmit(&mut self, iobuf: IoBuffer) -> Result<(), TransmitError> {
        IonicDevice::transmit(self, iobuf)
    }

    fn poll(&mut self) {
        IonicDevice::poll(self)
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn is_link_up(&self) -> bool {
        self.link_up
    }
}
