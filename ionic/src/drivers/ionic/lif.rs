//! Logical interface
//!
//! One NIC function as the driver sees it: the admin and notify queues that
//! exist while firmware runs, the TX/RX pair that exists while the device is
//! open, and the status block firmware keeps current in host memory.

use super::cmd::{Command, LifAttr, LifFeatures, LifSetting, LifState, QInitFlags, QueueType, RxMode};
use super::desc::{
    CmdComp, RxComp, RxDesc, TxComp, TxDesc, EVENT_HEARTBEAT, EVENT_LINK_CHANGE, EVENT_LOG, EVENT_RESET,
};
use super::qcq::{AdminQcq, NotifyQcq, Qcq};
use super::regs::Bar;
use crate::config::DriverConfig;
use crate::dma::{DmaRegion, IoBuffer};
use crate::error::NetError;
use log::{debug, info, warn};

/// Link status value for an operational port
pub const PORT_OPER_STATUS_UP: u16 = 1;

pub type TxQcq = Qcq<TxDesc, TxComp, IoBuffer>;
pub type RxQcq = Qcq<RxDesc, RxComp, IoBuffer>;

/// Status block firmware writes into host memory (64 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct LifStatus {
    pub eid: u64,
    pub port_num: u8,
    pub rsvd: u8,
    pub link_status: u16,
    /// Mbit/s
    pub link_speed: u32,
    pub link_down_count: u16,
    pub rsvd2: [u8; 46],
}

/// LIF info block handed to firmware by `LifInit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct LifInfo {
    pub status: LifStatus,
}

/// Feature bits implied by the configuration
pub fn lif_features(config: &DriverConfig) -> LifFeatures {
    let mut features = LifFeatures::empty();
    if config.vlan.is_some() {
        features |= LifFeatures::VLAN_TX_TAG;
    }
    if config.oob_management {
        features |= LifFeatures::OOB_MGMT;
    }
    features
}

pub struct Lif {
    pub index: u16,
    info: DmaRegion<LifInfo>,
    pub adminq: AdminQcq,
    pub notifyq: NotifyQcq,
    pub txq: Option<TxQcq>,
    pub rxq: Option<RxQcq>,
    features: LifFeatures,
    mac: [u8; 6],
    devcmd_budget: u32,
    adminq_budget: u32,
}

impl Lif {
    /// Allocate the status block and the admin and notify queues
    pub fn alloc(config: &DriverConfig) -> Result<Self, NetError> {
        Ok(Self {
            index: config.lif_index,
            info: DmaRegion::new(1)?,
            adminq: AdminQcq::new(QueueType::Admin, 0, config.adminq_ring_size as usize)?,
            notifyq: NotifyQcq::new(0, config.notifyq_ring_size as usize)?,
            txq: None,
            rxq: None,
            features: LifFeatures::empty(),
            mac: [0; 6],
            devcmd_budget: config.devcmd_poll_budget,
            adminq_budget: config.adminq_poll_budget,
        })
    }

    /// Bring the LIF up: register the status block, start the admin queue,
    /// start the notify queue, read the MAC and push features and MTU
    pub fn init(&mut self, bar: &mut impl Bar, config: &DriverConfig) -> Result<(), NetError> {
        bar.dev_cmd(
            &Command::LifInit {
                lif_index: self.index,
                info_pa: self.info.bus_addr(),
            },
            self.devcmd_budget,
        )?;

        // The admin queue cannot initialize itself
        let comp = bar.dev_cmd(
            &self.adminq.init_command(self.index, QInitFlags::ENABLE),
            self.devcmd_budget,
        )?;
        self.adminq.ctl.set_initialized(comp.hw_index(), true);

        let comp = self
            .adminq
            .command(bar, &self.notifyq.init_command(self.index), self.adminq_budget)?;
        self.notifyq.ctl.set_initialized(comp.hw_index(), false);
        self.set_queue_enabled(bar, QueueType::Notify, true)?;

        let comp = self.command(
            bar,
            &Command::LifGetAttr {
                lif_index: self.index,
                attr: LifAttr::Mac,
            },
        )?;
        self.mac = comp.mac();

        self.set_features(bar, lif_features(config))?;
        self.command(
            bar,
            &Command::LifSetAttr {
                lif_index: self.index,
                setting: LifSetting::Mtu(config.mtu as u32),
            },
        )?;

        info!(
            "lif {} up, mac {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.index, self.mac[0], self.mac[1], self.mac[2], self.mac[3], self.mac[4], self.mac[5]
        );
        Ok(())
    }

    fn command(&mut self, bar: &mut impl Bar, cmd: &Command) -> Result<CmdComp, NetError> {
        self.adminq.command(bar, cmd, self.adminq_budget)
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn features(&self) -> LifFeatures {
        self.features
    }

    /// Current status block contents
    pub fn status(&self) -> LifStatus {
        self.info.read(0).status
    }

    pub fn is_link_up(&self) -> bool {
        u16::from_le(self.status().link_status) == PORT_OPER_STATUS_UP
    }

    pub fn set_features(&mut self, bar: &mut impl Bar, features: LifFeatures) -> Result<(), NetError> {
        self.command(
            bar,
            &Command::LifSetAttr {
                lif_index: self.index,
                setting: LifSetting::Features(features),
            },
        )?;
        self.features = features;
        Ok(())
    }

    pub fn set_rx_mode(&mut self, bar: &mut impl Bar, mode: RxMode) -> Result<(), NetError> {
        self.command(
            bar,
            &Command::RxModeSet {
                lif_index: self.index,
                mode,
            },
        )?;
        Ok(())
    }

    /// Stop all traffic on the LIF
    pub fn quiesce(&mut self, bar: &mut impl Bar) -> Result<(), NetError> {
        self.command(
            bar,
            &Command::LifSetAttr {
                lif_index: self.index,
                setting: LifSetting::State(LifState::Quiesce),
            },
        )?;
        Ok(())
    }

    /// Reset the LIF through the device command registers
    pub fn reset(&mut self, bar: &mut impl Bar) -> Result<(), NetError> {
        bar.dev_cmd(&Command::LifReset { lif_index: self.index }, self.devcmd_budget)?;
        Ok(())
    }

    pub fn disable_notifyq(&mut self, bar: &mut impl Bar) -> Result<(), NetError> {
        self.set_queue_enabled(bar, QueueType::Notify, false)
    }

    /// Allocate the TX and RX pairs and initialize them, still disabled
    pub fn rxtx_init(&mut self, bar: &mut impl Bar, config: &DriverConfig) -> Result<(), NetError> {
        let mut txq = TxQcq::new(QueueType::Tx, 0, config.tx_ring_size as usize)?;
        let mut rxq = RxQcq::new(QueueType::Rx, 0, config.rx_ring_size as usize)?;

        txq.init(&mut self.adminq, bar, self.index, self.adminq_budget)?;
        rxq.init(&mut self.adminq, bar, self.index, self.adminq_budget)?;

        debug!(
            "lif {} txq hw {:?} rxq hw {:?}",
            self.index,
            txq.ctl.hw_index(),
            rxq.ctl.hw_index()
        );
        self.txq = Some(txq);
        self.rxq = Some(rxq);
        Ok(())
    }

    pub fn has_rxtx(&self) -> bool {
        self.txq.is_some() || self.rxq.is_some()
    }

    /// Enable or disable one queue through the admin queue
    pub fn set_queue_enabled(
        &mut self,
        bar: &mut impl Bar,
        qtype: QueueType,
        enable: bool,
    ) -> Result<(), NetError> {
        let ctl = match qtype {
            QueueType::Tx => self.txq.as_mut().map(|q| &mut q.ctl),
            QueueType::Rx => self.rxq.as_mut().map(|q| &mut q.ctl),
            QueueType::Notify => Some(&mut self.notifyq.ctl),
            QueueType::Admin => None,
        }
        .ok_or(NetError::DeviceNotInitialized)?;

        if enable {
            ctl.enable(&mut self.adminq, bar, self.index, self.adminq_budget)
        } else {
            ctl.disable(&mut self.adminq, bar, self.index, self.adminq_budget)
        }
    }

    /// Enable TX, program the RX filter, enable RX
    ///
    /// On failure TX is disabled again and nothing is left running.
    pub fn start_queues(&mut self, bar: &mut impl Bar, rx_mode: RxMode) -> Result<(), NetError> {
        if self.txq.is_none() || self.rxq.is_none() {
            return Err(NetError::DeviceNotInitialized);
        }

        self.set_queue_enabled(bar, QueueType::Tx, true)?;

        let rx_started = match self.set_rx_mode(bar, rx_mode) {
            Ok(()) => self.set_queue_enabled(bar, QueueType::Rx, true),
            Err(e) => Err(e),
        };
        if let Err(e) = rx_started {
            warn!("lif {} rx start failed: {}", self.index, e);
            if let Err(e) = self.set_queue_enabled(bar, QueueType::Tx, false) {
                warn!("lif {} unable to disable txq: {}", self.index, e);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Disable RX, disable TX and quiesce; failures are logged, never fatal
    pub fn stop_queues(&mut self, bar: &mut impl Bar) {
        for qtype in [QueueType::Rx, QueueType::Tx] {
            if let Err(e) = self.set_queue_enabled(bar, qtype, false) {
                warn!("lif {} unable to disable {:?} queue: {}", self.index, qtype, e);
            }
        }
        if let Err(e) = self.quiesce(bar) {
            warn!("lif {} unable to quiesce: {}", self.index, e);
        }
    }

    /// Throw away events that arrived before the queues started
    pub fn drain_notifyq(&mut self) -> usize {
        let skipped = self.notifyq.drain(self.notifyq.cq.capacity());
        if skipped > 0 {
            debug!("lif {} dropped {} stale events", self.index, skipped);
        }
        skipped
    }

    /// Process pending firmware events, at most one ring's worth
    pub fn poll_notifyq(&mut self) -> usize {
        let mut handled = 0;
        while handled < self.notifyq.cq.capacity() {
            let Some(event) = self.notifyq.next_event() else {
                break;
            };
            handled += 1;

            match event.ecode {
                EVENT_LINK_CHANGE => debug!("lif {} event {}: link change", self.index, event.eid),
                EVENT_RESET => warn!("lif {} event {}: firmware reset", self.index, event.eid),
                EVENT_HEARTBEAT => debug!("lif {} event {}: heartbeat", self.index, event.eid),
                EVENT_LOG => debug!("lif {} event {}: log", self.index, event.eid),
                ecode => warn!("lif {} event {}: unknown code {}", self.index, event.eid, ecode),
            }
        }
        handled
    }
}
