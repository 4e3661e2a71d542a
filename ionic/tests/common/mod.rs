// Software model of an ionic NIC for integration tests
//
// The model executes device and admin commands synchronously, reads the
// driver's descriptor rings and writes colored completions straight into its
// completion queues. Host memory is identity mapped, so bus addresses are
// plain pointers.

#![allow(dead_code)]

use ionic::drivers::ionic::cmd::{
    Command, LifAttr, LifFeatures, LifSetting, LifState, Opcode, QInitFlags, QueueOper, QueueType,
    RxMode, CMD_LEN,
};
use ionic::drivers::ionic::desc::{
    AdminCmd, CmdComp, NotifyEvent, RxComp, RxDesc, TxComp, TxDesc, TxFlags, COMP_COLOR_MASK,
};
use ionic::drivers::ionic::regs::{Bar, Doorbell, FwStatus};
use ionic::{DmaMapper, DriverConfig, IonicDevice, IoBuffer, NetError, NetStack};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Status the model returns for commands on unknown queues
pub const STATUS_ENOENT: u8 = 2;

/// Offset of `link_status` inside the LIF info block
const LINK_STATUS_OFFSET: u64 = 10;

pub const SIM_MAC: [u8; 6] = [0x00, 0xae, 0xcd, 0x01, 0x02, 0x03];

/// A frame the model pulled off the TX ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    pub data: Vec<u8>,
    pub vlan: Option<u16>,
}

#[derive(Debug)]
struct SimQueue {
    hw_index: u32,
    size: usize,
    ring_base: u64,
    cq_base: u64,
    enabled: bool,
    last_p_index: usize,
    pending: usize,
    consumer: usize,
    cq_tail: usize,
    color: bool,
}

impl SimQueue {
    fn new(hw_index: u32, size: usize, ring_base: u64, cq_base: u64, enabled: bool) -> Self {
        Self {
            hw_index,
            size,
            ring_base,
            cq_base,
            enabled,
            last_p_index: 0,
            pending: 0,
            consumer: 0,
            cq_tail: 0,
            color: true,
        }
    }

    /// Account for a doorbell; the driver only rings after posting, so an
    /// unchanged producer index means a whole ring's worth
    fn ring(&mut self, p_index: usize) {
        let mut delta = (p_index + self.size - self.last_p_index) % self.size;
        if delta == 0 {
            delta = self.size;
        }
        self.pending = (self.pending + delta).min(self.size);
        self.last_p_index = p_index;
    }

    fn take_slot(&mut self) -> Option<usize> {
        if self.pending == 0 {
            return None;
        }
        let slot = self.consumer;
        self.consumer = (self.consumer + 1) % self.size;
        self.pending -= 1;
        Some(slot)
    }

    fn next_comp_slot(&mut self) -> (usize, u8) {
        let slot = self.cq_tail;
        let color = if self.color { COMP_COLOR_MASK } else { 0 };
        self.cq_tail = (self.cq_tail + 1) % self.size;
        if self.cq_tail == 0 {
            self.color = !self.color;
        }
        (slot, color)
    }

    fn write_comp<T: Copy>(&mut self, build: impl FnOnce(u8) -> T) {
        let (slot, color) = self.next_comp_slot();
        let record = build(color);
        unsafe { (self.cq_base as *mut T).add(slot).write_volatile(record) };
    }

    fn read_desc<T: Copy>(&self, slot: usize) -> T {
        unsafe { (self.ring_base as *const T).add(slot).read_volatile() }
    }
}

#[derive(Debug)]
pub struct SimState {
    pub fw_status: u8,
    crashed: bool,
    /// Admin doorbells are ignored while set
    pub hang_admin: bool,
    pub link_up: bool,
    pub mac: [u8; 6],
    /// The next command with this opcode fails with this status
    pub fail_next: Option<(Opcode, u8)>,
    /// The next `QControl` of this kind fails with this status
    pub fail_queue: Option<(QueueType, QueueOper, u8)>,

    devcmd_done: bool,
    devcmd_comp: CmdComp,

    /// Every command executed, device and admin alike, in order
    pub commands: Vec<Command>,
    pub doorbells: Vec<(QueueType, Doorbell)>,
    pub wire: Vec<WireFrame>,

    pub features: LifFeatures,
    pub mtu: u32,
    pub rx_mode: Option<RxMode>,
    pub lif_state: Option<LifState>,

    lif_info: Option<u64>,
    queues: HashMap<QueueType, SimQueue>,
    next_hw_index: u32,
    next_eid: u64,
}

impl SimState {
    fn new() -> Self {
        Self {
            fw_status: FwStatus::RUNNING.bits(),
            crashed: false,
            hang_admin: false,
            link_up: true,
            mac: SIM_MAC,
            fail_next: None,
            fail_queue: None,
            devcmd_done: false,
            devcmd_comp: CmdComp::default(),
            commands: Vec::new(),
            doorbells: Vec::new(),
            wire: Vec::new(),
            features: LifFeatures::empty(),
            mtu: 0,
            rx_mode: None,
            lif_state: None,
            lif_info: None,
            queues: HashMap::new(),
            next_hw_index: 0,
            next_eid: 1,
        }
    }

    /// Drop every address the driver handed over
    fn forget(&mut self) {
        self.lif_info = None;
        self.queues.clear();
    }

    fn publish_link(&self) {
        if let Some(info) = self.lif_info {
            let value: u16 = if self.link_up { 1 } else { 0 };
            unsafe { ((info + LINK_STATUS_OFFSET) as *mut u16).write_volatile(value.to_le()) };
        }
    }

    fn execute(&mut self, cmd: Command) -> (u8, [u8; 11]) {
        self.commands.push(cmd);
        let mut data = [0u8; 11];

        if let Some((opcode, status)) = self.fail_next {
            if opcode == cmd.opcode() {
                self.fail_next = None;
                return (status, data);
            }
        }
        if let (Some((qtype, oper, status)), Command::QControl { qtype: q, oper: o, .. }) =
            (self.fail_queue, cmd)
        {
            if (qtype, oper) == (q, o) {
                self.fail_queue = None;
                return (status, data);
            }
        }

        match cmd {
            Command::Identify => {
                data[0] = 1;
                data[1] = 2;
                data[2..4].copy_from_slice(&1u16.to_le_bytes());
            }
            Command::Init => {}
            Command::Reset | Command::LifReset { .. } => self.forget(),
            Command::LifInit { info_pa, .. } => {
                self.lif_info = Some(info_pa);
                self.publish_link();
            }
            Command::LifGetAttr { attr, .. } => {
                if attr == LifAttr::Mac {
                    data[..6].copy_from_slice(&self.mac);
                }
            }
            Command::LifSetAttr { setting, .. } => match setting {
                LifSetting::Features(features) => self.features = features,
                LifSetting::Mtu(mtu) => self.mtu = mtu,
                LifSetting::State(state) => self.lif_state = Some(state),
            },
            Command::RxModeSet { mode, .. } => self.rx_mode = Some(mode),
            Command::QInit {
                qtype,
                flags,
                ring_size_log2,
                ring_base,
                cq_ring_base,
                ..
            } => {
                let hw_index = self.next_hw_index;
                self.next_hw_index += 1;
                self.queues.insert(
                    qtype,
                    SimQueue::new(
                        hw_index,
                        1 << ring_size_log2,
                        ring_base,
                        cq_ring_base,
                        flags.contains(QInitFlags::ENABLE),
                    ),
                );
                data[..4].copy_from_slice(&hw_index.to_le_bytes());
            }
            Command::QControl {
                qtype,
                hw_index,
                oper,
                ..
            } => match self.queues.get_mut(&qtype) {
                Some(q) if q.hw_index == hw_index => q.enabled = oper == QueueOper::Enable,
                _ => return (STATUS_ENOENT, data),
            },
        }
        (0, data)
    }

    fn devcmd(&mut self, raw: &[u8; CMD_LEN]) {
        self.devcmd_done = false;
        if self.crashed {
            return;
        }
        let (status, data) = match Command::from_bytes(raw) {
            Some(cmd) => self.execute(cmd),
            None => (1, [0; 11]),
        };
        self.devcmd_comp = CmdComp {
            status,
            data,
            ..Default::default()
        };
        self.devcmd_done = true;
    }

    fn doorbell(&mut self, qtype: QueueType, db: Doorbell) {
        self.doorbells.push((qtype, db));
        if self.crashed {
            return;
        }
        let Some(q) = self.queues.get_mut(&qtype) else {
            return;
        };
        assert_eq!(q.hw_index, db.qid, "doorbell for {:?} carries wrong qid", qtype);
        q.ring(db.p_index as usize);

        if qtype == QueueType::Admin && !self.hang_admin {
            self.run_admin();
        }
    }

    fn run_admin(&mut self) {
        loop {
            let Some(q) = self.queues.get_mut(&QueueType::Admin) else {
                return;
            };
            let Some(slot) = q.take_slot() else {
                return;
            };
            let desc: AdminCmd = q.read_desc(slot);

            let (status, data) = match Command::from_bytes(&desc.0) {
                Some(cmd) => self.execute(cmd),
                None => (1, [0; 11]),
            };

            // The command may have reset the queues
            if let Some(q) = self.queues.get_mut(&QueueType::Admin) {
                q.write_comp(|color| CmdComp {
                    status,
                    comp_index: slot as u16,
                    data,
                    color,
                    ..Default::default()
                });
            }
        }
    }
}

/// Shared handle to the model; the driver owns one clone, the test another
#[derive(Clone)]
pub struct SimNic(pub Rc<RefCell<SimState>>);

impl SimNic {
    pub fn new() -> Self {
        SimNic(Rc::new(RefCell::new(SimState::new())))
    }

    pub fn state(&self) -> std::cell::Ref<'_, SimState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> std::cell::RefMut<'_, SimState> {
        self.0.borrow_mut()
    }

    /// Firmware stops answering and clears its running bit
    pub fn crash(&self) {
        let mut s = self.0.borrow_mut();
        s.fw_status = 0;
        s.crashed = true;
        s.forget();
    }

    /// The function falls off the bus: every status read is all-ones
    pub fn bad_read(&self) {
        let mut s = self.0.borrow_mut();
        s.fw_status = 0xff;
        s.crashed = true;
        s.forget();
    }

    /// Firmware comes back with a clean slate
    pub fn restart(&self) {
        let mut s = self.0.borrow_mut();
        s.fw_status = FwStatus::RUNNING.bits();
        s.crashed = false;
    }

    pub fn set_link(&self, up: bool) {
        let mut s = self.0.borrow_mut();
        s.link_up = up;
        s.publish_link();
    }

    pub fn is_enabled(&self, qtype: QueueType) -> bool {
        self.0
            .borrow()
            .queues
            .get(&qtype)
            .is_some_and(|q| q.enabled)
    }

    pub fn has_queue(&self, qtype: QueueType) -> bool {
        self.0.borrow().queues.contains_key(&qtype)
    }

    /// Descriptors posted on the queue and not yet consumed
    pub fn pending(&self, qtype: QueueType) -> usize {
        self.0.borrow().queues.get(&qtype).map_or(0, |q| q.pending)
    }

    /// Commands executed so far with the given opcode
    pub fn count(&self, opcode: Opcode) -> usize {
        self.0
            .borrow()
            .commands
            .iter()
            .filter(|c| c.opcode() == opcode)
            .count()
    }

    /// Queue enable/disable commands in execution order
    pub fn queue_controls(&self) -> Vec<(QueueType, QueueOper)> {
        self.0
            .borrow()
            .commands
            .iter()
            .filter_map(|c| match *c {
                Command::QControl { qtype, oper, .. } => Some((qtype, oper)),
                _ => None,
            })
            .collect()
    }

    /// Send up to `max` pending TX descriptors; one completion per frame,
    /// or a single completion for the lot when `batch` is set
    pub fn complete_tx(&self, max: usize, batch: bool) -> usize {
        let mut s = self.0.borrow_mut();
        let SimState { queues, wire, .. } = &mut *s;
        let Some(q) = queues.get_mut(&QueueType::Tx) else {
            return 0;
        };
        if !q.enabled {
            return 0;
        }

        let mut sent = 0;
        let mut last = None;
        while sent < max {
            let Some(slot) = q.take_slot() else {
                break;
            };
            let desc: TxDesc = q.read_desc(slot);
            let len = u16::from_le(desc.len) as usize;
            let data = unsafe { std::slice::from_raw_parts(desc.addr() as *const u8, len) }.to_vec();
            let vlan = desc
                .flags()
                .contains(TxFlags::VLAN)
                .then(|| u16::from_le(desc.vlan_tci));
            wire.push(WireFrame { data, vlan });

            if !batch {
                q.write_comp(|color| TxComp {
                    comp_index: slot as u16,
                    color,
                    ..Default::default()
                });
            }
            last = Some(slot);
            sent += 1;
        }

        if let (true, Some(slot)) = (batch, last) {
            q.write_comp(|color| TxComp {
                comp_index: slot as u16,
                color,
                ..Default::default()
            });
        }
        sent
    }

    /// Write a TX completion for `comp_index` without consuming anything
    pub fn inject_tx_completion(&self, comp_index: u16) {
        let mut s = self.0.borrow_mut();
        if let Some(q) = s.queues.get_mut(&QueueType::Tx) {
            q.write_comp(|color| TxComp {
                comp_index,
                color,
                ..Default::default()
            });
        }
    }

    /// Place `frame` in the next posted receive buffer
    pub fn deliver_rx(&self, frame: &[u8]) -> bool {
        self.deliver_rx_with_status(frame, 0)
    }

    pub fn deliver_rx_with_status(&self, frame: &[u8], status: u8) -> bool {
        let mut s = self.0.borrow_mut();
        let Some(q) = s.queues.get_mut(&QueueType::Rx) else {
            return false;
        };
        if !q.enabled {
            return false;
        }
        let Some(slot) = q.take_slot() else {
            return false;
        };

        let desc: RxDesc = q.read_desc(slot);
        let room = u16::from_le(desc.len) as usize;
        let copy = frame.len().min(room);
        unsafe {
            std::ptr::copy_nonoverlapping(frame.as_ptr(), u64::from_le(desc.addr) as *mut u8, copy)
        };

        q.write_comp(|color| RxComp {
            status,
            comp_index: slot as u16,
            len: frame.len() as u16,
            pkt_type_color: color,
            ..Default::default()
        });
        true
    }

    /// Post a firmware event on the notify queue
    pub fn post_event(&self, ecode: u16) -> bool {
        let mut s = self.0.borrow_mut();
        let eid = s.next_eid;
        let Some(q) = s.queues.get_mut(&QueueType::Notify) else {
            return false;
        };
        if !q.enabled {
            return false;
        }
        q.write_comp(|color| NotifyEvent {
            eid,
            ecode,
            color,
            ..Default::default()
        });
        s.next_eid += 1;
        true
    }

    /// Lose an event id, as if the firmware dropped one
    pub fn skip_event_id(&self) {
        self.0.borrow_mut().next_eid += 1;
    }
}

impl Bar for SimNic {
    fn read_fw_status(&self) -> u8 {
        self.0.borrow().fw_status
    }

    fn write_doorbell(&mut self, qtype: QueueType, db: Doorbell) {
        self.0.borrow_mut().doorbell(qtype, db);
    }

    fn devcmd_post(&mut self, cmd: &[u8; CMD_LEN]) {
        self.0.borrow_mut().devcmd(cmd);
    }

    fn devcmd_done(&self) -> bool {
        self.0.borrow().devcmd_done
    }

    fn devcmd_comp(&self) -> CmdComp {
        self.0.borrow().devcmd_comp
    }
}

/// Identity mapper that tracks every live mapping
#[derive(Debug, Default)]
pub struct TrackingDma {
    pub live: HashSet<u64>,
    pub maps: usize,
    pub unmaps: usize,
    /// Unmaps of addresses that were not mapped
    pub bad_unmaps: usize,
    /// Remaining allocations before `alloc` fails
    pub alloc_limit: Option<usize>,
    pub fail_map: bool,
}

impl DmaMapper for TrackingDma {
    fn alloc(&mut self, len: usize) -> Option<IoBuffer> {
        if let Some(limit) = self.alloc_limit.as_mut() {
            if *limit == 0 {
                return None;
            }
            *limit -= 1;
        }
        Some(IoBuffer::zeroed(len))
    }

    fn map(&mut self, iobuf: &mut IoBuffer) -> Result<u64, NetError> {
        if self.fail_map || iobuf.is_empty() {
            return Err(NetError::MapError);
        }
        let addr = iobuf.as_mut_ptr() as u64;
        assert!(self.live.insert(addr), "buffer {:#x} mapped twice", addr);
        self.maps += 1;
        Ok(addr)
    }

    fn unmap(&mut self, _iobuf: &mut IoBuffer, addr: u64) {
        if !self.live.remove(&addr) {
            self.bad_unmaps += 1;
        }
        self.unmaps += 1;
    }
}

/// Stack that records everything the driver tells it
#[derive(Debug, Default)]
pub struct RecordingStack {
    /// Link edges, `true` for up
    pub links: Vec<bool>,
    pub received: Vec<Vec<u8>>,
    pub completed: Vec<(Vec<u8>, Result<(), NetError>)>,
}

impl NetStack for RecordingStack {
    fn link_up(&mut self) {
        self.links.push(true);
    }

    fn link_down(&mut self) {
        self.links.push(false);
    }

    fn receive(&mut self, iobuf: IoBuffer) {
        self.received.push(iobuf.into_vec());
    }

    fn tx_complete(&mut self, iobuf: IoBuffer, status: Result<(), NetError>) {
        self.completed.push((iobuf.into_vec(), status));
    }
}

pub type TestDevice = IonicDevice<SimNic, TrackingDma, RecordingStack>;

/// Small rings and a short command budget so timeouts stay cheap
pub fn test_config() -> DriverConfig {
    DriverConfig::default()
        .with_ring_sizes(8, 8)
        .with_poll_budget(32)
}

pub fn probe(sim: &SimNic) -> TestDevice {
    probe_with(sim, test_config())
}

pub fn probe_with(sim: &SimNic, config: DriverConfig) -> TestDevice {
    IonicDevice::probe(sim.clone(), TrackingDma::default(), RecordingStack::default(), config)
        .expect("probe")
}

/// Probe and open with the link up
pub fn open_device(sim: &SimNic) -> TestDevice {
    let mut device = probe(sim);
    device.open().expect("open");
    device
}

/// A 60-byte frame whose first byte identifies it
pub fn frame(tag: u8) -> IoBuffer {
    let mut data = vec![0u8; 60];
    data[0] = tag;
    data[12] = 0x08;
    IoBuffer::from(data)
}
