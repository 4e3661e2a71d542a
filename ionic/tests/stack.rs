// smoltcp interface running over the software NIC model

mod common;

use common::*;
use ionic::{DeviceState, IonicDevice, NetworkStack, PacketQueue};
use smoltcp::wire::Ipv4Address;

const PEER_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

fn arp_request(sender_ip: [u8; 4], target_ip: [u8; 4]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(42);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&PEER_MAC);
    frame.extend_from_slice(&[0x08, 0x06]);
    // Ethernet/IPv4, 6-byte hardware and 4-byte protocol addresses, request
    frame.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
    frame.extend_from_slice(&PEER_MAC);
    frame.extend_from_slice(&sender_ip);
    frame.extend_from_slice(&[0; 6]);
    frame.extend_from_slice(&target_ip);
    frame
}

fn network(sim: &SimNic) -> NetworkStack<SimNic, TrackingDma> {
    let device =
        IonicDevice::probe(sim.clone(), TrackingDma::default(), PacketQueue::new(), test_config())
            .unwrap();
    NetworkStack::new(device, Some((Ipv4Address::new(10, 0, 0, 2), 24)))
        .unwrap()
}

#[test]
fn test_stack_opens_device() {
    let sim = SimNic::new();
    let net = network(&sim);

    assert_eq!(net.mac_address(), SIM_MAC);
    assert!(net.is_link_up());
    assert_eq!(net.device().state(), DeviceState::QueuesRunning);
}

#[test]
fn test_answers_arp_for_own_address() {
    let sim = SimNic::new();
    let mut net = network(&sim);

    assert!(sim.deliver_rx(&arp_request([10, 0, 0, 1], [10, 0, 0, 2])));
    net.poll(0);
    assert_eq!(net.device().stack().pending(), 0);

    sim.complete_tx(8, false);
    let state = sim.state();
    let reply = state
        .wire
        .iter()
        .find(|f| f.data.len() >= 42 && f.data[12..14] == [0x08, 0x06])
        .expect("no ARP reply sent");

    assert_eq!(&reply.data[0..6], &PEER_MAC);
    assert_eq!(&reply.data[6..12], &SIM_MAC);
    // Opcode: reply
    assert_eq!(&reply.data[20..22], &[0x00, 0x02]);
    assert_eq!(&reply.data[28..32], &[10, 0, 0, 2]);
    assert_eq!(&reply.data[38..42], &[10, 0, 0, 1]);
}

#[test]
fn test_completed_transmits_are_counted() {
    let sim = SimNic::new();
    let mut net = network(&sim);

    assert!(sim.deliver_rx(&arp_request([10, 0, 0, 1], [10, 0, 0, 2])));
    net.poll(0);
    let sent = sim.complete_tx(8, false);
    assert!(sent >= 1);
    net.poll(1);

    assert_eq!(net.device().stack().tx_done, sent as u64);
    assert_eq!(net.device().stack().tx_cancelled, 0);
}

#[test]
fn test_into_device_closes() {
    let sim = SimNic::new();
    let net = network(&sim);

    let device = net.into_device();
    assert!(!device.is_open());
    assert_eq!(device.state(), DeviceState::Down);
    assert!(device.dma().live.is_empty());
}
