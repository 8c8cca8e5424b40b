//! Test bench: an engine over in-memory ports plus frame builders

use super::engine::{Engine, EngineBuilder, EngineSettings};
use super::forwarder;
use super::worker::WorkerContext;
use crate::capture::MemPort;
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::icmp::EchoRequestBuilder;
use crate::protocol::ipv4::{Ipv4Builder, Protocol};
use crate::protocol::udp::UdpBuilder;
use crate::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

/// Port `i` has MAC 02:00:00:00:00:0i
pub fn port_mac(i: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, i])
}

/// MAC of a neighbor host
pub fn host_mac(i: u8) -> MacAddr {
    MacAddr([0x0a, 0, 0, 0, 0, i])
}

pub struct Bench {
    pub engine: Engine,
    pub mems: Vec<Arc<MemPort>>,
    pub ctx: WorkerContext,
}

impl Bench {
    /// `ports` in-memory ports configured with the given strings.
    pub fn new(ports: u8, interfaces: &[&str], static_arp: &[&str], routes: &[&str]) -> Self {
        let mut b = EngineBuilder::new(EngineSettings::default());
        let mut mems = Vec::new();
        for i in 0..ports {
            let mem = Arc::new(MemPort::new(port_mac(i)));
            b.add_port(mem.clone());
            mems.push(mem);
        }
        for s in interfaces {
            b.add_interface(&s.parse().unwrap()).unwrap();
        }
        for s in static_arp {
            b.add_static_arp(&s.parse().unwrap()).unwrap();
        }
        for s in routes {
            b.add_route(&s.parse().unwrap()).unwrap();
        }
        let engine = b.build().unwrap();
        let ctx = WorkerContext::with_seed(&engine, 0, 1);
        Self { engine, mems, ctx }
    }

    /// Two ports in domain 1: 10.0.0.1/24 on port 0, 10.0.1.1/24 on port 1.
    pub fn two_ports(static_arp: &[&str], routes: &[&str]) -> Self {
        Self::new(2, &["0:10.0.0.1/24", "1:10.0.1.1/24"], static_arp, routes)
    }

    /// Runs one frame through the pipeline and flushes the TX batches.
    pub fn rx(&mut self, port: u16, frame: Vec<u8>) {
        forwarder::process_frame(&self.engine, &mut self.ctx, port, frame);
        self.ctx.queues.flush(&self.engine);
    }

    pub fn sent(&self, port: usize) -> Vec<Vec<u8>> {
        self.mems[port].take_sent()
    }
}

pub fn ipv4_frame(dst_mac: MacAddr, src_mac: MacAddr, ip: Vec<u8>) -> Vec<u8> {
    FrameBuilder::new(dst_mac, src_mac, EtherType::Ipv4 as u16)
        .payload(&ip)
        .build()
}

pub fn udp_frame(dst_mac: MacAddr, src: Ipv4Addr, dst: Ipv4Addr, dst_port: u16) -> Vec<u8> {
    let udp = UdpBuilder::new(4000, dst_port)
        .payload(b"payload")
        .build(src, dst);
    ipv4_frame(
        dst_mac,
        host_mac(0xee),
        Ipv4Builder::new(src, dst, Protocol::Udp).build(&udp),
    )
}

pub fn echo_frame(dst_mac: MacAddr, src_mac: MacAddr, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let icmp = EchoRequestBuilder::new(0x1234, 1).payload(b"ping").build();
    ipv4_frame(
        dst_mac,
        src_mac,
        Ipv4Builder::new(src, dst, Protocol::Icmp).build(&icmp),
    )
}

pub fn arp_request_frame(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    ArpPacket::request(sender_mac, sender_ip, target_ip).to_frame(MacAddr::BROADCAST, sender_mac)
}

pub fn arp_reply_frame(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    ArpPacket::reply(sender_mac, sender_ip, target_mac, target_ip).to_frame(target_mac, sender_mac)
}
