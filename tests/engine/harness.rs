//! Engine over in-memory ports built from a config.toml string

use dtfwd::capture::{Capture, MemPort};
use dtfwd::config;
use dtfwd::dataplane::{process_frame, Engine, WorkerContext};
use dtfwd::protocol::arp::ArpPacket;
use dtfwd::protocol::ethernet::FrameBuilder;
use dtfwd::protocol::icmp::EchoRequestBuilder;
use dtfwd::protocol::ipv4::{Ipv4Builder, Protocol};
use dtfwd::protocol::udp::UdpBuilder;
use dtfwd::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use std::sync::Arc;

pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

pub fn port_mac(i: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, i])
}

pub fn host_mac(i: u8) -> MacAddr {
    MacAddr([0x0a, 0, 0, 0, 0, i])
}

/// `[[ports]]` tables for `count` memory-backed ports
pub fn memory_ports(count: u8) -> String {
    (0..count)
        .map(|i| {
            format!(
                "[[ports]]\nid = {}\nbackend = \"memory\"\nmac = \"{}\"\n\n",
                i,
                port_mac(i)
            )
        })
        .collect()
}

pub struct Node {
    pub engine: Engine,
    pub ports: Vec<Arc<MemPort>>,
    pub ctx: WorkerContext,
}

impl Node {
    pub fn from_toml(content: &str) -> dtfwd::Result<Self> {
        let cfg = config::from_str(content)?;
        let mut ports = Vec::new();
        let engine = Engine::from_config(&cfg, |p| {
            let mac = p.mac.as_deref().unwrap_or_default().parse().unwrap();
            let mem = Arc::new(MemPort::new(mac));
            ports.push(mem.clone());
            Ok(mem as Arc<dyn Capture>)
        })?;
        let ctx = WorkerContext::with_seed(&engine, 0, 7);
        Ok(Self { engine, ports, ctx })
    }

    /// Two ports: 10.0.0.1/24 on port 0, 10.0.1.1/24 on port 1.
    pub fn two_ports(extra_routing: &str) -> Self {
        let content = format!(
            "{}[routing]\ninterfaces = [\"0:10.0.0.1/24\", \"1:10.0.1.1/24\"]\n{}\n",
            memory_ports(2),
            extra_routing
        );
        Self::from_toml(&content).unwrap()
    }

    pub fn rx(&mut self, port: u16, frame: Vec<u8>) {
        process_frame(&self.engine, &mut self.ctx, port, frame);
        self.ctx.queues.flush(&self.engine);
    }

    pub fn sent(&self, port: usize) -> Vec<Vec<u8>> {
        self.ports[port].take_sent()
    }
}

pub fn udp_frame(dst_mac: MacAddr, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let udp = UdpBuilder::new(4000, 9000).payload(b"data").build(src, dst);
    let ip = Ipv4Builder::new(src, dst, Protocol::Udp).build(&udp);
    FrameBuilder::new(dst_mac, host_mac(0xee), EtherType::Ipv4 as u16)
        .payload(&ip)
        .build()
}

pub fn echo_frame(dst_mac: MacAddr, src_mac: MacAddr, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let icmp = EchoRequestBuilder::new(1, 1).payload(b"ping").build();
    let ip = Ipv4Builder::new(src, dst, Protocol::Icmp).build(&icmp);
    FrameBuilder::new(dst_mac, src_mac, EtherType::Ipv4 as u16)
        .payload(&ip)
        .build()
}

pub fn arp_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    ArpPacket::request(sender_mac, sender_ip, target_ip).to_frame(MacAddr::BROADCAST, sender_mac)
}

pub fn arp_reply(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    ArpPacket::reply(sender_mac, sender_ip, target_mac, target_ip).to_frame(target_mac, sender_mac)
}
