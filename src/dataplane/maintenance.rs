//! Periodic tasks, run on the master core once per timer period
//!
//! In order: DHCP discovery for unaddressed ports, statistics, next-hop
//! keepalive pings, gratuitous ARP, and the ARP retry pass.

use super::arp_processor;
use super::engine::Engine;
use super::forwarder;
use super::lpm::Disposition;
use super::packet::{Domain, Packet};
use super::worker::WorkerContext;
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::icmp::EchoRequestBuilder;
use crate::protocol::ipv4::{Ipv4Builder, Protocol};
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::DiscardReason;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// ICMP identifier of keepalive pings
pub const KEEPALIVE_ICMP_ID: u16 = 0x6474;

pub fn periodic(engine: &Engine, ctx: &mut WorkerContext) {
    dhcp_discover(engine, ctx);
    if engine.settings.print_statistics {
        log_statistics(engine);
    }
    if engine.settings.ping_nexthops {
        ping_nexthops(engine, ctx);
    }
    gratuitous_arp(engine, ctx);
    arp_retry(engine, ctx);
}

/// Starts discovery on every enabled port that has a domain but no address.
pub fn dhcp_discover(engine: &Engine, ctx: &mut WorkerContext) {
    for port in engine.ports() {
        if port.domain == 0 || !engine.is_enabled(port.id) {
            continue;
        }
        let action = {
            let mut state = port.state();
            if state.ipaddr.is_some() {
                continue;
            }
            let xid = ctx.rng.next_u32();
            state.dhcp.start(xid)
        };
        forwarder::apply_dhcp_action(engine, ctx, port.id, action);
    }
}

pub fn log_statistics(engine: &Engine) {
    for port in engine.ports() {
        let s = engine.metrics.port(Some(port.id));
        info!(
            "port {}: rx {} tx {} qfull {} drop {} term {} error {} ignore {}",
            port.id,
            s.rx.get(),
            s.tx.get(),
            s.queue_full.get(),
            s.drop.get(),
            s.term.get(),
            s.error.get(),
            s.ignore.get()
        );
    }
    let m = &engine.metrics;
    info!(
        "dt hits {} misses {} entries {}, no route {}, arp req {} rep {}, pending superseded {} expired {}",
        m.dt_hits.get(),
        m.dt_misses.get(),
        engine.tables.dt.len(),
        m.no_route.get(),
        m.arp_requests_sent.get(),
        m.arp_replies_sent.get(),
        m.pending_superseded.get(),
        m.pending_expired.get()
    );
}

/// Links next-hop routes that have not carried traffic yet, then sends an
/// echo request to every next-hop address.
pub fn ping_nexthops(engine: &Engine, ctx: &mut WorkerContext) {
    let targets: Vec<(Domain, Ipv4Addr, Ipv4Addr)> = {
        let mut lpm = engine.tables.lpm();
        for route in lpm.unlinked_nexthop_routes() {
            if let Err(reason) = forwarder::resolve_nexthop(&mut lpm, route) {
                if let Some(r) = lpm.get(route) {
                    debug!("keepalive: {}: {}", r, reason);
                }
            }
        }
        lpm.nexthop_hosts()
            .into_iter()
            .filter_map(|(domain, addr)| {
                let subnet = lpm.lookup_subnet(domain, addr)?;
                match subnet.disposition {
                    Disposition::Subnet { interface_addr } => Some((domain, interface_addr, addr)),
                    _ => None,
                }
            })
            .collect()
    };

    for (seq, (domain, src, dst)) in targets.into_iter().enumerate() {
        let icmp = EchoRequestBuilder::new(KEEPALIVE_ICMP_ID, seq as u16)
            .payload(b"dtfwd keepalive")
            .build();
        let ip = Ipv4Builder::new(src, dst, Protocol::Icmp)
            .identification(ctx.rng.next_u32() as u16)
            .build(&icmp);
        // MACs are filled in on transmit
        let frame = FrameBuilder::new(MacAddr::ZERO, MacAddr::ZERO, EtherType::Ipv4 as u16)
            .payload(&ip)
            .build();
        engine.metrics.keepalive_pings.inc();
        forwarder::ipv4_send(engine, ctx, Packet::generated(frame, domain), dst);
    }
}

pub fn gratuitous_arp(engine: &Engine, ctx: &mut WorkerContext) {
    for port in engine.ports() {
        if port.gratarp && engine.is_enabled(port.id) {
            arp_processor::send_gratuitous(engine, ctx, port);
        }
    }
}

/// Re-requests unresolved next-hops and frees pending packets that have
/// waited through too many requests.
pub fn arp_retry(engine: &Engine, ctx: &mut WorkerContext) {
    let retry = engine.tables.ar().retry_pending(engine.settings.arp_retry_limit);
    for (port, addr) in retry.rerequest {
        arp_processor::send_request(engine, ctx, port, addr);
    }
    for (port, addr, pkt) in retry.expired {
        warn!("ARP: no answer for {} on port {}, pending packet dropped", addr, port);
        engine.metrics.pending_expired.inc();
        engine.discard(pkt, DiscardReason::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::dhcp_client::DhcpClientState;
    use crate::dataplane::testing::*;
    use crate::protocol::arp::{ArpOp, ArpPacket};
    use crate::protocol::ethernet::Frame;
    use crate::protocol::icmp::IcmpPacket;
    use crate::protocol::ipv4::Ipv4Header;

    #[test]
    fn test_dhcp_discover_only_unaddressed() {
        let mut bench = Bench::new(3, &["0:10.0.0.1/24", "1:"], &[], &[]);
        dhcp_discover(&bench.engine, &mut bench.ctx);
        bench.ctx.queues.flush(&bench.engine);

        assert!(bench.sent(0).is_empty());
        assert_eq!(bench.sent(1).len(), 1);
        // Port 2 was never configured
        assert!(bench.sent(2).is_empty());
        assert_eq!(
            bench.engine.port(1).unwrap().state().dhcp.state(),
            DhcpClientState::Selecting
        );
    }

    #[test]
    fn test_ping_nexthops() {
        let mut bench = Bench::two_ports(
            &["10.0.1.2@0a:00:00:00:00:02"],
            &["10.0.2.0/24@10.0.1.2"],
        );
        ping_nexthops(&bench.engine, &mut bench.ctx);
        bench.ctx.queues.flush(&bench.engine);

        let sent = bench.sent(1);
        assert_eq!(sent.len(), 1);
        let f = Frame::parse(&sent[0]).unwrap();
        assert_eq!(f.dst_mac(), host_mac(2));
        assert_eq!(f.src_mac(), port_mac(1));
        let hdr = Ipv4Header::parse(f.payload()).unwrap();
        assert_eq!(hdr.src_addr(), ip(10, 0, 1, 1));
        assert_eq!(hdr.dst_addr(), ip(10, 0, 1, 2));
        assert!(IcmpPacket::parse(hdr.payload()).unwrap().is_echo_request());
        assert_eq!(bench.engine.metrics.keepalive_pings.get(), 1);
    }

    #[test]
    fn test_arp_retry_then_expiry() {
        let mut bench = Bench::two_ports(&[], &[]);
        bench.rx(0, udp_frame(port_mac(0), ip(10, 0, 0, 2), ip(10, 0, 1, 5), 5000));
        assert_eq!(bench.sent(1).len(), 1);

        let limit = bench.engine.settings.arp_retry_limit as usize;
        for _ in 0..limit {
            arp_retry(&bench.engine, &mut bench.ctx);
            bench.ctx.queues.flush(&bench.engine);
            let sent = bench.sent(1);
            assert_eq!(sent.len(), 1);
            let arp = ArpPacket::parse(Frame::parse(&sent[0]).unwrap().payload()).unwrap();
            assert_eq!(arp.operation, ArpOp::Request);
        }

        arp_retry(&bench.engine, &mut bench.ctx);
        assert_eq!(bench.engine.metrics.pending_expired.get(), 1);
        assert_eq!(bench.engine.metrics.port(Some(0)).discards(DiscardReason::Error), 1);
        assert!(!bench
            .engine
            .tables
            .ar()
            .lookup(1, ip(10, 0, 1, 5))
            .unwrap()
            .has_pending());
    }

    #[test]
    fn test_gratuitous_only_flagged_ports() {
        let mut bench = Bench::new(2, &["0:10.0.0.1/24,GRATARP", "1:10.0.1.1/24"], &[], &[]);
        gratuitous_arp(&bench.engine, &mut bench.ctx);
        bench.ctx.queues.flush(&bench.engine);
        assert_eq!(bench.sent(0).len(), 1);
        assert!(bench.sent(1).is_empty());
    }
}
