//! IPv4 forwarding pipeline
//!
//! Received frames are classified by destination MAC and EtherType. IPv4
//! packets first consult the direct table; on a miss the slow path looks
//! up the LPM table, resolves the next-hop, and installs a direct-table
//! entry so later packets of the same flow skip all of it.

use super::arp_processor;
use super::dhcp_client::DhcpClientAction;
use super::direct_table::{DtAction, DtForward, DtKey};
use super::engine::Engine;
use super::lpm::{Disposition, HostFlags, LpmTable, RouteId};
use super::packet::{Domain, Packet, PortId};
use super::worker::WorkerContext;
use crate::protocol::dhcp::DHCP_CLIENT_PORT;
use crate::protocol::icmp::{self, IcmpPacket};
use crate::protocol::ipv4::{self, Protocol};
use crate::protocol::udp::UdpHeader;
use crate::protocol::EtherType;
use crate::telemetry::DiscardReason;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use tracing::{debug, trace, warn};

/// Result of the slow-path lookup for one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    NoRoute,
    /// Addressed to the engine itself
    Local,
    Discard,
    /// A next-hop route exists but cannot be used
    Unusable { nh: Ipv4Addr, reason: &'static str },
    /// Send out `port` towards `nh`, resolving it first if needed
    Egress {
        port: PortId,
        nh: Ipv4Addr,
        rand_discard: u8,
    },
}

/// Entry point for every received frame.
pub fn process_frame(engine: &Engine, ctx: &mut WorkerContext, port: PortId, data: Vec<u8>) {
    let Some(p) = engine.port(port) else {
        engine.metrics.discard(Some(port), DiscardReason::Error);
        return;
    };
    let pkt = Packet::received(data, port, p.domain);

    let header = pkt.frame().map(|f| (f.dst_mac(), f.ethertype()));
    let (dst_mac, ethertype) = match header {
        Ok(h) => h,
        Err(e) => {
            debug!("port {}: {}", port, e);
            engine.discard(pkt, DiscardReason::Error);
            return;
        }
    };

    if !p.accepts(dst_mac) {
        trace!("port {}: wrong destination MAC {}", port, dst_mac);
        engine.discard(pkt, DiscardReason::Ignore);
        return;
    }

    match EtherType::from_u16(ethertype) {
        Some(EtherType::Ipv4) => process_ipv4(engine, ctx, pkt),
        Some(EtherType::Arp) => arp_processor::process_arp(engine, ctx, pkt),
        None => {
            trace!("port {}: ignoring ethertype 0x{:04x}", port, ethertype);
            engine.discard(pkt, DiscardReason::Ignore);
        }
    }
}

/// Multicast, broadcast and class E destinations are never forwarded.
fn is_local_group(dst: Ipv4Addr) -> bool {
    dst.octets()[0] >= 0xe0
}

fn process_ipv4(engine: &Engine, ctx: &mut WorkerContext, pkt: Packet) {
    let dst = match pkt.ipv4_dst() {
        Ok(dst) => dst,
        Err(e) => {
            debug!("IPv4 dropped: {}", e);
            engine.discard(pkt, DiscardReason::Error);
            return;
        }
    };

    if is_local_group(dst) {
        local_deliver(engine, ctx, pkt);
        return;
    }

    if let Some(in_port) = pkt.port {
        let key = DtKey {
            in_port,
            dst,
            in_mac: pkt.dst_mac(),
        };
        match engine.tables.dt.lookup(&key) {
            Some(DtAction::Forward(fwd)) => {
                engine.metrics.dt_hits.inc();
                forward(engine, ctx, pkt, &fwd);
                return;
            }
            Some(DtAction::Discard) => {
                engine.metrics.dt_hits.inc();
                engine.discard(pkt, DiscardReason::Drop);
                return;
            }
            None => engine.metrics.dt_misses.inc(),
        }
    }

    ipv4_send(engine, ctx, pkt, dst);
}

/// Rewrites the MACs and queues the packet on the egress port.
fn forward(engine: &Engine, ctx: &mut WorkerContext, mut pkt: Packet, fwd: &DtForward) {
    if fwd.rand_discard > 0 && ctx.rng.percent() < fwd.rand_discard {
        engine.discard(pkt, DiscardReason::Drop);
        return;
    }
    if let Err(e) = pkt.set_hw_addrs(fwd.dst_mac, fwd.src_mac) {
        debug!("{}", e);
        engine.discard(pkt, DiscardReason::Error);
        return;
    }
    ctx.queues.enqueue(engine, fwd.out_port, pkt.into_data());
}

/// Links a next-hop route to the host entry of its next-hop address,
/// creating that entry on the next-hop's port.
pub fn resolve_nexthop(lpm: &mut LpmTable, route: RouteId) -> std::result::Result<RouteId, &'static str> {
    let Some(Disposition::NextHop { addr, domain }) = lpm.get(route).map(|r| r.disposition) else {
        return Err("route has no next-hop");
    };

    let nhr = lpm
        .lookup(domain, addr)
        .ok_or("no route for next-hop address")?;
    if nhr.is_local() {
        return Err("next-hop points at local address");
    }
    match nhr.disposition {
        Disposition::NextHop { .. } => return Err("nested next-hops not supported"),
        Disposition::Discard => return Err("next-hop is discarded"),
        _ => {}
    }
    let port = nhr.port.ok_or("next-hop missing port-info")?;

    let flags = HostFlags {
        is_nexthop: true,
        ..Default::default()
    };
    let host = lpm.create_host_route(domain, addr, Some(port), flags).id;
    if let Some(r) = lpm.get_mut(route) {
        r.nh = Some(host);
    }
    debug!("next-hop ({}) {} linked on port {}", domain, addr, port);
    Ok(host)
}

/// Slow-path decision for `dst` in `domain`.
pub fn route_decision(lpm: &mut LpmTable, domain: Domain, dst: Ipv4Addr) -> SendDecision {
    let Some(rt) = lpm.lookup(domain, dst) else {
        return SendDecision::NoRoute;
    };
    let (id, disposition, port, linked, rand_discard) =
        (rt.id, rt.disposition, rt.port, rt.nh, rt.rand_discard);

    match disposition {
        Disposition::Local => SendDecision::Local,
        Disposition::Discard => SendDecision::Discard,
        Disposition::Attached | Disposition::Subnet { .. } => match port {
            Some(port) => SendDecision::Egress {
                port,
                nh: dst,
                rand_discard,
            },
            None => SendDecision::Unusable {
                nh: dst,
                reason: "route missing port-info",
            },
        },
        Disposition::NextHop { addr, .. } => {
            let host = match linked {
                Some(host) => host,
                None => match resolve_nexthop(lpm, id) {
                    Ok(host) => host,
                    Err(reason) => return SendDecision::Unusable { nh: addr, reason },
                },
            };
            match lpm.get(host).and_then(|h| h.port) {
                Some(port) => SendDecision::Egress {
                    port,
                    nh: addr,
                    rand_discard,
                },
                None => SendDecision::Unusable {
                    nh: addr,
                    reason: "next-hop missing port-info",
                },
            }
        }
    }
}

/// Slow path: routes `pkt` towards `dst`, caching the outcome in the
/// direct table when the packet came in on a port.
pub fn ipv4_send(engine: &Engine, ctx: &mut WorkerContext, pkt: Packet, dst: Ipv4Addr) {
    let domain = pkt.domain;
    let decision = route_decision(&mut engine.tables.lpm(), domain, dst);

    match decision {
        SendDecision::NoRoute => {
            debug!("IPv4 no route for ({}) {}", domain, dst);
            engine.metrics.no_route.inc();
            engine.discard(pkt, DiscardReason::Drop);
        }
        SendDecision::Local => local_deliver(engine, ctx, pkt),
        SendDecision::Discard => {
            if let Some(in_port) = pkt.port {
                let key = DtKey {
                    in_port,
                    dst,
                    in_mac: pkt.dst_mac(),
                };
                engine.tables.dt.find_or_create(&key, None);
            }
            engine.discard(pkt, DiscardReason::Drop);
        }
        SendDecision::Unusable { nh, reason } => {
            debug!("IPv4 ({}) {}: {} {}", domain, dst, reason, nh);
            engine.metrics.no_route.inc();
            engine.discard(pkt, DiscardReason::Drop);
        }
        SendDecision::Egress {
            port,
            nh,
            rand_discard,
        } => {
            let Some(out) = engine.port(port) else {
                engine.discard(pkt, DiscardReason::Error);
                return;
            };
            let resolved = engine.tables.ar().resolved(port, nh);
            match resolved {
                Some(dst_mac) => {
                    let fwd = DtForward {
                        out_port: port,
                        dst_mac,
                        src_mac: out.hwaddr,
                        rand_discard,
                    };
                    if let Some(in_port) = pkt.port {
                        let key = DtKey {
                            in_port,
                            dst,
                            in_mac: pkt.dst_mac(),
                        };
                        engine.tables.dt.find_or_create(&key, Some(&fwd));
                    }
                    forward(engine, ctx, pkt, &fwd);
                }
                None => arp_processor::arp_generate(engine, ctx, pkt, port, nh),
            }
        }
    }
}

/// Packets addressed to the engine: ICMP echo and DHCP replies.
pub fn local_deliver(engine: &Engine, ctx: &mut WorkerContext, pkt: Packet) {
    let header = pkt
        .ipv4()
        .map(|h| (h.protocol(), h.header_len(), h.total_length() as usize));
    let (protocol, hlen, total) = match header {
        Ok(h) => h,
        Err(e) => {
            debug!("IPv4 LOCAL dropped: {}", e);
            engine.discard(pkt, DiscardReason::Error);
            return;
        }
    };

    match Protocol::from_u8(protocol) {
        Some(Protocol::Icmp) => process_icmp(engine, ctx, pkt, hlen, total),
        Some(Protocol::Udp) => process_udp(engine, ctx, pkt, hlen, total),
        None => {
            debug!("IPv4 LOCAL ignored: protocol {}", protocol);
            engine.discard(pkt, DiscardReason::Term);
        }
    }
}

/// L4 bytes of an IPv4 packet, bounded by its total length.
fn l4(l3: &[u8], hlen: usize, total: usize) -> Option<&[u8]> {
    l3.get(hlen..total.min(l3.len()))
}

fn l4_mut(l3: &mut [u8], hlen: usize, total: usize) -> Option<&mut [u8]> {
    let end = total.min(l3.len());
    l3.get_mut(hlen..end)
}

/// Turns an echo request into its reply in place. `Ok(false)` for any
/// other ICMP message.
fn make_echo_reply(l3: &mut [u8], hlen: usize, total: usize) -> Result<bool> {
    let msg = l4_mut(l3, hlen, total)
        .ok_or_else(|| Error::InvalidPacket("ICMP beyond end of frame".into()))?;
    if !IcmpPacket::parse(msg)?.is_echo_request() {
        return Ok(false);
    }
    icmp::echo_request_to_reply(msg)?;
    ipv4::swap_addrs(l3);
    Ok(true)
}

fn process_icmp(engine: &Engine, ctx: &mut WorkerContext, mut pkt: Packet, hlen: usize, total: usize) {
    match make_echo_reply(pkt.l3_mut(), hlen, total) {
        Ok(true) => {}
        Ok(false) => {
            trace!("ICMP terminated");
            engine.discard(pkt, DiscardReason::Term);
            return;
        }
        Err(e) => {
            debug!("ICMP dropped: {}", e);
            engine.discard(pkt, DiscardReason::Error);
            return;
        }
    }

    let dst = match pkt.ipv4_dst() {
        Ok(dst) => dst,
        Err(_) => {
            engine.discard(pkt, DiscardReason::Error);
            return;
        }
    };
    engine.metrics.icmp_echo_replies.inc();
    ipv4_send(engine, ctx, pkt, dst);
}

fn process_udp(engine: &Engine, ctx: &mut WorkerContext, pkt: Packet, hlen: usize, total: usize) {
    let dhcp = l4(pkt.l3(), hlen, total)
        .and_then(|b| UdpHeader::parse(b).ok())
        .filter(|udp| udp.dst_port() == DHCP_CLIENT_PORT)
        .map(|udp| udp.payload().to_vec());

    let (Some(payload), Some(port)) = (dhcp, pkt.port) else {
        debug!("IPv4 LOCAL ignored: UDP");
        engine.discard(pkt, DiscardReason::Term);
        return;
    };
    engine.discard(pkt, DiscardReason::Term);

    let Some(p) = engine.port(port) else {
        return;
    };
    let action = p.state().dhcp.process_response(&payload);
    apply_dhcp_action(engine, ctx, port, action);
}

/// Carries out what the port's DHCP client asked for.
pub fn apply_dhcp_action(engine: &Engine, ctx: &mut WorkerContext, port: PortId, action: DhcpClientAction) {
    match action {
        DhcpClientAction::SendPacket(frame) => ctx.queues.enqueue(engine, port, frame),
        DhcpClientAction::ConfigureInterface { ip_addr, prefix_len } => {
            if let Err(e) = engine.set_interface_addr(port, ip_addr, prefix_len) {
                warn!("DHCP: could not configure port {}: {}", port, e);
            }
        }
        DhcpClientAction::None => {}
    }
}
