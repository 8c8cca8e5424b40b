//! ARP processing
//!
//! Answers requests for addresses in the local address table, learns
//! neighbors into the AR table, and releases the packet parked on an AR
//! entry once it resolves.

use super::engine::Engine;
use super::forwarder;
use super::lpm::Disposition;
use super::packet::{Packet, PortId};
use super::port::Port;
use super::worker::WorkerContext;
use crate::protocol::arp::{ArpOp, ArpPacket, ARP_PACKET_SIZE};
use crate::protocol::MacAddr;
use crate::telemetry::DiscardReason;
use std::net::Ipv4Addr;
use tracing::{debug, info, trace, warn};

/// What to do with a received ARP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpAction {
    /// Answer the request, claiming the target with this MAC
    Reply(MacAddr),
    /// Learn the sender of a reply
    Learn,
    /// Not for us
    Ignore,
    /// Reply that must not be learned
    Reject(&'static str),
}

/// Decides how to handle `arp` received on `port`.
pub fn classify(engine: &Engine, port: &Port, arp: &ArpPacket) -> ArpAction {
    match arp.operation {
        ArpOp::Request => engine
            .tables
            .lat()
            .lookup_mac_for_target(port.id, arp.target_ip, port.hwaddr)
            .map_or(ArpAction::Ignore, ArpAction::Reply),
        ArpOp::Reply => {
            let subnet_port = engine
                .tables
                .lpm()
                .lookup_subnet(port.domain, arp.sender_ip)
                .and_then(|s| s.port);
            if subnet_port == Some(port.id) {
                ArpAction::Learn
            } else {
                ArpAction::Reject("sender is not on a subnet of this port")
            }
        }
    }
}

pub fn process_arp(engine: &Engine, ctx: &mut WorkerContext, pkt: Packet) {
    let arp = match ArpPacket::parse(pkt.l3()) {
        Ok(arp) => arp,
        Err(e) => {
            debug!("{}", e);
            engine.discard(pkt, DiscardReason::Error);
            return;
        }
    };
    let Some(port) = pkt.port.and_then(|p| engine.port(p)) else {
        engine.discard(pkt, DiscardReason::Error);
        return;
    };

    match classify(engine, port, &arp) {
        ArpAction::Reply(local_mac) => {
            learn(engine, ctx, port, arp.sender_ip, arp.sender_mac);
            send_reply(engine, ctx, pkt, port, &arp, local_mac);
        }
        ArpAction::Learn => {
            let reason = if learn(engine, ctx, port, arp.sender_ip, arp.sender_mac) {
                DiscardReason::Term
            } else {
                DiscardReason::Drop
            };
            engine.discard(pkt, reason);
        }
        ArpAction::Ignore => {
            trace!("ARP request for {} not ours on port {}", arp.target_ip, port.id);
            engine.discard(pkt, DiscardReason::Ignore);
        }
        ArpAction::Reject(reason) => {
            debug!(
                "ARP reply from ({}) {} on port {} dropped: {}",
                port.domain, arp.sender_ip, port.id, reason
            );
            engine.discard(pkt, DiscardReason::Drop);
        }
    }
}

/// Rewrites the request into its reply in place and queues it.
fn send_reply(
    engine: &Engine,
    ctx: &mut WorkerContext,
    mut pkt: Packet,
    port: &Port,
    arp: &ArpPacket,
    local_mac: MacAddr,
) {
    let reply = ArpPacket::reply(local_mac, arp.target_ip, arp.sender_mac, arp.sender_ip);
    match pkt.l3_mut().get_mut(..ARP_PACKET_SIZE) {
        Some(buf) => buf.copy_from_slice(&reply.to_bytes()),
        None => {
            engine.discard(pkt, DiscardReason::Error);
            return;
        }
    }
    if pkt.set_hw_addrs(arp.sender_mac, port.hwaddr).is_err() {
        engine.discard(pkt, DiscardReason::Error);
        return;
    }
    debug!(
        "ARP sending reply for ({}) {} back to {}",
        port.domain, arp.target_ip, arp.sender_ip
    );
    engine.metrics.arp_replies_sent.inc();
    ctx.queues.enqueue(engine, port.id, pkt.into_data());
}

/// Records `addr -> mac` on `port` and releases any pending packet.
///
/// Refuses the zero address, addresses without a route, local
/// addresses, and host addresses bound to another port.
pub fn learn(engine: &Engine, ctx: &mut WorkerContext, port: &Port, addr: Ipv4Addr, mac: MacAddr) -> bool {
    if addr.is_unspecified() {
        debug!("ARP: ignore learning zero IPv4 address on port {}", port.id);
        return false;
    }
    let domain = port.domain;
    {
        let lpm = engine.tables.lpm();
        let Some(rt) = lpm.lookup(domain, addr) else {
            debug!("ARP: no route for ({}) {}", domain, addr);
            return false;
        };
        if rt.prefix.is_host() {
            if rt.is_local() {
                warn!("ARP: ({}) {} from {} conflicts with a local address", domain, addr, mac);
                return false;
            }
            if let Some(other) = rt.port.filter(|p| *p != port.id) {
                warn!(
                    "ARP: ({}) {} seen on port {} but routed via port {}",
                    domain, addr, port.id, other
                );
                return false;
            }
        }
    }

    let (previous, pending) = {
        let mut ar = engine.tables.ar();
        let previous = ar.resolved(port.id, addr);
        let pending = ar.learn(port.id, addr, mac).take_pending_packet();
        (previous, pending)
    };
    engine.tables.lpm().set_host_hwaddr(domain, addr, mac);

    match previous {
        Some(old) if old != mac => {
            info!("ARP: ({}) {} moved from {} to {} on port {}", domain, addr, old, mac, port.id);
            // Entries forwarding to the old MAC may be keyed by any destination
            engine.tables.dt.clear();
        }
        Some(_) => {}
        None => {
            info!("ARP: learned ({}) {} is {} on port {}", domain, addr, mac, port.id);
            engine.tables.dt.invalidate_addr(addr);
        }
    }

    if let Some(pkt) = pending {
        release_pending(engine, ctx, pkt);
    }
    true
}

/// Sends a released packet back through the slow path, which now finds
/// its next-hop resolved and installs the direct-table entry.
fn release_pending(engine: &Engine, ctx: &mut WorkerContext, pkt: Packet) {
    match pkt.ipv4_dst() {
        Ok(dst) => forwarder::ipv4_send(engine, ctx, pkt, dst),
        Err(_) => engine.discard(pkt, DiscardReason::Error),
    }
}

/// Broadcast request for `target` on `port`, sourced from the address of
/// the port's subnet covering `target`.
fn request_frame(engine: &Engine, port: PortId, target: Ipv4Addr) -> Option<Vec<u8>> {
    let p = engine.port(port)?;
    let source = engine
        .tables
        .lpm()
        .lookup_subnet(p.domain, target)
        .and_then(|s| match s.disposition {
            Disposition::Subnet { interface_addr } => Some(interface_addr),
            _ => None,
        });
    let Some(source) = source else {
        warn!("ARP failed - ({}) {} is not in any subnet", p.domain, target);
        return None;
    };
    debug!("ARP request for ({}) {} on port {}", p.domain, target, port);
    Some(ArpPacket::request(p.hwaddr, source, target).to_frame(MacAddr::BROADCAST, p.hwaddr))
}

/// Queues an ARP request for `target`. Returns false if none could be built.
pub fn send_request(engine: &Engine, ctx: &mut WorkerContext, port: PortId, target: Ipv4Addr) -> bool {
    match request_frame(engine, port, target) {
        Some(frame) => {
            engine.metrics.arp_requests_sent.inc();
            ctx.queues.enqueue(engine, port, frame);
            true
        }
        None => false,
    }
}

/// Parks `pkt` on the AR entry for `(port, nh)` and asks for `nh`.
///
/// A packet already parked there is released in favor of `pkt`.
pub fn arp_generate(engine: &Engine, ctx: &mut WorkerContext, pkt: Packet, port: PortId, nh: Ipv4Addr) {
    let Some(request) = request_frame(engine, port, nh) else {
        engine.discard(pkt, DiscardReason::Error);
        return;
    };

    let parked = {
        let mut ar = engine.tables.ar();
        let entry = ar.find_or_create(port, nh);
        if entry.is_resolved() {
            // Learned by another core since the lookup
            Err(pkt)
        } else {
            let superseded = entry.take_pending_packet();
            entry.attach_pending_packet(pkt);
            Ok(superseded)
        }
    };

    match parked {
        Ok(superseded) => {
            if let Some(old) = superseded {
                engine.metrics.pending_superseded.inc();
                engine.discard(old, DiscardReason::Drop);
            }
            engine.metrics.arp_requests_sent.inc();
            ctx.queues.enqueue(engine, port, request);
        }
        Err(pkt) => release_pending(engine, ctx, pkt),
    }
}

/// Announces the port's primary address.
pub fn send_gratuitous(engine: &Engine, ctx: &mut WorkerContext, port: &Port) {
    let Some((addr, _)) = port.ipaddr() else {
        return;
    };
    trace!("ARP gratuitous for {} on port {}", addr, port.id);
    let frame = ArpPacket::gratuitous(port.hwaddr, addr).to_frame(MacAddr::BROADCAST, port.hwaddr);
    ctx.queues.enqueue(engine, port.id, frame);
}
