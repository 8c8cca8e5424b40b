//! Packet pipeline scenarios
//!
//! Topology:
//! ```text
//!  host 10.0.0.2 ── port 0 ── dtfwd ── port 1 ── 10.0.1.0/24
//!                 10.0.0.1/24       10.0.1.1/24
//! ```

use super::harness::*;
use dtfwd::dataplane::{DtAction, DtKey};
use dtfwd::protocol::arp::{ArpOp, ArpPacket};
use dtfwd::protocol::ethernet::Frame;
use dtfwd::protocol::icmp::IcmpPacket;
use dtfwd::protocol::ipv4::Ipv4Header;
use dtfwd::protocol::EtherType;
use dtfwd::telemetry::DiscardReason;

fn ipv4_only(frames: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    frames
        .into_iter()
        .filter(|f| Frame::parse(f).unwrap().ethertype() == EtherType::Ipv4 as u16)
        .collect()
}

#[test]
fn test_arp_request_for_interface_answered() {
    let mut node = Node::two_ports("");
    node.rx(0, arp_request(host_mac(2), ip("10.0.0.2"), ip("10.0.0.1")));

    let sent = node.sent(0);
    assert_eq!(sent.len(), 1);
    let frame = Frame::parse(&sent[0]).unwrap();
    assert_eq!(frame.dst_mac(), host_mac(2));
    let arp = ArpPacket::parse(frame.payload()).unwrap();
    assert_eq!(arp.operation, ArpOp::Reply);
    assert_eq!(arp.sender_mac, port_mac(0));
    assert_eq!(arp.sender_ip, ip("10.0.0.1"));
    assert_eq!(arp.target_ip, ip("10.0.0.2"));
    assert!(node.sent(1).is_empty());
}

#[test]
fn test_arp_request_for_other_port_address_ignored() {
    let mut node = Node::two_ports("");
    node.rx(0, arp_request(host_mac(2), ip("10.0.0.2"), ip("10.0.1.1")));
    assert!(node.sent(0).is_empty());
}

#[test]
fn test_resolution_then_fast_path() {
    let mut node = Node::two_ports("");
    let pkt = || udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.0.1.5"));

    node.rx(0, pkt());
    let sent = node.sent(1);
    assert_eq!(sent.len(), 1);
    let arp = ArpPacket::parse(Frame::parse(&sent[0]).unwrap().payload()).unwrap();
    assert_eq!(arp.operation, ArpOp::Request);
    assert_eq!(arp.sender_ip, ip("10.0.1.1"));
    assert_eq!(arp.target_ip, ip("10.0.1.5"));

    // The parked packet leaves as soon as the reply arrives
    node.rx(1, arp_reply(host_mac(5), ip("10.0.1.5"), port_mac(1), ip("10.0.1.1")));
    let sent = node.sent(1);
    assert_eq!(sent.len(), 1);
    let frame = Frame::parse(&sent[0]).unwrap();
    assert_eq!(frame.dst_mac(), host_mac(5));
    assert_eq!(frame.src_mac(), port_mac(1));
    assert_eq!(
        Ipv4Header::parse(frame.payload()).unwrap().dst_addr(),
        ip("10.0.1.5")
    );

    let hits = node.engine.metrics.dt_hits.get();
    node.rx(0, pkt());
    assert_eq!(node.sent(1).len(), 1);
    assert_eq!(node.engine.metrics.dt_hits.get(), hits + 1);
}

#[test]
fn test_nexthop_resolution_installs_fast_path() {
    let mut node = Node::two_ports("routes = [\"10.0.2.0/24@10.0.1.2\"]");
    let pkt = || udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.0.2.5"));
    let key = DtKey {
        in_port: 0,
        dst: ip("10.0.2.5"),
        in_mac: port_mac(0),
    };

    node.rx(0, pkt());
    let sent = node.sent(1);
    assert_eq!(sent.len(), 1);
    let arp = ArpPacket::parse(Frame::parse(&sent[0]).unwrap().payload()).unwrap();
    assert_eq!(arp.target_ip, ip("10.0.1.2"));
    assert!(!matches!(
        node.engine.tables.dt.lookup(&key),
        Some(DtAction::Forward(_))
    ));

    node.rx(1, arp_reply(host_mac(2), ip("10.0.1.2"), port_mac(1), ip("10.0.1.1")));
    let sent = node.sent(1);
    assert_eq!(sent.len(), 1);
    assert_eq!(Frame::parse(&sent[0]).unwrap().dst_mac(), host_mac(2));
    assert!(matches!(
        node.engine.tables.dt.lookup(&key),
        Some(DtAction::Forward(fwd)) if fwd.out_port == 1 && fwd.dst_mac == host_mac(2)
    ));

    let hits = node.engine.metrics.dt_hits.get();
    node.rx(0, pkt());
    assert_eq!(node.sent(1).len(), 1);
    assert_eq!(node.engine.metrics.dt_hits.get(), hits + 1);
}

#[test]
fn test_discard_route() {
    let mut node = Node::two_ports("routes = [\"10.9.0.0/16@drop\"]");

    node.rx(0, udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.9.1.1")));
    node.rx(0, udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.9.1.1")));

    assert!(node.sent(0).is_empty());
    assert!(node.sent(1).is_empty());
    assert_eq!(
        node.engine.metrics.port(Some(0)).discards(DiscardReason::Drop),
        2
    );
    // Second packet was dropped by the fast path
    assert_eq!(node.engine.metrics.dt_hits.get(), 1);
}

#[test]
fn test_no_route_dropped() {
    let mut node = Node::two_ports("");
    node.rx(0, udp_frame(port_mac(0), ip("10.0.0.2"), ip("192.0.2.1")));

    assert!(node.sent(1).is_empty());
    assert_eq!(node.engine.metrics.no_route.get(), 1);
    assert!(node.engine.tables.dt.is_empty());
}

#[test]
fn test_longest_match_wins() {
    let mut node = Node::two_ports(
        "static_arp = [\"10.0.1.2@0a:00:00:00:00:02\", \"10.0.1.3@0a:00:00:00:00:03\"]\n\
         routes = [\"10.5.0.0/16@10.0.1.2\", \"10.5.5.0/24@10.0.1.3\"]",
    );

    node.rx(0, udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.5.5.9")));
    node.rx(0, udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.5.6.9")));

    let sent = node.sent(1);
    assert_eq!(sent.len(), 2);
    assert_eq!(Frame::parse(&sent[0]).unwrap().dst_mac(), host_mac(3));
    assert_eq!(Frame::parse(&sent[1]).unwrap().dst_mac(), host_mac(2));
}

#[test]
fn test_direct_table_is_a_cache() {
    let mut node = Node::two_ports("static_arp = [\"10.0.1.5@0a:00:00:00:00:05\"]");
    let pkt = || udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.0.1.5"));

    node.rx(0, pkt());
    assert!(!node.engine.tables.dt.is_empty());
    let first = node.sent(1);

    node.engine.tables.dt.clear();
    node.rx(0, pkt());
    let second = node.sent(1);

    // Same decision with or without the cached entry
    assert_eq!(first, second);
}

#[test]
fn test_relearned_mac_replaces_cached_path() {
    let mut node = Node::two_ports("");
    let pkt = || udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.0.1.5"));

    node.rx(0, pkt());
    node.rx(1, arp_reply(host_mac(5), ip("10.0.1.5"), port_mac(1), ip("10.0.1.1")));
    node.rx(0, pkt());
    node.sent(1);

    node.rx(1, arp_reply(host_mac(6), ip("10.0.1.5"), port_mac(1), ip("10.0.1.1")));
    node.rx(0, pkt());
    let sent = ipv4_only(node.sent(1));
    assert_eq!(sent.len(), 1);
    assert_eq!(Frame::parse(&sent[0]).unwrap().dst_mac(), host_mac(6));

    // Resolution is never undone
    assert!(node
        .engine
        .tables
        .ar()
        .lookup(1, ip("10.0.1.5"))
        .unwrap()
        .is_resolved());
}

#[test]
fn test_newest_pending_packet_wins() {
    let mut node = Node::two_ports("");
    node.rx(0, udp_frame(port_mac(0), ip("10.0.0.2"), ip("10.0.1.5")));
    node.rx(0, udp_frame(port_mac(0), ip("10.0.0.3"), ip("10.0.1.5")));
    node.sent(1);

    assert_eq!(node.engine.metrics.pending_superseded.get(), 1);

    node.rx(1, arp_reply(host_mac(5), ip("10.0.1.5"), port_mac(1), ip("10.0.1.1")));
    let sent = ipv4_only(node.sent(1));
    assert_eq!(sent.len(), 1);
    let frame = Frame::parse(&sent[0]).unwrap();
    assert_eq!(
        Ipv4Header::parse(frame.payload()).unwrap().src_addr(),
        ip("10.0.0.3")
    );
}

#[test]
fn test_reply_from_foreign_subnet_not_learned() {
    let mut node = Node::two_ports("");
    node.rx(0, arp_reply(host_mac(9), ip("10.0.1.9"), port_mac(0), ip("10.0.0.1")));

    assert!(node.engine.tables.ar().lookup(0, ip("10.0.1.9")).is_none());
    assert!(node.engine.tables.ar().lookup(1, ip("10.0.1.9")).is_none());
}

#[test]
fn test_echo_request_answered() {
    let mut node = Node::two_ports("static_arp = [\"10.0.0.2@0a:00:00:00:00:02\"]");
    node.rx(
        0,
        echo_frame(port_mac(0), host_mac(2), ip("10.0.0.2"), ip("10.0.0.1")),
    );

    let sent = node.sent(0);
    assert_eq!(sent.len(), 1);
    let frame = Frame::parse(&sent[0]).unwrap();
    assert_eq!(frame.dst_mac(), host_mac(2));
    let hdr = Ipv4Header::parse(frame.payload()).unwrap();
    assert_eq!(hdr.src_addr(), ip("10.0.0.1"));
    assert_eq!(hdr.dst_addr(), ip("10.0.0.2"));
    let icmp = IcmpPacket::parse(hdr.payload()).unwrap();
    assert_eq!(icmp.icmp_type(), 0);
    assert!(icmp.validate_checksum());
    assert_eq!(node.engine.metrics.icmp_echo_replies.get(), 1);
}

#[test]
fn test_wrong_destination_mac_ignored() {
    let mut node = Node::two_ports("static_arp = [\"10.0.1.5@0a:00:00:00:00:05\"]");
    node.rx(0, udp_frame(host_mac(1), ip("10.0.0.2"), ip("10.0.1.5")));

    assert!(node.sent(1).is_empty());
    assert_eq!(
        node.engine.metrics.port(Some(0)).discards(DiscardReason::Ignore),
        1
    );
}
