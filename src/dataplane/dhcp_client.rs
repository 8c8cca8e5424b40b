//! DHCPv4 client
//!
//! One client per port without a configured address. The exchange is the
//! minimal DISCOVER / OFFER / REQUEST / ACK|NAK sequence; there is no
//! lease timer and no renewal. Discovery is re-triggered by the periodic
//! task for as long as the port has no address.

use super::packet::PortId;
use crate::protocol::dhcp::{
    mask_to_prefix_len, options, BootpOp, DhcpBuilder, DhcpHeader, DhcpMessageType,
    DHCP_CLIENT_PORT, DHCP_SERVER_PORT, FLAG_BROADCAST,
};
use crate::protocol::ethernet::FrameBuilder;
use crate::protocol::ipv4::{Ipv4Builder, Protocol};
use crate::protocol::udp::UdpBuilder;
use crate::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Client state, numbered after the last message type sent or received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DhcpClientState {
    #[default]
    Init,
    /// DISCOVER sent
    Selecting,
    /// REQUEST sent
    Requesting,
    /// ACK received
    Bound,
}

/// Actions the client needs the engine to perform
#[derive(Debug, PartialEq, Eq)]
pub enum DhcpClientAction {
    /// Broadcast a complete Ethernet frame on the client's port
    SendPacket(Vec<u8>),
    /// Install the acquired address on the port
    ConfigureInterface { ip_addr: Ipv4Addr, prefix_len: u8 },
    None,
}

#[derive(Debug, Clone)]
pub struct DhcpClient {
    port: PortId,
    mac_addr: MacAddr,
    state: DhcpClientState,
    xid: u32,
    offered_ip: Option<Ipv4Addr>,
    server: Option<Ipv4Addr>,
}

impl DhcpClient {
    pub fn new(port: PortId, mac_addr: MacAddr) -> Self {
        Self {
            port,
            mac_addr,
            state: DhcpClientState::Init,
            xid: 0,
            offered_ip: None,
            server: None,
        }
    }

    pub fn state(&self) -> DhcpClientState {
        self.state
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// Starts a new exchange under transaction id `xid`.
    pub fn start(&mut self, xid: u32) -> DhcpClientAction {
        self.xid = xid;
        self.offered_ip = None;
        self.server = None;
        self.state = DhcpClientState::Selecting;
        debug!("DHCP: sending DISCOVER on port {} (xid=0x{:08x})", self.port, xid);

        let msg = DhcpBuilder::new(BootpOp::Request, xid)
            .flags(FLAG_BROADCAST)
            .chaddr(&self.mac_addr.0)
            .message_type(DhcpMessageType::Discover)
            .parameter_request_list(&[options::SUBNET_MASK])
            .build();
        DhcpClientAction::SendPacket(self.frame(&msg))
    }

    /// Handles a DHCP message received on UDP port 68.
    pub fn process_response(&mut self, dhcp_payload: &[u8]) -> DhcpClientAction {
        let msg = match DhcpHeader::parse(dhcp_payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("DHCP: bad message on port {}: {}", self.port, e);
                return DhcpClientAction::None;
            }
        };

        if msg.op() != BootpOp::Reply as u8 {
            warn!("DHCP: wrong opcode ({}) on port {}", msg.op(), self.port);
            return DhcpClientAction::None;
        }
        if msg.xid() != self.xid {
            warn!(
                "DHCP: wrong transaction ID on port {} (got 0x{:08x}, expected 0x{:08x})",
                self.port,
                msg.xid(),
                self.xid
            );
            return DhcpClientAction::None;
        }

        let prefix_len = msg.subnet_mask().map(mask_to_prefix_len).unwrap_or(0);
        match msg.message_type() {
            Some(DhcpMessageType::Offer) => {
                let offered = msg.yiaddr();
                info!(
                    "DHCP: OFFER received on port {} ({}/{})",
                    self.port, offered, prefix_len
                );
                self.offered_ip = Some(offered);
                self.server = msg.server_id();
                self.send_request()
            }
            Some(DhcpMessageType::Ack) => {
                let ip_addr = msg.yiaddr();
                info!(
                    "DHCP: ACK received on port {} ({}/{})",
                    self.port, ip_addr, prefix_len
                );
                self.state = DhcpClientState::Bound;
                DhcpClientAction::ConfigureInterface {
                    ip_addr,
                    prefix_len,
                }
            }
            Some(DhcpMessageType::Nak) => {
                info!("DHCP: NAK received on port {}", self.port);
                self.state = DhcpClientState::Init;
                DhcpClientAction::None
            }
            other => {
                warn!(
                    "DHCP: unsupported message ({:?}) on port {}",
                    other, self.port
                );
                DhcpClientAction::None
            }
        }
    }

    fn send_request(&mut self) -> DhcpClientAction {
        let server = self.server.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let requested = self.offered_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
        self.state = DhcpClientState::Requesting;

        let msg = DhcpBuilder::new(BootpOp::Request, self.xid)
            .flags(FLAG_BROADCAST)
            .siaddr(server)
            .chaddr(&self.mac_addr.0)
            .message_type(DhcpMessageType::Request)
            .requested_ip(requested)
            .server_id(server)
            .build();
        DhcpClientAction::SendPacket(self.frame(&msg))
    }

    /// 0.0.0.0:68 to 255.255.255.255:67, Ethernet broadcast.
    fn frame(&self, msg: &[u8]) -> Vec<u8> {
        let src = Ipv4Addr::UNSPECIFIED;
        let dst = Ipv4Addr::BROADCAST;
        let udp = UdpBuilder::new(DHCP_CLIENT_PORT, DHCP_SERVER_PORT)
            .payload(msg)
            .build(src, dst);
        let ip = Ipv4Builder::new(src, dst, Protocol::Udp).build(&udp);
        FrameBuilder::new(MacAddr::BROADCAST, self.mac_addr, EtherType::Ipv4 as u16)
            .payload(&ip)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ethernet::{Frame, HEADER_SIZE};
    use crate::protocol::ipv4::Ipv4Header;
    use crate::protocol::udp::UdpHeader;

    const MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x10]);

    fn dhcp_payload(frame: &[u8]) -> Vec<u8> {
        let ip = Ipv4Header::parse(&frame[HEADER_SIZE..]).unwrap();
        UdpHeader::parse(ip.payload()).unwrap().payload().to_vec()
    }

    fn reply(xid: u32, msg_type: DhcpMessageType, yiaddr: [u8; 4]) -> Vec<u8> {
        let mut msg = DhcpBuilder::new(BootpOp::Reply, xid)
            .message_type(msg_type)
            .server_id(Ipv4Addr::new(10, 0, 0, 254))
            .build();
        // Subnet mask option before END
        msg.pop();
        msg.extend_from_slice(&[options::SUBNET_MASK, 4, 255, 255, 255, 0, options::END]);
        msg[16..20].copy_from_slice(&yiaddr);
        msg
    }

    #[test]
    fn test_start_sends_broadcast_discover() {
        let mut client = DhcpClient::new(0, MAC);
        let frame = match client.start(0x1234) {
            DhcpClientAction::SendPacket(f) => f,
            other => panic!("Expected SendPacket, got {:?}", other),
        };
        assert_eq!(client.state(), DhcpClientState::Selecting);

        let eth = Frame::parse(&frame).unwrap();
        assert!(eth.dst_mac().is_broadcast());
        assert_eq!(eth.src_mac(), MAC);

        let ip = Ipv4Header::parse(eth.payload()).unwrap();
        assert_eq!(ip.src_addr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(ip.dst_addr(), Ipv4Addr::BROADCAST);
        assert!(ip.validate_checksum());
        let udp = UdpHeader::parse(ip.payload()).unwrap();
        assert_eq!(udp.src_port(), 68);
        assert_eq!(udp.dst_port(), 67);

        let payload = dhcp_payload(&frame);
        let msg = DhcpHeader::parse(&payload).unwrap();
        assert_eq!(msg.xid(), 0x1234);
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Discover));
        assert_eq!(msg.chaddr(), &MAC.0);
    }

    #[test]
    fn test_full_exchange() {
        let mut client = DhcpClient::new(0, MAC);
        client.start(7);

        let action = client.process_response(&reply(7, DhcpMessageType::Offer, [10, 0, 0, 42]));
        let frame = match action {
            DhcpClientAction::SendPacket(f) => f,
            other => panic!("Expected SendPacket, got {:?}", other),
        };
        assert_eq!(client.state(), DhcpClientState::Requesting);
        let payload = dhcp_payload(&frame);
        let req = DhcpHeader::parse(&payload).unwrap();
        assert_eq!(req.message_type(), Some(DhcpMessageType::Request));
        assert_eq!(req.server_id(), Some(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(
            req.find_option(options::REQUESTED_IP),
            Some(&[10, 0, 0, 42][..])
        );
        assert_eq!(&payload[20..24], &[10, 0, 0, 254]);

        let action = client.process_response(&reply(7, DhcpMessageType::Ack, [10, 0, 0, 42]));
        assert_eq!(
            action,
            DhcpClientAction::ConfigureInterface {
                ip_addr: Ipv4Addr::new(10, 0, 0, 42),
                prefix_len: 24,
            }
        );
        assert_eq!(client.state(), DhcpClientState::Bound);
    }

    #[test]
    fn test_wrong_xid_ignored() {
        let mut client = DhcpClient::new(0, MAC);
        client.start(7);
        let action = client.process_response(&reply(8, DhcpMessageType::Offer, [10, 0, 0, 42]));
        assert_eq!(action, DhcpClientAction::None);
        assert_eq!(client.state(), DhcpClientState::Selecting);
    }

    #[test]
    fn test_wrong_opcode_ignored() {
        let mut client = DhcpClient::new(0, MAC);
        client.start(7);
        let mut msg = reply(7, DhcpMessageType::Offer, [10, 0, 0, 42]);
        msg[0] = BootpOp::Request as u8;
        assert_eq!(client.process_response(&msg), DhcpClientAction::None);
    }

    #[test]
    fn test_nak_resets() {
        let mut client = DhcpClient::new(0, MAC);
        client.start(7);
        client.process_response(&reply(7, DhcpMessageType::Offer, [10, 0, 0, 42]));
        let action = client.process_response(&reply(7, DhcpMessageType::Nak, [0; 4]));
        assert_eq!(action, DhcpClientAction::None);
        assert_eq!(client.state(), DhcpClientState::Init);
    }
}
