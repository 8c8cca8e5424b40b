//! DHCP messages, client side (RFC 2131, 2132)

use crate::{Error, Result};
use std::net::Ipv4Addr;

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Fixed BOOTP header size, before the magic cookie
pub const DHCP_HEADER_SIZE: usize = 236;

pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// BOOTP broadcast flag
pub const FLAG_BROADCAST: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootpOp {
    Request = 1,
    Reply = 2,
}

/// Option 53 message types used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Ack = 5,
    Nak = 6,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DhcpMessageType::Discover),
            2 => Some(DhcpMessageType::Offer),
            3 => Some(DhcpMessageType::Request),
            5 => Some(DhcpMessageType::Ack),
            6 => Some(DhcpMessageType::Nak),
            _ => None,
        }
    }
}

pub mod options {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const REQUESTED_IP: u8 = 50;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const END: u8 = 255;
}

/// Converts a contiguous netmask to a prefix length.
///
/// Non-contiguous masks yield 0.
pub fn mask_to_prefix_len(mask: Ipv4Addr) -> u8 {
    let bits = u32::from(mask);
    let len = bits.leading_ones();
    if len == 32 || bits << len == 0 {
        len as u8
    } else {
        0
    }
}

/// Bounds-checked view of a DHCP message
#[derive(Debug)]
pub struct DhcpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> DhcpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < DHCP_HEADER_SIZE + MAGIC_COOKIE.len() {
            return Err(Error::InvalidPacket("DHCP message too short".into()));
        }
        if buffer[DHCP_HEADER_SIZE..DHCP_HEADER_SIZE + 4] != MAGIC_COOKIE {
            return Err(Error::InvalidPacket("DHCP magic cookie missing".into()));
        }
        Ok(Self { buffer })
    }

    pub fn op(&self) -> u8 {
        self.buffer[0]
    }

    pub fn xid(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ])
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    pub fn chaddr(&self) -> &[u8] {
        &self.buffer[28..34]
    }

    fn options_raw(&self) -> &'a [u8] {
        &self.buffer[DHCP_HEADER_SIZE + MAGIC_COOKIE.len()..]
    }

    /// Returns the value of the first occurrence of `code`.
    ///
    /// Walking stops at END or at an option running past the buffer.
    pub fn find_option(&self, code: u8) -> Option<&'a [u8]> {
        let opts = self.options_raw();
        let mut i = 0;
        while i < opts.len() {
            match opts[i] {
                options::PAD => i += 1,
                options::END => return None,
                c => {
                    let len = *opts.get(i + 1)? as usize;
                    let value = opts.get(i + 2..i + 2 + len)?;
                    if c == code {
                        return Some(value);
                    }
                    i += 2 + len;
                }
            }
        }
        None
    }

    fn find_option_ip(&self, code: u8) -> Option<Ipv4Addr> {
        let v = self.find_option(code)?;
        let octets: [u8; 4] = v.get(..4)?.try_into().ok()?;
        Some(Ipv4Addr::from(octets))
    }

    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.find_option(options::MESSAGE_TYPE)
            .and_then(|v| v.first().copied())
            .and_then(DhcpMessageType::from_u8)
    }

    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.find_option_ip(options::SERVER_ID)
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Addr> {
        self.find_option_ip(options::SUBNET_MASK)
    }
}

/// Builder for client messages
#[derive(Debug)]
pub struct DhcpBuilder {
    op: BootpOp,
    xid: u32,
    flags: u16,
    siaddr: Ipv4Addr,
    chaddr: [u8; 6],
    options: Vec<u8>,
}

impl DhcpBuilder {
    pub fn new(op: BootpOp, xid: u32) -> Self {
        Self {
            op,
            xid,
            flags: 0,
            siaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; 6],
            options: Vec::new(),
        }
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn siaddr(mut self, addr: Ipv4Addr) -> Self {
        self.siaddr = addr;
        self
    }

    pub fn chaddr(mut self, mac: &[u8; 6]) -> Self {
        self.chaddr = *mac;
        self
    }

    fn option(mut self, code: u8, value: &[u8]) -> Self {
        self.options.push(code);
        self.options.push(value.len() as u8);
        self.options.extend_from_slice(value);
        self
    }

    pub fn message_type(self, msg_type: DhcpMessageType) -> Self {
        self.option(options::MESSAGE_TYPE, &[msg_type as u8])
    }

    pub fn requested_ip(self, addr: Ipv4Addr) -> Self {
        self.option(options::REQUESTED_IP, &addr.octets())
    }

    pub fn server_id(self, addr: Ipv4Addr) -> Self {
        self.option(options::SERVER_ID, &addr.octets())
    }

    pub fn parameter_request_list(self, codes: &[u8]) -> Self {
        self.option(options::PARAMETER_REQUEST_LIST, codes)
    }

    pub fn build(self) -> Vec<u8> {
        let mut msg = vec![0u8; DHCP_HEADER_SIZE];
        msg[0] = self.op as u8;
        msg[1] = 1; // htype: Ethernet
        msg[2] = 6; // hlen
        msg[4..8].copy_from_slice(&self.xid.to_be_bytes());
        msg[10..12].copy_from_slice(&self.flags.to_be_bytes());
        msg[20..24].copy_from_slice(&self.siaddr.octets());
        msg[28..34].copy_from_slice(&self.chaddr);
        msg.extend_from_slice(&MAGIC_COOKIE);
        msg.extend_from_slice(&self.options);
        msg.push(options::END);
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(xid: u32) -> Vec<u8> {
        let mut msg = DhcpBuilder::new(BootpOp::Reply, xid)
            .message_type(DhcpMessageType::Offer)
            .server_id(Ipv4Addr::new(10, 0, 0, 254))
            .option(options::SUBNET_MASK, &[255, 255, 255, 0])
            .build();
        msg[16..20].copy_from_slice(&[10, 0, 0, 42]);
        msg
    }

    #[test]
    fn test_parse_offer() {
        let msg = offer(0xdeadbeef);
        let hdr = DhcpHeader::parse(&msg).unwrap();
        assert_eq!(hdr.op(), 2);
        assert_eq!(hdr.xid(), 0xdeadbeef);
        assert_eq!(hdr.yiaddr(), Ipv4Addr::new(10, 0, 0, 42));
        assert_eq!(hdr.message_type(), Some(DhcpMessageType::Offer));
        assert_eq!(hdr.server_id(), Some(Ipv4Addr::new(10, 0, 0, 254)));
        assert_eq!(hdr.subnet_mask(), Some(Ipv4Addr::new(255, 255, 255, 0)));
    }

    #[test]
    fn test_parse_rejects_missing_cookie() {
        let mut msg = offer(1);
        msg[DHCP_HEADER_SIZE] = 0;
        assert!(DhcpHeader::parse(&msg).is_err());
        assert!(DhcpHeader::parse(&msg[..100]).is_err());
    }

    #[test]
    fn test_truncated_option_is_ignored() {
        let mut msg = DhcpBuilder::new(BootpOp::Reply, 1).build();
        msg.pop();
        msg.extend_from_slice(&[options::SERVER_ID, 4, 10, 0]);
        let hdr = DhcpHeader::parse(&msg).unwrap();
        assert_eq!(hdr.server_id(), None);
    }

    #[test]
    fn test_discover_layout() {
        let mac = [0x02, 0, 0, 0, 0, 9];
        let msg = DhcpBuilder::new(BootpOp::Request, 7)
            .flags(FLAG_BROADCAST)
            .chaddr(&mac)
            .message_type(DhcpMessageType::Discover)
            .parameter_request_list(&[options::SUBNET_MASK])
            .build();
        assert_eq!(msg[0], 1);
        assert_eq!(&msg[10..12], &[0x80, 0x00]);
        assert_eq!(&msg[28..34], &mac);
        assert_eq!(&msg[236..240], &MAGIC_COOKIE);
        assert_eq!(&msg[240..], &[53, 1, 1, 55, 1, 1, 255]);
    }

    #[test]
    fn test_mask_to_prefix_len() {
        assert_eq!(mask_to_prefix_len(Ipv4Addr::new(255, 255, 255, 0)), 24);
        assert_eq!(mask_to_prefix_len(Ipv4Addr::new(255, 255, 255, 255)), 32);
        assert_eq!(mask_to_prefix_len(Ipv4Addr::new(255, 240, 0, 0)), 12);
        assert_eq!(mask_to_prefix_len(Ipv4Addr::new(0, 0, 0, 0)), 0);
        assert_eq!(mask_to_prefix_len(Ipv4Addr::new(255, 0, 255, 0)), 0);
    }
}
