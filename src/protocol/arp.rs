//! ARP for Ethernet/IPv4 (RFC 826)

use super::ethernet::FrameBuilder;
use super::{EtherType, MacAddr};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Size of an Ethernet/IPv4 ARP message
pub const ARP_PACKET_SIZE: usize = 28;

const HW_TYPE_ETHERNET: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl ArpOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ArpOp::Request),
            2 => Some(ArpOp::Reply),
            _ => None,
        }
    }
}

/// Decoded ARP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

fn ip_at(buf: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3])
}

impl ArpPacket {
    /// Decodes and validates an ARP message.
    ///
    /// Rejects anything other than Ethernet hardware, IPv4 protocol,
    /// 6/4 address lengths and request/reply opcodes.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE {
            return Err(Error::InvalidPacket(format!(
                "ARP too short ({} bytes)",
                buffer.len()
            )));
        }

        let htype = u16::from_be_bytes([buffer[0], buffer[1]]);
        if htype != HW_TYPE_ETHERNET {
            return Err(Error::InvalidPacket(format!(
                "ARP with bad HW type (0x{:04x})",
                htype
            )));
        }
        let ptype = u16::from_be_bytes([buffer[2], buffer[3]]);
        if ptype != EtherType::Ipv4 as u16 {
            return Err(Error::InvalidPacket(format!(
                "ARP with bad protocol type (0x{:04x})",
                ptype
            )));
        }
        if buffer[4] != 6 {
            return Err(Error::InvalidPacket(format!(
                "ARP with bad HW length ({})",
                buffer[4]
            )));
        }
        if buffer[5] != 4 {
            return Err(Error::InvalidPacket(format!(
                "ARP with bad protocol length ({})",
                buffer[5]
            )));
        }
        let op = u16::from_be_bytes([buffer[6], buffer[7]]);
        let operation = ArpOp::from_u16(op)
            .ok_or_else(|| Error::InvalidPacket(format!("ARP with bad opcode ({})", op)))?;

        Ok(Self {
            operation,
            sender_mac: MacAddr::from_slice(&buffer[8..14]).unwrap_or_default(),
            sender_ip: ip_at(buffer, 14),
            target_mac: MacAddr::from_slice(&buffer[18..24]).unwrap_or_default(),
            target_ip: ip_at(buffer, 24),
        })
    }

    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        buf[0..2].copy_from_slice(&HW_TYPE_ETHERNET.to_be_bytes());
        buf[2..4].copy_from_slice(&(EtherType::Ipv4 as u16).to_be_bytes());
        buf[4] = 6;
        buf[5] = 4;
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
        buf
    }

    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ArpOp::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Announcement of our own binding: sender and target address are equal.
    pub fn gratuitous(mac: MacAddr, ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac: mac,
            sender_ip: ip,
            target_mac: MacAddr::ZERO,
            target_ip: ip,
        }
    }

    /// Wraps the message in an Ethernet frame.
    pub fn to_frame(&self, dst: MacAddr, src: MacAddr) -> Vec<u8> {
        FrameBuilder::new(dst, src, EtherType::Arp as u16)
            .payload(&self.to_bytes())
            .build()
    }
}
