//! IPv4 header handling (RFC 791)

use super::types::internet_checksum;
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Fixed header size, no options
pub const MIN_HEADER_SIZE: usize = 20;

/// Version/IHL byte used on every generated packet
pub const VERSION_IHL: u8 = 0x45;

/// TTL used on every generated packet
pub const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Icmp = 1,
    Udp = 17,
}

impl Protocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Protocol::Icmp),
            17 => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Bounds-checked view of an IPv4 header
#[derive(Debug)]
pub struct Ipv4Header<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Header<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::InvalidPacket("IPv4 header too short".into()));
        }
        if buffer[0] >> 4 != 4 {
            return Err(Error::InvalidPacket("not an IPv4 packet".into()));
        }
        let header_len = ((buffer[0] & 0x0f) as usize) * 4;
        if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
            return Err(Error::InvalidPacket("IPv4 header truncated".into()));
        }
        Ok(Self { buffer, header_len })
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    /// Payload bounded by the header's total length, never past the buffer.
    pub fn payload(&self) -> &'a [u8] {
        let end = (self.total_length() as usize).clamp(self.header_len, self.buffer.len());
        &self.buffer[self.header_len..end]
    }

    pub fn validate_checksum(&self) -> bool {
        internet_checksum(&self.buffer[..self.header_len]) == 0
    }
}

/// Recomputes the header checksum in place.
pub fn update_checksum(header: &mut [u8]) {
    let header_len = ((header[0] & 0x0f) as usize) * 4;
    header[10] = 0;
    header[11] = 0;
    let csum = internet_checksum(&header[..header_len]);
    header[10..12].copy_from_slice(&csum.to_be_bytes());
}

/// Swaps source and destination address in place.
///
/// The checksum is unaffected by the swap.
pub fn swap_addrs(header: &mut [u8]) {
    let mut src = [0u8; 4];
    src.copy_from_slice(&header[12..16]);
    header.copy_within(16..20, 12);
    header[16..20].copy_from_slice(&src);
}

/// Builds a fixed 20-byte header around a payload
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    ttl: u8,
    identification: u16,
}

impl Ipv4Builder {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: Protocol) -> Self {
        Self {
            src,
            dst,
            protocol: protocol as u8,
            ttl: DEFAULT_TTL,
            identification: 0,
        }
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn build(self, payload: &[u8]) -> Vec<u8> {
        let total = (MIN_HEADER_SIZE + payload.len()) as u16;
        let mut packet = Vec::with_capacity(total as usize);
        packet.push(VERSION_IHL);
        packet.push(0);
        packet.extend_from_slice(&total.to_be_bytes());
        packet.extend_from_slice(&self.identification.to_be_bytes());
        packet.extend_from_slice(&[0, 0]);
        packet.push(self.ttl);
        packet.push(self.protocol);
        packet.extend_from_slice(&[0, 0]);
        packet.extend_from_slice(&self.src.octets());
        packet.extend_from_slice(&self.dst.octets());
        update_checksum(&mut packet[..MIN_HEADER_SIZE]);
        packet.extend_from_slice(payload);
        packet
    }
}
