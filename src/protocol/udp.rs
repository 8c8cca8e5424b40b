//! UDP (RFC 768)

use super::ipv4::Protocol;
use super::types::{fold_checksum, ones_complement_sum};
use crate::{Error, Result};
use std::net::Ipv4Addr;

pub const HEADER_SIZE: usize = 8;

/// Read-only view of a UDP datagram
#[derive(Debug)]
pub struct UdpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> UdpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::InvalidPacket("UDP header truncated".into()));
        }
        Ok(Self { buffer })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    /// Payload bounded by the length field and the buffer.
    pub fn payload(&self) -> &'a [u8] {
        let end = (self.length() as usize).clamp(HEADER_SIZE, self.buffer.len());
        &self.buffer[HEADER_SIZE..end]
    }
}

/// UDP checksum including the IPv4 pseudo-header.
///
/// A computed value of zero is transmitted as 0xffff.
pub fn udp_checksum(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = Protocol::Udp as u8;
    pseudo[10..12].copy_from_slice(&(datagram.len() as u16).to_be_bytes());

    let sum = ones_complement_sum(&pseudo, 0);
    match fold_checksum(ones_complement_sum(datagram, sum)) {
        0 => 0xffff,
        csum => csum,
    }
}

/// Builder for UDP datagrams
#[derive(Debug, Default)]
pub struct UdpBuilder {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
}

impl UdpBuilder {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            payload: Vec::new(),
        }
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Serializes the datagram with its checksum for the given addresses.
    pub fn build(self, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let length = (HEADER_SIZE + self.payload.len()) as u16;
        let mut datagram = Vec::with_capacity(length as usize);
        datagram.extend_from_slice(&self.src_port.to_be_bytes());
        datagram.extend_from_slice(&self.dst_port.to_be_bytes());
        datagram.extend_from_slice(&length.to_be_bytes());
        datagram.extend_from_slice(&[0, 0]);
        datagram.extend_from_slice(&self.payload);
        let csum = udp_checksum(src, dst, &datagram);
        datagram[6..8].copy_from_slice(&csum.to_be_bytes());
        datagram
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let datagram = UdpBuilder::new(68, 67)
            .payload(b"hello")
            .build(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST);
        let udp = UdpHeader::parse(&datagram).unwrap();
        assert_eq!(udp.src_port(), 68);
        assert_eq!(udp.dst_port(), 67);
        assert_eq!(udp.length(), 13);
        assert_eq!(udp.payload(), b"hello");
    }

    #[test]
    fn test_checksum_verifies() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let datagram = UdpBuilder::new(1000, 2000).payload(&[1, 2, 3, 4]).build(src, dst);

        // Summing pseudo-header and datagram including the checksum yields 0xffff
        let mut pseudo = [0u8; 12];
        pseudo[0..4].copy_from_slice(&src.octets());
        pseudo[4..8].copy_from_slice(&dst.octets());
        pseudo[9] = 17;
        pseudo[10..12].copy_from_slice(&(datagram.len() as u16).to_be_bytes());
        let sum = ones_complement_sum(&datagram, ones_complement_sum(&pseudo, 0));
        assert_eq!(fold_checksum(sum), 0);
    }

    #[test]
    fn test_truncated() {
        assert!(UdpHeader::parse(&[0u8; 7]).is_err());
    }
}
