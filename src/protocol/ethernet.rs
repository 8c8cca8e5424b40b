//! Ethernet II framing

use super::MacAddr;
use crate::{Error, Result};

/// Ethernet header length (no VLAN tag)
pub const HEADER_SIZE: usize = 14;
/// Largest frame the engine builds or accepts (no FCS)
pub const MAX_FRAME_SIZE: usize = 1518;

/// Read-only view of an Ethernet frame
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        MacAddr(self.buffer[0..6].try_into().unwrap_or_default())
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr(self.buffer[6..12].try_into().unwrap_or_default())
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Rewrites destination and source MAC of a frame in place.
///
/// The caller must have validated that the buffer holds a full header.
pub fn set_hw_addrs(frame: &mut [u8], dst: MacAddr, src: MacAddr) {
    frame[0..6].copy_from_slice(&dst.0);
    frame[6..12].copy_from_slice(&src.0);
}

/// Builder for constructing Ethernet frames
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16) -> Self {
        let mut buffer = Vec::with_capacity(MAX_FRAME_SIZE);
        buffer.extend_from_slice(&dst.0);
        buffer.extend_from_slice(&src.0);
        buffer.extend_from_slice(&ethertype.to_be_bytes());
        Self { buffer }
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.buffer.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EtherType;

    #[test]
    fn test_parse_short_frame() {
        assert!(Frame::parse(&[0u8; 13]).is_err());
    }

    #[test]
    fn test_builder_and_view() {
        let dst = MacAddr([0xff; 6]);
        let src = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let frame = FrameBuilder::new(dst, src, EtherType::Arp as u16)
            .payload(&[1, 2, 3])
            .build();

        let view = Frame::parse(&frame).unwrap();
        assert_eq!(view.dst_mac(), dst);
        assert_eq!(view.src_mac(), src);
        assert_eq!(view.ethertype(), 0x0806);
        assert_eq!(view.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_set_hw_addrs() {
        let mut frame = vec![0u8; 20];
        let dst = MacAddr([1, 2, 3, 4, 5, 6]);
        let src = MacAddr([7, 8, 9, 10, 11, 12]);
        set_hw_addrs(&mut frame, dst, src);
        let view = Frame::parse(&frame).unwrap();
        assert_eq!(view.dst_mac(), dst);
        assert_eq!(view.src_mac(), src);
    }
}
