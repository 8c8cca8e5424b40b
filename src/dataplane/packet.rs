//! Packet handle
//!
//! A packet is owned by exactly one holder at a time: the pipeline, a
//! queue set or ring, or an AR entry's pending slot. Dropping the handle
//! releases the buffer.

use crate::protocol::ethernet::{self, Frame};
use crate::protocol::ipv4::Ipv4Header;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::net::Ipv4Addr;

pub type PortId = u16;
pub type Domain = u16;

/// Domain for interface and route strings without an explicit `domain#`
pub const RT_RD_DEFAULT: Domain = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
    /// Ingress port; `None` for locally generated packets
    pub port: Option<PortId>,
    pub domain: Domain,
    /// Offset of the L3 header
    l3: usize,
}

impl Packet {
    /// Wraps a received frame. The L3 offset is fixed to the Ethernet header size.
    pub fn received(data: Vec<u8>, port: PortId, domain: Domain) -> Self {
        Self {
            data,
            port: Some(port),
            domain,
            l3: ethernet::HEADER_SIZE,
        }
    }

    /// Wraps a locally built frame.
    pub fn generated(data: Vec<u8>, domain: Domain) -> Self {
        Self {
            data,
            port: None,
            domain,
            l3: ethernet::HEADER_SIZE,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn frame(&self) -> Result<Frame<'_>> {
        Frame::parse(&self.data)
    }

    /// Ingress-observed destination MAC (zero if the frame is truncated).
    pub fn dst_mac(&self) -> MacAddr {
        MacAddr::from_slice(&self.data).unwrap_or_default()
    }

    pub fn l3(&self) -> &[u8] {
        self.data.get(self.l3..).unwrap_or_default()
    }

    pub fn l3_mut(&mut self) -> &mut [u8] {
        self.data.get_mut(self.l3..).unwrap_or_default()
    }

    pub fn ipv4(&self) -> Result<Ipv4Header<'_>> {
        Ipv4Header::parse(self.l3())
    }

    pub fn ipv4_dst(&self) -> Result<Ipv4Addr> {
        Ok(self.ipv4()?.dst_addr())
    }

    /// Rewrites the Ethernet addresses.
    pub fn set_hw_addrs(&mut self, dst: MacAddr, src: MacAddr) -> Result<()> {
        if self.data.len() < ethernet::HEADER_SIZE {
            return Err(Error::InvalidPacket("frame too short for MAC rewrite".into()));
        }
        ethernet::set_hw_addrs(&mut self.data, dst, src);
        Ok(())
    }
}
