//! ICMP echo (RFC 792)

use super::types::internet_checksum;
use crate::{Error, Result};

/// Type, code, checksum, identifier, sequence
pub const ICMP_HEADER_SIZE: usize = 8;

pub const ECHO_REPLY: u8 = 0;
pub const ECHO_REQUEST: u8 = 8;

/// Read-only view of an ICMP message
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::InvalidPacket("ICMP message truncated".into()));
        }
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == ECHO_REQUEST
    }

    pub fn validate_checksum(&self) -> bool {
        internet_checksum(self.buffer) == 0
    }
}

/// Turns an echo request into an echo reply in place.
pub fn echo_request_to_reply(message: &mut [u8]) -> Result<()> {
    if message.len() < ICMP_HEADER_SIZE {
        return Err(Error::InvalidPacket("ICMP message truncated".into()));
    }
    message[0] = ECHO_REPLY;
    message[2] = 0;
    message[3] = 0;
    let csum = internet_checksum(message);
    message[2..4].copy_from_slice(&csum.to_be_bytes());
    Ok(())
}

/// Builds echo request messages for keepalive pings
pub struct EchoRequestBuilder {
    identifier: u16,
    sequence: u16,
    payload: Vec<u8>,
}

impl EchoRequestBuilder {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self {
            identifier,
            sequence,
            payload: Vec::new(),
        }
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(ICMP_HEADER_SIZE + self.payload.len());
        msg.extend_from_slice(&[ECHO_REQUEST, 0, 0, 0]);
        msg.extend_from_slice(&self.identifier.to_be_bytes());
        msg.extend_from_slice(&self.sequence.to_be_bytes());
        msg.extend_from_slice(&self.payload);
        let csum = internet_checksum(&msg);
        msg[2..4].copy_from_slice(&csum.to_be_bytes());
        msg
    }
}
