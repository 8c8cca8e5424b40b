//! Common protocol types

use std::fmt;
use std::str::FromStr;

/// Ethernet hardware address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group bit set (includes broadcast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Packs the address into the low 48 bits of a u64.
    ///
    /// Used by the direct table, which stores addresses in atomics.
    pub fn to_u64(self) -> u64 {
        let mut raw = [0u8; 8];
        raw[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(raw)
    }

    pub fn from_u64(value: u64) -> Self {
        let raw = value.to_be_bytes();
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&raw[2..]);
        MacAddr(mac)
    }

    /// Reads an address from the first six bytes of `buf`.
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = buf.get(..6)?.try_into().ok()?;
        Some(MacAddr(bytes))
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error returned when a MAC address string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMacAddrError(String);

impl fmt::Display for ParseMacAddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid MAC address '{}'", self.0)
    }
}

impl std::error::Error for ParseMacAddrError {}

impl FromStr for MacAddr {
    type Err = ParseMacAddrError;

    /// Accepts "aa:bb:cc:dd:ee:ff" or "aa-bb-cc-dd-ee-ff"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacAddrError(s.to_string());
        let sep = if s.contains('-') { '-' } else { ':' };

        let mut mac = [0u8; 6];
        let mut count = 0;
        for part in s.split(sep) {
            if count == 6 || part.is_empty() || part.len() > 2 {
                return Err(err());
            }
            mac[count] = u8::from_str_radix(part, 16).map_err(|_| err())?;
            count += 1;
        }
        if count != 6 {
            return Err(err());
        }
        Ok(MacAddr(mac))
    }
}

/// EtherType values handled by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
}

impl EtherType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0800 => Some(EtherType::Ipv4),
            0x0806 => Some(EtherType::Arp),
            _ => None,
        }
    }
}

/// One's-complement sum of `data` taken as big-endian 16-bit words,
/// starting from `initial`. An odd trailing byte is padded with zero.
pub fn ones_complement_sum(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Folds a 32-bit accumulator and returns the complemented 16-bit checksum.
pub fn fold_checksum(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Internet checksum over `data` (IPv4 header, ICMP message).
pub fn internet_checksum(data: &[u8]) -> u16 {
    fold_checksum(ones_complement_sum(data, 0))
}
