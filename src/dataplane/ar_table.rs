//! Address resolution (AR) and local address (LAT) tables

use super::packet::{Packet, PortId};
use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// AR entry: resolution state plus a single pending packet slot
#[derive(Debug, Default)]
pub struct ArEntry {
    hwaddr: Option<MacAddr>,
    pending: Option<Packet>,
    /// Requests re-sent since the pending packet was attached
    retries: u8,
}

impl ArEntry {
    pub fn hwaddr(&self) -> Option<MacAddr> {
        self.hwaddr
    }

    pub fn is_resolved(&self) -> bool {
        self.hwaddr.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Parks `pkt` until resolution. Rejects (and drops `pkt`) if a
    /// packet is already pending.
    pub fn attach_pending_packet(&mut self, pkt: Packet) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(pkt);
        self.retries = 0;
        true
    }

    pub fn take_pending_packet(&mut self) -> Option<Packet> {
        self.pending.take()
    }
}

/// Outcome of a retry pass over unresolved entries
#[derive(Debug, Default)]
pub struct ArRetry {
    /// Entries to send another request for
    pub rerequest: Vec<(PortId, Ipv4Addr)>,
    /// Pending packets given up on
    pub expired: Vec<(PortId, Ipv4Addr, Packet)>,
}

/// Monotonic cache of `(port, address) -> MAC`. Entries are never removed.
#[derive(Debug, Default)]
pub struct ArTable {
    entries: HashMap<(PortId, Ipv4Addr), ArEntry>,
}

impl ArTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, port: PortId, addr: Ipv4Addr) -> Option<&ArEntry> {
        self.entries.get(&(port, addr))
    }

    /// Resolved MAC, if any.
    pub fn resolved(&self, port: PortId, addr: Ipv4Addr) -> Option<MacAddr> {
        self.lookup(port, addr).and_then(|e| e.hwaddr)
    }

    pub fn get_mut(&mut self, port: PortId, addr: Ipv4Addr) -> Option<&mut ArEntry> {
        self.entries.get_mut(&(port, addr))
    }

    pub fn find_or_create(&mut self, port: PortId, addr: Ipv4Addr) -> &mut ArEntry {
        self.entries.entry((port, addr)).or_default()
    }

    /// Records `mac` for `(port, addr)`, overwriting any earlier value.
    pub fn learn(&mut self, port: PortId, addr: Ipv4Addr, mac: MacAddr) -> &mut ArEntry {
        let entry = self.find_or_create(port, addr);
        entry.hwaddr = Some(mac);
        entry.retries = 0;
        entry
    }

    /// Walks unresolved entries that hold a pending packet.
    ///
    /// Each is scheduled for another request until it has been retried
    /// `limit` times, after which its packet is handed back for release.
    /// A `limit` of 0 disables both retry and expiry.
    pub fn retry_pending(&mut self, limit: u8) -> ArRetry {
        let mut result = ArRetry::default();
        if limit == 0 {
            return result;
        }
        for (&(port, addr), entry) in self.entries.iter_mut() {
            if entry.hwaddr.is_some() || entry.pending.is_none() {
                continue;
            }
            if entry.retries >= limit {
                if let Some(pkt) = entry.pending.take() {
                    result.expired.push((port, addr, pkt));
                }
            } else {
                entry.retries += 1;
                result.rerequest.push((port, addr));
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Addresses each port answers ARP requests for
#[derive(Debug, Default)]
pub struct LatTable {
    /// `None` answers with the port's own MAC
    entries: HashMap<(PortId, Ipv4Addr), Option<MacAddr>>,
}

impl LatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, port: PortId, addr: Ipv4Addr, mac: Option<MacAddr>) {
        self.entries.insert((port, addr), mac);
    }

    pub fn contains(&self, port: PortId, addr: Ipv4Addr) -> bool {
        self.entries.contains_key(&(port, addr))
    }

    /// MAC to answer with for a request targeting `addr` on `port`.
    pub fn lookup_mac_for_target(
        &self,
        port: PortId,
        addr: Ipv4Addr,
        port_hwaddr: MacAddr,
    ) -> Option<MacAddr> {
        self.entries
            .get(&(port, addr))
            .map(|mac| mac.unwrap_or(port_hwaddr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_A: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
    const MAC_B: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]);

    fn addr() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 2)
    }

    fn pkt(tag: u8) -> Packet {
        Packet::generated(vec![tag; 60], 1)
    }

    #[test]
    fn test_learn_and_lookup() {
        let mut table = ArTable::new();
        assert!(table.lookup(0, addr()).is_none());
        table.learn(0, addr(), MAC_A);
        assert_eq!(table.resolved(0, addr()), Some(MAC_A));
        // Per port
        assert_eq!(table.resolved(1, addr()), None);
    }

    #[test]
    fn test_learn_is_monotonic() {
        let mut table = ArTable::new();
        table.learn(0, addr(), MAC_A);
        table.find_or_create(0, addr());
        assert_eq!(table.resolved(0, addr()), Some(MAC_A));
        table.retry_pending(3);
        assert_eq!(table.resolved(0, addr()), Some(MAC_A));
        table.learn(0, addr(), MAC_B);
        assert_eq!(table.resolved(0, addr()), Some(MAC_B));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_find_or_create_is_unresolved() {
        let mut table = ArTable::new();
        let entry = table.find_or_create(0, addr());
        assert!(!entry.is_resolved());
        assert!(!entry.has_pending());
    }

    #[test]
    fn test_attach_rejects_second_packet() {
        let mut table = ArTable::new();
        let entry = table.find_or_create(0, addr());
        assert!(entry.attach_pending_packet(pkt(1)));
        assert!(!entry.attach_pending_packet(pkt(2)));
        assert_eq!(entry.take_pending_packet(), Some(pkt(1)));
        assert_eq!(entry.take_pending_packet(), None);
    }

    #[test]
    fn test_take_then_attach_keeps_newest() {
        let mut table = ArTable::new();
        let entry = table.find_or_create(0, addr());
        entry.attach_pending_packet(pkt(1));
        let old = entry.take_pending_packet();
        assert_eq!(old, Some(pkt(1)));
        assert!(entry.attach_pending_packet(pkt(2)));
        let entry = table.learn(0, addr(), MAC_A);
        assert_eq!(entry.take_pending_packet(), Some(pkt(2)));
    }

    #[test]
    fn test_retry_then_expire() {
        let mut table = ArTable::new();
        table.find_or_create(0, addr()).attach_pending_packet(pkt(1));

        for _ in 0..2 {
            let retry = table.retry_pending(2);
            assert_eq!(retry.rerequest, vec![(0, addr())]);
            assert!(retry.expired.is_empty());
        }
        let retry = table.retry_pending(2);
        assert!(retry.rerequest.is_empty());
        assert_eq!(retry.expired.len(), 1);
        assert!(!table.lookup(0, addr()).unwrap().has_pending());

        // Nothing left to do
        let retry = table.retry_pending(2);
        assert!(retry.rerequest.is_empty() && retry.expired.is_empty());
    }

    #[test]
    fn test_retry_limit_zero_keeps_packet() {
        let mut table = ArTable::new();
        table.find_or_create(0, addr()).attach_pending_packet(pkt(1));
        for _ in 0..5 {
            let retry = table.retry_pending(0);
            assert!(retry.rerequest.is_empty() && retry.expired.is_empty());
        }
        assert!(table.lookup(0, addr()).unwrap().has_pending());
    }

    #[test]
    fn test_lat_lookup() {
        let port_mac = MacAddr([2, 0, 0, 0, 0, 1]);
        let mut lat = LatTable::new();
        lat.add(0, Ipv4Addr::new(10, 0, 0, 1), None);
        lat.add(0, Ipv4Addr::new(10, 0, 0, 100), Some(MAC_B));

        assert_eq!(
            lat.lookup_mac_for_target(0, Ipv4Addr::new(10, 0, 0, 1), port_mac),
            Some(port_mac)
        );
        assert_eq!(
            lat.lookup_mac_for_target(0, Ipv4Addr::new(10, 0, 0, 100), port_mac),
            Some(MAC_B)
        );
        assert_eq!(
            lat.lookup_mac_for_target(1, Ipv4Addr::new(10, 0, 0, 1), port_mac),
            None
        );
        assert!(lat.contains(0, Ipv4Addr::new(10, 0, 0, 1)));
    }
}
