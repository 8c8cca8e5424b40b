//! Longest-prefix-match route table
//!
//! Entries live in an arena and are never removed, so a [`RouteId`] stays
//! valid for the life of the table. Per routing domain, an ordered index
//! keeps entries by strictly descending prefix length; the first covering
//! entry is the longest match.

use super::packet::{Domain, PortId};
use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;

/// IPv4 prefix with the host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    addr: Ipv4Addr,
    len: u8,
}

fn mask_bits(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        !0u32 << (32 - len as u32)
    }
}

impl Prefix {
    /// Builds a prefix, clamping `len` to 32 and masking the address.
    pub fn new(addr: Ipv4Addr, len: u8) -> Self {
        let len = len.min(32);
        Self {
            addr: Ipv4Addr::from(u32::from(addr) & mask_bits(len)),
            len,
        }
    }

    pub fn host(addr: Ipv4Addr) -> Self {
        Self { addr, len: 32 }
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_host(&self) -> bool {
        self.len == 32
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_bits(self.len) == u32::from(self.addr)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

/// What a matching entry does with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reachable directly on the entry's port at the prefix address
    /// (learned hosts, resolved next-hops)
    Attached,
    /// Terminates at this node
    Local,
    /// Directly connected subnet; `interface_addr` is our address on it
    Subnet { interface_addr: Ipv4Addr },
    /// Recursive lookup of `addr` in `domain`
    NextHop { addr: Ipv4Addr, domain: Domain },
    /// Policy drop
    Discard,
}

/// Stable handle to an LPM entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u32);

#[derive(Debug, Clone)]
pub struct LpmEntry {
    pub id: RouteId,
    pub domain: Domain,
    pub prefix: Prefix,
    pub disposition: Disposition,
    pub port: Option<PortId>,
    /// Resolved link-layer address, present once known
    pub hwaddr: Option<MacAddr>,
    /// Some other entry's next-hop resolves here; drives keepalive pings
    pub is_nexthop: bool,
    /// Percentage of forwarded packets dropped at random (0 disables)
    pub rand_discard: u8,
    /// Host entry the next-hop of this route resolved to
    pub nh: Option<RouteId>,
}

impl LpmEntry {
    pub fn is_local(&self) -> bool {
        self.disposition == Disposition::Local
    }

    pub fn is_subnet(&self) -> bool {
        matches!(self.disposition, Disposition::Subnet { .. })
    }
}

impl fmt::Display for LpmEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.domain, self.prefix)?;
        match self.disposition {
            Disposition::Attached => {}
            Disposition::Local => write!(f, " LOCAL")?,
            Disposition::Subnet { interface_addr } => write!(f, " SUBNET ifaddr {}", interface_addr)?,
            Disposition::NextHop { addr, domain } => write!(f, " NH ({}) {}", domain, addr)?,
            Disposition::Discard => write!(f, " DISCARD")?,
        }
        if let Some(port) = self.port {
            write!(f, " port {}", port)?;
        }
        if let Some(mac) = self.hwaddr {
            write!(f, " {}", mac)?;
        }
        if self.is_nexthop {
            write!(f, " IS_NEXTHOP")?;
        }
        if self.rand_discard > 0 {
            write!(f, " RANDDISC {}%", self.rand_discard)?;
        }
        Ok(())
    }
}

/// Extra properties for host routes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostFlags {
    pub local: bool,
    pub is_nexthop: bool,
}

#[derive(Debug, Default)]
pub struct LpmTable {
    entries: Vec<LpmEntry>,
    /// Per domain, ids ordered by descending prefix length
    by_domain: HashMap<Domain, Vec<RouteId>>,
    exact: HashMap<(Domain, Prefix), RouteId>,
}

impl LpmTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: RouteId) -> Option<&LpmEntry> {
        self.entries.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: RouteId) -> Option<&mut LpmEntry> {
        self.entries.get_mut(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LpmEntry> {
        self.entries.iter()
    }

    fn domain_entries(&self, domain: Domain) -> impl Iterator<Item = &LpmEntry> {
        self.by_domain
            .get(&domain)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id.0 as usize))
    }

    /// Longest match for `addr` in `domain`.
    pub fn lookup(&self, domain: Domain, addr: Ipv4Addr) -> Option<&LpmEntry> {
        self.domain_entries(domain)
            .find(|e| e.prefix.contains(addr))
    }

    /// Longest SUBNET entry covering `addr`.
    pub fn lookup_subnet(&self, domain: Domain, addr: Ipv4Addr) -> Option<&LpmEntry> {
        self.domain_entries(domain)
            .find(|e| e.is_subnet() && e.prefix.contains(addr))
    }

    /// Entry for exactly this prefix.
    pub fn find(&self, domain: Domain, prefix: Prefix) -> Option<&LpmEntry> {
        self.exact
            .get(&(domain, prefix))
            .and_then(|id| self.get(*id))
    }

    /// Returns the entry for `(domain, prefix)`, creating it if absent.
    ///
    /// A new entry starts as [`Disposition::Attached`]. A given `port`
    /// is recorded on both new and existing entries.
    pub fn find_or_create(
        &mut self,
        domain: Domain,
        prefix: Prefix,
        port: Option<PortId>,
    ) -> &mut LpmEntry {
        let id = match self.exact.get(&(domain, prefix)) {
            Some(id) => *id,
            None => self.insert(domain, prefix),
        };
        let entry = &mut self.entries[id.0 as usize];
        if port.is_some() {
            entry.port = port;
        }
        entry
    }

    fn insert(&mut self, domain: Domain, prefix: Prefix) -> RouteId {
        let id = RouteId(self.entries.len() as u32);
        self.entries.push(LpmEntry {
            id,
            domain,
            prefix,
            disposition: Disposition::Attached,
            port: None,
            hwaddr: None,
            is_nexthop: false,
            rand_discard: 0,
            nh: None,
        });
        self.exact.insert((domain, prefix), id);

        let entries = &self.entries;
        let order = self.by_domain.entry(domain).or_default();
        // After every longer-or-equal prefix, before every shorter one
        let pos = order.partition_point(|other| entries[other.0 as usize].prefix.len >= prefix.len);
        order.insert(pos, id);

        debug!("LPM entry created ({}) {}", domain, prefix);
        id
    }

    /// `/32` entry for `addr`. A LOCAL entry is never demoted.
    pub fn create_host_route(
        &mut self,
        domain: Domain,
        addr: Ipv4Addr,
        port: Option<PortId>,
        flags: HostFlags,
    ) -> &mut LpmEntry {
        let entry = self.find_or_create(domain, Prefix::host(addr), port);
        if flags.local {
            entry.disposition = Disposition::Local;
        }
        if flags.is_nexthop {
            entry.is_nexthop = true;
        }
        entry
    }

    /// Installs a route through `nh_addr` in `nh_domain`.
    ///
    /// Returns `None` when the next-hop lies in no SUBNET entry of
    /// `nh_domain`; the route is then not installed.
    pub fn create_route(
        &mut self,
        domain: Domain,
        prefix: Prefix,
        rand_discard: u8,
        nh_addr: Ipv4Addr,
        nh_domain: Domain,
    ) -> Option<&mut LpmEntry> {
        self.lookup_subnet(nh_domain, nh_addr)?;
        let entry = self.find_or_create(domain, prefix, None);
        entry.disposition = Disposition::NextHop {
            addr: nh_addr,
            domain: nh_domain,
        };
        entry.rand_discard = rand_discard.min(100);
        entry.nh = None;
        Some(entry)
    }

    /// Installs a blackhole route.
    pub fn create_discard_route(&mut self, domain: Domain, prefix: Prefix) -> &mut LpmEntry {
        let entry = self.find_or_create(domain, prefix, None);
        entry.disposition = Disposition::Discard;
        entry
    }

    /// Connected subnet plus LOCAL host route for an interface address.
    pub fn add_interface_addr(&mut self, domain: Domain, port: PortId, addr: Ipv4Addr, len: u8) {
        let subnet = self.find_or_create(domain, Prefix::new(addr, len), Some(port));
        subnet.disposition = Disposition::Subnet {
            interface_addr: addr,
        };
        self.create_host_route(
            domain,
            addr,
            Some(port),
            HostFlags {
                local: true,
                ..Default::default()
            },
        );
    }

    /// Records a resolved address on the exact host entry, if one exists.
    pub fn set_host_hwaddr(&mut self, domain: Domain, addr: Ipv4Addr, mac: MacAddr) -> bool {
        match self.exact.get(&(domain, Prefix::host(addr))).copied() {
            Some(id) => {
                self.entries[id.0 as usize].hwaddr = Some(mac);
                true
            }
            None => false,
        }
    }

    /// Ids of NEXTHOP routes whose next-hop entry is not linked yet.
    pub fn unlinked_nexthop_routes(&self) -> Vec<RouteId> {
        self.entries
            .iter()
            .filter(|e| matches!(e.disposition, Disposition::NextHop { .. }) && e.nh.is_none())
            .map(|e| e.id)
            .collect()
    }

    /// `(domain, addr)` of every entry marked IS_NEXTHOP.
    pub fn nexthop_hosts(&self) -> Vec<(Domain, Ipv4Addr)> {
        self.entries
            .iter()
            .filter(|e| e.is_nexthop)
            .map(|e| (e.domain, e.prefix.addr()))
            .collect()
    }
}
