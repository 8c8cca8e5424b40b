//! Parsers for the compact address, route, ARP and pinning strings
//!
//! ```text
//! interface     port:[domain#][addr[/len]][,GRATARP]
//! route         [domain#]addr/len@[domain#]nexthop[!pct]
//!               [domain#]addr/len@drop|discard|blackhole
//! static ARP    [domain#]addr@mac | port:addr@mac
//! subinterface  port:addr[/len][@mac]
//! core pin      port:rxcore[,txcore]
//! ```

use crate::dataplane::{Domain, PortId, Prefix, RT_RD_DEFAULT};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

fn parse_err(what: &str, input: &str) -> Error {
    Error::Parse(format!("could not parse {} '{}'", what, input))
}

fn parse_num<T: FromStr>(s: &str, what: &str, input: &str) -> Result<T> {
    s.trim().parse().map_err(|_| parse_err(what, input))
}

fn parse_addr(s: &str, input: &str) -> Result<Ipv4Addr> {
    s.trim().parse().map_err(|_| parse_err("IPv4 address", input))
}

/// Splits an optional `domain#` prefix. Domain 0 is reserved.
fn split_domain<'a>(s: &'a str, input: &str) -> Result<(Option<Domain>, &'a str)> {
    match s.split_once('#') {
        Some((d, rest)) => {
            let domain: Domain = parse_num(d, "routing domain index", input)?;
            if domain == 0 {
                return Err(parse_err("routing domain index", input));
            }
            Ok((Some(domain), rest))
        }
        None => Ok((None, s)),
    }
}

/// `addr[/len]`, defaulting to a host prefix
fn split_prefix(s: &str, input: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, len) = match s.split_once('/') {
        Some((a, l)) => (a, parse_num::<u8>(l, "prefix length", input)?),
        None => (s, 32),
    };
    if len > 32 {
        return Err(parse_err("prefix length", input));
    }
    Ok((parse_addr(addr, input)?, len))
}

fn parse_mac(s: &str, input: &str) -> Result<MacAddr> {
    s.trim().parse().map_err(|_| parse_err("MAC address", input))
}

/// Interface address assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfaceAddr {
    pub port: PortId,
    pub domain: Option<Domain>,
    /// Absent means the address is left to DHCP
    pub addr: Option<(Ipv4Addr, u8)>,
    pub gratarp: bool,
}

impl IfaceAddr {
    pub fn domain(&self) -> Domain {
        self.domain.unwrap_or(RT_RD_DEFAULT)
    }
}

impl FromStr for IfaceAddr {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let (port, rest) = input
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("could not find ':' in '{}'", input)))?;
        let port = parse_num(port, "port number", input)?;

        let (rest, gratarp) = match rest.split_once(',') {
            Some((r, flag)) if flag.trim().eq_ignore_ascii_case("GRATARP") => (r, true),
            Some(_) => return Err(parse_err("interface flag", input)),
            None => (rest, false),
        };

        let (domain, rest) = split_domain(rest, input)?;
        let addr = if rest.trim().is_empty() {
            None
        } else {
            let (addr, len) = split_prefix(rest, input)?;
            (!addr.is_unspecified()).then_some((addr, len))
        };

        Ok(Self {
            port,
            domain,
            addr,
            gratarp,
        })
    }
}

impl fmt::Display for IfaceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#", self.port, self.domain())?;
        if let Some((addr, len)) = self.addr {
            write!(f, "{}/{}", addr, len)?;
        }
        if self.gratarp {
            write!(f, ",GRATARP")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    NextHop { addr: Ipv4Addr, domain: Domain },
    Blackhole,
}

/// Static route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub domain: Domain,
    pub prefix: Prefix,
    pub target: RouteTarget,
    /// Random discard percentage
    pub rand_discard: u8,
}

impl FromStr for RouteSpec {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let (dest, nh) = input
            .split_once('@')
            .ok_or_else(|| parse_err("route", input))?;

        let (domain, dest) = split_domain(dest, input)?;
        let domain = domain.unwrap_or(RT_RD_DEFAULT);
        let (addr, len) = split_prefix(dest, input)?;

        let (nh, rand_discard) = match nh.split_once('!') {
            Some((nh, pct)) => {
                let pct: u8 = parse_num(pct, "random discard percentage", input)?;
                if pct > 100 {
                    return Err(parse_err("random discard percentage", input));
                }
                (nh, pct)
            }
            None => (nh, 0),
        };

        let target = match nh.trim().to_ascii_lowercase().as_str() {
            "drop" | "discard" | "blackhole" => RouteTarget::Blackhole,
            _ => {
                let (nh_domain, nh_addr) = split_domain(nh, input)?;
                RouteTarget::NextHop {
                    addr: parse_addr(nh_addr, input)?,
                    domain: nh_domain.unwrap_or(domain),
                }
            }
        };
        if target == RouteTarget::Blackhole && rand_discard > 0 {
            return Err(Error::Parse(format!(
                "random discard on a blackhole route '{}'",
                input
            )));
        }

        Ok(Self {
            domain,
            prefix: Prefix::new(addr, len),
            target,
            rand_discard,
        })
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@", self.domain, self.prefix)?;
        match self.target {
            RouteTarget::NextHop { addr, domain } => write!(f, "{}#{}", domain, addr)?,
            RouteTarget::Blackhole => write!(f, "blackhole")?,
        }
        if self.rand_discard > 0 {
            write!(f, "!{}", self.rand_discard)?;
        }
        Ok(())
    }
}

/// Where a static ARP entry applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpScope {
    /// Port found through the covering subnet in this domain
    Domain(Domain),
    Port(PortId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticArp {
    pub scope: ArpScope,
    pub addr: Ipv4Addr,
    pub mac: MacAddr,
}

impl FromStr for StaticArp {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let (lhs, mac) = input
            .split_once('@')
            .ok_or_else(|| parse_err("static ARP entry", input))?;
        let mac = parse_mac(mac, input)?;

        let (scope, addr) = match lhs.split_once(':') {
            Some((port, addr)) => (ArpScope::Port(parse_num(port, "port number", input)?), addr),
            None => {
                let (domain, addr) = split_domain(lhs, input)?;
                (ArpScope::Domain(domain.unwrap_or(RT_RD_DEFAULT)), addr)
            }
        };

        Ok(Self {
            scope,
            addr: parse_addr(addr, input)?,
            mac,
        })
    }
}

impl fmt::Display for StaticArp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            ArpScope::Domain(d) => write!(f, "{}#{}@{}", d, self.addr, self.mac),
            ArpScope::Port(p) => write!(f, "{}:{}@{}", p, self.addr, self.mac),
        }
    }
}

/// Additional local address on a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubIface {
    pub port: PortId,
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
    /// Answer ARP with this MAC instead of the port's
    pub mac: Option<MacAddr>,
}

impl FromStr for SubIface {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let (port, rest) = input
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("could not find ':' in '{}'", input)))?;
        let port = parse_num(port, "port number", input)?;

        let (rest, mac) = match rest.split_once('@') {
            Some((r, m)) => (r, Some(parse_mac(m, input)?)),
            None => (rest, None),
        };
        let (addr, prefix_len) = split_prefix(rest, input)?;

        Ok(Self {
            port,
            addr,
            prefix_len,
            mac,
        })
    }
}

impl fmt::Display for SubIface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.port, self.addr, self.prefix_len)?;
        if let Some(mac) = self.mac {
            write!(f, "@{}", mac)?;
        }
        Ok(())
    }
}

/// Explicit RX/TX core for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorePin {
    pub port: PortId,
    pub rx_core: usize,
    /// Defaults to the RX core
    pub tx_core: usize,
}

impl FromStr for CorePin {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let (port, cores) = input
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("could not find ':' in '{}'", input)))?;
        let port = parse_num(port, "port number", input)?;
        let (rx_core, tx_core) = match cores.split_once(',') {
            Some((rx, tx)) => (
                parse_num(rx, "RX core", input)?,
                parse_num(tx, "TX core", input)?,
            ),
            None => {
                let rx = parse_num(cores, "RX core", input)?;
                (rx, rx)
            }
        };
        Ok(Self {
            port,
            rx_core,
            tx_core,
        })
    }
}

impl fmt::Display for CorePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{},{}", self.port, self.rx_core, self.tx_core)
    }
}
