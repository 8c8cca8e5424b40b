//! Operational counters.
//!
//! Every port carries rx/tx/queue-full counters, one counter per discard
//! reason and an RX burst occupancy histogram. Counters are relaxed atomics
//! so any core may bump any port's counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a packet was released without being transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Policy: no route, discard route, random discard, superseded pending packet
    Drop,
    /// Terminated at the local stack (ARP replies, DHCP, echo replies)
    Term,
    /// Malformed or inconsistent protocol data
    Error,
    /// Not for us (wrong destination MAC, unknown ethertype, foreign ARP target)
    Ignore,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscardReason::Drop => "drop",
            DiscardReason::Term => "term",
            DiscardReason::Error => "error",
            DiscardReason::Ignore => "ignore",
        };
        f.write_str(name)
    }
}

/// RX burst occupancy: empty, single, partial, full, and packets in partial bursts
#[derive(Debug, Default)]
pub struct LoadStats {
    pub empty: Counter,
    pub single: Counter,
    pub partial: Counter,
    pub full: Counter,
    pub partial_packets: Counter,
}

impl LoadStats {
    pub fn record_burst(&self, count: usize, burst_size: usize) {
        match count {
            0 => self.empty.inc(),
            1 => self.single.inc(),
            n if n < burst_size => {
                self.partial.inc();
                self.partial_packets.add(n as u64);
            }
            _ => self.full.inc(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PortStats {
    pub rx: Counter,
    pub tx: Counter,
    pub queue_full: Counter,
    pub drop: Counter,
    pub term: Counter,
    pub error: Counter,
    pub ignore: Counter,
    pub load: LoadStats,
}

impl PortStats {
    pub fn record_discard(&self, reason: DiscardReason) {
        match reason {
            DiscardReason::Drop => self.drop.inc(),
            DiscardReason::Term => self.term.inc(),
            DiscardReason::Error => self.error.inc(),
            DiscardReason::Ignore => self.ignore.inc(),
        }
    }

    pub fn discards(&self, reason: DiscardReason) -> u64 {
        match reason {
            DiscardReason::Drop => self.drop.get(),
            DiscardReason::Term => self.term.get(),
            DiscardReason::Error => self.error.get(),
            DiscardReason::Ignore => self.ignore.get(),
        }
    }
}

/// Engine-wide counters, indexed by port id.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    ports: Vec<PortStats>,
    /// Discards of packets generated locally (no ingress port)
    pub local: PortStats,

    pub no_route: Counter,
    pub dt_hits: Counter,
    pub dt_misses: Counter,
    pub arp_requests_sent: Counter,
    pub arp_replies_sent: Counter,
    pub pending_superseded: Counter,
    pub pending_expired: Counter,
    pub icmp_echo_replies: Counter,
    pub keepalive_pings: Counter,
}

impl MetricsRegistry {
    pub fn new(port_count: usize) -> Self {
        Self {
            ports: (0..port_count).map(|_| PortStats::default()).collect(),
            ..Default::default()
        }
    }

    /// Counters of `port`, or the local bucket for unknown/absent ports.
    pub fn port(&self, port: Option<u16>) -> &PortStats {
        port.and_then(|p| self.ports.get(p as usize))
            .unwrap_or(&self.local)
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn discard(&self, port: Option<u16>, reason: DiscardReason) {
        self.port(port).record_discard(reason);
    }

    /// Key-value export of every counter.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("no_route".into(), self.no_route.get()),
            ("dt_hits".into(), self.dt_hits.get()),
            ("dt_misses".into(), self.dt_misses.get()),
            ("arp_requests_sent".into(), self.arp_requests_sent.get()),
            ("arp_replies_sent".into(), self.arp_replies_sent.get()),
            ("pending_superseded".into(), self.pending_superseded.get()),
            ("pending_expired".into(), self.pending_expired.get()),
            ("icmp_echo_replies".into(), self.icmp_echo_replies.get()),
            ("keepalive_pings".into(), self.keepalive_pings.get()),
        ];

        for (idx, stats) in self.ports.iter().enumerate() {
            result.extend([
                (format!("port{}_rx", idx), stats.rx.get()),
                (format!("port{}_tx", idx), stats.tx.get()),
                (format!("port{}_qfull", idx), stats.queue_full.get()),
                (format!("port{}_drop", idx), stats.drop.get()),
                (format!("port{}_term", idx), stats.term.get()),
                (format!("port{}_error", idx), stats.error.get()),
                (format!("port{}_ignore", idx), stats.ignore.get()),
            ]);
        }
        result
    }
}
