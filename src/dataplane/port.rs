//! Ports: capture handle, routing domain, core ownership

use super::dhcp_client::DhcpClient;
use super::packet::{Domain, PortId};
use crate::capture::Capture;
use crate::protocol::MacAddr;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Mutable per-port state, touched only on the slow path
#[derive(Debug)]
pub struct PortState {
    /// Primary interface address and prefix length
    pub ipaddr: Option<(Ipv4Addr, u8)>,
    pub dhcp: DhcpClient,
}

pub struct Port {
    pub id: PortId,
    pub hwaddr: MacAddr,
    /// 0 when the port was never given an interface address
    pub domain: Domain,
    pub promiscuous: bool,
    /// Broadcast a gratuitous ARP for the port address on every tick
    pub gratarp: bool,
    /// Cores polling and transmitting; None while the port is disabled
    pub rx_core: Option<usize>,
    pub tx_core: Option<usize>,
    io: Arc<dyn Capture>,
    state: Mutex<PortState>,
}

impl Port {
    pub fn new(id: PortId, io: Arc<dyn Capture>) -> Self {
        let hwaddr = io.hwaddr();
        Self {
            id,
            hwaddr,
            domain: 0,
            promiscuous: false,
            gratarp: false,
            rx_core: None,
            tx_core: None,
            io,
            state: Mutex::new(PortState {
                ipaddr: None,
                dhcp: DhcpClient::new(id, hwaddr),
            }),
        }
    }

    pub fn io(&self) -> &dyn Capture {
        self.io.as_ref()
    }

    pub fn state(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ipaddr(&self) -> Option<(Ipv4Addr, u8)> {
        self.state().ipaddr
    }

    /// Whether a frame addressed to `dst` should be processed here.
    pub fn accepts(&self, dst: MacAddr) -> bool {
        self.promiscuous || dst == self.hwaddr || dst.is_multicast()
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("hwaddr", &self.hwaddr)
            .field("domain", &self.domain)
            .field("rx_core", &self.rx_core)
            .field("tx_core", &self.tx_core)
            .finish()
    }
}
