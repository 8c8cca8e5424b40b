//! NIC boundary
//!
//! Ports are polled in bursts from whichever core owns them. Backends:
//! - AF_PACKET: raw socket on a kernel interface, non-blocking
//! - Memory: in-process queues, used by tests and dry runs

mod af_packet;
mod memory;

pub use af_packet::AfPacketSocket;
pub use memory::MemPort;

use crate::config::PortConfig;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Burst I/O on one port
///
/// Methods take `&self`: the RX-owning and TX-owning cores of a port may
/// differ, so a backend must tolerate concurrent receive and transmit.
pub trait Capture: Send + Sync {
    /// Returns up to `max` received frames without blocking.
    fn rx_burst(&self, max: usize) -> Result<Vec<Vec<u8>>>;

    /// Transmits frames in order. Returns how many were accepted; the
    /// rest are released by the backend.
    fn tx_burst(&self, frames: Vec<Vec<u8>>) -> Result<usize>;

    /// Hardware address of the port.
    fn hwaddr(&self) -> MacAddr;
}

/// Backend type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    AfPacket,
    Memory,
}

/// Opens the backend a port is configured for.
pub fn open(port: &PortConfig) -> Result<Arc<dyn Capture>> {
    match port.backend {
        Backend::AfPacket => {
            let device = port.device.as_deref().ok_or_else(|| {
                Error::Config(format!("port {}: af_packet requires a device", port.id))
            })?;
            if port.mac.is_some() {
                warn!("port {}: mac is ignored for af_packet, using {}'s address", port.id, device);
            }
            let socket = AfPacketSocket::bind(device, port.promiscuous)?;
            info!("port {} bound to {} ({})", port.id, device, socket.hwaddr());
            Ok(Arc::new(socket))
        }
        Backend::Memory => {
            let mac: MacAddr = port
                .mac
                .as_deref()
                .ok_or_else(|| Error::Config(format!("port {}: memory backend requires a mac", port.id)))?
                .parse()
                .map_err(|e| Error::Config(format!("port {}: {}", port.id, e)))?;
            Ok(Arc::new(MemPort::new(mac)))
        }
    }
}
