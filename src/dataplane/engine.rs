//! Engine: ports, shared tables and counters
//!
//! The engine is built once from configuration and then shared read-only
//! by every worker thread. Slow-path tables sit behind mutexes; the direct
//! table is read without locking.

use super::ar_table::{ArTable, LatTable};
use super::direct_table::DirectTable;
use super::lpm::{HostFlags, LpmTable};
use super::packet::{Domain, Packet, PortId, RT_RD_DEFAULT};
use super::port::Port;
use super::rings::GlobalRingSet;
use super::scheduler::{self, port_enabled};
use crate::capture::Capture;
use crate::config::{
    ArpScope, Config, CorePin, EngineConfig, IfaceAddr, PortConfig, RouteSpec, RouteTarget,
    StaticArp, SubIface, DEFAULT_ARP_RETRY_LIMIT, DEFAULT_RING_SIZE, DEFAULT_TIMER_PERIOD_MS,
};
use crate::telemetry::{DiscardReason, MetricsRegistry};
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime knobs taken from `[engine]`
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Running cores; the first is the master
    pub cores: Vec<usize>,
    pub portmask: u32,
    /// `None` disables periodic maintenance
    pub timer_period: Option<Duration>,
    pub ping_nexthops: bool,
    pub print_statistics: bool,
    pub arp_retry_limit: u8,
    pub ring_size: usize,
}

impl EngineSettings {
    pub fn from_config(engine: &EngineConfig, portmask: u32) -> Self {
        Self {
            cores: engine.cores.clone(),
            portmask,
            timer_period: (engine.timer_period_ms > 0)
                .then(|| Duration::from_millis(engine.timer_period_ms)),
            ping_nexthops: engine.ping_nexthops,
            print_statistics: engine.print_statistics,
            arp_retry_limit: engine.arp_retry_limit,
            ring_size: engine.ring_size,
        }
    }

    pub fn master_core(&self) -> Option<usize> {
        self.cores.first().copied()
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cores: vec![0],
            portmask: u32::MAX,
            timer_period: Some(Duration::from_millis(DEFAULT_TIMER_PERIOD_MS)),
            ping_nexthops: false,
            print_statistics: false,
            arp_retry_limit: DEFAULT_ARP_RETRY_LIMIT,
            ring_size: DEFAULT_RING_SIZE,
        }
    }
}

/// Shared lookup tables
///
/// Lock order is LPM before AR. Neither lock is held while transmitting.
#[derive(Debug, Default)]
pub struct Tables {
    lpm: Mutex<LpmTable>,
    ar: Mutex<ArTable>,
    lat: RwLock<LatTable>,
    pub dt: DirectTable,
}

impl Tables {
    pub fn lpm(&self) -> MutexGuard<'_, LpmTable> {
        self.lpm.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ar(&self) -> MutexGuard<'_, ArTable> {
        self.ar.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lat(&self) -> RwLockReadGuard<'_, LatTable> {
        self.lat.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lat_mut(&self) -> RwLockWriteGuard<'_, LatTable> {
        self.lat.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Engine {
    ports: Vec<Port>,
    pub tables: Tables,
    pub metrics: MetricsRegistry,
    pub rings: GlobalRingSet,
    pub settings: EngineSettings,
    force_quit: AtomicBool,
}

impl Engine {
    /// Builds the engine from configuration, opening each port with `open`.
    ///
    /// Configuration is applied in a fixed order: interfaces, subinterfaces,
    /// static ARP entries, routes, then core assignment. A route whose
    /// next-hop lies outside every subnet is fatal.
    pub fn from_config<F>(config: &Config, mut open: F) -> Result<Self>
    where
        F: FnMut(&PortConfig) -> Result<Arc<dyn Capture>>,
    {
        let settings = EngineSettings::from_config(&config.engine, config.portmask());
        let mut builder = EngineBuilder::new(settings);

        let mut ports: Vec<&PortConfig> = config.ports.iter().collect();
        ports.sort_by_key(|p| p.id);
        for (idx, port) in ports.into_iter().enumerate() {
            if port.id as usize != idx {
                return Err(Error::Config(format!(
                    "port ids must be numbered 0..N, found {} at position {}",
                    port.id, idx
                )));
            }
            let io = open(port)?;
            let id = builder.add_port(io);
            builder.set_promiscuous(id, port.promiscuous)?;
        }

        let routing = &config.routing;
        for iface in routing.interfaces()? {
            builder.add_interface(&iface)?;
        }
        for sub in routing.subinterfaces()? {
            builder.add_subinterface(&sub)?;
        }
        for arp in routing.static_arp()? {
            builder.add_static_arp(&arp)?;
        }
        for route in routing.routes()? {
            builder.add_route(&route)?;
        }
        for pin in config.scheduling.pins()? {
            builder.pin(pin);
        }
        builder.build()
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id as usize)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn is_enabled(&self, id: PortId) -> bool {
        port_enabled(self.settings.portmask, id)
    }

    pub fn rx_ports_for(&self, core: usize) -> Vec<PortId> {
        self.ports
            .iter()
            .filter(|p| p.rx_core == Some(core))
            .map(|p| p.id)
            .collect()
    }

    pub fn tx_ports_for(&self, core: usize) -> Vec<PortId> {
        self.ports
            .iter()
            .filter(|p| p.tx_core == Some(core))
            .map(|p| p.id)
            .collect()
    }

    pub fn is_master(&self, core: usize) -> bool {
        self.settings.master_core() == Some(core)
    }

    pub fn stop(&self) {
        self.force_quit.store(true, Ordering::Relaxed);
    }

    pub fn should_stop(&self) -> bool {
        self.force_quit.load(Ordering::Relaxed)
    }

    /// Releases `pkt`, counted against its ingress port.
    pub fn discard(&self, pkt: Packet, reason: DiscardReason) {
        self.metrics.discard(pkt.port, reason);
    }

    /// Hands a burst to the port. Frames the port does not accept are
    /// freed and counted as queue-full.
    pub fn transmit(&self, port: PortId, frames: Vec<Vec<u8>>) {
        if frames.is_empty() {
            return;
        }
        let stats = self.metrics.port(Some(port));
        let count = frames.len() as u64;
        let Some(p) = self.port(port) else {
            stats.queue_full.add(count);
            return;
        };
        match p.io().tx_burst(frames) {
            Ok(sent) => {
                let sent = sent as u64;
                stats.tx.add(sent);
                if sent < count {
                    stats.queue_full.add(count - sent);
                }
            }
            Err(e) => {
                warn!("port {} transmit failed: {}", port, e);
                stats.queue_full.add(count);
            }
        }
    }

    /// Installs an interface address learned at runtime (DHCP).
    pub fn set_interface_addr(&self, port: PortId, addr: Ipv4Addr, len: u8) -> Result<()> {
        let p = self.port(port).ok_or(Error::PortNotFound { port })?;
        self.tables.lpm().add_interface_addr(p.domain, port, addr, len);
        self.tables.lat_mut().add(port, addr, None);
        // Cached paths into the new subnet may now be local or attached
        self.tables.dt.clear();
        p.state().ipaddr = Some((addr, len));
        info!("port {} address ({}) {}/{}", port, p.domain, addr, len);
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ports", &self.ports)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Assembles an [`Engine`] step by step
pub struct EngineBuilder {
    settings: EngineSettings,
    ports: Vec<Port>,
    lpm: LpmTable,
    ar: ArTable,
    lat: LatTable,
    pins: Vec<CorePin>,
}

impl EngineBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            ports: Vec::new(),
            lpm: LpmTable::new(),
            ar: ArTable::new(),
            lat: LatTable::new(),
            pins: Vec::new(),
        }
    }

    /// Adds a port and returns its id.
    pub fn add_port(&mut self, io: Arc<dyn Capture>) -> PortId {
        let id = self.ports.len() as PortId;
        self.ports.push(Port::new(id, io));
        id
    }

    fn port_mut(&mut self, id: PortId) -> Result<&mut Port> {
        self.ports
            .get_mut(id as usize)
            .ok_or(Error::PortNotFound { port: id })
    }

    pub fn set_promiscuous(&mut self, id: PortId, on: bool) -> Result<()> {
        self.port_mut(id)?.promiscuous = on;
        Ok(())
    }

    /// Places the port in its domain and installs its address, if any.
    /// A port without an address is left to DHCP.
    pub fn add_interface(&mut self, iface: &IfaceAddr) -> Result<()> {
        let domain = iface.domain();
        let port = self.port_mut(iface.port)?;
        port.domain = domain;
        port.gratarp = iface.gratarp;
        match iface.addr {
            Some((addr, len)) => {
                port.state().ipaddr = Some((addr, len));
                self.lpm.add_interface_addr(domain, iface.port, addr, len);
                self.lat.add(iface.port, addr, None);
                info!("port {} address ({}) {}/{}", iface.port, domain, addr, len);
            }
            None => info!("port {} in domain {} awaits DHCP", iface.port, domain),
        }
        Ok(())
    }

    pub fn add_subinterface(&mut self, sub: &SubIface) -> Result<()> {
        let port = self.port_mut(sub.port)?;
        if port.domain == 0 {
            port.domain = RT_RD_DEFAULT;
        }
        let domain = port.domain;
        self.lpm
            .add_interface_addr(domain, sub.port, sub.addr, sub.prefix_len);
        self.lat.add(sub.port, sub.addr, sub.mac);
        debug!("port {} subinterface ({}) {}", sub.port, domain, sub);
        Ok(())
    }

    pub fn add_static_arp(&mut self, arp: &StaticArp) -> Result<()> {
        let (port, domain) = match arp.scope {
            ArpScope::Port(port) => (port, self.domain_of(port)?),
            ArpScope::Domain(domain) => {
                let port = self
                    .lpm
                    .lookup_subnet(domain, arp.addr)
                    .and_then(|e| e.port)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "static ARP {}: ({}) {} is not in any subnet",
                            arp, domain, arp.addr
                        ))
                    })?;
                (port, domain)
            }
        };
        self.ar.learn(port, arp.addr, arp.mac);
        self.lpm
            .create_host_route(domain, arp.addr, Some(port), HostFlags::default())
            .hwaddr = Some(arp.mac);
        debug!("static ARP ({}) {} on port {}: {}", domain, arp.addr, port, arp.mac);
        Ok(())
    }

    fn domain_of(&self, port: PortId) -> Result<Domain> {
        let p = self
            .ports
            .get(port as usize)
            .ok_or(Error::PortNotFound { port })?;
        Ok(if p.domain == 0 { RT_RD_DEFAULT } else { p.domain })
    }

    pub fn add_route(&mut self, route: &RouteSpec) -> Result<()> {
        match route.target {
            RouteTarget::Blackhole => {
                self.lpm.create_discard_route(route.domain, route.prefix);
            }
            RouteTarget::NextHop { addr, domain } => {
                self.lpm
                    .create_route(route.domain, route.prefix, route.rand_discard, addr, domain)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "route {}: next-hop ({}) {} is not in any subnet",
                            route, domain, addr
                        ))
                    })?;
            }
        }
        debug!("route {}", route);
        Ok(())
    }

    pub fn pin(&mut self, pin: CorePin) {
        self.pins.push(pin);
    }

    pub fn build(mut self) -> Result<Engine> {
        let assignment = scheduler::assign_cores(
            self.ports.len(),
            self.settings.portmask,
            &self.settings.cores,
            &self.pins,
        )?;
        for port in &mut self.ports {
            port.rx_core = assignment.rx[port.id as usize];
            port.tx_core = assignment.tx[port.id as usize];
        }

        let port_count = self.ports.len();
        info!(
            "engine ready: {} ports, {} LPM entries, cores {:?}",
            port_count,
            self.lpm.len(),
            self.settings.cores
        );
        Ok(Engine {
            ports: self.ports,
            tables: Tables {
                lpm: Mutex::new(self.lpm),
                ar: Mutex::new(self.ar),
                lat: RwLock::new(self.lat),
                dt: DirectTable::default(),
            },
            metrics: MetricsRegistry::new(port_count),
            rings: GlobalRingSet::new(port_count, self.settings.ring_size),
            settings: self.settings,
            force_quit: AtomicBool::new(false),
        })
    }
}
