//! Configuration types

use super::parse::{CorePin, IfaceAddr, RouteSpec, StaticArp, SubIface};
use crate::capture::Backend;
use crate::telemetry::LogConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

pub const DEFAULT_TIMER_PERIOD_MS: u64 = 1000;
pub const DEFAULT_ARP_RETRY_LIMIT: u8 = 3;
pub const DEFAULT_RING_SIZE: usize = 256;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: Option<LogConfig>,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Running cores; the first one is the master core
    pub cores: Vec<usize>,
    /// Enabled ports; all declared ports when absent
    pub portmask: Option<u32>,
    /// Periodic task interval, 0 disables it
    pub timer_period_ms: u64,
    pub ping_nexthops: bool,
    pub print_statistics: bool,
    /// Re-requests per unresolved next-hop before its pending packet is
    /// freed; 0 keeps it parked indefinitely
    pub arp_retry_limit: u8,
    pub ring_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cores: vec![0],
            portmask: None,
            timer_period_ms: DEFAULT_TIMER_PERIOD_MS,
            ping_nexthops: false,
            print_statistics: false,
            arp_retry_limit: DEFAULT_ARP_RETRY_LIMIT,
            ring_size: DEFAULT_RING_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    pub id: u16,
    #[serde(default)]
    pub backend: Backend,
    /// Kernel interface name for AF_PACKET
    pub device: Option<String>,
    /// Hardware address; required for the memory backend
    pub mac: Option<String>,
    #[serde(default)]
    pub promiscuous: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub subinterfaces: Vec<String>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub static_arp: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default)]
    pub pins: Vec<String>,
}

fn parse_all<T: FromStr<Err = crate::Error>>(items: &[String]) -> Result<Vec<T>> {
    items.iter().map(|s| s.parse()).collect()
}

impl RoutingConfig {
    pub fn interfaces(&self) -> Result<Vec<IfaceAddr>> {
        parse_all(&self.interfaces)
    }

    pub fn subinterfaces(&self) -> Result<Vec<SubIface>> {
        parse_all(&self.subinterfaces)
    }

    pub fn routes(&self) -> Result<Vec<RouteSpec>> {
        parse_all(&self.routes)
    }

    pub fn static_arp(&self) -> Result<Vec<StaticArp>> {
        parse_all(&self.static_arp)
    }
}

impl SchedulingConfig {
    pub fn pins(&self) -> Result<Vec<CorePin>> {
        parse_all(&self.pins)
    }
}

impl Config {
    /// Portmask with every declared port enabled when none is configured.
    pub fn portmask(&self) -> u32 {
        self.engine.portmask.unwrap_or_else(|| {
            self.ports
                .iter()
                .filter(|p| p.id < 32)
                .fold(0, |mask, p| mask | (1 << p.id))
        })
    }
}

// ============================================================================
// Lock file types (generated, includes all defaults)
// ============================================================================

/// Generated lock file with all defaults filled in
#[derive(Debug, Clone, Serialize)]
pub struct ConfigLock {
    pub generated_at: String,
    pub engine: EngineLock,
    pub logging: LogConfig,
    pub ports: Vec<PortLock>,
    pub routing: RoutingLock,
    pub scheduling: SchedulingLock,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineLock {
    pub cores: Vec<usize>,
    pub master_core: Option<usize>,
    pub portmask: String,
    pub timer_period_ms: u64,
    pub ping_nexthops: bool,
    pub print_statistics: bool,
    pub arp_retry_limit: u8,
    pub ring_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortLock {
    pub id: u16,
    pub backend: Backend,
    pub device: String,
    pub mac: String,
    pub promiscuous: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingLock {
    pub interfaces: Vec<String>,
    pub subinterfaces: Vec<String>,
    pub routes: Vec<String>,
    pub static_arp: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulingLock {
    pub pins: Vec<String>,
}

/// Canonical form of each entry; unparsable entries are kept as written.
fn canonical<T: FromStr + Display>(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.parse::<T>().map(|v| v.to_string()).unwrap_or_else(|_| s.clone()))
        .collect()
}

impl ConfigLock {
    pub fn from_config(config: &Config) -> Self {
        let portmask = config.portmask();
        let engine = EngineLock {
            cores: config.engine.cores.clone(),
            master_core: config.engine.cores.first().copied(),
            portmask: format!("0x{:x}", portmask),
            timer_period_ms: config.engine.timer_period_ms,
            ping_nexthops: config.engine.ping_nexthops,
            print_statistics: config.engine.print_statistics,
            arp_retry_limit: config.engine.arp_retry_limit,
            ring_size: config.engine.ring_size,
        };

        let ports = config
            .ports
            .iter()
            .map(|p| PortLock {
                id: p.id,
                backend: p.backend,
                device: p.device.clone().unwrap_or_default(),
                mac: p.mac.clone().unwrap_or_else(|| "auto".to_string()),
                promiscuous: p.promiscuous,
                enabled: p.id < 32 && portmask & (1 << p.id) != 0,
            })
            .collect();

        let routing = &config.routing;
        ConfigLock {
            generated_at: chrono::Utc::now().to_rfc3339(),
            engine,
            logging: config.logging.clone().unwrap_or_default(),
            ports,
            routing: RoutingLock {
                interfaces: canonical::<IfaceAddr>(&routing.interfaces),
                subinterfaces: canonical::<SubIface>(&routing.subinterfaces),
                routes: canonical::<RouteSpec>(&routing.routes),
                static_arp: canonical::<StaticArp>(&routing.static_arp),
            },
            scheduling: SchedulingLock {
                pins: canonical::<CorePin>(&config.scheduling.pins),
            },
        }
    }
}
