//! Configuration validation

use super::parse::{ArpScope, CorePin, IfaceAddr, RouteSpec, StaticArp, SubIface};
use super::{Config, PortConfig};
use crate::capture::Backend;
use crate::protocol::MacAddr;
use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_engine(config, &mut result);
    let ports = validate_ports(config, &mut result);
    validate_routing(config, &ports, &mut result);
    validate_scheduling(config, &ports, &mut result);

    result
}

fn validate_engine(config: &Config, result: &mut ValidationResult) {
    let engine = &config.engine;
    if engine.cores.is_empty() {
        result.error("engine.cores: at least one core is required");
    }
    let unique: HashSet<_> = engine.cores.iter().collect();
    if unique.len() != engine.cores.len() {
        result.warn("engine.cores: duplicate core ids");
    }
    if engine.ring_size == 0 {
        result.error("engine.ring_size: must be greater than 0");
    }
    if engine.timer_period_ms == 0 && engine.ping_nexthops {
        result.warn("engine.ping_nexthops: has no effect with timer_period_ms = 0");
    }
}

/// Returns the set of declared port ids.
fn validate_ports(config: &Config, result: &mut ValidationResult) -> HashSet<u16> {
    let mut ids = HashSet::new();
    for port in &config.ports {
        if !ids.insert(port.id) {
            result.error(format!("ports: duplicate port id {}", port.id));
        }
        validate_port(port, result);
    }

    // Ports are addressed by index
    if (0..config.ports.len() as u16).any(|id| !ids.contains(&id)) {
        result.error(format!(
            "ports: ids must be numbered 0..{} without gaps",
            config.ports.len()
        ));
    }

    if let Some(mask) = config.engine.portmask {
        for bit in 0..32u16 {
            if mask & (1 << bit) != 0 && !ids.contains(&bit) {
                result.warn(format!("engine.portmask: port {} is not declared", bit));
            }
        }
    }
    ids
}

fn validate_port(port: &PortConfig, result: &mut ValidationResult) {
    if let Some(ref mac) = port.mac {
        if mac.parse::<MacAddr>().is_err() {
            result.error(format!("ports[{}]: invalid mac '{}'", port.id, mac));
        }
    }
    match port.backend {
        Backend::AfPacket if port.device.is_none() => {
            result.error(format!("ports[{}]: af_packet requires a device", port.id));
        }
        Backend::Memory if port.mac.is_none() => {
            result.error(format!("ports[{}]: memory backend requires a mac", port.id));
        }
        _ => {}
    }
}

/// Parses every entry, reporting failures, and returns the parsed values.
fn parse_section<T: FromStr>(section: &str, items: &[String], result: &mut ValidationResult) -> Vec<T>
where
    T::Err: Display,
{
    items
        .iter()
        .enumerate()
        .filter_map(|(i, s)| match s.parse::<T>() {
            Ok(v) => Some(v),
            Err(e) => {
                result.error(format!("{}[{}]: {}", section, i, e));
                None
            }
        })
        .collect()
}

fn check_port(section: &str, port: u16, ports: &HashSet<u16>, result: &mut ValidationResult) {
    if !ports.contains(&port) {
        result.error(format!("{}: port {} not defined", section, port));
    }
}

fn validate_routing(config: &Config, ports: &HashSet<u16>, result: &mut ValidationResult) {
    let routing = &config.routing;

    let interfaces: Vec<IfaceAddr> = parse_section("routing.interfaces", &routing.interfaces, result);
    let mut domains = HashSet::new();
    let mut seen = HashSet::new();
    for iface in &interfaces {
        check_port("routing.interfaces", iface.port, ports, result);
        if !seen.insert(iface.port) {
            result.warn(format!(
                "routing.interfaces: port {} configured more than once, last wins",
                iface.port
            ));
        }
        domains.insert(iface.domain());
    }

    let subs: Vec<SubIface> = parse_section("routing.subinterfaces", &routing.subinterfaces, result);
    for sub in &subs {
        check_port("routing.subinterfaces", sub.port, ports, result);
        if !seen.contains(&sub.port) {
            result.warn(format!(
                "routing.subinterfaces: port {} has no interface entry, using domain 1",
                sub.port
            ));
        }
    }

    let arps: Vec<StaticArp> = parse_section("routing.static_arp", &routing.static_arp, result);
    for arp in &arps {
        if let ArpScope::Port(port) = arp.scope {
            check_port("routing.static_arp", port, ports, result);
        }
    }

    let routes: Vec<RouteSpec> = parse_section("routing.routes", &routing.routes, result);
    for route in &routes {
        if !domains.contains(&route.domain) {
            result.warn(format!(
                "routing.routes: route {} is in domain {} which has no interface",
                route, route.domain
            ));
        }
    }
}

fn validate_scheduling(config: &Config, ports: &HashSet<u16>, result: &mut ValidationResult) {
    let pins: Vec<CorePin> = parse_section("scheduling.pins", &config.scheduling.pins, result);
    let cores: HashSet<_> = config.engine.cores.iter().copied().collect();
    for pin in &pins {
        check_port("scheduling.pins", pin.port, ports, result);
        for core in [pin.rx_core, pin.tx_core] {
            if !cores.contains(&core) {
                result.error(format!(
                    "scheduling.pins: port {} pinned to core {} which is not running",
                    pin.port, core
                ));
            }
        }
    }
}
