//! Core assignment
//!
//! Every enabled port gets exactly one RX core and one TX core. Explicit
//! pins are applied first; remaining ports are spread round-robin over the
//! running cores, RX and TX each with their own cursor.

use super::packet::PortId;
use crate::config::CorePin;
use crate::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreAssignment {
    /// Indexed by port id; `None` for disabled ports
    pub rx: Vec<Option<usize>>,
    pub tx: Vec<Option<usize>>,
}

impl CoreAssignment {
    pub fn rx_ports(&self, core: usize) -> Vec<PortId> {
        ports_on(&self.rx, core)
    }

    pub fn tx_ports(&self, core: usize) -> Vec<PortId> {
        ports_on(&self.tx, core)
    }
}

fn ports_on(cores: &[Option<usize>], core: usize) -> Vec<PortId> {
    cores
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == Some(core))
        .map(|(port, _)| port as PortId)
        .collect()
}

pub fn port_enabled(portmask: u32, port: PortId) -> bool {
    port < 32 && portmask & (1 << port) != 0
}

/// Assigns RX and TX cores to the enabled ports.
///
/// A pin naming an unknown port or a core that is not running is fatal.
/// Pins on disabled ports are ignored.
pub fn assign_cores(
    port_count: usize,
    portmask: u32,
    cores: &[usize],
    pins: &[CorePin],
) -> Result<CoreAssignment> {
    if cores.is_empty() {
        return Err(Error::CoreAssignment("no cores to run on".into()));
    }

    let mut assignment = CoreAssignment {
        rx: vec![None; port_count],
        tx: vec![None; port_count],
    };

    for pin in pins {
        if pin.port as usize >= port_count {
            return Err(Error::PortNotFound { port: pin.port });
        }
        for (what, core) in [("RX", pin.rx_core), ("TX", pin.tx_core)] {
            if !cores.contains(&core) {
                return Err(Error::CoreAssignment(format!(
                    "port {} {} pinned to core {} which is not running",
                    pin.port, what, core
                )));
            }
        }
        if !port_enabled(portmask, pin.port) {
            debug!("pin for disabled port {} ignored", pin.port);
            continue;
        }
        assignment.rx[pin.port as usize] = Some(pin.rx_core);
        assignment.tx[pin.port as usize] = Some(pin.tx_core);
    }

    round_robin(&mut assignment.rx, portmask, cores);
    round_robin(&mut assignment.tx, portmask, cores);

    for port in 0..port_count {
        if let (Some(rx), Some(tx)) = (assignment.rx[port], assignment.tx[port]) {
            debug!("port {}: RX core {}, TX core {}", port, rx, tx);
        }
    }
    Ok(assignment)
}

fn round_robin(slots: &mut [Option<usize>], portmask: u32, cores: &[usize]) {
    let mut next = 0;
    for (port, slot) in slots.iter_mut().enumerate() {
        if slot.is_some() || !port_enabled(portmask, port as PortId) {
            continue;
        }
        *slot = Some(cores[next % cores.len()]);
        next += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(port: PortId, rx_core: usize, tx_core: usize) -> CorePin {
        CorePin {
            port,
            rx_core,
            tx_core,
        }
    }

    #[test]
    fn test_round_robin() {
        let a = assign_cores(3, 0b111, &[0, 2], &[]).unwrap();
        assert_eq!(a.rx, vec![Some(0), Some(2), Some(0)]);
        assert_eq!(a.tx, vec![Some(0), Some(2), Some(0)]);
        assert_eq!(a.rx_ports(0), vec![0, 2]);
        assert_eq!(a.tx_ports(2), vec![1]);
    }

    #[test]
    fn test_disabled_ports_unassigned() {
        let a = assign_cores(3, 0b101, &[0, 1], &[]).unwrap();
        assert_eq!(a.rx, vec![Some(0), None, Some(1)]);
    }

    #[test]
    fn test_pins_take_precedence() {
        let a = assign_cores(3, 0b111, &[0, 1], &[pin(0, 1, 0)]).unwrap();
        assert_eq!(a.rx, vec![Some(1), Some(0), Some(1)]);
        assert_eq!(a.tx, vec![Some(0), Some(0), Some(1)]);
    }

    #[test]
    fn test_pin_to_stopped_core_fails() {
        let err = assign_cores(2, 0b11, &[0, 1], &[pin(1, 0, 3)]).unwrap_err();
        assert!(matches!(err, Error::CoreAssignment(_)));
        assert!(err.to_string().contains("core 3"));
    }

    #[test]
    fn test_pin_unknown_port_fails() {
        let err = assign_cores(2, 0b11, &[0], &[pin(4, 0, 0)]).unwrap_err();
        assert!(matches!(err, Error::PortNotFound { port: 4 }));
    }

    #[test]
    fn test_no_cores() {
        assert!(assign_cores(1, 1, &[], &[]).is_err());
    }
}
