//! dtfwd - multi-core IPv4 forwarding engine
//!
//! Longest-prefix-match routing across isolated routing domains, a
//! lock-free direct table caching per-flow decisions, and ARP resolution
//! with a single parked packet per unresolved neighbor.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
