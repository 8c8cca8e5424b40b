//! Wire formats produced and consumed by the engine
//!
//! Every view validates the minimum length before exposing any field.

pub mod arp;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod types;
pub mod udp;

pub use types::*;
