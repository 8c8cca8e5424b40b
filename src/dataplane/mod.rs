//! Data plane components
//!
//! Route tables, the direct-table fast path, ARP resolution, the IPv4
//! pipeline and the per-core worker loop.

mod ar_table;
mod arp_processor;
mod dhcp_client;
mod direct_table;
mod engine;
mod forwarder;
mod lpm;
mod maintenance;
mod packet;
mod port;
mod rings;
mod scheduler;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use ar_table::{ArEntry, ArRetry, ArTable, LatTable};
pub use arp_processor::{arp_generate, learn, process_arp, send_gratuitous, send_request, ArpAction};
pub use dhcp_client::{DhcpClient, DhcpClientAction, DhcpClientState};
pub use direct_table::{DirectTable, DtAction, DtForward, DtKey, DtSlotId};
pub use engine::{Engine, EngineBuilder, EngineSettings, Tables};
pub use forwarder::{
    apply_dhcp_action, ipv4_send, local_deliver, process_frame, resolve_nexthop, route_decision,
    SendDecision,
};
pub use lpm::{Disposition, HostFlags, LpmEntry, LpmTable, Prefix, RouteId};
pub use maintenance::{log_statistics, periodic};
pub use packet::{Domain, Packet, PortId, RT_RD_DEFAULT};
pub use port::{Port, PortState};
pub use rings::{GlobalRingSet, QueueSet, ThreadRingSet, TX_BURST};
pub use scheduler::{assign_cores, CoreAssignment};
pub use worker::{pin_to_core, spawn_workers, Lcg, Worker, WorkerContext, RX_BURST};
