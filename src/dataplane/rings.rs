//! Inter-core TX fabric
//!
//! Every port has one ring, drained only by the core owning the port's TX.
//! Each worker batches outgoing frames per port in its [`QueueSet`]; a full
//! batch, or the end of a loop iteration, flushes it either straight to the
//! port (when this core owns its TX) or into the port's ring.

use super::engine::Engine;
use super::packet::PortId;
use crossbeam::queue::ArrayQueue;
use tracing::trace;

/// Frames coalesced per port before a flush
pub const TX_BURST: usize = 16;

/// One bounded ring per port
#[derive(Debug)]
pub struct GlobalRingSet {
    rings: Vec<ArrayQueue<Vec<u8>>>,
}

impl GlobalRingSet {
    pub fn new(port_count: usize, ring_size: usize) -> Self {
        Self {
            rings: (0..port_count)
                .map(|_| ArrayQueue::new(ring_size.max(1)))
                .collect(),
        }
    }

    pub fn ring(&self, port: PortId) -> Option<&ArrayQueue<Vec<u8>>> {
        self.rings.get(port as usize)
    }

    pub fn len(&self) -> usize {
        self.rings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings.is_empty()
    }
}

/// Per-worker TX batches, one per port
#[derive(Debug)]
pub struct QueueSet {
    core: usize,
    queues: Vec<Vec<Vec<u8>>>,
}

impl QueueSet {
    pub fn new(core: usize, port_count: usize) -> Self {
        Self {
            core,
            queues: (0..port_count)
                .map(|_| Vec::with_capacity(TX_BURST))
                .collect(),
        }
    }

    /// Queues `frame` for `port`, flushing the batch once it is full.
    pub fn enqueue(&mut self, engine: &Engine, port: PortId, frame: Vec<u8>) {
        let Some(queue) = self.queues.get_mut(port as usize) else {
            engine.metrics.port(None).queue_full.inc();
            return;
        };
        queue.push(frame);
        if queue.len() >= TX_BURST {
            self.flush_port(engine, port);
        }
    }

    /// Frames currently batched for `port`.
    pub fn pending(&self, port: PortId) -> usize {
        self.queues.get(port as usize).map_or(0, Vec::len)
    }

    pub fn flush(&mut self, engine: &Engine) {
        for port in 0..self.queues.len() {
            if !self.queues[port].is_empty() {
                self.flush_port(engine, port as PortId);
            }
        }
    }

    fn flush_port(&mut self, engine: &Engine, port: PortId) {
        let frames = std::mem::replace(
            &mut self.queues[port as usize],
            Vec::with_capacity(TX_BURST),
        );
        let stats = engine.metrics.port(Some(port));

        match engine.port(port).and_then(|p| p.tx_core) {
            Some(core) if core == self.core => engine.transmit(port, frames),
            Some(core) => {
                let Some(ring) = engine.rings.ring(port) else {
                    stats.queue_full.add(frames.len() as u64);
                    return;
                };
                let count = frames.len();
                let mut dropped = 0;
                for frame in frames {
                    if ring.push(frame).is_err() {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    stats.queue_full.add(dropped);
                }
                trace!(
                    "core {} handed {} frames for port {} to core {}",
                    self.core,
                    count as u64 - dropped,
                    port,
                    core
                );
            }
            // Disabled port: nobody transmits
            None => stats.queue_full.add(frames.len() as u64),
        }
    }
}

/// Rings of the ports whose TX this core owns
#[derive(Debug, Default)]
pub struct ThreadRingSet {
    ports: Vec<PortId>,
}

impl ThreadRingSet {
    pub fn new(engine: &Engine, core: usize) -> Self {
        Self {
            ports: engine.tx_ports_for(core),
        }
    }

    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Transmits everything queued on this core's rings.
    pub fn drain(&self, engine: &Engine) {
        for &port in &self.ports {
            let Some(ring) = engine.rings.ring(port) else {
                continue;
            };
            if ring.is_empty() {
                continue;
            }
            let mut frames = Vec::with_capacity(ring.len());
            while frames.len() < ring.capacity() {
                match ring.pop() {
                    Some(frame) => frames.push(frame),
                    None => break,
                }
            }
            engine.transmit(port, frames);
        }
    }
}
