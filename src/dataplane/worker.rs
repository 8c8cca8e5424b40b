//! Per-core worker loop
//!
//! Each running core polls the RX side of its ports, flushes its TX
//! batches, then drains the rings of the ports whose TX it owns. The master
//! core also runs periodic maintenance.

use super::engine::Engine;
use super::forwarder;
use super::maintenance;
use super::packet::PortId;
use super::rings::{QueueSet, ThreadRingSet};
use crate::{Error, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Frames pulled from a port per poll
pub const RX_BURST: usize = 32;

/// Small linear congruential generator, one per core
#[derive(Debug, Clone)]
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    /// Uniform value in `0..100`.
    pub fn percent(&mut self) -> u8 {
        (self.next_u32() % 100) as u8
    }
}

/// State a worker threads through the pipeline
#[derive(Debug)]
pub struct WorkerContext {
    pub core: usize,
    pub queues: QueueSet,
    pub rng: Lcg,
}

impl WorkerContext {
    pub fn new(engine: &Engine, core: usize) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_seed(engine, core, nanos ^ ((core as u64) << 32))
    }

    pub fn with_seed(engine: &Engine, core: usize, seed: u64) -> Self {
        Self {
            core,
            queues: QueueSet::new(core, engine.ports().len()),
            rng: Lcg::new(seed),
        }
    }
}

pub struct Worker {
    pub ctx: WorkerContext,
    rx_ports: Vec<PortId>,
    rings: ThreadRingSet,
    is_master: bool,
    last_tick: Instant,
}

impl Worker {
    pub fn new(engine: &Engine, core: usize) -> Self {
        Self {
            ctx: WorkerContext::new(engine, core),
            rx_ports: engine.rx_ports_for(core),
            rings: ThreadRingSet::new(engine, core),
            is_master: engine.is_master(core),
            last_tick: Instant::now(),
        }
    }

    pub fn core(&self) -> usize {
        self.ctx.core
    }

    /// A core with no RX ports and no rings to drain only stays up as master.
    pub fn has_work(&self) -> bool {
        self.is_master || !self.rx_ports.is_empty() || !self.rings.is_empty()
    }

    /// One loop iteration.
    pub fn poll(&mut self, engine: &Engine) {
        if self.is_master {
            if let Some(period) = engine.settings.timer_period {
                if self.last_tick.elapsed() >= period {
                    self.last_tick = Instant::now();
                    maintenance::periodic(engine, &mut self.ctx);
                }
            }
        }

        for &port in &self.rx_ports {
            receive(engine, &mut self.ctx, port);
        }
        self.ctx.queues.flush(engine);
        self.rings.drain(engine);
    }

    pub fn run(mut self, engine: &Engine) {
        info!(
            "core {} running: rx ports {:?}, tx rings {:?}{}",
            self.core(),
            self.rx_ports,
            self.rings.ports(),
            if self.is_master { ", master" } else { "" }
        );
        while !engine.should_stop() {
            self.poll(engine);
        }
        // Release anything still batched
        self.ctx.queues.flush(engine);
        self.rings.drain(engine);
        debug!("core {} stopped", self.core());
    }
}

fn receive(engine: &Engine, ctx: &mut WorkerContext, port: PortId) {
    let Some(p) = engine.port(port) else {
        return;
    };
    let frames = match p.io().rx_burst(RX_BURST) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("port {} receive failed: {}", port, e);
            return;
        }
    };
    let stats = engine.metrics.port(Some(port));
    stats.load.record_burst(frames.len(), RX_BURST);
    if frames.is_empty() {
        return;
    }
    stats.rx.add(frames.len() as u64);
    for frame in frames {
        forwarder::process_frame(engine, ctx, port, frame);
    }
}

/// Binds the calling thread to `core`.
pub fn pin_to_core(core: usize) -> Result<()> {
    // SAFETY: cpu_set_t is plain data; sched_setaffinity only reads it.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Starts one thread per running core that has something to do.
pub fn spawn_workers(engine: Arc<Engine>) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    for &core in &engine.settings.cores {
        let worker = Worker::new(&engine, core);
        if !worker.has_work() {
            info!("core {} has nothing to do", core);
            continue;
        }
        let engine = engine.clone();
        let handle = thread::Builder::new()
            .name(format!("dtfwd-core{}", core))
            .spawn(move || {
                if let Err(e) = pin_to_core(core) {
                    warn!("core {}: could not set affinity: {}", core, e);
                }
                worker.run(&engine);
            })?;
        handles.push(handle);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MemPort;
    use crate::dataplane::engine::{EngineBuilder, EngineSettings};
    use crate::protocol::MacAddr;

    #[test]
    fn test_lcg_percent_range() {
        let mut rng = Lcg::new(42);
        let mut seen_low = false;
        let mut seen_high = false;
        for _ in 0..1000 {
            let p = rng.percent();
            assert!(p < 100);
            seen_low |= p < 10;
            seen_high |= p >= 90;
        }
        assert!(seen_low && seen_high);
    }

    #[test]
    fn test_lcg_deterministic() {
        let mut a = Lcg::new(7);
        let mut b = Lcg::new(7);
        for _ in 0..10 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_idle_core_has_no_work() {
        let mut b = EngineBuilder::new(EngineSettings {
            cores: vec![0, 1, 2],
            ..Default::default()
        });
        b.add_port(Arc::new(MemPort::new(MacAddr([2, 0, 0, 0, 0, 1]))));
        let engine = b.build().unwrap();

        assert!(Worker::new(&engine, 0).has_work());
        // Port 0 lands on core 0 for both directions
        assert!(!Worker::new(&engine, 1).has_work());
        assert!(!Worker::new(&engine, 2).has_work());
    }

    #[test]
    fn test_master_without_ports_keeps_running() {
        let b = EngineBuilder::new(EngineSettings::default());
        let engine = b.build().unwrap();
        assert!(Worker::new(&engine, 0).has_work());
    }
}
