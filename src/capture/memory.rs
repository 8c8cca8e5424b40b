//! In-memory port
//!
//! Frames injected with [`MemPort::inject`] are returned by `rx_burst`;
//! transmitted frames accumulate until [`MemPort::take_sent`].

use super::Capture;
use crate::protocol::MacAddr;
use crate::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug)]
pub struct MemPort {
    hwaddr: MacAddr,
    rx: Mutex<VecDeque<Vec<u8>>>,
    tx: Mutex<Vec<Vec<u8>>>,
    /// Frames accepted per `tx_burst`; `None` accepts all
    tx_limit: Option<usize>,
}

impl MemPort {
    pub fn new(hwaddr: MacAddr) -> Self {
        Self {
            hwaddr,
            rx: Mutex::new(VecDeque::new()),
            tx: Mutex::new(Vec::new()),
            tx_limit: None,
        }
    }

    /// Port that accepts at most `limit` frames per burst.
    pub fn with_tx_limit(hwaddr: MacAddr, limit: usize) -> Self {
        Self {
            tx_limit: Some(limit),
            ..Self::new(hwaddr)
        }
    }

    pub fn inject(&self, frame: Vec<u8>) {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).push_back(frame);
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.tx.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Capture for MemPort {
    fn rx_burst(&self, max: usize) -> Result<Vec<Vec<u8>>> {
        let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        let n = max.min(rx.len());
        Ok(rx.drain(..n).collect())
    }

    fn tx_burst(&self, frames: Vec<Vec<u8>>) -> Result<usize> {
        let accept = self.tx_limit.unwrap_or(frames.len()).min(frames.len());
        let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        tx.extend(frames.into_iter().take(accept));
        Ok(accept)
    }

    fn hwaddr(&self) -> MacAddr {
        self.hwaddr
    }
}
