//! Direct table: the per-packet fast path
//!
//! Caches forwarding decisions keyed by ingress port, destination address
//! and the destination MAC seen on ingress. Readers never lock. Each slot
//! field is an atomic; a writer publishes a slot by storing its `flags`
//! word last with `Release`, and readers load `flags` first with `Acquire`.
//! A reader racing an update may pair new flags with old MACs and forward
//! one frame with the previous rewrite; the next packet sees the update.
//!
//! Slots come from a fixed arena. Writers serialize on a small mutex that
//! owns the arena cursor. Invalidated slots stay linked in their bucket
//! chain and are reused in place by the next insert into that bucket.
//! Once the arena is exhausted an insert overwrites the tail of its own
//! bucket chain, or, if that chain is empty, takes the slot under a clock
//! hand away from whichever chain holds it.

use super::packet::PortId;
use crate::protocol::MacAddr;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

pub const DEFAULT_BUCKETS: usize = 4096;
pub const DEFAULT_SLOTS: usize = 16384;

const NIL: u32 = u32::MAX;

const FLAG_VALID: u32 = 0x01;
const FLAG_DISCARD: u32 = 0x02;
const FLAG_RANDDISC: u32 = 0x04;
const RANDDISC_SHIFT: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DtKey {
    pub in_port: PortId,
    pub dst: Ipv4Addr,
    /// Destination MAC as observed on ingress
    pub in_mac: MacAddr,
}

/// Egress decision for a resolved destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtForward {
    pub out_port: PortId,
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    /// Random discard percentage copied from the route
    pub rand_discard: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtAction {
    Forward(DtForward),
    Discard,
}

/// Index of a slot in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtSlotId(u32);

#[derive(Debug)]
struct Slot {
    in_port: AtomicU32,
    dst: AtomicU32,
    in_mac: AtomicU64,
    out_port: AtomicU32,
    dst_mac: AtomicU64,
    src_mac: AtomicU64,
    flags: AtomicU32,
    next: AtomicU32,
}

impl Slot {
    fn empty() -> Self {
        Self {
            in_port: AtomicU32::new(0),
            dst: AtomicU32::new(0),
            in_mac: AtomicU64::new(0),
            out_port: AtomicU32::new(0),
            dst_mac: AtomicU64::new(0),
            src_mac: AtomicU64::new(0),
            flags: AtomicU32::new(0),
            next: AtomicU32::new(NIL),
        }
    }

    fn matches(&self, key: &DtKey) -> bool {
        self.dst.load(Ordering::Relaxed) == u32::from(key.dst)
            && self.in_port.load(Ordering::Relaxed) == key.in_port as u32
            && self.in_mac.load(Ordering::Relaxed) == key.in_mac.to_u64()
    }

    fn write_key(&self, key: &DtKey) {
        self.in_port.store(key.in_port as u32, Ordering::Relaxed);
        self.dst.store(u32::from(key.dst), Ordering::Relaxed);
        self.in_mac.store(key.in_mac.to_u64(), Ordering::Relaxed);
    }

    /// Field stores first, flags last.
    fn publish(&self, template: Option<&DtForward>) {
        let flags = match template {
            Some(fwd) => {
                self.out_port.store(fwd.out_port as u32, Ordering::Relaxed);
                self.dst_mac.store(fwd.dst_mac.to_u64(), Ordering::Relaxed);
                self.src_mac.store(fwd.src_mac.to_u64(), Ordering::Relaxed);
                if fwd.rand_discard > 0 {
                    FLAG_VALID | FLAG_RANDDISC | ((fwd.rand_discard as u32) << RANDDISC_SHIFT)
                } else {
                    FLAG_VALID
                }
            }
            None => FLAG_VALID | FLAG_DISCARD,
        };
        self.flags.store(flags, Ordering::Release);
    }

    fn action(&self, flags: u32) -> DtAction {
        if flags & FLAG_DISCARD != 0 {
            return DtAction::Discard;
        }
        let rand_discard = if flags & FLAG_RANDDISC != 0 {
            (flags >> RANDDISC_SHIFT) as u8
        } else {
            0
        };
        DtAction::Forward(DtForward {
            out_port: self.out_port.load(Ordering::Relaxed) as PortId,
            dst_mac: MacAddr::from_u64(self.dst_mac.load(Ordering::Relaxed)),
            src_mac: MacAddr::from_u64(self.src_mac.load(Ordering::Relaxed)),
            rand_discard,
        })
    }
}

/// Writer-side arena state
#[derive(Debug, Default)]
struct Arena {
    /// Next never-used slot
    next_free: u32,
    /// Eviction victim once every slot is in use
    hand: u32,
}

#[derive(Debug)]
pub struct DirectTable {
    heads: Box<[AtomicU32]>,
    slots: Box<[Slot]>,
    mask: usize,
    writer: Mutex<Arena>,
}

impl Default for DirectTable {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKETS, DEFAULT_SLOTS)
    }
}

impl DirectTable {
    /// `buckets` is rounded up to a power of two.
    pub fn new(buckets: usize, slots: usize) -> Self {
        let buckets = buckets.max(1).next_power_of_two();
        let slots = slots.clamp(1, NIL as usize - 1);
        Self {
            heads: (0..buckets).map(|_| AtomicU32::new(NIL)).collect(),
            slots: (0..slots).map(|_| Slot::empty()).collect(),
            mask: buckets - 1,
            writer: Mutex::new(Arena::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn hash(&self, dst: u32, in_port: u32) -> usize {
        let h = dst
            .wrapping_add(dst >> 8)
            .wrapping_add(dst >> 16)
            .wrapping_add(dst >> 24)
            .wrapping_add(in_port);
        h as usize & self.mask
    }

    fn bucket(&self, key: &DtKey) -> usize {
        self.hash(u32::from(key.dst), key.in_port as u32)
    }

    fn slot_bucket(&self, slot: &Slot) -> usize {
        self.hash(
            slot.dst.load(Ordering::Relaxed),
            slot.in_port.load(Ordering::Relaxed),
        )
    }

    fn chain(&self, bucket: usize) -> impl Iterator<Item = (u32, &Slot)> {
        let mut idx = self.heads[bucket].load(Ordering::Acquire);
        std::iter::from_fn(move || {
            let slot = self.slots.get(idx as usize)?;
            let current = idx;
            idx = slot.next.load(Ordering::Acquire);
            Some((current, slot))
        })
    }

    /// Lock-free lookup.
    pub fn lookup(&self, key: &DtKey) -> Option<DtAction> {
        for (_, slot) in self.chain(self.bucket(key)) {
            let flags = slot.flags.load(Ordering::Acquire);
            if flags & FLAG_VALID != 0 && slot.matches(key) {
                return Some(slot.action(flags));
            }
        }
        None
    }

    /// Installs or refreshes the entry for `key`.
    ///
    /// Without a template the entry is a DISCARD entry, so traffic to an
    /// unusable destination fails fast until it is overwritten. Always
    /// succeeds; a full arena gives up an older entry.
    pub fn find_or_create(&self, key: &DtKey, template: Option<&DtForward>) -> DtSlotId {
        let mut arena = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = self.bucket(key);
        let exhausted = arena.next_free as usize >= self.slots.len();

        let mut reusable = None;
        let mut tail = None;
        for (idx, slot) in self.chain(bucket) {
            let flags = slot.flags.load(Ordering::Relaxed);
            if flags & FLAG_VALID != 0 {
                if slot.matches(key) {
                    slot.publish(template);
                    return DtSlotId(idx);
                }
            } else if reusable.is_none() {
                reusable = Some(idx);
            }
            tail = Some(idx);
        }

        let in_place = reusable.or(if exhausted { tail } else { None });
        if let Some(idx) = in_place {
            let slot = &self.slots[idx as usize];
            slot.flags.store(0, Ordering::Release);
            slot.write_key(key);
            slot.publish(template);
            debug!("DT reused slot {} for {} on port {}", idx, key.dst, key.in_port);
            return DtSlotId(idx);
        }

        let idx = if exhausted {
            self.evict(&mut arena)
        } else {
            let idx = arena.next_free;
            arena.next_free += 1;
            idx
        };

        let slot = &self.slots[idx as usize];
        slot.write_key(key);
        slot.publish(template);
        slot.next
            .store(self.heads[bucket].load(Ordering::Relaxed), Ordering::Relaxed);
        self.heads[bucket].store(idx, Ordering::Release);
        debug!("DT new slot {} for {} on port {}", idx, key.dst, key.in_port);
        DtSlotId(idx)
    }

    /// Unlinks the slot under the clock hand from its chain and returns it.
    /// Every slot is linked when this runs.
    fn evict(&self, arena: &mut Arena) -> u32 {
        let idx = arena.hand;
        arena.hand = (arena.hand + 1) % self.slots.len() as u32;

        let victim = &self.slots[idx as usize];
        victim.flags.store(0, Ordering::Release);
        let bucket = self.slot_bucket(victim);
        let next = victim.next.load(Ordering::Relaxed);
        if self.heads[bucket].load(Ordering::Relaxed) == idx {
            self.heads[bucket].store(next, Ordering::Release);
        } else if let Some((_, prev)) = self
            .chain(bucket)
            .find(|(_, s)| s.next.load(Ordering::Relaxed) == idx)
        {
            prev.next.store(next, Ordering::Release);
        }
        debug!("DT evicted slot {} from bucket {}", idx, bucket);
        idx
    }

    /// Overwrites the forwarding fields of an existing slot.
    pub fn set_forwarding_info(&self, id: DtSlotId, fwd: &DtForward) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = self.slots.get(id.0 as usize) {
            slot.publish(Some(fwd));
        }
    }

    /// Drops every entry for destination `dst`, on any ingress port.
    pub fn invalidate_addr(&self, dst: Ipv4Addr) -> usize {
        let arena = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let dst = u32::from(dst);
        let mut count = 0;
        for slot in &self.slots[..arena.next_free as usize] {
            if slot.flags.load(Ordering::Relaxed) & FLAG_VALID != 0
                && slot.dst.load(Ordering::Relaxed) == dst
            {
                slot.flags.store(0, Ordering::Release);
                count += 1;
            }
        }
        count
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let arena = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        for slot in &self.slots[..arena.next_free as usize] {
            slot.flags.store(0, Ordering::Release);
        }
    }

    /// Number of valid entries.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.flags.load(Ordering::Relaxed) & FLAG_VALID != 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
