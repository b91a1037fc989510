//! Duplicate rejection for compile-time pattern intake.
//!
//! A Robin-Hood open-addressed hash set over owned byte buffers. Every
//! pattern the compiler accepts, long or short, passes through one of these
//! sets exactly once; there is no other duplicate-rejection mechanism.
//!
//! Probing keeps per-entry probe distances and swaps a rich entry forward
//! when it meets a poorer one, which bounds variance on lookups even near
//! the 0.9 load-factor ceiling.

use crate::hashing::fnv1a;

/// Outcome of [`DedupSet::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The buffer was not present and has been recorded.
    Inserted,
    /// An identical buffer was already recorded.
    AlreadyPresent,
}

struct Slot {
    hash: u32,
    dist: u32,
    key: Vec<u8>,
}

/// Open-addressed Robin-Hood set of owned byte strings.
pub struct DedupSet {
    slots: Vec<Option<Slot>>,
    len: usize,
}

const INITIAL_CAPACITY: usize = 1024;

/// Numerator/denominator of the maximum load factor.
const MAX_LOAD_NUM: usize = 9;
const MAX_LOAD_DEN: usize = 10;

impl DedupSet {
    /// Create an empty set.
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.resize_with(INITIAL_CAPACITY, || None);
        DedupSet { slots, len: 0 }
    }

    /// Number of distinct buffers recorded.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Record `buf`, reporting whether it was new.
    pub fn add(&mut self, buf: &[u8]) -> AddOutcome {
        if (self.len + 1) * MAX_LOAD_DEN > self.slots.len() * MAX_LOAD_NUM {
            self.grow();
        }

        let hash = fnv1a(buf);
        let mask = self.slots.len() - 1;
        let mut idx = (hash as usize) & mask;
        let mut dist = 0u32;

        loop {
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some(Slot {
                        hash,
                        dist,
                        key: buf.to_vec(),
                    });
                    self.len += 1;
                    return AddOutcome::Inserted;
                }
                Some(slot) => {
                    if slot.hash == hash && slot.key == buf {
                        return AddOutcome::AlreadyPresent;
                    }
                    if slot.dist < dist {
                        // Robin-Hood displacement: the entry closer to home
                        // moves on, the poorer probe stays here.
                        let displaced = self.slots[idx]
                            .replace(Slot {
                                hash,
                                dist,
                                key: buf.to_vec(),
                            })
                            .unwrap();
                        self.insert_displaced(displaced, idx, mask);
                        self.len += 1;
                        return AddOutcome::Inserted;
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
        }
    }

    /// Re-insert an entry displaced by a Robin-Hood swap, starting just past
    /// the slot it was evicted from.
    fn insert_displaced(&mut self, mut entry: Slot, from: usize, mask: usize) {
        let mut idx = (from + 1) & mask;
        entry.dist += 1;
        loop {
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some(entry);
                    return;
                }
                Some(slot) => {
                    if slot.dist < entry.dist {
                        entry = self.slots[idx].replace(entry).unwrap();
                    }
                }
            }
            idx = (idx + 1) & mask;
            entry.dist += 1;
        }
    }

    fn grow(&mut self) {
        let new_cap = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, {
            let mut v = Vec::new();
            v.resize_with(new_cap, || None);
            v
        });
        self.len = 0;
        let mask = new_cap - 1;
        for slot in old.into_iter().flatten() {
            self.reinsert(slot.hash, slot.key, mask);
        }
    }

    /// Rehash path used during growth; keys are known-unique here.
    fn reinsert(&mut self, hash: u32, key: Vec<u8>, mask: usize) {
        let mut entry = Slot { hash, dist: 0, key };
        let mut idx = (hash as usize) & mask;
        loop {
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some(entry);
                    self.len += 1;
                    return;
                }
                Some(slot) => {
                    if slot.dist < entry.dist {
                        entry = self.slots[idx].replace(entry).unwrap();
                    }
                }
            }
            idx = (idx + 1) & mask;
            entry.dist += 1;
        }
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new()
    }
}
