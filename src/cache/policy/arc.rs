use std::collections::VecDeque;

use log::trace;

use crate::cache::arena::EntryArena;
use crate::common::errors::EvictionError;

/// Adaptive Replacement Cache policy state.
///
/// Four lists in LRU order (front = least recent): T1 holds keys seen once,
/// T2 keys seen more than once, B1/B2 their ghost histories of evicted keys.
/// The split point `p` is the adaptive target size of T1: a hit in B1 means
/// recency is winning and grows `p`; a hit in B2 means frequency is winning
/// and shrinks it. Eviction follows REPLACE(p): take the LRU of T1 when T1
/// exceeds `p` (or matches it right after a B2 ghost hit), otherwise the LRU
/// of T2, and record the victim in the matching ghost list.
#[derive(Debug)]
pub struct ArcState {
    capacity: usize,
    p: usize,
    t1: VecDeque<Vec<u8>>,
    t2: VecDeque<Vec<u8>>,
    b1: VecDeque<Vec<u8>>,
    b2: VecDeque<Vec<u8>>,
    last_miss_in_b2: bool,
}

fn deque_remove(deque: &mut VecDeque<Vec<u8>>, key: &[u8]) -> bool {
    if let Some(pos) = deque.iter().position(|k| k == key) {
        deque.remove(pos);
        true
    } else {
        false
    }
}

/// Adaptation step: at least 1, scaled by the relative ghost sizes.
fn delta(numerator: usize, denominator: usize) -> usize {
    (numerator / denominator.max(1)).max(1)
}

impl ArcState {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            p: 0,
            t1: VecDeque::new(),
            t2: VecDeque::new(),
            b1: VecDeque::new(),
            b2: VecDeque::new(),
            last_miss_in_b2: false,
        }
    }

    pub fn on_insert(&mut self, arena: &mut EntryArena, idx: usize) {
        let key = match arena.get(idx) {
            Some(entry) => entry.get_key().to_vec(),
            None => return,
        };
        if deque_remove(&mut self.b1, &key) {
            // Recency ghost hit: grow the T1 target.
            self.p = (self.p + delta(self.b2.len(), self.b1.len())).min(self.capacity);
            trace!("arc: b1 hit, p -> {}", self.p);
            self.t2.push_back(key);
        } else if deque_remove(&mut self.b2, &key) {
            // Frequency ghost hit: shrink the T1 target.
            self.p = self.p.saturating_sub(delta(self.b1.len(), self.b2.len()));
            trace!("arc: b2 hit, p -> {}", self.p);
            self.last_miss_in_b2 = true;
            self.t2.push_back(key);
        } else {
            self.t1.push_back(key);
        }
    }

    pub fn on_access(&mut self, arena: &mut EntryArena, idx: usize) {
        let key = match arena.get(idx) {
            Some(entry) => entry.get_key().to_vec(),
            None => return,
        };
        if deque_remove(&mut self.t1, &key) || deque_remove(&mut self.t2, &key) {
            self.t2.push_back(key);
        }
    }

    pub fn on_remove(&mut self, arena: &mut EntryArena, idx: usize) {
        if let Some(entry) = arena.get(idx) {
            let key = entry.get_key().to_vec();
            deque_remove(&mut self.t1, &key);
            deque_remove(&mut self.t2, &key);
        }
    }

    pub fn evict(&mut self, arena: &mut EntryArena) -> Result<usize, EvictionError> {
        let prefer_t1 = !self.t1.is_empty()
            && (self.t1.len() > self.p || (self.last_miss_in_b2 && self.t1.len() == self.p));
        let order = if prefer_t1 { [true, false] } else { [false, true] };
        for from_t1 in order {
            if let Some(idx) = self.evict_from_region(arena, from_t1) {
                self.last_miss_in_b2 = false;
                return Ok(idx);
            }
        }
        Err(EvictionError::NoEvictableEntry)
    }

    /// Scans one live region from its LRU end for an unpinned resident key;
    /// moves the victim's key to the matching ghost list.
    fn evict_from_region(&mut self, arena: &mut EntryArena, from_t1: bool) -> Option<usize> {
        let region = if from_t1 { &mut self.t1 } else { &mut self.t2 };
        let mut pos = 0;
        while pos < region.len() {
            let key = &region[pos];
            match arena.index_of(key) {
                Some(idx) => {
                    let pinned = arena.get(idx).map(|e| e.is_pinned()).unwrap_or(true);
                    if pinned {
                        pos += 1;
                        continue;
                    }
                    let key = region.remove(pos).unwrap_or_default();
                    let ghost = if from_t1 { &mut self.b1 } else { &mut self.b2 };
                    ghost.push_back(key);
                    while ghost.len() > self.capacity {
                        ghost.pop_front();
                    }
                    return Some(idx);
                }
                None => {
                    // Stale key, drop it and keep scanning.
                    region.remove(pos);
                }
            }
        }
        None
    }
}
