use std::collections::{HashMap, VecDeque};

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::cache::arena::EntryArena;
use crate::common::config::TINY_LFU_WINDOW_FRACTION;
use crate::common::errors::EvictionError;

const SKETCH_ROWS: usize = 4;
const ROW_SEEDS: [u64; SKETCH_ROWS] = [
    0x9e37_79b9_7f4a_7c15,
    0xbf58_476d_1ce4_e5b9,
    0x94d0_49bb_1331_11eb,
    0x2545_f491_4f6c_dd1d,
];

/// Count-min style frequency sketch: four rows of saturating u8 counters,
/// each indexed by an independently seeded xxh3 hash. Estimates are the
/// row minimum; all counters are halved once the increment budget is spent,
/// so stale popularity decays.
#[derive(Debug)]
pub struct FrequencySketch {
    rows: Vec<Vec<u8>>,
    mask: usize,
    increments: u64,
    sample_size: u64,
}

impl FrequencySketch {
    pub fn new(capacity: usize) -> Self {
        let width = (capacity.max(8) * 8).next_power_of_two();
        Self {
            rows: vec![vec![0u8; width]; SKETCH_ROWS],
            mask: width - 1,
            increments: 0,
            sample_size: (capacity.max(1) as u64) * 16,
        }
    }

    pub fn increment(&mut self, key: &[u8]) {
        for (row, seed) in self.rows.iter_mut().zip(ROW_SEEDS) {
            let slot = (xxh3_64_with_seed(key, seed) as usize) & self.mask;
            if row[slot] < u8::MAX {
                row[slot] += 1;
            }
        }
        self.increments += 1;
        if self.increments >= self.sample_size {
            self.decay();
        }
    }

    pub fn estimate(&self, key: &[u8]) -> u8 {
        self.rows
            .iter()
            .zip(ROW_SEEDS)
            .map(|(row, seed)| row[(xxh3_64_with_seed(key, seed) as usize) & self.mask])
            .min()
            .unwrap_or(0)
    }

    fn decay(&mut self) {
        for row in &mut self.rows {
            for counter in row.iter_mut() {
                *counter >>= 1;
            }
        }
        self.increments = 0;
    }
}

/// W-TinyLFU policy state: a small recency window for newly admitted keys,
/// a main segment, and the frequency sketch that guides main-segment
/// eviction. Keys age out of the window into main in FIFO order; eviction
/// drains the window first and falls back to the coldest main key by sketch
/// estimate.
#[derive(Debug)]
pub struct TinyLfuState {
    window: VecDeque<Vec<u8>>,
    window_cap: usize,
    /// Main segment, key -> admission stamp (older stamp loses frequency ties).
    main: HashMap<Vec<u8>, u64>,
    admission_clock: u64,
    sketch: FrequencySketch,
}

impl TinyLfuState {
    pub fn new(max_entries: usize) -> Self {
        Self {
            window: VecDeque::new(),
            window_cap: (max_entries / TINY_LFU_WINDOW_FRACTION).max(1),
            main: HashMap::new(),
            admission_clock: 0,
            sketch: FrequencySketch::new(max_entries),
        }
    }

    pub fn on_insert(&mut self, arena: &mut EntryArena, idx: usize) {
        let key = match arena.get(idx) {
            Some(entry) => entry.get_key().to_vec(),
            None => return,
        };
        self.sketch.increment(&key);
        self.window.push_back(key);
        if self.window.len() > self.window_cap {
            if let Some(aged) = self.window.pop_front() {
                self.admission_clock += 1;
                self.main.insert(aged, self.admission_clock);
            }
        }
    }

    pub fn on_access(&mut self, arena: &mut EntryArena, idx: usize) {
        if let Some(entry) = arena.get(idx) {
            self.sketch.increment(entry.get_key());
        }
    }

    pub fn on_remove(&mut self, arena: &mut EntryArena, idx: usize) {
        if let Some(entry) = arena.get(idx) {
            let key = entry.get_key().to_vec();
            if let Some(pos) = self.window.iter().position(|k| *k == key) {
                self.window.remove(pos);
            }
            self.main.remove(&key);
        }
    }

    pub fn evict(&mut self, arena: &mut EntryArena) -> Result<usize, EvictionError> {
        // Window first: newly admitted keys are the cheapest to drop.
        let mut pos = 0;
        while pos < self.window.len() {
            match arena.index_of(&self.window[pos]) {
                Some(idx) => {
                    let pinned = arena.get(idx).map(|e| e.is_pinned()).unwrap_or(true);
                    if pinned {
                        pos += 1;
                        continue;
                    }
                    self.window.remove(pos);
                    return Ok(idx);
                }
                None => {
                    self.window.remove(pos);
                }
            }
        }

        // Main segment: coldest sketch estimate among unpinned keys.
        let mut victim: Option<(Vec<u8>, usize, u8, u64)> = None;
        let mut stale: Vec<Vec<u8>> = Vec::new();
        for (key, &stamp) in &self.main {
            let idx = match arena.index_of(key) {
                Some(idx) => idx,
                None => {
                    stale.push(key.clone());
                    continue;
                }
            };
            if arena.get(idx).map(|e| e.is_pinned()).unwrap_or(true) {
                continue;
            }
            let estimate = self.sketch.estimate(key);
            let better = match &victim {
                Some((_, _, best_est, best_stamp)) => {
                    estimate < *best_est || (estimate == *best_est && stamp < *best_stamp)
                }
                None => true,
            };
            if better {
                victim = Some((key.clone(), idx, estimate, stamp));
            }
        }
        for key in stale {
            self.main.remove(&key);
        }
        match victim {
            Some((key, idx, _, _)) => {
                self.main.remove(&key);
                Ok(idx)
            }
            None => Err(EvictionError::NoEvictableEntry),
        }
    }
}
