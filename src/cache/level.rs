use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use log::{error, warn};
use memmap2::Mmap;
use parking_lot::Mutex;

use crate::cache::arena::EntryArena;
use crate::cache::entry::{CacheEntry, ValueSlot};
use crate::cache::policy::{CacheAlgorithm, EvictionState};
use crate::cache::stats::{LevelSnapshot, LevelStats};
use crate::common::config::{Timestamp, DEFAULT_AURA_ALPHA, DEFAULT_WRITE_BUFFER_SIZE};
use crate::common::errors::CacheError;

/// Backing store of a level: values inline in memory, or appended to a value
/// file under a directory.
#[derive(Debug, Clone)]
pub enum LevelStorage {
    Memory,
    Disk { dir: PathBuf },
}

/// Configuration of one cache level.
#[derive(Debug, Clone)]
pub struct LevelConfig {
    pub level: usize,
    pub max_bytes: u64,
    pub max_entries: usize,
    pub algorithm: CacheAlgorithm,
    pub storage: LevelStorage,
    /// Per-level tune target. Zero means "use the system-wide target".
    pub hit_ratio_threshold: f64,
    pub write_buffer_size: usize,
    /// LRU only: splice entries to the list head on hit. Off by default;
    /// a plain `get` then updates metadata without restructuring the list.
    pub reorder_on_hit: bool,
    /// AURA only: exploration/exploitation weight.
    pub alpha: f64,
}

impl LevelConfig {
    pub fn memory(level: usize, max_bytes: u64, max_entries: usize, algorithm: CacheAlgorithm) -> Self {
        Self {
            level,
            max_bytes,
            max_entries,
            algorithm,
            storage: LevelStorage::Memory,
            hit_ratio_threshold: 0.0,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            reorder_on_hit: false,
            alpha: DEFAULT_AURA_ALPHA,
        }
    }

    pub fn disk(
        level: usize,
        max_bytes: u64,
        max_entries: usize,
        algorithm: CacheAlgorithm,
        dir: PathBuf,
    ) -> Self {
        Self {
            storage: LevelStorage::Disk { dir },
            ..Self::memory(level, max_bytes, max_entries, algorithm)
        }
    }
}

/// Append-only value file of a disk-backed level. Writes buffer in memory
/// and flush to the file once the buffer fills; reads hit the mapping for
/// flushed bytes and the buffer for the unflushed tail. Space held by
/// evicted values is reclaimed only by `clear`.
#[derive(Debug)]
struct DiskBacking {
    path: PathBuf,
    file: File,
    map: Option<Mmap>,
    file_len: u64,
    buffer: Vec<u8>,
    buffer_cap: usize,
}

impl DiskBacking {
    fn open(dir: &PathBuf, level: usize, buffer_cap: usize) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("level_{}.val", level));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        log::debug!("level {} value file at {}", level, path.display());
        Ok(Self {
            path,
            file,
            map: None,
            file_len: 0,
            buffer: Vec::with_capacity(buffer_cap),
            buffer_cap: buffer_cap.max(1),
        })
    }

    /// Appends `bytes`, returning the logical (offset, len) slot.
    fn append(&mut self, bytes: &[u8]) -> Result<(u64, u32), CacheError> {
        let offset = self.file_len + self.buffer.len() as u64;
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= self.buffer_cap {
            self.flush()?;
        }
        Ok((offset, bytes.len() as u32))
    }

    fn read(&self, offset: u64, len: u32) -> Result<Vec<u8>, CacheError> {
        let len = len as usize;
        if offset >= self.file_len {
            let start = (offset - self.file_len) as usize;
            let end = start + len;
            if end > self.buffer.len() {
                return Err(CacheError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("value slot {}..{} past buffer end", offset, end),
                )));
            }
            return Ok(self.buffer[start..end].to_vec());
        }
        let map = self.map.as_ref().ok_or_else(|| {
            CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "value file not mapped",
            ))
        })?;
        let start = offset as usize;
        let end = start + len;
        if end > map.len() {
            return Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("value slot {}..{} past mapping end", start, end),
            )));
        }
        Ok(map[start..end].to_vec())
    }

    /// Writes the buffered tail to the file and refreshes the read mapping.
    fn flush(&mut self) -> Result<(), CacheError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.buffer)?;
        self.file.flush()?;
        self.file_len += self.buffer.len() as u64;
        self.buffer.clear();
        // SAFETY: the file is owned by this level and only appended to under
        // the level lock, so the mapped range is never mutated.
        self.map = Some(unsafe { Mmap::map(&self.file)? });
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.map = None;
        self.buffer.clear();
        self.file.set_len(0)?;
        self.file_len = 0;
        Ok(())
    }
}

/// One capacity-bounded tier of the multi-level cache.
pub struct CacheLevel {
    level: usize,
    max_bytes: u64,
    max_entries: usize,
    hit_ratio_threshold: f64,
    arena: EntryArena,
    policy: EvictionState,
    stats: Mutex<LevelStats>,
    disk: Option<DiskBacking>,
    reorder_on_hit: bool,
    alpha: f64,
}

impl CacheLevel {
    pub fn new(config: &LevelConfig) -> Result<Self, CacheError> {
        if config.max_bytes == 0 || config.max_entries == 0 {
            return Err(CacheError::InvalidConfig(format!(
                "level {} has zero capacity",
                config.level
            )));
        }
        if !(0.0..=1.0).contains(&config.hit_ratio_threshold) {
            return Err(CacheError::InvalidConfig(format!(
                "level {} hit ratio threshold {} out of range",
                config.level, config.hit_ratio_threshold
            )));
        }
        let disk = match &config.storage {
            LevelStorage::Memory => None,
            LevelStorage::Disk { dir } => Some(DiskBacking::open(
                dir,
                config.level,
                config.write_buffer_size,
            )?),
        };
        Ok(Self {
            level: config.level,
            max_bytes: config.max_bytes,
            max_entries: config.max_entries,
            hit_ratio_threshold: config.hit_ratio_threshold,
            arena: EntryArena::new(),
            policy: EvictionState::build(
                config.algorithm,
                config.max_entries,
                config.reorder_on_hit,
                config.alpha,
            ),
            stats: Mutex::new(LevelStats::default()),
            disk,
            reorder_on_hit: config.reorder_on_hit,
            alpha: config.alpha,
        })
    }

    pub fn get_level(&self) -> usize {
        self.level
    }

    pub fn get_algorithm(&self) -> CacheAlgorithm {
        self.policy.algorithm()
    }

    pub fn get_max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn get_max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn get_hit_ratio_threshold(&self) -> f64 {
        self.hit_ratio_threshold
    }

    pub fn entry_count(&self) -> usize {
        self.arena.len()
    }

    pub fn current_bytes(&self) -> u64 {
        self.arena.current_bytes()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.arena.contains(key)
    }

    pub fn get_stats(&self) -> LevelStats {
        *self.stats.lock()
    }

    pub fn snapshot(&self) -> LevelSnapshot {
        LevelSnapshot {
            level: self.level,
            entry_count: self.arena.len(),
            current_bytes: self.arena.current_bytes(),
            max_bytes: self.max_bytes,
            max_entries: self.max_entries,
            stats: self.get_stats(),
        }
    }

    /// Looks a key up, records the hit/miss, and updates access metadata and
    /// policy bookkeeping on a hit. Does not move the entry between levels
    /// or (by default) within the LRU order.
    pub fn get(&mut self, key: &[u8], now: Timestamp) -> Option<Vec<u8>> {
        let idx = match self.arena.index_of(key) {
            Some(idx) => idx,
            None => {
                self.stats.lock().misses += 1;
                return None;
            }
        };
        let slot = {
            let entry = self.arena.get_mut(idx)?;
            entry.touch(now);
            entry.get_value().clone()
        };
        self.policy.on_access(&mut self.arena, idx);
        let value = match self.read_slot(&slot) {
            Ok(value) => value,
            Err(err) => {
                error!(
                    "level {}: failed to read value for cached key: {}",
                    self.level, err
                );
                self.stats.lock().misses += 1;
                return None;
            }
        };
        self.stats.lock().hits += 1;
        Some(value)
    }

    /// Updates an existing entry in place. Returns false when the key is not
    /// resident in this level.
    pub fn update_in_place(&mut self, key: &[u8], value: &[u8]) -> Result<bool, CacheError> {
        let idx = match self.arena.index_of(key) {
            Some(idx) => idx,
            None => return Ok(false),
        };
        let slot = self.store_value(value)?;
        let (old_charge, new_charge) = {
            let entry = match self.arena.get_mut(idx) {
                Some(entry) => entry,
                None => return Ok(false),
            };
            let old = entry.charge();
            entry.replace_value(slot);
            (old, entry.charge())
        };
        self.arena.recharge(old_charge, new_charge);
        self.stats.lock().writes += 1;
        if new_charge > old_charge {
            self.evict_until_fits(0, 0);
        }
        Ok(true)
    }

    /// Inserts a new key, evicting first until both the byte and entry
    /// budgets fit. When everything evictable is pinned the insert proceeds
    /// over capacity: availability wins over the strict bound.
    pub fn insert(
        &mut self,
        key: &[u8],
        value: &[u8],
        pin: bool,
        now: Timestamp,
    ) -> Result<(), CacheError> {
        let incoming = (key.len() + value.len()) as u64;
        if incoming > self.max_bytes {
            return Err(CacheError::CapacityExceeded {
                size: incoming,
                max: self.max_bytes,
            });
        }
        if !self.evict_until_fits(incoming, 1) {
            warn!(
                "level {}: all entries pinned, inserting over capacity",
                self.level
            );
        }
        let slot = self.store_value(value)?;
        let mut entry = CacheEntry::new(key.to_vec(), slot, self.level, now);
        entry.set_pinned(pin);
        let idx = self.arena.insert(entry);
        self.policy.on_insert(&mut self.arena, idx);
        self.stats.lock().writes += 1;
        Ok(())
    }

    pub fn remove(&mut self, key: &[u8]) -> Result<(), CacheError> {
        let idx = self.arena.index_of(key).ok_or(CacheError::NotFound)?;
        self.policy.on_remove(&mut self.arena, idx);
        self.arena.remove_at(idx);
        Ok(())
    }

    pub fn pin(&mut self, key: &[u8], pinned: bool) -> Result<(), CacheError> {
        let idx = self.arena.index_of(key).ok_or(CacheError::NotFound)?;
        if let Some(entry) = self.arena.get_mut(idx) {
            entry.set_pinned(pinned);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        let indices: Vec<usize> = self.arena.iter().map(|(idx, _)| idx).collect();
        for idx in indices {
            self.policy.on_remove(&mut self.arena, idx);
        }
        self.arena.clear();
        if let Some(disk) = &mut self.disk {
            if let Err(err) = disk.clear() {
                error!("level {}: failed to clear value file: {}", self.level, err);
            }
        }
    }

    /// Shrinks or grows the byte budget, evicting down when shrinking.
    pub fn set_max_bytes(&mut self, max_bytes: u64) {
        self.max_bytes = max_bytes.max(1);
        self.evict_until_fits(0, 0);
    }

    pub(crate) fn set_hit_ratio_threshold(&mut self, threshold: f64) {
        self.hit_ratio_threshold = threshold;
    }

    /// Switches the eviction algorithm at runtime. Resident entries survive;
    /// the policy's bookkeeping is rebuilt from them.
    pub fn set_algorithm(&mut self, algorithm: CacheAlgorithm) {
        // Drop the old list links so the new policy starts from clean state.
        let indices: Vec<usize> = self.arena.iter().map(|(idx, _)| idx).collect();
        for idx in &indices {
            if let Some(entry) = self.arena.get_mut(*idx) {
                entry.prev = None;
                entry.next = None;
            }
        }
        self.policy = EvictionState::build(
            algorithm,
            self.max_entries,
            self.reorder_on_hit,
            self.alpha,
        );
        self.policy.rebuild(&mut self.arena);
    }

    /// Evicts until `incoming` extra bytes and `incoming_count` extra entries
    /// fit. Returns false if it gave up because every candidate was pinned.
    fn evict_until_fits(&mut self, incoming: u64, incoming_count: usize) -> bool {
        while self.arena.current_bytes() + incoming > self.max_bytes
            || self.arena.len() + incoming_count > self.max_entries
        {
            if self.arena.is_empty() {
                break;
            }
            match self.policy.evict(&mut self.arena) {
                Ok(idx) => {
                    self.arena.remove_at(idx);
                    self.stats.lock().evictions += 1;
                }
                Err(_) => return false,
            }
        }
        true
    }

    fn store_value(&mut self, value: &[u8]) -> Result<ValueSlot, CacheError> {
        match &mut self.disk {
            None => Ok(ValueSlot::Inline(value.to_vec())),
            Some(disk) => {
                let (offset, len) = disk.append(value)?;
                Ok(ValueSlot::OnDisk { offset, len })
            }
        }
    }

    fn read_slot(&self, slot: &ValueSlot) -> Result<Vec<u8>, CacheError> {
        match slot {
            ValueSlot::Inline(bytes) => Ok(bytes.clone()),
            ValueSlot::OnDisk { offset, len } => match &self.disk {
                Some(disk) => disk.read(*offset, *len),
                None => Err(CacheError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "on-disk slot in a memory level",
                ))),
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn disk_path(&self) -> Option<&std::path::Path> {
        self.disk.as_ref().map(|d| d.path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_level(max_bytes: u64, max_entries: usize) -> CacheLevel {
        CacheLevel::new(&LevelConfig::memory(
            0,
            max_bytes,
            max_entries,
            CacheAlgorithm::Lru,
        ))
        .unwrap()
    }

    #[test]
    fn test_capacity_invariant_by_entries() {
        let mut level = memory_level(1 << 20, 2);
        level.insert(b"a", b"1", false, 1).unwrap();
        level.insert(b"b", b"2", false, 2).unwrap();
        level.insert(b"c", b"3", false, 3).unwrap();
        assert_eq!(level.entry_count(), 2);
        assert!(!level.contains(b"a"));
        assert!(level.contains(b"b"));
        assert!(level.contains(b"c"));
        assert_eq!(level.get_stats().evictions, 1);
    }

    #[test]
    fn test_capacity_invariant_by_bytes() {
        let mut level = memory_level(10, 100);
        level.insert(b"a", b"1234", false, 1).unwrap(); // 5 bytes
        level.insert(b"b", b"1234", false, 2).unwrap(); // 5 bytes
        level.insert(b"c", b"1234", false, 3).unwrap(); // forces one out
        assert!(level.current_bytes() <= 10);
        assert_eq!(level.entry_count(), 2);
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut level = memory_level(8, 10);
        let err = level.insert(b"key", b"way too big", false, 1).unwrap_err();
        assert!(matches!(err, CacheError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_pinned_entries_survive_pressure() {
        let mut level = memory_level(1 << 20, 2);
        level.insert(b"a", b"1", true, 1).unwrap();
        level.insert(b"b", b"2", true, 2).unwrap();
        // Everything pinned: the insert proceeds over capacity.
        level.insert(b"c", b"3", false, 3).unwrap();
        assert_eq!(level.entry_count(), 3);
        assert!(level.contains(b"a"));
        assert!(level.contains(b"b"));
    }

    #[test]
    fn test_get_updates_metadata_and_stats() {
        let mut level = memory_level(1 << 20, 8);
        level.insert(b"a", b"value", false, 1).unwrap();
        assert_eq!(level.get(b"a", 5).unwrap(), b"value");
        assert!(level.get(b"missing", 6).is_none());
        let stats = level.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_update_in_place_marks_dirty_and_recharges() {
        let mut level = memory_level(1 << 20, 8);
        level.insert(b"a", b"v1", false, 1).unwrap();
        let before = level.current_bytes();
        assert!(level.update_in_place(b"a", b"longer value").unwrap());
        assert!(level.current_bytes() > before);
        assert!(!level.update_in_place(b"missing", b"x").unwrap());
    }

    #[test]
    fn test_clear_resets_sizes() {
        let mut level = memory_level(1 << 20, 8);
        level.insert(b"a", b"1", false, 1).unwrap();
        level.insert(b"b", b"2", false, 2).unwrap();
        level.clear();
        assert_eq!(level.entry_count(), 0);
        assert_eq!(level.current_bytes(), 0);
    }

    #[test]
    fn test_set_algorithm_keeps_entries() {
        let mut level = memory_level(1 << 20, 8);
        level.insert(b"a", b"1", false, 1).unwrap();
        level.insert(b"b", b"2", false, 2).unwrap();
        level.set_algorithm(CacheAlgorithm::Lfu);
        assert_eq!(level.get_algorithm(), CacheAlgorithm::Lfu);
        assert_eq!(level.entry_count(), 2);
        assert_eq!(level.get(b"a", 3).unwrap(), b"1");
    }

    #[test]
    fn test_shrink_evicts_down() {
        let mut level = memory_level(100, 100);
        for i in 0..10u8 {
            level.insert(&[i], &[0u8; 7], false, i as u64).unwrap(); // 8 bytes each
        }
        level.set_max_bytes(24);
        assert!(level.current_bytes() <= 24);
    }

    #[test]
    fn test_disk_backed_level_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut level = CacheLevel::new(&LevelConfig::disk(
            1,
            1 << 20,
            16,
            CacheAlgorithm::Lru,
            dir.path().to_path_buf(),
        ))
        .unwrap();
        level.insert(b"k1", b"disk value one", false, 1).unwrap();
        level.insert(b"k2", b"disk value two", false, 2).unwrap();
        assert_eq!(level.get(b"k1", 3).unwrap(), b"disk value one");
        assert_eq!(level.get(b"k2", 4).unwrap(), b"disk value two");
        assert!(level.disk_path().unwrap().exists());
    }

    #[test]
    fn test_disk_backed_read_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LevelConfig::disk(
            1,
            1 << 20,
            64,
            CacheAlgorithm::Lru,
            dir.path().to_path_buf(),
        );
        config.write_buffer_size = 8; // force a flush on nearly every write
        let mut level = CacheLevel::new(&config).unwrap();
        for i in 0..20u8 {
            level.insert(&[i], &[i; 16], false, i as u64).unwrap();
        }
        for i in 0..20u8 {
            assert_eq!(level.get(&[i], 100).unwrap(), vec![i; 16]);
        }
    }
}
