use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::cache::level::{CacheLevel, LevelConfig};
use crate::cache::policy::CacheAlgorithm;
use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::common::config::{Timestamp, MIN_LEVEL_BYTES};
use crate::common::errors::CacheError;
use crate::common::time::now_micros;

/// Auto-tune configuration: a proportional controller over the per-level
/// byte budgets, driven by observed hit ratios.
#[derive(Debug, Clone)]
pub struct AutoTuneConfig {
    pub enabled: bool,
    pub target_hit_ratio: f64,
    pub tune_interval: Duration,
    last_tune: Timestamp,
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_hit_ratio: 0.8,
            tune_interval: Duration::from_secs(60),
            last_tune: 0,
        }
    }
}

/// Persistence-related knobs carried by the cache system for its owner; the
/// persistence manager itself does the disk work.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub directory: PathBuf,
    pub enabled: bool,
    pub checkpoint_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            enabled: false,
            checkpoint_interval: Duration::from_secs(300),
        }
    }
}

/// The multi-level cache: an ordered stack of levels, level 0 fastest.
///
/// Locking: the system lock is always acquired before any level lock. Point
/// operations (`get`/`put`/`remove`) take it in read mode and then lock the
/// one level they touch; structural operations (`clear`, `tune`, `set_*`)
/// take it in write mode. Levels are never reordered, and new keys always
/// enter at level 0.
pub struct CacheSystem {
    name: String,
    levels: Vec<Mutex<CacheLevel>>,
    stats: Mutex<CacheStats>,
    auto_tune: Mutex<AutoTuneConfig>,
    persistence: PersistenceConfig,
    system_lock: RwLock<()>,
}

impl CacheSystem {
    /// Builds a cache system from level configurations, which must be
    /// non-empty and numbered contiguously from zero.
    pub fn create(name: &str, configs: &[LevelConfig]) -> Result<Self, CacheError> {
        if configs.is_empty() {
            return Err(CacheError::InvalidConfig(
                "at least one level is required".to_string(),
            ));
        }
        let mut levels = Vec::with_capacity(configs.len());
        for (i, config) in configs.iter().enumerate() {
            if config.level != i {
                return Err(CacheError::InvalidConfig(format!(
                    "level indices must be contiguous from zero, found {} at position {}",
                    config.level, i
                )));
            }
            levels.push(Mutex::new(CacheLevel::new(config)?));
        }
        info!("cache system '{}' created with {} levels", name, levels.len());
        Ok(Self {
            name: name.to_string(),
            levels,
            stats: Mutex::new(CacheStats::default()),
            auto_tune: Mutex::new(AutoTuneConfig::default()),
            persistence: PersistenceConfig::default(),
            system_lock: RwLock::new(()),
        })
    }

    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn get_persistence_config(&self) -> &PersistenceConfig {
        &self.persistence
    }

    /// Scans the levels in order and returns the first hit. Access metadata
    /// is updated; the entry stays at its level and (by default) in its list
    /// position.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let now = now_micros();
        let result = {
            let _guard = self.system_lock.read();
            let mut found = None;
            for level in &self.levels {
                if let Some(value) = level.lock().get(key, now) {
                    found = Some(value);
                    break;
                }
            }
            let mut stats = self.stats.lock();
            if found.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
            found
        };
        self.maybe_tune(now);
        result
    }

    /// Updates the key in place wherever it lives, or inserts it at level 0,
    /// evicting until the level fits. A fully pinned level is tolerated: the
    /// insert proceeds over capacity rather than failing the write.
    pub fn put(&self, key: &[u8], value: &[u8], pin: bool) -> Result<(), CacheError> {
        let now = now_micros();
        {
            let _guard = self.system_lock.read();
            let mut updated = false;
            for level in &self.levels {
                if level.lock().update_in_place(key, value)? {
                    updated = true;
                    break;
                }
            }
            if !updated {
                self.levels[0].lock().insert(key, value, pin, now)?;
            }
            self.stats.lock().writes += 1;
        }
        self.maybe_tune(now);
        Ok(())
    }

    /// Removes the key from whichever level holds it.
    pub fn remove(&self, key: &[u8]) -> Result<(), CacheError> {
        let _guard = self.system_lock.read();
        for level in &self.levels {
            let mut level = level.lock();
            if level.contains(key) {
                level.remove(key)?;
                self.stats.lock().removes += 1;
                return Ok(());
            }
        }
        Err(CacheError::NotFound)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let _guard = self.system_lock.read();
        self.levels.iter().any(|level| level.lock().contains(key))
    }

    /// Pins or unpins a resident key.
    pub fn pin(&self, key: &[u8], pinned: bool) -> Result<(), CacheError> {
        let _guard = self.system_lock.read();
        for level in &self.levels {
            let mut level = level.lock();
            if level.contains(key) {
                return level.pin(key, pinned);
            }
        }
        Err(CacheError::NotFound)
    }

    /// Empties every level. Statistics counters survive; sizes reset.
    pub fn clear(&self) {
        let _guard = self.system_lock.write();
        for level in &self.levels {
            level.lock().clear();
        }
        debug!("cache system '{}' cleared", self.name);
    }

    pub fn entry_count(&self) -> usize {
        let _guard = self.system_lock.read();
        self.levels.iter().map(|level| level.lock().entry_count()).sum()
    }

    /// One proportional tuning pass: a level below its target hit ratio
    /// grows its byte budget by 10%; one comfortably above (target + 0.05)
    /// shrinks by 5%, floored at `MIN_LEVEL_BYTES` and never below current
    /// usage.
    pub fn tune(&self) {
        let _guard = self.system_lock.write();
        let global_target = self.auto_tune.lock().target_hit_ratio;
        for slot in &self.levels {
            let mut level = slot.lock();
            let stats = level.get_stats();
            if stats.hits + stats.misses == 0 {
                continue;
            }
            let target = if level.get_hit_ratio_threshold() > 0.0 {
                level.get_hit_ratio_threshold()
            } else {
                global_target
            };
            let ratio = stats.hit_ratio();
            let max_bytes = level.get_max_bytes();
            if ratio < target {
                let grown = max_bytes + max_bytes / 10;
                debug!(
                    "tune: level {} ratio {:.3} < {:.3}, {} -> {} bytes",
                    level.get_level(),
                    ratio,
                    target,
                    max_bytes,
                    grown
                );
                level.set_max_bytes(grown);
            } else if ratio > target + 0.05 {
                let floor = MIN_LEVEL_BYTES.max(level.current_bytes());
                let shrunk = (max_bytes - max_bytes / 20).max(floor);
                debug!(
                    "tune: level {} ratio {:.3} > {:.3}, {} -> {} bytes",
                    level.get_level(),
                    ratio,
                    target,
                    max_bytes,
                    shrunk
                );
                level.set_max_bytes(shrunk);
            }
        }
        self.auto_tune.lock().last_tune = now_micros();
    }

    /// Switches a level's eviction algorithm; resident entries survive.
    pub fn set_algorithm(&self, level_idx: usize, algorithm: CacheAlgorithm) -> Result<(), CacheError> {
        let _guard = self.system_lock.write();
        let level = self
            .levels
            .get(level_idx)
            .ok_or(CacheError::InvalidLevel(level_idx))?;
        level.lock().set_algorithm(algorithm);
        Ok(())
    }

    /// Resizes a level's byte budget, evicting down if needed.
    pub fn set_size(&self, level_idx: usize, max_bytes: u64) -> Result<(), CacheError> {
        if max_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "level size must be nonzero".to_string(),
            ));
        }
        let _guard = self.system_lock.write();
        let level = self
            .levels
            .get(level_idx)
            .ok_or(CacheError::InvalidLevel(level_idx))?;
        level.lock().set_max_bytes(max_bytes);
        Ok(())
    }

    pub fn set_auto_tune(&self, enabled: bool, target_hit_ratio: f64) -> Result<(), CacheError> {
        if !(0.0..=1.0).contains(&target_hit_ratio) {
            return Err(CacheError::InvalidConfig(format!(
                "target hit ratio {} out of range",
                target_hit_ratio
            )));
        }
        let mut auto_tune = self.auto_tune.lock();
        auto_tune.enabled = enabled;
        auto_tune.target_hit_ratio = target_hit_ratio;
        Ok(())
    }

    pub fn set_tune_interval(&self, interval: Duration) {
        self.auto_tune.lock().tune_interval = interval;
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        let _guard = self.system_lock.read();
        StatsSnapshot {
            global: *self.stats.lock(),
            levels: self.levels.iter().map(|level| level.lock().snapshot()).collect(),
        }
    }

    /// Runs a tuning pass when auto-tune is enabled and the interval has
    /// elapsed. Called from the hot path after the point-operation guard is
    /// released.
    fn maybe_tune(&self, now: Timestamp) {
        let due = {
            let auto_tune = self.auto_tune.lock();
            auto_tune.enabled
                && now.saturating_sub(auto_tune.last_tune)
                    >= auto_tune.tune_interval.as_micros() as u64
        };
        if due {
            self.tune();
        }
    }
}
