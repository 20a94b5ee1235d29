//! Eviction policies.
//!
//! Each cache level owns exactly one policy state, selected at creation time
//! and represented as one variant of [`EvictionState`]. The level calls the
//! hooks on every structural event; `evict` picks a victim slot and updates
//! the policy's own bookkeeping, leaving the arena removal to the level.

use std::fmt;

use crate::cache::arena::EntryArena;
use crate::common::errors::EvictionError;

pub mod arc;
pub mod aura;
pub mod lfu;
pub mod lru;
pub mod tiny_lfu;

pub use arc::ArcState;
pub use aura::AuraState;
pub use lfu::LfuState;
pub use lru::LruState;
pub use tiny_lfu::TinyLfuState;

/// The eviction algorithm of a cache level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAlgorithm {
    Lru,
    Lfu,
    Arc,
    WTinyLfu,
    Aura,
}

impl fmt::Display for CacheAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheAlgorithm::Lru => "lru",
            CacheAlgorithm::Lfu => "lfu",
            CacheAlgorithm::Arc => "arc",
            CacheAlgorithm::WTinyLfu => "w-tinylfu",
            CacheAlgorithm::Aura => "aura",
        };
        write!(f, "{}", name)
    }
}

/// Per-algorithm auxiliary state, one variant per policy.
#[derive(Debug)]
pub enum EvictionState {
    Lru(LruState),
    Lfu(LfuState),
    Arc(ArcState),
    WTinyLfu(TinyLfuState),
    Aura(AuraState),
}

impl EvictionState {
    /// Builds the state for `algorithm`. `max_entries` bounds the adaptive
    /// structures (ARC ghosts, TinyLFU sketch width).
    pub fn build(
        algorithm: CacheAlgorithm,
        max_entries: usize,
        reorder_on_hit: bool,
        alpha: f64,
    ) -> Self {
        match algorithm {
            CacheAlgorithm::Lru => EvictionState::Lru(LruState::new(reorder_on_hit)),
            CacheAlgorithm::Lfu => EvictionState::Lfu(LfuState::new()),
            CacheAlgorithm::Arc => EvictionState::Arc(ArcState::new(max_entries)),
            CacheAlgorithm::WTinyLfu => EvictionState::WTinyLfu(TinyLfuState::new(max_entries)),
            CacheAlgorithm::Aura => EvictionState::Aura(AuraState::new(alpha)),
        }
    }

    pub fn algorithm(&self) -> CacheAlgorithm {
        match self {
            EvictionState::Lru(_) => CacheAlgorithm::Lru,
            EvictionState::Lfu(_) => CacheAlgorithm::Lfu,
            EvictionState::Arc(_) => CacheAlgorithm::Arc,
            EvictionState::WTinyLfu(_) => CacheAlgorithm::WTinyLfu,
            EvictionState::Aura(_) => CacheAlgorithm::Aura,
        }
    }

    /// Hook: the entry at `idx` was just inserted into the arena.
    pub fn on_insert(&mut self, arena: &mut EntryArena, idx: usize) {
        match self {
            EvictionState::Lru(state) => state.on_insert(arena, idx),
            EvictionState::Lfu(_) => {}
            EvictionState::Arc(state) => state.on_insert(arena, idx),
            EvictionState::WTinyLfu(state) => state.on_insert(arena, idx),
            EvictionState::Aura(state) => state.on_insert(arena, idx),
        }
    }

    /// Hook: the entry at `idx` was hit by a lookup.
    pub fn on_access(&mut self, arena: &mut EntryArena, idx: usize) {
        match self {
            EvictionState::Lru(state) => state.on_access(arena, idx),
            EvictionState::Lfu(_) => {}
            EvictionState::Arc(state) => state.on_access(arena, idx),
            EvictionState::WTinyLfu(state) => state.on_access(arena, idx),
            EvictionState::Aura(state) => state.on_access(arena, idx),
        }
    }

    /// Hook: the entry at `idx` is about to be removed explicitly (remove or
    /// clear, not eviction).
    pub fn on_remove(&mut self, arena: &mut EntryArena, idx: usize) {
        match self {
            EvictionState::Lru(state) => state.on_remove(arena, idx),
            EvictionState::Lfu(_) => {}
            EvictionState::Arc(state) => state.on_remove(arena, idx),
            EvictionState::WTinyLfu(state) => state.on_remove(arena, idx),
            EvictionState::Aura(state) => state.on_remove(arena, idx),
        }
    }

    /// Selects a victim slot, updating the policy's bookkeeping for it.
    /// Fails only when every candidate is pinned.
    pub fn evict(&mut self, arena: &mut EntryArena) -> Result<usize, EvictionError> {
        match self {
            EvictionState::Lru(state) => state.evict(arena),
            EvictionState::Lfu(state) => state.evict(arena),
            EvictionState::Arc(state) => state.evict(arena),
            EvictionState::WTinyLfu(state) => state.evict(arena),
            EvictionState::Aura(state) => state.evict(arena),
        }
    }

    /// Re-seeds the policy from the arena's resident entries. Used when a
    /// level switches algorithms at runtime: entries survive, bookkeeping is
    /// rebuilt.
    pub fn rebuild(&mut self, arena: &mut EntryArena) {
        let indices: Vec<usize> = arena.iter().map(|(idx, _)| idx).collect();
        for idx in indices {
            self.on_insert(arena, idx);
        }
    }
}
