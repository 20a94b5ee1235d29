use crate::cache::arena::EntryArena;
use crate::common::errors::EvictionError;

/// LFU policy. Carries no auxiliary structures: the smoothed access
/// frequency lives on the entries themselves, and eviction is a linear scan
/// for the minimum among unpinned entries.
///
/// Ties are broken by first-found in slot order. That is stable but not
/// FIFO-fair: a cold entry in a low slot shields equally-cold entries in
/// higher slots. Known weakness, kept as-is.
#[derive(Debug, Default)]
pub struct LfuState;

impl LfuState {
    pub fn new() -> Self {
        Self
    }

    pub fn evict(&mut self, arena: &mut EntryArena) -> Result<usize, EvictionError> {
        let mut victim: Option<(usize, f64)> = None;
        for (idx, entry) in arena.iter() {
            if entry.is_pinned() {
                continue;
            }
            let freq = entry.get_access_frequency();
            match victim {
                Some((_, best)) if freq >= best => {}
                _ => victim = Some((idx, freq)),
            }
        }
        victim.map(|(idx, _)| idx).ok_or(EvictionError::NoEvictableEntry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{CacheEntry, ValueSlot};

    fn insert(arena: &mut EntryArena, key: &[u8]) -> usize {
        arena.insert(CacheEntry::new(
            key.to_vec(),
            ValueSlot::Inline(vec![0u8; 8]),
            0,
            0,
        ))
    }

    #[test]
    fn test_evicts_minimum_frequency() {
        let mut arena = EntryArena::new();
        let mut state = LfuState::new();
        let a = insert(&mut arena, b"a");
        let b = insert(&mut arena, b"b");

        arena.get_mut(a).unwrap().touch(1);
        arena.get_mut(a).unwrap().touch(2);

        assert_eq!(state.evict(&mut arena).unwrap(), b);
    }

    #[test]
    fn test_tie_broken_by_first_found() {
        let mut arena = EntryArena::new();
        let mut state = LfuState::new();
        let a = insert(&mut arena, b"a");
        let _b = insert(&mut arena, b"b");

        // Equal frequencies: the lower slot wins.
        assert_eq!(state.evict(&mut arena).unwrap(), a);
    }

    #[test]
    fn test_all_pinned_fails() {
        let mut arena = EntryArena::new();
        let mut state = LfuState::new();
        let a = insert(&mut arena, b"a");
        arena.get_mut(a).unwrap().set_pinned(true);
        assert_eq!(
            state.evict(&mut arena).unwrap_err(),
            EvictionError::NoEvictableEntry
        );
    }
}
