use crate::cache::arena::EntryArena;
use crate::common::errors::EvictionError;

/// LRU policy state: head/tail of the intrusive list threaded through the
/// arena entries' `prev`/`next` links. Head is most recent, tail is the
/// eviction end.
///
/// `reorder_on_hit` is off by default: a plain `get` updates access metadata
/// but leaves the list untouched, matching the system's documented behavior.
/// Turning it on makes hits splice the entry back to the head.
#[derive(Debug)]
pub struct LruState {
    head: Option<usize>,
    tail: Option<usize>,
    reorder_on_hit: bool,
}

impl LruState {
    pub fn new(reorder_on_hit: bool) -> Self {
        Self {
            head: None,
            tail: None,
            reorder_on_hit,
        }
    }

    pub fn on_insert(&mut self, arena: &mut EntryArena, idx: usize) {
        self.push_front(arena, idx);
    }

    pub fn on_access(&mut self, arena: &mut EntryArena, idx: usize) {
        if self.reorder_on_hit {
            self.unlink(arena, idx);
            self.push_front(arena, idx);
        }
    }

    pub fn on_remove(&mut self, arena: &mut EntryArena, idx: usize) {
        self.unlink(arena, idx);
    }

    /// Walks from the tail toward the head, evicting the first unpinned
    /// entry found.
    pub fn evict(&mut self, arena: &mut EntryArena) -> Result<usize, EvictionError> {
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            let (pinned, prev) = match arena.get(idx) {
                Some(entry) => (entry.is_pinned(), entry.prev),
                None => break,
            };
            if !pinned {
                self.unlink(arena, idx);
                return Ok(idx);
            }
            cursor = prev;
        }
        Err(EvictionError::NoEvictableEntry)
    }

    fn push_front(&mut self, arena: &mut EntryArena, idx: usize) {
        let old_head = self.head;
        if let Some(entry) = arena.get_mut(idx) {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(head_idx) = old_head {
            if let Some(head) = arena.get_mut(head_idx) {
                head.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, arena: &mut EntryArena, idx: usize) {
        let (prev, next) = match arena.get(idx) {
            Some(entry) => (entry.prev, entry.next),
            None => return,
        };
        match prev {
            Some(prev_idx) => {
                if let Some(entry) = arena.get_mut(prev_idx) {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next_idx) => {
                if let Some(entry) = arena.get_mut(next_idx) {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(entry) = arena.get_mut(idx) {
            entry.prev = None;
            entry.next = None;
        }
    }
}
