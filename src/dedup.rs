//! Recent-packet-id cache.
//!
//! The radio delivers mesh packets at-least-once, so the same id can show up
//! more than once in the fromRadio stream.  The cache is a fixed ring of the
//! last `N` ids: insertion order is eviction order, and id `0` (unset) is
//! never reported as a duplicate.

use crate::config::DEDUP_CAPACITY;

#[derive(Clone, Debug)]
pub struct DedupCache<const N: usize = DEDUP_CAPACITY> {
    seen: [u32; N],
    cursor: usize,
}

impl<const N: usize> DedupCache<N> {
    pub const fn new() -> Self {
        Self {
            seen: [0; N],
            cursor: 0,
        }
    }

    /// Returns `true` if `id` was already recorded; otherwise records it,
    /// overwriting the oldest slot, and returns `false`.
    pub fn is_duplicate(&mut self, id: u32) -> bool {
        if id != 0 && self.seen.contains(&id) {
            return true;
        }
        self.seen[self.cursor] = id;
        self.cursor = (self.cursor + 1) % N;
        false
    }

    pub fn clear(&mut self) {
        self.seen = [0; N];
        self.cursor = 0;
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for DedupCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_twice_is_duplicate() {
        let mut cache: DedupCache = DedupCache::new();
        assert!(!cache.is_duplicate(0x1234));
        assert!(cache.is_duplicate(0x1234));
        assert!(cache.is_duplicate(0x1234));
    }

    #[test]
    fn zero_is_never_duplicate() {
        let mut cache: DedupCache = DedupCache::new();
        for _ in 0..200 {
            assert!(!cache.is_duplicate(0));
        }
    }

    #[test]
    fn oldest_id_is_forgotten_past_capacity() {
        let mut cache: DedupCache<64> = DedupCache::new();
        for id in 1..=65u32 {
            assert!(!cache.is_duplicate(id));
        }
        // id 1 was overwritten by id 65.
        assert!(!cache.is_duplicate(1));

        // Re-inserting 1 evicted 2; 3..=65 are still remembered.
        for id in 3..=65u32 {
            assert!(cache.is_duplicate(id), "id {} should still be cached", id);
        }
    }

    #[test]
    fn duplicate_hit_does_not_advance_cursor() {
        let mut cache: DedupCache<2> = DedupCache::new();
        assert!(!cache.is_duplicate(10));
        assert!(cache.is_duplicate(10));
        assert!(!cache.is_duplicate(20));
        // Both still present: the hit on 10 did not consume a slot.
        assert!(cache.is_duplicate(10));
        assert!(cache.is_duplicate(20));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut cache: DedupCache<4> = DedupCache::new();
        cache.is_duplicate(7);
        cache.clear();
        assert!(!cache.is_duplicate(7));
        assert_eq!(cache.capacity(), 4);
    }
}
