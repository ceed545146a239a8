//! Bidirectional chunk cache.
//!
//! Maps chunk id → plaintext for reads and plaintext → chunk id for writes
//! (a reverse hit lets `put` skip hashing a piece it has seen recently).
//! Bounded by entry count and by aggregate plaintext bytes; eviction is
//! least-recently-used on either bound and always removes both directions
//! together.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::types::DocumentId;

/// Default entry-count bound.
pub const DEFAULT_CACHE_ENTRIES: usize = 256;
/// Default aggregate plaintext byte bound.
pub const DEFAULT_CACHE_BYTES: usize = 16 * 1024 * 1024;

pub struct ChunkCache {
    forward: LruCache<DocumentId, Arc<str>>,
    reverse: HashMap<Arc<str>, DocumentId>,
    max_bytes: usize,
    bytes: usize,
}

/// Read-only snapshot of cache usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
}

impl ChunkCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            forward: LruCache::new(cap),
            reverse: HashMap::new(),
            max_bytes,
            bytes: 0,
        }
    }

    /// Plaintext for a chunk id. Refreshes recency.
    pub fn get(&mut self, id: &DocumentId) -> Option<Arc<str>> {
        self.forward.get(id).cloned()
    }

    /// Chunk id for an exact plaintext. Refreshes recency.
    pub fn id_for_text(&mut self, text: &str) -> Option<DocumentId> {
        let id = self.reverse.get(text)?.clone();
        self.forward.get(&id);
        Some(id)
    }

    pub fn insert(&mut self, id: DocumentId, text: &str) {
        let value: Arc<str> = Arc::from(text);
        self.bytes += value.len();
        self.reverse.insert(Arc::clone(&value), id.clone());
        if let Some((dropped_id, dropped_text)) = self.forward.push(id, value) {
            self.drop_reverse(&dropped_id, &dropped_text);
        }
        while self.bytes > self.max_bytes {
            let Some((dropped_id, dropped_text)) = self.forward.pop_lru() else {
                break;
            };
            self.drop_reverse(&dropped_id, &dropped_text);
        }
    }

    /// Remove the reverse mapping for an entry leaving the forward map,
    /// unless the text has since been re-bound to another id.
    fn drop_reverse(&mut self, dropped_id: &DocumentId, dropped_text: &Arc<str>) {
        self.bytes = self.bytes.saturating_sub(dropped_text.len());
        if self
            .reverse
            .get(dropped_text.as_ref())
            .is_some_and(|mapped| mapped == dropped_id)
        {
            self.reverse.remove(dropped_text.as_ref());
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.forward.len(),
            bytes: self.bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> DocumentId {
        DocumentId::new(s)
    }

    #[test]
    fn both_directions_resolve() {
        let mut cache = ChunkCache::new(8, 1024);
        cache.insert(id("h:a"), "alpha");
        assert_eq!(cache.get(&id("h:a")).as_deref(), Some("alpha"));
        assert_eq!(cache.id_for_text("alpha"), Some(id("h:a")));
        assert_eq!(cache.id_for_text("beta"), None);
        assert_eq!(cache.stats(), CacheStats { entries: 1, bytes: 5 });
    }

    #[test]
    fn count_eviction_removes_both_sides() {
        let mut cache = ChunkCache::new(2, 1024);
        cache.insert(id("h:a"), "alpha");
        cache.insert(id("h:b"), "beta");
        cache.insert(id("h:c"), "gamma"); // evicts h:a
        assert_eq!(cache.get(&id("h:a")), None);
        assert_eq!(cache.id_for_text("alpha"), None);
        assert_eq!(cache.get(&id("h:b")).as_deref(), Some("beta"));
        assert_eq!(cache.stats().entries, 2);
        assert_eq!(cache.stats().bytes, "beta".len() + "gamma".len());
    }

    #[test]
    fn byte_bound_evicts_lru_first() {
        let mut cache = ChunkCache::new(16, 10);
        cache.insert(id("h:a"), "aaaa");
        cache.insert(id("h:b"), "bbbb");
        // 4 + 4 + 4 > 10: h:a goes
        cache.insert(id("h:c"), "cccc");
        assert_eq!(cache.get(&id("h:a")), None);
        assert_eq!(cache.id_for_text("aaaa"), None);
        assert_eq!(cache.stats(), CacheStats { entries: 2, bytes: 8 });
    }

    #[test]
    fn lookups_refresh_recency() {
        let mut cache = ChunkCache::new(2, 1024);
        cache.insert(id("h:a"), "alpha");
        cache.insert(id("h:b"), "beta");
        // touch h:a via the reverse map, then overflow: h:b is now the LRU
        assert_eq!(cache.id_for_text("alpha"), Some(id("h:a")));
        cache.insert(id("h:c"), "gamma");
        assert_eq!(cache.get(&id("h:a")).as_deref(), Some("alpha"));
        assert_eq!(cache.get(&id("h:b")), None);
    }

    #[test]
    fn reinserting_an_id_replaces_its_text() {
        let mut cache = ChunkCache::new(4, 1024);
        cache.insert(id("h:a"), "old");
        cache.insert(id("h:a"), "new");
        assert_eq!(cache.get(&id("h:a")).as_deref(), Some("new"));
        assert_eq!(cache.id_for_text("old"), None);
        assert_eq!(cache.id_for_text("new"), Some(id("h:a")));
        assert_eq!(cache.stats(), CacheStats { entries: 1, bytes: 3 });
    }

    #[test]
    fn oversized_entry_does_not_wedge_the_cache() {
        let mut cache = ChunkCache::new(4, 8);
        cache.insert(id("h:big"), "way too large for the bound");
        assert_eq!(cache.stats(), CacheStats { entries: 0, bytes: 0 });
        cache.insert(id("h:a"), "tiny");
        assert_eq!(cache.get(&id("h:a")).as_deref(), Some("tiny"));
    }
}
