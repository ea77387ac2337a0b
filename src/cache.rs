//! Write-through cache wrapper over any [`crate::store::Store`] (spec.md
//! §4.4): a fixed-capacity LRU over `id → V` in front of a backing store.
//!
//! This is the only writer path into the cache, so write-through is
//! sufficient — there is no separate invalidation protocol beyond
//! `restore` clearing the cache (spec.md §4.4, §4.3 "Restore invalidates
//! any existing caches").

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;
use crate::hash_tree::Hash;
use crate::snapshot::{SnapshotHandle, SnapshotSource};
use crate::store::Store;

/// Observational counters mirroring the teacher's `cache::metrics`
/// module — purely ambient, not part of spec.md's functional contract.
#[derive(Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub inserts: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheMetrics {
    #[must_use]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

/// Write-through identifier→value cache over any `Store<V>`.
///
/// `V` must be cheap to copy by value (spec.md §9, "Write-through cache
/// as a composable layer"): the cache holds owned copies, never borrowed
/// references into the backing store.
pub struct CachedStore<V, S> {
    inner: S,
    cache: Mutex<LruCache<u64, V>>,
    metrics: CacheMetrics,
}

impl<V, S> CachedStore<V, S> {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be non-zero");
        Self { inner, cache: Mutex::new(LruCache::new(capacity)), metrics: CacheMetrics::default() }
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Borrows the wrapped store, e.g. to reach backend-specific methods.
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

impl<V: Clone + Send + Sync, S: Store<V>> Store<V> for CachedStore<V, S> {
    fn set(&self, id: u64, v: &V) -> Result<()> {
        self.inner.set(id, v)?;
        let mut cache = self.cache.lock();
        if cache.put(id, v.clone()).is_none() {
            self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn get(&self, id: u64) -> Result<V> {
        {
            let mut cache = self.cache.lock();
            if let Some(v) = cache.get(&id) {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(v.clone());
            }
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        let v = self.inner.get(id)?;
        let mut cache = self.cache.lock();
        let evicting = cache.len() == cache.cap().get() && !cache.contains(&id);
        if evicting {
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
        }
        cache.put(id, v.clone());
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(v)
    }

    fn get_page(&self, page: u64) -> Result<Vec<u8>> {
        self.inner.get_page(page)
    }

    fn get_state_hash(&self) -> Result<Hash> {
        self.inner.get_state_hash()
    }

    fn flush(&self) -> Result<()> {
        self.inner.get_state_hash()?;
        self.inner.flush()
    }

    fn close(&self) -> Result<()> {
        self.flush()?;
        self.inner.close()
    }

    fn num_pages(&self) -> u64 {
        self.inner.num_pages()
    }

    fn create_snapshot(&self) -> Result<SnapshotHandle<'_>> {
        self.inner.create_snapshot()
    }

    fn restore(&self, source: &mut dyn SnapshotSource) -> Result<()> {
        self.cache.lock().clear();
        self.inner.restore(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{ByteArray, byte_array_serializer};
    use crate::store::MemoryStore;

    fn cached(capacity: usize) -> CachedStore<ByteArray<32>, MemoryStore<ByteArray<32>>> {
        let inner = MemoryStore::new(64, 3, byte_array_serializer::<32>()).unwrap();
        CachedStore::new(inner, capacity)
    }

    #[test]
    fn set_then_get_hits_the_cache() {
        let c = cached(4);
        let v = ByteArray([1u8; 32]);
        c.set(0, &v).unwrap();
        assert_eq!(c.get(0).unwrap(), v);
        assert_eq!(c.metrics().hits, 1);
    }

    #[test]
    fn never_written_id_reads_zero_and_populates_cache() {
        let c = cached(4);
        assert_eq!(c.get(9).unwrap(), ByteArray::zero());
        assert_eq!(c.metrics().misses, 1);
        // Second read of the same never-written id is now a cache hit.
        assert_eq!(c.get(9).unwrap(), ByteArray::zero());
        assert_eq!(c.metrics().hits, 1);
    }

    #[test]
    fn eviction_drops_the_least_recently_used_entry() {
        // itemsPerPage = 2 (64/32 bytes), capacity 3: matches spec.md §8
        // scenario 4.
        let c = cached(3);
        c.set(0, &ByteArray([b'A'; 32])).unwrap();
        c.set(1, &ByteArray([b'B'; 32])).unwrap();
        c.set(2, &ByteArray([b'C'; 32])).unwrap();
        c.set(3, &ByteArray([b'D'; 32])).unwrap();
        assert!(!c.cache.lock().contains(&0));
        // Repopulates the cache, evicting the current LRU entry (id 1).
        assert_eq!(c.get(0).unwrap(), ByteArray([b'A'; 32]));
        assert!(!c.cache.lock().contains(&1));
    }

    #[test]
    fn restore_clears_the_cache() {
        let c = cached(4);
        c.set(0, &ByteArray([1u8; 32])).unwrap();
        assert!(c.cache.lock().contains(&0));
        let mut snap = c.create_snapshot().unwrap();
        let data = crate::snapshot::encode_snapshot(&mut snap, 64).unwrap();
        let mut wire = crate::snapshot::WireSnapshotSource::decode(data, 64).unwrap();
        c.restore(&mut wire).unwrap();
        assert!(!c.cache.lock().contains(&0));
    }

    #[test]
    fn flush_forces_state_hash_then_forwards() {
        let c = cached(4);
        c.set(0, &ByteArray([1u8; 32])).unwrap();
        c.flush().unwrap();
        assert_ne!(c.get_state_hash().unwrap(), crate::hash_tree::ZERO_HASH);
    }
}
