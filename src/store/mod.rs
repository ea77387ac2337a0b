//! The `Store` contract (spec.md §4.2) and its four interchangeable
//! backends: in-memory, single-file, cached paged-file, ordered-KV.

mod cached;
mod file;
pub(crate) mod kv;
mod memory;

pub use cached::CachedFileStore;
pub use file::FileStore;
pub use kv::{KvStore, Tablespace};
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::error::Result;
use crate::hash_tree::Hash;
use crate::serializer::Serializer;
use crate::snapshot::SnapshotHandle;

/// Construction parameters shared by every backend: `pageSize >= sizeof(V)`
/// is the one invariant enforced here, via [`crate::page::PageGeometry`].
/// Bundles what would otherwise be positional constructor arguments into
/// a single typed value, mirroring the teacher's `CacheConfig` pattern.
#[derive(Clone)]
pub struct StoreConfig<V> {
    pub page_size: usize,
    pub branching_factor: u16,
    pub serializer: Arc<dyn Serializer<V>>,
}

impl<V> StoreConfig<V> {
    #[must_use]
    pub const fn new(page_size: usize, branching_factor: u16, serializer: Arc<dyn Serializer<V>>) -> Self {
        Self { page_size, branching_factor, serializer }
    }
}

/// A paginated, hash-verifiable mapping from identifier `id` to value `V`.
///
/// Every method takes `&self`: implementations hold their mutable state
/// (file handles, the hash tree, the page pool, the overlay chain) behind
/// `parking_lot` locks. This is what lets a `CreateSnapshot` result
/// outlive and coexist with later `Set` calls on the same store (spec.md
/// §5's one concurrency surface), and lets a store be shared as
/// `Arc<dyn Store<V>>` with snapshot readers on other threads.
pub trait Store<V>: Send + Sync {
    /// Writes `v` at `id`. Idempotent for identical writes; grows the
    /// active page count if needed; marks the target page dirty.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn set(&self, id: u64, v: &V) -> Result<()>;

    /// Returns the value stored at `id`, or the zero value if never written.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure; never fails
    /// for an identifier that was never the target of `set`.
    fn get(&self, id: u64) -> Result<V>;

    /// Returns exactly `hashedPageSize` bytes of page `p`, the hash input.
    /// Reading beyond the active region returns zero-filled bytes.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn get_page(&self, page: u64) -> Result<Vec<u8>>;

    /// Returns the current root hash, delegating to the hash tree.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure while hashing.
    fn get_state_hash(&self) -> Result<Hash>;

    /// Makes all modifications durable. No-op on the memory backend.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn flush(&self) -> Result<()>;

    /// Flushes then releases resources.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn close(&self) -> Result<()>;

    /// Number of active pages (`max written page + 1`, or 0 if empty).
    fn num_pages(&self) -> u64;

    /// Creates a snapshot of the current state, shielded from subsequent
    /// `set` calls on this store. The returned handle borrows nothing
    /// that a later `set`/`get` call would conflict with.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure while capturing.
    fn create_snapshot(&self) -> Result<SnapshotHandle<'_>>;

    /// Restores state from a snapshot data source, rejecting mismatched
    /// branching factors and verifying the resulting root hash.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::IncompatibleSnapshot`] on
    /// branching-factor mismatch, [`crate::error::StoreError::Corruption`]
    /// on malformed data or a post-restore hash mismatch, or
    /// [`crate::error::StoreError`] on I/O failure.
    fn restore(&self, source: &mut dyn crate::snapshot::SnapshotSource) -> Result<()>;
}
