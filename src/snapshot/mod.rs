//! Snapshot creation, the shielded page-content source, and restore
//! (spec.md §4.3).

pub mod overlay;
pub mod wire;

mod kv_snapshot;

pub use kv_snapshot::KvSnapshotSource;
pub use overlay::{LivePageSource, Overlay, OverlayChain, OverlaySnapshotSource};
pub use wire::{SnapshotMetadata, SnapshotVerifier, WireSnapshotSource, encode_snapshot, verify_snapshot};

use crate::error::Result;
use crate::hash_tree::Hash;

/// Capability satisfied by any concrete snapshot backing: a live-store
/// overlay, a native KV engine snapshot, or a deserialized remote source
/// (spec.md §9, "Snapshot source polymorphism").
pub trait SnapshotSource: Send {
    fn metadata(&self) -> SnapshotMetadata;

    /// Exactly `hashedPageSize` bytes of part `i`.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn get_part(&mut self, i: u64) -> Result<Vec<u8>>;

    /// The layer-0 hash of part `i` at snapshot time.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn get_proof(&mut self, i: u64) -> Result<Hash>;

    /// Releases resources held by this snapshot (overlay link, engine
    /// snapshot handle). Called automatically by [`SnapshotHandle::drop`]
    /// if not called explicitly first.
    fn release(&mut self);
}

/// Owns a boxed [`SnapshotSource`] and releases it on drop, so a caller
/// that forgets to call `release` explicitly does not leak the
/// underlying overlay link or engine snapshot handle.
///
/// Carries the lifetime of whatever the source borrows (an engine-native
/// snapshot borrows its store's db handle); overlay-backed sources own
/// their state outright and so are usable with any lifetime, including
/// `'static`.
pub struct SnapshotHandle<'a> {
    source: Box<dyn SnapshotSource + 'a>,
    released: bool,
}

impl<'a> SnapshotHandle<'a> {
    #[must_use]
    pub fn new(source: Box<dyn SnapshotSource + 'a>) -> Self {
        Self { source, released: false }
    }

    #[must_use]
    pub fn metadata(&self) -> SnapshotMetadata {
        self.source.metadata()
    }

    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    pub fn get_part(&mut self, i: u64) -> Result<Vec<u8>> {
        self.source.get_part(i)
    }

    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    pub fn get_proof(&mut self, i: u64) -> Result<Hash> {
        self.source.get_proof(i)
    }

    pub fn release(&mut self) {
        if !self.released {
            self.source.release();
            self.released = true;
        }
    }
}

impl Drop for SnapshotHandle<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Delegates to the boxed source, so a `SnapshotHandle` can itself be
/// passed anywhere a `&mut dyn SnapshotSource` is expected (e.g.
/// [`encode_snapshot`]) without unwrapping it.
impl SnapshotSource for SnapshotHandle<'_> {
    fn metadata(&self) -> SnapshotMetadata {
        Self::metadata(self)
    }

    fn get_part(&mut self, i: u64) -> Result<Vec<u8>> {
        Self::get_part(self, i)
    }

    fn get_proof(&mut self, i: u64) -> Result<Hash> {
        Self::get_proof(self, i)
    }

    fn release(&mut self) {
        Self::release(self);
    }
}
