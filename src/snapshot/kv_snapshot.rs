//! Snapshot source backed by a native RocksDB `Snapshot` (spec.md §4.3,
//! "Ordered-KV backend creation contract"): point-in-time MVCC read view,
//! no overlay bookkeeping required.

use rocksdb::{Direction, IteratorMode, Snapshot};

use crate::error::Result;
use crate::hash_tree::{Hash, hash_bytes};
use crate::page::PageGeometry;
use crate::store::kv::{assemble_page, make_key};

use super::{SnapshotMetadata, SnapshotSource};

/// Borrows a RocksDB engine snapshot for the lifetime of the [`super::SnapshotHandle`]
/// that owns it; release is a no-op since RocksDB drops the native
/// snapshot handle when `Snapshot` itself is dropped.
pub struct KvSnapshotSource<'a> {
    snapshot: Snapshot<'a>,
    tag: u8,
    geometry: PageGeometry,
    metadata: SnapshotMetadata,
}

impl<'a> KvSnapshotSource<'a> {
    #[must_use]
    pub fn new(snapshot: Snapshot<'a>, tag: u8, geometry: PageGeometry, metadata: SnapshotMetadata) -> Self {
        Self { snapshot, tag, geometry, metadata }
    }

    fn read_part(&self, i: u64) -> Vec<u8> {
        let lower = make_key(self.tag, i * crate::util::num::usize_to_u64(self.geometry.items_per_page));
        let iter = self.snapshot.iterator(IteratorMode::From(&lower, Direction::Forward));
        assemble_page(iter, self.tag, i, &self.geometry)
    }
}

impl SnapshotSource for KvSnapshotSource<'_> {
    fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    fn get_part(&mut self, i: u64) -> Result<Vec<u8>> {
        Ok(self.read_part(i))
    }

    fn get_proof(&mut self, i: u64) -> Result<Hash> {
        Ok(hash_bytes(&self.read_part(i)))
    }

    fn release(&mut self) {}
}
