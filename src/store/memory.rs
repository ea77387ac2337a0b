//! The memory backend (spec.md §4.2, "Memory backend"): a growable vector
//! of `pageSize`-byte buffers, no durability.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::hash_tree::{Hash, HashTree, hash_bytes};
use crate::page::PageGeometry;
use crate::page_provider::PageProvider;
use crate::serializer::Serializer;
use crate::snapshot::{SnapshotHandle, SnapshotMetadata, SnapshotSource};

use super::Store;

struct Pages {
    geometry: PageGeometry,
    data: Vec<Vec<u8>>,
}

impl Pages {
    fn ensure_page(&mut self, page: u64) {
        let idx = crate::util::num::u64_to_usize_saturating(page);
        if idx >= self.data.len() {
            self.data.resize_with(idx + 1, || vec![0u8; self.geometry.page_size]);
        }
    }

    fn hashed_slice(&self, page: u64) -> Vec<u8> {
        let idx = crate::util::num::u64_to_usize_saturating(page);
        match self.data.get(idx) {
            Some(buf) => buf[..self.geometry.hashed_page_size].to_vec(),
            None => vec![0u8; self.geometry.hashed_page_size],
        }
    }
}

/// Shared between the `Store` and the `PageProvider` handed to its
/// `HashTree`, resolving the back-reference the spec's §9 design note
/// describes.
struct SharedPages(Mutex<Pages>);

impl PageProvider for SharedPages {
    fn get_page_bytes(&self, page: u64) -> Result<Vec<u8>> {
        Ok(self.0.lock().hashed_slice(page))
    }
}

/// In-memory backend: a growable vector of page buffers, zero durability.
pub struct MemoryStore<V> {
    geometry: PageGeometry,
    serializer: Arc<dyn Serializer<V>>,
    pages: Arc<SharedPages>,
    hash_tree: Mutex<HashTree>,
}

impl<V> MemoryStore<V> {
    /// # Errors
    /// Returns [`crate::error::StoreError::Config`] if `page_size` is
    /// smaller than the serializer's value size.
    pub fn new(page_size: usize, branching_factor: u16, serializer: Arc<dyn Serializer<V>>) -> Result<Self> {
        let geometry = PageGeometry::new(page_size, serializer.size())?;
        let pages = Arc::new(SharedPages(Mutex::new(Pages { geometry, data: Vec::new() })));
        let hash_tree = Mutex::new(HashTree::new(branching_factor, pages.clone()));
        Ok(Self { geometry, serializer, pages, hash_tree })
    }

    /// # Errors
    /// Returns [`crate::error::StoreError::Config`] if `config.page_size`
    /// is smaller than the serializer's value size.
    pub fn with_config(config: super::StoreConfig<V>) -> Result<Self> {
        Self::new(config.page_size, config.branching_factor, config.serializer)
    }
}

impl<V: Send + Sync> Store<V> for MemoryStore<V> {
    fn set(&self, id: u64, v: &V) -> Result<()> {
        let (page, slot) = self.geometry.locate(id);
        let item_size = self.serializer.size();
        {
            let mut pages = self.pages.0.lock();
            pages.ensure_page(page);
            let buf = &mut pages.data[crate::util::num::u64_to_usize_saturating(page)];
            self.serializer.encode(v, &mut buf[slot..slot + item_size]);
        }
        let mut tree = self.hash_tree.lock();
        tree.set_num_pages(self.geometry.page_count_for(id));
        tree.mark_updated(page);
        Ok(())
    }

    fn get(&self, id: u64) -> Result<V> {
        let (page, slot) = self.geometry.locate(id);
        let item_size = self.serializer.size();
        let pages = self.pages.0.lock();
        match pages.data.get(crate::util::num::u64_to_usize_saturating(page)) {
            Some(buf) => Ok(self.serializer.decode(&buf[slot..slot + item_size])),
            None => Ok(self.serializer.zero()),
        }
    }

    fn get_page(&self, page: u64) -> Result<Vec<u8>> {
        Ok(self.pages.0.lock().hashed_slice(page))
    }

    fn get_state_hash(&self) -> Result<Hash> {
        self.hash_tree.lock().hash_root()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn num_pages(&self) -> u64 {
        self.hash_tree.lock().num_pages()
    }

    fn create_snapshot(&self) -> Result<SnapshotHandle<'_>> {
        let root_hash = self.hash_tree.lock().hash_root()?;
        let num_pages = self.hash_tree.lock().num_pages();
        let branching_factor = self.hash_tree.lock().get_branching_factor();
        let metadata = SnapshotMetadata { root_hash, branching_factor, num_pages };
        // The memory backend has nothing to overlay against: a cheap
        // value copy of the active pages is the natural isolation
        // mechanism (there is no disk to read through to).
        let snapshot_parts: Vec<Vec<u8>> =
            (0..num_pages).map(|p| self.pages.0.lock().hashed_slice(p)).collect();
        Ok(SnapshotHandle::new(Box::new(MemorySnapshotSource { metadata, parts: snapshot_parts })))
    }

    fn restore(&self, source: &mut dyn SnapshotSource) -> Result<()> {
        let metadata = source.metadata();
        let expected_bf = self.hash_tree.lock().get_branching_factor();
        if metadata.branching_factor != expected_bf {
            return Err(crate::error::StoreError::IncompatibleSnapshot {
                expected: expected_bf,
                found: metadata.branching_factor,
            });
        }
        let num_pages = match crate::util::num::u64_to_usize(metadata.num_pages) {
            Some(n) => n,
            None => {
                return Err(crate::error::StoreError::corruption("MemoryStore::restore", "numPages overflowed usize"));
            }
        };
        self.hash_tree.lock().reset();
        {
            let mut pages = self.pages.0.lock();
            pages.data.clear();
            pages.data.resize_with(num_pages, || vec![0u8; self.geometry.page_size]);
        }
        for i in 0..metadata.num_pages {
            let part = source.get_part(i)?;
            if part.len() != self.geometry.hashed_page_size {
                return Err(crate::error::StoreError::corruption(
                    "MemoryStore::restore",
                    format!("part {i} length {} != hashedPageSize {}", part.len(), self.geometry.hashed_page_size),
                ));
            }
            {
                let mut pages = self.pages.0.lock();
                let idx = crate::util::num::u64_to_usize_saturating(i);
                pages.data[idx][..part.len()].copy_from_slice(&part);
            }
            let mut tree = self.hash_tree.lock();
            tree.set_num_pages(i + 1);
            tree.mark_updated(i);
        }
        let got = self.hash_tree.lock().hash_root()?;
        if got != metadata.root_hash {
            return Err(crate::error::StoreError::corruption(
                "MemoryStore::restore",
                "state hash after restore does not match snapshot root",
            ));
        }
        Ok(())
    }
}

struct MemorySnapshotSource {
    metadata: SnapshotMetadata,
    parts: Vec<Vec<u8>>,
}

impl SnapshotSource for MemorySnapshotSource {
    fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    fn get_part(&mut self, i: u64) -> Result<Vec<u8>> {
        Ok(self.parts[crate::util::num::u64_to_usize_saturating(i)].clone())
    }

    fn get_proof(&mut self, i: u64) -> Result<Hash> {
        Ok(hash_bytes(&self.parts[crate::util::num::u64_to_usize_saturating(i)]))
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::byte_array_serializer;

    fn store() -> MemoryStore<crate::serializer::ByteArray<32>> {
        MemoryStore::new(64, 3, byte_array_serializer::<32>()).unwrap()
    }

    #[test]
    fn with_config_matches_positional_constructor() {
        let config = super::super::StoreConfig::new(64, 3, byte_array_serializer::<32>());
        let s = MemoryStore::with_config(config).unwrap();
        assert_eq!(s.get_state_hash().unwrap(), crate::hash_tree::ZERO_HASH);
    }

    #[test]
    fn never_written_id_reads_zero() {
        let s = store();
        assert_eq!(s.get(5).unwrap(), crate::serializer::ByteArray::zero());
        assert_eq!(s.get_state_hash().unwrap(), crate::hash_tree::ZERO_HASH);
    }

    #[test]
    fn set_then_get_round_trips() {
        let s = store();
        let v = crate::serializer::ByteArray([0xAAu8; 32]);
        s.set(0, &v).unwrap();
        assert_eq!(s.get(0).unwrap(), v);
        assert_ne!(s.get_state_hash().unwrap(), crate::hash_tree::ZERO_HASH);
    }

    #[test]
    fn insertion_order_does_not_affect_state_hash() {
        let a = store();
        let b = store();
        let v5 = crate::serializer::ByteArray([5u8; 32]);
        let v4 = crate::serializer::ByteArray([4u8; 32]);
        let v9 = crate::serializer::ByteArray([9u8; 32]);
        a.set(5, &v5).unwrap();
        a.set(4, &v4).unwrap();
        a.set(9, &v9).unwrap();
        b.set(4, &v4).unwrap();
        b.set(5, &v5).unwrap();
        b.set(9, &v9).unwrap();
        assert_eq!(a.get_state_hash().unwrap(), b.get_state_hash().unwrap());
    }

    #[test]
    fn snapshot_is_isolated_from_subsequent_writes() {
        let s = store();
        let v1 = crate::serializer::ByteArray([1u8; 32]);
        s.set(0, &v1).unwrap();
        let before_hash = s.get_state_hash().unwrap();
        let mut snap = s.create_snapshot().unwrap();
        let v2 = crate::serializer::ByteArray([2u8; 32]);
        s.set(0, &v2).unwrap();
        assert_ne!(s.get_state_hash().unwrap(), before_hash);
        assert_eq!(snap.metadata().root_hash, before_hash);
        let part = snap.get_part(0).unwrap();
        assert_eq!(&part[..32], &v1.0[..]);
    }

    #[test]
    fn restore_reproduces_source_hash_and_values() {
        let a = store();
        for i in 0..10u64 {
            a.set(i, &crate::serializer::ByteArray([i as u8; 32])).unwrap();
        }
        let hash_a = a.get_state_hash().unwrap();
        let mut snap = a.create_snapshot().unwrap();
        let data = crate::snapshot::encode_snapshot(&mut snap, 64).unwrap();

        let b = store();
        let mut wire = crate::snapshot::WireSnapshotSource::decode(data, 64).unwrap();
        b.restore(&mut wire).unwrap();
        assert_eq!(b.get_state_hash().unwrap(), hash_a);
        for i in 0..10u64 {
            assert_eq!(b.get(i).unwrap(), a.get(i).unwrap());
        }
    }
}
