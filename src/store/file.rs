//! The single-file backend (spec.md §4.2, "Single-file backend"): one
//! flat file, page `p` at offset `p * pageSize`, positional reads/writes,
//! sparse-file zero semantics beyond the last written item.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::hash_tree::{Hash, HashTree, hash_bytes};
use crate::page::PageGeometry;
use crate::page_provider::PageProvider;
use crate::serializer::Serializer;
use crate::snapshot::{
    LivePageSource, OverlayChain, OverlaySnapshotSource, SnapshotHandle, SnapshotMetadata, SnapshotSource,
};
use crate::util::fsutil::{read_zero_padded, write_zero_padded};

use super::Store;

/// Shared file handle used both as the `HashTree`'s `PageProvider` and as
/// the `LivePageSource` an [`OverlaySnapshotSource`] reads through to for
/// pages it has not captured.
struct FilePages {
    file: Mutex<File>,
    geometry: PageGeometry,
}

impl FilePages {
    fn read_hashed(&self, page: u64) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        let offset = page * crate::util::num::usize_to_u64(self.geometry.page_size);
        read_zero_padded(&mut file, offset, self.geometry.hashed_page_size)
            .map_err(|e| StoreError::io("FileStore::get_page", Some(page), e))
    }
}

impl PageProvider for FilePages {
    fn get_page_bytes(&self, page: u64) -> Result<Vec<u8>> {
        self.read_hashed(page)
    }
}

impl LivePageSource for FilePages {
    fn live_page_bytes(&self, page: u64) -> Result<Vec<u8>> {
        self.read_hashed(page)
    }
}

/// Single-file backend: one file, page `p` at `p * pageSize`.
pub struct FileStore<V> {
    geometry: PageGeometry,
    serializer: Arc<dyn Serializer<V>>,
    pages: Arc<FilePages>,
    hash_tree: Mutex<HashTree>,
    overlay_chain: Arc<OverlayChain>,
}

impl<V> FileStore<V> {
    /// Opens (creating if missing) a single-file store at `path`.
    ///
    /// # Errors
    /// Returns [`StoreError::Config`] if `page_size` is smaller than the
    /// serializer's value size, or [`StoreError::Io`] if the file cannot
    /// be opened.
    pub fn open(path: &Path, page_size: usize, branching_factor: u16, serializer: Arc<dyn Serializer<V>>) -> Result<Self> {
        let geometry = PageGeometry::new(page_size, serializer.size())?;
        let file = crate::util::fsutil::open_rw_no_trunc(path).map_err(|e| {
            log::error!("FileStore::open failed to open {}: {e}", path.display());
            StoreError::io("FileStore::open", None, e)
        })?;
        let file_len = file.metadata().map_err(|e| StoreError::io("FileStore::open", None, e))?.len();
        let pages = Arc::new(FilePages { file: Mutex::new(file), geometry });
        let mut hash_tree = HashTree::new(branching_factor, pages.clone());
        let existing_pages = file_len.div_ceil(crate::util::num::usize_to_u64(geometry.page_size));
        if existing_pages > 0 {
            hash_tree.set_num_pages(existing_pages);
            for p in 0..existing_pages {
                hash_tree.mark_updated(p);
            }
        }
        Ok(Self { geometry, serializer, pages, hash_tree: Mutex::new(hash_tree), overlay_chain: Arc::new(OverlayChain::new()) })
    }

    /// # Errors
    /// Returns [`StoreError::Config`] if `config.page_size` is smaller
    /// than the serializer's value size, or [`StoreError::Io`] if the
    /// file cannot be opened.
    pub fn open_with_config(path: &Path, config: super::StoreConfig<V>) -> Result<Self> {
        Self::open(path, config.page_size, config.branching_factor, config.serializer)
    }

    fn capture_pre_image(&self, page: u64) -> Result<(Vec<u8>, Hash)> {
        let bytes = self.pages.read_hashed(page)?;
        let hash = hash_bytes(&bytes);
        Ok((bytes, hash))
    }
}

impl<V: Send + Sync> Store<V> for FileStore<V> {
    fn set(&self, id: u64, v: &V) -> Result<()> {
        let (page, slot) = self.geometry.locate(id);
        self.overlay_chain.capture_before_write(page, || self.capture_pre_image(page))?;
        let item_size = self.serializer.size();
        let mut buf = vec![0u8; item_size];
        self.serializer.encode(v, &mut buf);
        {
            let mut file = self.pages.file.lock();
            let offset =
                page * crate::util::num::usize_to_u64(self.geometry.page_size) + crate::util::num::usize_to_u64(slot);
            use std::io::{Seek, SeekFrom};
            file.seek(SeekFrom::Start(offset)).map_err(|e| StoreError::io("FileStore::set(seek)", Some(page), e))?;
            file.write_all(&buf).map_err(|e| StoreError::io("FileStore::set(write)", Some(page), e))?;
        }
        let mut tree = self.hash_tree.lock();
        tree.set_num_pages(self.geometry.page_count_for(id));
        tree.mark_updated(page);
        Ok(())
    }

    fn get(&self, id: u64) -> Result<V> {
        let (page, slot) = self.geometry.locate(id);
        let item_size = self.serializer.size();
        let mut file = self.pages.file.lock();
        let offset =
            page * crate::util::num::usize_to_u64(self.geometry.page_size) + crate::util::num::usize_to_u64(slot);
        let bytes = read_zero_padded(&mut file, offset, item_size)
            .map_err(|e| StoreError::io("FileStore::get", Some(page), e))?;
        Ok(self.serializer.decode(&bytes))
    }

    fn get_page(&self, page: u64) -> Result<Vec<u8>> {
        self.pages.read_hashed(page)
    }

    fn get_state_hash(&self) -> Result<Hash> {
        self.hash_tree.lock().hash_root()
    }

    fn flush(&self) -> Result<()> {
        self.pages.file.lock().sync_all().map_err(|e| StoreError::io("FileStore::flush", None, e))
    }

    fn close(&self) -> Result<()> {
        self.flush()
    }

    fn num_pages(&self) -> u64 {
        self.hash_tree.lock().num_pages()
    }

    fn create_snapshot(&self) -> Result<SnapshotHandle<'_>> {
        let root_hash = self.hash_tree.lock().hash_root()?;
        let num_pages = self.hash_tree.lock().num_pages();
        let branching_factor = self.hash_tree.lock().get_branching_factor();
        let metadata = SnapshotMetadata { root_hash, branching_factor, num_pages };
        let overlay = self.overlay_chain.create(metadata);
        let source = OverlaySnapshotSource::new(overlay, self.overlay_chain.clone(), self.pages.clone());
        Ok(SnapshotHandle::new(Box::new(source)))
    }

    fn restore(&self, source: &mut dyn SnapshotSource) -> Result<()> {
        let metadata = source.metadata();
        let expected_bf = self.hash_tree.lock().get_branching_factor();
        if metadata.branching_factor != expected_bf {
            return Err(StoreError::IncompatibleSnapshot { expected: expected_bf, found: metadata.branching_factor });
        }
        self.hash_tree.lock().reset();
        self.overlay_chain.clear();
        self.hash_tree.lock().set_num_pages(metadata.num_pages);
        {
            // Drop any pages past the snapshot's numPages so a restore from
            // a smaller snapshot does not leave stale trailing pages that
            // would resurface as extra pages on the next open.
            let mut file = self.pages.file.lock();
            let new_len = metadata.num_pages * crate::util::num::usize_to_u64(self.geometry.page_size);
            file.set_len(new_len).map_err(|e| StoreError::io("FileStore::restore(truncate)", None, e))?;
        }
        for i in 0..metadata.num_pages {
            let part = source.get_part(i)?;
            if part.len() != self.geometry.hashed_page_size {
                return Err(StoreError::corruption(
                    "FileStore::restore",
                    format!("part {i} length {} != hashedPageSize {}", part.len(), self.geometry.hashed_page_size),
                ));
            }
            {
                let mut file = self.pages.file.lock();
                let offset = i * crate::util::num::usize_to_u64(self.geometry.page_size);
                write_zero_padded(&mut file, offset, &part, self.geometry.page_size)
                    .map_err(|e| StoreError::io("FileStore::restore", Some(i), e))?;
            }
            self.hash_tree.lock().mark_updated(i);
        }
        let got = self.hash_tree.lock().hash_root()?;
        if got != metadata.root_hash {
            log::error!("FileStore::restore: state hash after restore did not match snapshot root");
            return Err(StoreError::corruption("FileStore::restore", "state hash after restore does not match snapshot root"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{ByteArray, byte_array_serializer};
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, FileStore<ByteArray<32>>) {
        let f = NamedTempFile::new().unwrap();
        let s = FileStore::open(f.path(), 64, 3, byte_array_serializer::<32>()).unwrap();
        (f, s)
    }

    #[test]
    fn never_written_id_reads_zero() {
        let (_f, s) = store();
        assert_eq!(s.get(3).unwrap(), ByteArray::zero());
    }

    #[test]
    fn set_get_round_trips_and_changes_hash() {
        let (_f, s) = store();
        let empty_hash = s.get_state_hash().unwrap();
        let v = ByteArray([0xCCu8; 32]);
        s.set(1, &v).unwrap();
        assert_eq!(s.get(1).unwrap(), v);
        assert_ne!(s.get_state_hash().unwrap(), empty_hash);
    }

    #[test]
    fn padding_bytes_never_enter_the_hash() {
        // page_size 40, item 32: itemsPerPage = 1, hashedPageSize = 32, padding = 8 bytes.
        let f = NamedTempFile::new().unwrap();
        let s: FileStore<ByteArray<32>> = FileStore::open(f.path(), 40, 3, byte_array_serializer::<32>()).unwrap();
        s.set(0, &ByteArray([7u8; 32])).unwrap();
        let hash_before = s.get_state_hash().unwrap();
        let page_bytes = s.get_page(0).unwrap();
        assert_eq!(page_bytes.len(), 32);

        // Corrupt the padding region directly on disk; the hash must not move.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = crate::util::fsutil::open_rw_no_trunc(f.path()).unwrap();
            file.seek(SeekFrom::Start(32)).unwrap();
            file.write_all(&[0xFFu8; 8]).unwrap();
        }
        let mut tree = s.hash_tree.lock();
        tree.mark_updated(0);
        drop(tree);
        assert_eq!(s.get_state_hash().unwrap(), hash_before);
    }

    #[test]
    fn snapshot_isolated_then_restore_reproduces_hash() {
        let (_f, a) = store();
        for i in 0..6u64 {
            a.set(i, &ByteArray([i as u8 + 1; 32])).unwrap();
        }
        let hash_a = a.get_state_hash().unwrap();
        let mut snap = a.create_snapshot().unwrap();
        a.set(0, &ByteArray([99u8; 32])).unwrap();
        assert_ne!(a.get_state_hash().unwrap(), hash_a);
        assert_eq!(snap.metadata().root_hash, hash_a);

        let data = crate::snapshot::encode_snapshot(&mut snap, 64).unwrap();
        let (_f2, b) = store();
        let mut wire = crate::snapshot::WireSnapshotSource::decode(data, 64).unwrap();
        b.restore(&mut wire).unwrap();
        assert_eq!(b.get_state_hash().unwrap(), hash_a);
        for i in 0..6u64 {
            assert_eq!(b.get(i).unwrap(), ByteArray([i as u8 + 1; 32]));
        }
    }

    #[test]
    fn restoring_a_smaller_snapshot_truncates_stale_trailing_pages() {
        let (_f, a) = store();
        for i in 0..6u64 {
            a.set(i, &ByteArray([i as u8 + 1; 32])).unwrap();
        }
        assert_eq!(a.num_pages(), 3);

        let small = NamedTempFile::new().unwrap();
        let b: FileStore<ByteArray<32>> = FileStore::open(small.path(), 64, 3, byte_array_serializer::<32>()).unwrap();
        b.set(0, &ByteArray([9u8; 32])).unwrap();
        let mut snap = b.create_snapshot().unwrap();
        assert_eq!(snap.metadata().num_pages, 1);
        let data = crate::snapshot::encode_snapshot(&mut snap, 64).unwrap();
        let mut wire = crate::snapshot::WireSnapshotSource::decode(data, 64).unwrap();
        a.restore(&mut wire).unwrap();

        assert_eq!(a.num_pages(), 1);
        let file_len = std::fs::metadata(_f.path()).unwrap().len();
        assert_eq!(file_len, 64);
        let reopened: FileStore<ByteArray<32>> = FileStore::open(_f.path(), 64, 3, byte_array_serializer::<32>()).unwrap();
        assert_eq!(reopened.num_pages(), 1);
    }

    #[test]
    fn restore_rejects_mismatched_branching_factor() {
        let (_f, a) = store();
        a.set(0, &ByteArray([1u8; 32])).unwrap();
        let mut snap = a.create_snapshot().unwrap();
        let data = crate::snapshot::encode_snapshot(&mut snap, 64).unwrap();

        let f2 = NamedTempFile::new().unwrap();
        let b: FileStore<ByteArray<32>> = FileStore::open(f2.path(), 64, 5, byte_array_serializer::<32>()).unwrap();
        let mut wire = crate::snapshot::WireSnapshotSource::decode(data, 64).unwrap();
        assert!(matches!(b.restore(&mut wire), Err(StoreError::IncompatibleSnapshot { .. })));
    }
}
