//! The ordered-KV backend (spec.md §4.2, "Ordered-KV backend"): backed by
//! RocksDB, grounded on `examples/cdyfng-svm`'s `svm-kv` RocksDB binding
//! (`crates/svm-kv/src/rocksdb/db.rs`) — the only ordered-KV engine
//! binding present anywhere in the retrieval pack (see SPEC_FULL.md §4.2).
//!
//! Key layout: `[tablespace tag : 1 byte][id : big-endian u64]`, so
//! lexicographic key order matches identifier order (spec.md §6).

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{DB, Direction, IteratorMode};

use crate::error::{Result, StoreError};
use crate::hash_tree::{Hash, HashTree, hash_bytes};
use crate::page::PageGeometry;
use crate::page_provider::PageProvider;
use crate::serializer::Serializer;
use crate::snapshot::{KvSnapshotSource, SnapshotHandle, SnapshotMetadata, SnapshotSource};

use super::Store;

/// Single-byte prefix distinguishing logical stores sharing one RocksDB
/// handle (spec.md GLOSSARY, "Tablespace"). Tag values are a caller
/// concern; this crate only requires distinctness per logical store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tablespace(pub u8);

pub(crate) const KEY_LEN: usize = 1 + 8;

pub(crate) fn make_key(tag: u8, id: u64) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[0] = tag;
    key[1..].copy_from_slice(&id.to_be_bytes());
    key
}

fn id_from_key(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&key[1..KEY_LEN]);
    u64::from_be_bytes(buf)
}

/// Assembles the `hashedPageSize`-byte buffer for page `p` by range-
/// scanning `[p*itemsPerPage, (p+1)*itemsPerPage)` (spec.md §4.2).
pub(crate) fn assemble_page<'a, I>(iter: I, tag: u8, page: u64, geometry: &PageGeometry) -> Vec<u8>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>> + 'a,
{
    let mut buf = vec![0u8; geometry.hashed_page_size];
    let items_per_page = crate::util::num::usize_to_u64(geometry.items_per_page);
    let first_id = page * items_per_page;
    let end_id = first_id + items_per_page;
    for entry in iter {
        let Ok((key, value)) = entry else { break };
        if key.first() != Some(&tag) {
            break;
        }
        let id = id_from_key(&key);
        if id < first_id {
            continue;
        }
        if id >= end_id {
            break;
        }
        // id - first_id < items_per_page here, which itself came from a
        // valid usize, so this narrowing is always exact.
        let slot = crate::util::num::u64_to_usize_saturating(id - first_id) * geometry.item_size;
        buf[slot..slot + geometry.item_size].copy_from_slice(&value);
    }
    buf
}

struct KvPages {
    db: Arc<DB>,
    tag: u8,
    geometry: PageGeometry,
}

impl PageProvider for KvPages {
    fn get_page_bytes(&self, page: u64) -> Result<Vec<u8>> {
        let lower = make_key(self.tag, page * crate::util::num::usize_to_u64(self.geometry.items_per_page));
        let iter = self.db.iterator(IteratorMode::From(&lower, Direction::Forward));
        Ok(assemble_page(iter, self.tag, page, &self.geometry))
    }
}

/// Ordered-KV-engine backend: one RocksDB handle, one tablespace tag.
pub struct KvStore<V> {
    geometry: PageGeometry,
    serializer: Arc<dyn Serializer<V>>,
    db: Arc<DB>,
    tablespace: Tablespace,
    pages: Arc<KvPages>,
    hash_tree: Mutex<HashTree>,
}

impl<V> KvStore<V> {
    /// Opens (creating if missing) a RocksDB-backed store at `path`,
    /// recovering `numPages` from the last key in `tablespace`.
    ///
    /// # Errors
    /// Returns [`StoreError::Config`] if `page_size` is smaller than the
    /// serializer's value size, or [`StoreError::Io`] if RocksDB fails to
    /// open.
    pub fn open(
        path: &Path,
        tablespace: Tablespace,
        page_size: usize,
        branching_factor: u16,
        serializer: Arc<dyn Serializer<V>>,
    ) -> Result<Self> {
        let geometry = PageGeometry::new(page_size, serializer.size())?;
        let db = Arc::new(DB::open_default(path).map_err(|e| {
            log::error!("KvStore::open failed to open RocksDB handle at {}: {e}", path.display());
            StoreError::io("KvStore::open", None, std::io::Error::other(e))
        })?);
        let pages = Arc::new(KvPages { db: db.clone(), tag: tablespace.0, geometry });
        let mut hash_tree = HashTree::new(branching_factor, pages.clone());
        let num_pages = Self::recover_num_pages(&db, tablespace.0, &geometry);
        if num_pages > 0 {
            hash_tree.set_num_pages(num_pages);
            for p in 0..num_pages {
                hash_tree.mark_updated(p);
            }
        }
        Ok(Self { geometry, serializer, db, tablespace, pages, hash_tree: Mutex::new(hash_tree) })
    }

    /// # Errors
    /// Returns [`StoreError::Config`] if `config.page_size` is smaller
    /// than the serializer's value size, or [`StoreError::Io`] if
    /// RocksDB fails to open.
    pub fn open_with_config(path: &Path, tablespace: Tablespace, config: super::StoreConfig<V>) -> Result<Self> {
        Self::open(path, tablespace, config.page_size, config.branching_factor, config.serializer)
    }

    /// Reads the last key in `tag`'s range and derives `numPages` from it
    /// (+1), or 0 if the tablespace is empty (spec.md §4.2).
    fn recover_num_pages(db: &DB, tag: u8, geometry: &PageGeometry) -> u64 {
        let upper = make_key(tag, u64::MAX);
        let mut iter = db.iterator(IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(Ok((key, _))) if key.first() == Some(&tag) => {
                let last_id = id_from_key(&key);
                geometry.page_count_for(last_id)
            }
            _ => 0,
        }
    }
}

impl<V: Send + Sync> Store<V> for KvStore<V> {
    fn set(&self, id: u64, v: &V) -> Result<()> {
        let key = make_key(self.tablespace.0, id);
        let item_size = self.serializer.size();
        let mut buf = vec![0u8; item_size];
        self.serializer.encode(v, &mut buf);
        self.db.put(key, buf).map_err(|e| StoreError::io("KvStore::set", None, std::io::Error::other(e)))?;
        let (page, _) = self.geometry.locate(id);
        let mut tree = self.hash_tree.lock();
        tree.set_num_pages(self.geometry.page_count_for(id));
        tree.mark_updated(page);
        Ok(())
    }

    fn get(&self, id: u64) -> Result<V> {
        let key = make_key(self.tablespace.0, id);
        match self.db.get(key).map_err(|e| StoreError::io("KvStore::get", None, std::io::Error::other(e)))? {
            Some(bytes) => Ok(self.serializer.decode(&bytes)),
            None => Ok(self.serializer.zero()),
        }
    }

    fn get_page(&self, page: u64) -> Result<Vec<u8>> {
        self.pages.get_page_bytes(page)
    }

    fn get_state_hash(&self) -> Result<Hash> {
        self.hash_tree.lock().hash_root()
    }

    fn flush(&self) -> Result<()> {
        // Forces every dirty page hash to be committed (spec.md §4.2); the
        // engine's own fsync durability is its own responsibility
        // (spec.md §9 open question, resolved in DESIGN.md).
        self.hash_tree.lock().hash_root()?;
        self.db.flush().map_err(|e| StoreError::io("KvStore::flush", None, std::io::Error::other(e)))
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
        let snapshot = self.db.snapshot();
        Ok(SnapshotHandle::new(Box::new(KvSnapshotSource::new(snapshot, self.tablespace.0, self.geometry, metadata))))
    }

    fn restore(&self, source: &mut dyn SnapshotSource) -> Result<()> {
        let metadata = source.metadata();
        let expected_bf = self.hash_tree.lock().get_branching_factor();
        if metadata.branching_factor != expected_bf {
            return Err(StoreError::IncompatibleSnapshot { expected: expected_bf, found: metadata.branching_factor });
        }
        self.hash_tree.lock().reset();
        let item_size = self.serializer.size();
        let items_per_page = crate::util::num::usize_to_u64(self.geometry.items_per_page);
        for i in 0..metadata.num_pages {
            let part = source.get_part(i)?;
            if part.len() != self.geometry.hashed_page_size {
                return Err(StoreError::corruption(
                    "KvStore::restore",
                    format!("part {i} length {} != hashedPageSize {}", part.len(), self.geometry.hashed_page_size),
                ));
            }
            for j in 0..items_per_page {
                let id = i * items_per_page + j;
                let slot = match crate::util::num::u64_to_usize(j) {
                    Some(v) => v * item_size,
                    None => return Err(StoreError::corruption("KvStore::restore", "page offset overflowed usize")),
                };
                let v = self.serializer.decode(&part[slot..slot + item_size]);
                self.set(id, &v)?;
            }
        }
        let got = self.hash_tree.lock().hash_root()?;
        if got != metadata.root_hash {
            log::error!("KvStore::restore: state hash after restore did not match snapshot root");
            return Err(StoreError::corruption("KvStore::restore", "state hash after restore does not match snapshot root"));
        }
        Ok(())
    }
}
