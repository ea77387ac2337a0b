//! The cached paged-file backend (spec.md §4.2, "Cached paged-file
//! backend"): same on-disk layout as the single-file backend, mediated
//! by a bounded in-memory page pool with a pluggable eviction policy.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::eviction::EvictionPolicy;
use crate::hash_tree::{Hash, HashTree, hash_bytes};
use crate::page::{PageBuffer, PageGeometry};
use crate::page_provider::PageProvider;
use crate::serializer::Serializer;
use crate::snapshot::{
    LivePageSource, OverlayChain, OverlaySnapshotSource, SnapshotHandle, SnapshotMetadata, SnapshotSource,
};
use crate::util::fsutil::{read_zero_padded, write_zero_padded};

use super::Store;

/// Reads straight through to disk, bypassing the pool. Valid as the
/// `HashTree`'s page source because `get_state_hash` always writes back
/// every dirty resident page before asking the tree to recompute, and
/// valid as the overlay's read-through fallback for the same reason: a
/// page an overlay has not captured has not been written since its
/// snapshot was created, so whatever is on disk is still that page's
/// content as of snapshot time.
struct DiskPages {
    file: Mutex<File>,
    geometry: PageGeometry,
}

impl DiskPages {
    fn read_hashed(&self, page: u64) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        let offset = page * crate::util::num::usize_to_u64(self.geometry.page_size);
        read_zero_padded(&mut file, offset, self.geometry.hashed_page_size)
            .map_err(|e| StoreError::io("CachedFileStore::get_page", Some(page), e))
    }
}

impl PageProvider for DiskPages {
    fn get_page_bytes(&self, page: u64) -> Result<Vec<u8>> {
        self.read_hashed(page)
    }
}

impl LivePageSource for DiskPages {
    fn live_page_bytes(&self, page: u64) -> Result<Vec<u8>> {
        self.read_hashed(page)
    }
}

struct PoolState {
    resident: HashMap<u64, PageBuffer>,
    free_buffers: Vec<PageBuffer>,
    policy: Box<dyn EvictionPolicy>,
    hash_tree: HashTree,
}

/// Cached paged-file backend: a bounded pool of resident pages over the
/// same flat-file layout as [`super::FileStore`].
pub struct CachedFileStore<V> {
    geometry: PageGeometry,
    serializer: Arc<dyn Serializer<V>>,
    disk: Arc<DiskPages>,
    pool_size: usize,
    state: Mutex<PoolState>,
    overlay_chain: Arc<OverlayChain>,
}

impl<V> CachedFileStore<V> {
    /// # Errors
    /// Returns [`StoreError::Config`] if `page_size` is smaller than the
    /// serializer's value size, or [`StoreError::Io`] if the file cannot
    /// be opened.
    pub fn open(
        path: &Path,
        page_size: usize,
        branching_factor: u16,
        pool_size: usize,
        policy: Box<dyn EvictionPolicy>,
        serializer: Arc<dyn Serializer<V>>,
    ) -> Result<Self> {
        let geometry = PageGeometry::new(page_size, serializer.size())?;
        let file = crate::util::fsutil::open_rw_no_trunc(path).map_err(|e| {
            log::error!("CachedFileStore::open failed to open {}: {e}", path.display());
            StoreError::io("CachedFileStore::open", None, e)
        })?;
        let file_len = file.metadata().map_err(|e| StoreError::io("CachedFileStore::open", None, e))?.len();
        let disk = Arc::new(DiskPages { file: Mutex::new(file), geometry });
        let mut hash_tree = HashTree::new(branching_factor, disk.clone());
        let existing_pages = file_len.div_ceil(crate::util::num::usize_to_u64(geometry.page_size));
        if existing_pages > 0 {
            hash_tree.set_num_pages(existing_pages);
            for p in 0..existing_pages {
                hash_tree.mark_updated(p);
            }
        }
        Ok(Self {
            geometry,
            serializer,
            disk,
            pool_size: pool_size.max(1),
            state: Mutex::new(PoolState { resident: HashMap::new(), free_buffers: Vec::new(), policy, hash_tree }),
            overlay_chain: Arc::new(OverlayChain::new()),
        })
    }

    /// # Errors
    /// Returns [`StoreError::Config`] if `config.page_size` is smaller
    /// than the serializer's value size, or [`StoreError::Io`] if the
    /// file cannot be opened.
    pub fn open_with_config(
        path: &Path,
        pool_size: usize,
        policy: Box<dyn EvictionPolicy>,
        config: super::StoreConfig<V>,
    ) -> Result<Self> {
        Self::open(path, config.page_size, config.branching_factor, pool_size, policy, config.serializer)
    }

    /// Brings `page` into the pool if not already resident, evicting a
    /// victim (writing it back if dirty) when the pool is full.
    fn ensure_resident(&self, state: &mut PoolState, page: u64) -> Result<()> {
        if state.resident.contains_key(&page) {
            return Ok(());
        }
        let mut buffer = if let Some(b) = state.free_buffers.pop() {
            b
        } else if state.resident.len() < self.pool_size {
            PageBuffer::zeroed(self.geometry.page_size)
        } else {
            let victim = state.policy.page_to_evict().ok_or_else(|| {
                log::error!("CachedFileStore::ensure_resident: pool full but eviction policy returned no victim");
                StoreError::corruption("CachedFileStore::ensure_resident", "pool full but no eviction victim available")
            })?;
            let mut victim_buf = state
                .resident
                .remove(&victim)
                .expect("eviction policy returned a page id that is not resident");
            if victim_buf.dirty {
                let mut file = self.disk.file.lock();
                victim_buf.store(&mut file, victim, self.geometry.page_size).map_err(|e| {
                    log::error!("CachedFileStore::ensure_resident: write-back of dirty victim page {victim} failed: {e}");
                    e
                })?;
                drop(file);
                state.hash_tree.mark_updated(victim);
            }
            state.policy.removed(victim);
            victim_buf
        };
        {
            let mut file = self.disk.file.lock();
            buffer.load(&mut file, page, self.geometry.page_size)?;
        }
        state.resident.insert(page, buffer);
        Ok(())
    }

    fn current_page_bytes_and_hash(&self, state: &mut PoolState, page: u64) -> Result<(Vec<u8>, Hash)> {
        self.ensure_resident(state, page)?;
        let buf = state.resident.get(&page).expect("just ensured resident");
        let bytes = buf.data[..self.geometry.hashed_page_size].to_vec();
        let hash = hash_bytes(&bytes);
        Ok((bytes, hash))
    }

    /// Forces every dirty resident page to disk and marks it dirty in the
    /// hash tree, then computes the root — spec.md's `GetStateHash`
    /// contract for this backend. Takes an already-held pool lock so it
    /// can be shared between `get_state_hash` and `create_snapshot`.
    fn compute_state_hash_locked(&self, state: &mut PoolState) -> Result<Hash> {
        let dirty_ids: Vec<u64> =
            state.resident.iter().filter(|(_, b)| b.dirty).map(|(&p, _)| p).collect();
        {
            let mut file = self.disk.file.lock();
            for &p in &dirty_ids {
                let buf = state.resident.get_mut(&p).expect("dirty id collected from resident map");
                buf.store(&mut file, p, self.geometry.page_size)?;
            }
        }
        for p in dirty_ids {
            state.hash_tree.mark_updated(p);
        }
        state.hash_tree.hash_root()
    }
}

impl<V: Send + Sync> Store<V> for CachedFileStore<V> {
    fn set(&self, id: u64, v: &V) -> Result<()> {
        let (page, slot) = self.geometry.locate(id);
        let mut state = self.state.lock();
        self.overlay_chain.capture_before_write(page, || self.current_page_bytes_and_hash(&mut state, page))?;
        self.ensure_resident(&mut state, page)?;
        let item_size = self.serializer.size();
        let buf = state.resident.get_mut(&page).expect("just ensured resident");
        self.serializer.encode(v, &mut buf.data[slot..slot + item_size]);
        buf.dirty = true;
        state.policy.written(page);
        state.hash_tree.set_num_pages(self.geometry.page_count_for(id));
        state.hash_tree.mark_updated(page);
        Ok(())
    }

    fn get(&self, id: u64) -> Result<V> {
        let (page, slot) = self.geometry.locate(id);
        let mut state = self.state.lock();
        self.ensure_resident(&mut state, page)?;
        state.policy.read(page);
        let item_size = self.serializer.size();
        let buf = state.resident.get(&page).expect("just ensured resident");
        Ok(self.serializer.decode(&buf.data[slot..slot + item_size]))
    }

    fn get_page(&self, page: u64) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        self.ensure_resident(&mut state, page)?;
        state.policy.read(page);
        let buf = state.resident.get(&page).expect("just ensured resident");
        Ok(buf.data[..self.geometry.hashed_page_size].to_vec())
    }

    fn get_state_hash(&self) -> Result<Hash> {
        let mut state = self.state.lock();
        self.compute_state_hash_locked(&mut state)
    }

    fn flush(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            self.compute_state_hash_locked(&mut state)?;
        }
        self.disk.file.lock().sync_all().map_err(|e| StoreError::io("CachedFileStore::flush", None, e))
    }

    fn close(&self) -> Result<()> {
        self.flush()
    }

    fn num_pages(&self) -> u64 {
        self.state.lock().hash_tree.num_pages()
    }

    fn create_snapshot(&self) -> Result<SnapshotHandle<'_>> {
        let mut state = self.state.lock();
        let root_hash = self.compute_state_hash_locked(&mut state)?;
        let num_pages = state.hash_tree.num_pages();
        let branching_factor = state.hash_tree.get_branching_factor();
        let metadata = SnapshotMetadata { root_hash, branching_factor, num_pages };
        let overlay = self.overlay_chain.create(metadata);
        drop(state);
        let source = OverlaySnapshotSource::new(overlay, self.overlay_chain.clone(), self.disk.clone());
        Ok(SnapshotHandle::new(Box::new(source)))
    }

    fn restore(&self, source: &mut dyn SnapshotSource) -> Result<()> {
        let metadata = source.metadata();
        let mut state = self.state.lock();
        if metadata.branching_factor != state.hash_tree.get_branching_factor() {
            return Err(StoreError::IncompatibleSnapshot {
                expected: state.hash_tree.get_branching_factor(),
                found: metadata.branching_factor,
            });
        }
        state.hash_tree.reset();
        self.overlay_chain.clear();
        let resident_pages: Vec<u64> = state.resident.keys().copied().collect();
        for p in resident_pages {
            state.policy.removed(p);
        }
        state.resident.clear();
        state.hash_tree.set_num_pages(metadata.num_pages);
        {
            // Drop any pages past the snapshot's numPages so a restore from
            // a smaller snapshot does not leave stale trailing pages that
            // would resurface as extra pages on the next open.
            let mut file = self.disk.file.lock();
            let new_len = metadata.num_pages * crate::util::num::usize_to_u64(self.geometry.page_size);
            file.set_len(new_len).map_err(|e| StoreError::io("CachedFileStore::restore(truncate)", None, e))?;
        }
        for i in 0..metadata.num_pages {
            let part = source.get_part(i)?;
            if part.len() != self.geometry.hashed_page_size {
                return Err(StoreError::corruption(
                    "CachedFileStore::restore",
                    format!("part {i} length {} != hashedPageSize {}", part.len(), self.geometry.hashed_page_size),
                ));
            }
            {
                let mut file = self.disk.file.lock();
                let offset = i * crate::util::num::usize_to_u64(self.geometry.page_size);
                write_zero_padded(&mut file, offset, &part, self.geometry.page_size)
                    .map_err(|e| StoreError::io("CachedFileStore::restore", Some(i), e))?;
            }
            state.hash_tree.mark_updated(i);
        }
        let got = state.hash_tree.hash_root()?;
        if got != metadata.root_hash {
            log::error!("CachedFileStore::restore: state hash after restore did not match snapshot root");
            return Err(StoreError::corruption(
                "CachedFileStore::restore",
                "state hash after restore does not match snapshot root",
            ));
        }
        Ok(())
    }
}
