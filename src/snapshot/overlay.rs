//! Copy-on-write snapshot overlay chain for file-backed backends
//! (spec.md §4.3, §9 "Copy-on-write overlays as a linked list").
//!
//! Each live snapshot owns one [`Overlay`] link. On a write to page `p`,
//! the backend calls [`OverlayChain::capture_before_write`] with the
//! page's pre-write bytes and hash; every overlay that has not yet seen
//! `p` absorbs that same pre-image, since "not yet captured" means no
//! write has touched `p` since that overlay (or any older one) was
//! created.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::hash_tree::{Hash, hash_bytes};

use super::{SnapshotMetadata, SnapshotSource};

struct OverlayData {
    pages: HashMap<u64, (Vec<u8>, Hash)>,
}

/// One link in the chain: the state a single live snapshot needs in
/// order to read pages as of its creation time.
pub struct Overlay {
    pub metadata: SnapshotMetadata,
    data: Mutex<OverlayData>,
}

impl Overlay {
    fn new(metadata: SnapshotMetadata) -> Self {
        Self { metadata, data: Mutex::new(OverlayData { pages: HashMap::new() }) }
    }

    fn contains(&self, page: u64) -> bool {
        self.data.lock().pages.contains_key(&page)
    }

    fn deposit_if_absent(&self, page: u64, bytes: &[u8], hash: Hash) {
        self.data.lock().pages.entry(page).or_insert_with(|| (bytes.to_vec(), hash));
    }

    fn get(&self, page: u64) -> Option<(Vec<u8>, Hash)> {
        self.data.lock().pages.get(&page).cloned()
    }
}

/// Capability for reading a page's current bytes/hash straight from the
/// live backend, used when an overlay has not captured a pre-image for
/// that page (because it has not been written since the overlay's
/// snapshot was created).
pub trait LivePageSource: Send + Sync {
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn live_page_bytes(&self, page: u64) -> Result<Vec<u8>>;

    /// Defaults to hashing [`Self::live_page_bytes`]. Backends whose hash
    /// tree might lag a not-yet-flushed write (the cached paged-file pool)
    /// rely on this default rather than reading a cached tree hash that
    /// could be stale.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError`] on I/O failure.
    fn live_page_hash(&self, page: u64) -> Result<Hash> {
        Ok(hash_bytes(&self.live_page_bytes(page)?))
    }
}

/// All overlays currently live against one store, oldest first.
#[derive(Default)]
pub struct OverlayChain {
    links: Mutex<Vec<Arc<Overlay>>>,
}

impl OverlayChain {
    #[must_use]
    pub fn new() -> Self {
        Self { links: Mutex::new(Vec::new()) }
    }

    pub fn create(&self, metadata: SnapshotMetadata) -> Arc<Overlay> {
        let overlay = Arc::new(Overlay::new(metadata));
        self.links.lock().push(overlay.clone());
        overlay
    }

    pub fn release(&self, overlay: &Arc<Overlay>) {
        self.links.lock().retain(|o| !Arc::ptr_eq(o, overlay));
    }

    /// Drops every live overlay. Called on `Restore`, which invalidates
    /// all prior snapshots against the store being restored into.
    pub fn clear(&self) {
        self.links.lock().clear();
    }

    /// Must be called by the backend with the page's pre-write bytes and
    /// hash before the write to `page` proceeds. A no-op if no snapshot
    /// is live, or if the newest overlay already holds a pre-image for
    /// `page` (meaning this write is not the first since any live
    /// snapshot was created).
    pub fn capture_before_write(
        &self,
        page: u64,
        pre_image: impl FnOnce() -> Result<(Vec<u8>, Hash)>,
    ) -> Result<()> {
        let links = self.links.lock();
        let Some(newest) = links.last() else { return Ok(()) };
        if newest.contains(page) {
            return Ok(());
        }
        let (bytes, hash) = pre_image()?;
        for overlay in links.iter() {
            overlay.deposit_if_absent(page, &bytes, hash);
        }
        Ok(())
    }

    /// Reads `page` as one `overlay` saw it at creation time: the captured
    /// pre-image if present, otherwise a read-through to `live`. Holds the
    /// same lock [`Self::capture_before_write`] holds across both the
    /// presence check and the read-through, so a concurrent write cannot
    /// deposit its pre-image and then complete its on-disk write in the
    /// gap between this method's check and its fallback read (spec.md §5).
    fn read_part_as_of(&self, overlay: &Overlay, live: &dyn LivePageSource, page: u64) -> Result<Vec<u8>> {
        let _links = self.links.lock();
        if let Some((bytes, _)) = overlay.get(page) {
            return Ok(bytes);
        }
        live.live_page_bytes(page)
    }

    /// As [`Self::read_part_as_of`], but for the page's proof hash.
    fn read_proof_as_of(&self, overlay: &Overlay, live: &dyn LivePageSource, page: u64) -> Result<Hash> {
        let _links = self.links.lock();
        if let Some((_, hash)) = overlay.get(page) {
            return Ok(hash);
        }
        live.live_page_hash(page)
    }
}

/// A [`SnapshotSource`] backed by one [`Overlay`] link plus read-through
/// to the live store for pages it has not captured.
pub struct OverlaySnapshotSource {
    overlay: Arc<Overlay>,
    chain: Arc<OverlayChain>,
    live: Arc<dyn LivePageSource>,
}

impl OverlaySnapshotSource {
    #[must_use]
    pub fn new(overlay: Arc<Overlay>, chain: Arc<OverlayChain>, live: Arc<dyn LivePageSource>) -> Self {
        Self { overlay, chain, live }
    }
}

impl SnapshotSource for OverlaySnapshotSource {
    fn metadata(&self) -> SnapshotMetadata {
        self.overlay.metadata
    }

    fn get_part(&mut self, i: u64) -> Result<Vec<u8>> {
        self.chain.read_part_as_of(&self.overlay, &*self.live, i)
    }

    fn get_proof(&mut self, i: u64) -> Result<Hash> {
        self.chain.read_proof_as_of(&self.overlay, &*self.live, i)
    }

    fn release(&mut self) {
        self.chain.release(&self.overlay);
    }
}
