//! Lazy branching hash reduction over page contents (spec.md §4.1).
//!
//! Layer 0 holds one hash per active page. Layer `k > 0` holds one hash
//! per group of `branchingFactor` consecutive layer-`k-1` children, with
//! missing children treated as the all-zero hash. `HashRoot` only
//! recomputes nodes that were flagged dirty since the last call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::page_provider::PageProvider;

pub const HASH_SIZE: usize = 32;
pub type Hash = [u8; HASH_SIZE];

pub const ZERO_HASH: Hash = [0u8; HASH_SIZE];

/// `SHA256(bytes)`, the one hash primitive every layer and the snapshot
/// wire format builds on.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Lazy Merkle reduction over a `PageProvider`'s page bytes.
pub struct HashTree {
    branching_factor: u16,
    num_pages: u64,
    /// `cache[layer][index]` is the last-computed hash of that node.
    cache: Vec<HashMap<u64, Hash>>,
    /// `dirty[layer]` is the set of stale node indices at that layer.
    dirty: Vec<HashSet<u64>>,
    provider: Arc<dyn PageProvider>,
}

impl HashTree {
    #[must_use]
    pub fn new(branching_factor: u16, provider: Arc<dyn PageProvider>) -> Self {
        Self {
            branching_factor,
            num_pages: 0,
            cache: vec![HashMap::new()],
            dirty: vec![HashSet::new()],
            provider,
        }
    }

    #[must_use]
    pub const fn get_branching_factor(&self) -> u16 {
        self.branching_factor
    }

    /// Tells the tree how many pages are currently active. Backends call
    /// this whenever `numPages` grows; it never decreases except via
    /// [`HashTree::reset`].
    pub fn set_num_pages(&mut self, n: u64) {
        if n > self.num_pages {
            self.num_pages = n;
        }
    }

    #[must_use]
    pub const fn num_pages(&self) -> u64 {
        self.num_pages
    }

    /// Flags page `p` dirty at layer 0. Propagation to parent layers
    /// happens lazily, inside `HashRoot`/`GetPageHash`, not here.
    pub fn mark_updated(&mut self, page: u64) {
        self.ensure_layer(0);
        self.dirty[0].insert(page);
    }

    /// Clears all hashes and dirty flags and resets `numPages` to zero.
    /// Used before `Restore`.
    pub fn reset(&mut self) {
        self.cache = vec![HashMap::new()];
        self.dirty = vec![HashSet::new()];
        self.num_pages = 0;
    }

    /// Returns the layer-0 hash for page `p`. Pages at or beyond
    /// `numPages` have the all-zero hash by definition.
    ///
    /// # Errors
    /// Returns an error if the backing page read fails.
    pub fn get_page_hash(&mut self, page: u64) -> Result<Hash> {
        if page >= self.num_pages {
            return Ok(ZERO_HASH);
        }
        self.process_layer(0)?;
        Ok(self.cache[0].get(&page).copied().unwrap_or(ZERO_HASH))
    }

    /// Returns the root hash, lazily recomputing only dirty nodes.
    /// All zeros if there are zero active pages.
    ///
    /// # Errors
    /// Returns an error if a page fetch from the provider fails; tree
    /// state is left consistent (dirty flags preserved, no partial writes).
    pub fn hash_root(&mut self) -> Result<Hash> {
        if self.num_pages == 0 {
            return Ok(ZERO_HASH);
        }
        let mut layer = 0usize;
        loop {
            self.process_layer(layer)?;
            let len = self.layer_len(layer);
            if len <= 1 {
                return Ok(self.cache[layer].get(&0).copied().unwrap_or(ZERO_HASH));
            }
            layer += 1;
        }
    }

    fn ensure_layer(&mut self, layer: usize) {
        while self.cache.len() <= layer {
            self.cache.push(HashMap::new());
            self.dirty.push(HashSet::new());
        }
    }

    /// Number of nodes at `layer`, derived from `numPages` and the
    /// branching factor: `layer_len(0) = numPages`,
    /// `layer_len(k) = ceil(layer_len(k-1) / branchingFactor)`.
    fn layer_len(&self, layer: usize) -> u64 {
        let mut len = self.num_pages;
        for _ in 0..layer {
            if len <= 1 {
                return len;
            }
            len = len.div_ceil(u64::from(self.branching_factor));
        }
        len
    }

    fn process_layer(&mut self, layer: usize) -> Result<()> {
        self.ensure_layer(layer);
        let len = self.layer_len(layer);
        let dirty_indices: Vec<u64> =
            self.dirty[layer].iter().copied().filter(|&n| n < len).collect();
        for n in dirty_indices {
            let h = if layer == 0 {
                self.compute_page_hash(n)?
            } else {
                self.compute_internal_hash(layer, n)
            };
            self.cache[layer].insert(n, h);
            self.dirty[layer].remove(&n);
            let parent = n / u64::from(self.branching_factor);
            self.ensure_layer(layer + 1);
            self.dirty[layer + 1].insert(parent);
        }
        Ok(())
    }

    fn compute_page_hash(&self, page: u64) -> Result<Hash> {
        let bytes = self.provider.get_page_bytes(page)?;
        Ok(hash_bytes(&bytes))
    }

    fn compute_internal_hash(&self, layer: usize, n: u64) -> Hash {
        let bf = u64::from(self.branching_factor);
        let child_len = self.layer_len(layer - 1);
        let mut buf = Vec::with_capacity(HASH_SIZE * crate::util::num::u16_to_usize(self.branching_factor));
        for i in 0..bf {
            let idx = n * bf + i;
            let h = if idx < child_len {
                self.cache[layer - 1].get(&idx).copied().unwrap_or(ZERO_HASH)
            } else {
                ZERO_HASH
            };
            buf.extend_from_slice(&h);
        }
        let mut hasher = Sha256::new();
        hasher.update(&buf);
        hasher.finalize().into()
    }
}
