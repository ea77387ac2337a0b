//! Page geometry and the in-memory page buffer used by the cached
//! paged-file backend's pool.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Result, StoreError};

/// Derived layout constants for a store with a given `page_size` and item
/// (value) size. `pageSize >= sizeof(V)` is the one construction-time
/// invariant; everything else here is computed from it.
#[derive(Debug, Clone, Copy)]
pub struct PageGeometry {
    pub page_size: usize,
    pub item_size: usize,
    pub items_per_page: usize,
    /// `itemsPerPage * itemSize`: the prefix of a page included in its hash.
    pub hashed_page_size: usize,
}

impl PageGeometry {
    /// # Errors
    /// Returns [`StoreError::Config`] if `page_size < item_size`.
    pub fn new(page_size: usize, item_size: usize) -> Result<Self> {
        if item_size == 0 {
            return Err(StoreError::config("PageGeometry::new", "item size must be non-zero"));
        }
        if page_size < item_size {
            return Err(StoreError::config(
                "PageGeometry::new",
                format!("page_size {page_size} is smaller than value size {item_size}"),
            ));
        }
        let items_per_page = page_size / item_size;
        let hashed_page_size = items_per_page * item_size;
        Ok(Self { page_size, item_size, items_per_page, hashed_page_size })
    }

    /// Splits an identifier into its `(page, byte offset within page)` pair.
    #[must_use]
    pub fn locate(&self, id: u64) -> (u64, usize) {
        let items_per_page = crate::util::num::usize_to_u64(self.items_per_page);
        let page = id / items_per_page;
        // The remainder is always < items_per_page, which came from a
        // valid usize, so this narrowing cannot actually lose information.
        let offset = crate::util::num::u64_to_usize_saturating(id % items_per_page);
        (page, offset * self.item_size)
    }

    /// The page index one past the page containing `id` — i.e. the
    /// `numPages` value a store must reach to consider `id` active.
    #[must_use]
    pub fn page_count_for(&self, id: u64) -> u64 {
        self.locate(id).0 + 1
    }
}

/// An in-memory page buffer with a dirty flag, paired with a backing file.
/// Used by the cached paged-file backend's resident page pool.
pub struct PageBuffer {
    pub data: Vec<u8>,
    pub dirty: bool,
}

impl PageBuffer {
    #[must_use]
    pub fn zeroed(page_size: usize) -> Self {
        Self { data: vec![0u8; page_size], dirty: false }
    }

    /// Loads page `page_id` from `file` at offset `page_id * page_size`.
    /// A short read past end-of-file is zero-padded, not an error.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on any I/O failure other than EOF.
    pub fn load(&mut self, file: &mut File, page_id: u64, page_size: usize) -> Result<()> {
        self.data.clear();
        self.data.resize(page_size, 0);
        let offset = page_id * crate::util::num::usize_to_u64(page_size);
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io("PageBuffer::load(seek)", Some(page_id), e))?;
        let mut read_so_far = 0usize;
        loop {
            match file.read(&mut self.data[read_so_far..]) {
                Ok(0) => break,
                Ok(n) => read_so_far += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StoreError::io("PageBuffer::load(read)", Some(page_id), e)),
            }
        }
        self.dirty = false;
        Ok(())
    }

    /// Writes `page_size` bytes back to `file` at `page_id * page_size`.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] on any I/O failure.
    pub fn store(&mut self, file: &mut File, page_id: u64, page_size: usize) -> Result<()> {
        let offset = page_id * crate::util::num::usize_to_u64(page_size);
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io("PageBuffer::store(seek)", Some(page_id), e))?;
        file.write_all(&self.data)
            .map_err(|e| StoreError::io("PageBuffer::store(write)", Some(page_id), e))?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rejects_undersized_page() {
        assert!(PageGeometry::new(10, 32).is_err());
    }

    #[test]
    fn geometry_computes_items_per_page_and_padding() {
        let g = PageGeometry::new(100, 32).unwrap();
        assert_eq!(g.items_per_page, 3);
        assert_eq!(g.hashed_page_size, 96);
    }

    #[test]
    fn locate_matches_spec_formula() {
        let g = PageGeometry::new(64, 32).unwrap();
        assert_eq!(g.locate(0), (0, 0));
        assert_eq!(g.locate(1), (0, 32));
        assert_eq!(g.locate(2), (1, 0));
        assert_eq!(g.page_count_for(1), 1);
        assert_eq!(g.page_count_for(2), 2);
    }
}
