//! The `PageProvider` capability: how the [`crate::hash_tree::HashTree`]
//! asks for page bytes without owning or knowing about the backend that
//! stores them. A `Store` passes a reference to itself (or a thin facade
//! over itself) as this capability, resolving the otherwise-cyclic
//! Store-needs-HashTree / HashTree-needs-Store dependency via injection.

use crate::error::Result;

/// Read-only capability: fetch the packed `hashedPageSize` bytes of page `p`.
/// Pages beyond the active region return zero-filled bytes.
pub trait PageProvider: Send + Sync {
    /// # Errors
    /// Returns [`crate::error::StoreError`] if the underlying read fails.
    fn get_page_bytes(&self, page: u64) -> Result<Vec<u8>>;
}
