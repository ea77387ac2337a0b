//! A paginated, hash-verifiable key-value store: a mutable mapping from a
//! dense unsigned identifier to a fixed-size value, backed by interchangeable
//! storage engines that all agree on a branching Merkle-style hash over the
//! packed on-disk page bytes, with a snapshot/restore protocol for
//! bit-exact reconstruction across instances.
//!
//! # Modules
//!
//! - [`serializer`] — the `Serializer` capability: fixed-size encode/decode
//!   of a value to/from bytes.
//! - [`page`] — page geometry (`itemsPerPage`, `hashedPageSize`) and the
//!   in-memory page buffer used by the cached paged-file backend.
//! - [`page_provider`] — the `PageProvider` capability the hash tree uses
//!   to fetch page bytes without owning the backend that stores them.
//! - [`hash_tree`] — the lazy branching hash reduction over page contents.
//! - [`eviction`] — page-pool eviction policies (LRU, random-with-clean-
//!   preference) for the cached paged-file backend.
//! - [`store`] — the `Store` contract and its four backends: memory,
//!   single-file, cached paged-file, ordered-KV (RocksDB).
//! - [`snapshot`] — snapshot creation, the copy-on-write overlay chain,
//!   the wire format, and the restore protocol.
//! - [`cache`] — the write-through `id → V` cache wrapper.
//! - [`error`] — the `StoreError` type surfaced by every fallible operation.
//! - [`logger`] — optional log4rs setup for binaries embedding this crate.

#![forbid(unsafe_code)]

pub mod cache;
pub mod error;
pub mod eviction;
pub mod hash_tree;
pub mod logger;
pub mod page;
pub mod page_provider;
pub mod serializer;
pub mod snapshot;
pub mod store;
mod util;

pub use cache::CachedStore;
pub use error::{Result, StoreError};
pub use hash_tree::{HASH_SIZE, Hash, ZERO_HASH};
pub use page::PageGeometry;
pub use serializer::{ByteArray, Serializer, byte_array_serializer};
pub use store::{CachedFileStore, FileStore, KvStore, MemoryStore, Store, StoreConfig, Tablespace};
