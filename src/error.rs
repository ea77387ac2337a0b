use thiserror::Error;

/// Errors surfaced by a [`crate::store::Store`] and its collaborators.
///
/// Each variant carries enough context (operation, page or identifier, inner
/// cause) to diagnose the failure, per the propagation policy: fail fast,
/// no internal retry, no silent recovery.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid construction parameters. Reported at construction only.
    #[error("config error in {operation}: {reason}")]
    Config { operation: &'static str, reason: String },

    /// Underlying storage read/write/fsync failure.
    #[error("I/O error during {operation} (page {page:?}): {source}")]
    Io { operation: &'static str, page: Option<u64>, #[source] source: std::io::Error },

    /// Short read that is not EOF, malformed snapshot metadata, or a part
    /// length mismatch. Fatal to the current operation; never auto-recovered.
    #[error("corruption detected during {operation}: {reason}")]
    Corruption { operation: &'static str, reason: String },

    /// Branching factor mismatch between a snapshot and the restore target.
    #[error("incompatible snapshot: expected branching factor {expected}, got {found}")]
    IncompatibleSnapshot { expected: u16, found: u16 },
}

impl StoreError {
    #[must_use]
    pub fn io(operation: &'static str, page: Option<u64>, source: std::io::Error) -> Self {
        Self::Io { operation, page, source }
    }

    #[must_use]
    pub fn config(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Config { operation, reason: reason.into() }
    }

    #[must_use]
    pub fn corruption(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Corruption { operation, reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
