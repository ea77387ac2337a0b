//! Numeric utilities: safe and centralized integer conversions.
//!
//! Guidelines
//! - Prefer fallible conversions (returning Option<T>) when a value out of range should stop the operation (e.g., parsing a length before slicing).
//! - Prefer saturating conversions when best-effort is acceptable and clamping is safer than panicking or truncating.
//! - Prefer lossless widening with explicit helpers to keep call sites consistent and searchable.

#[inline]
#[must_use]
pub fn u64_to_usize(v: u64) -> Option<usize> {
    usize::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn u32_to_usize(v: u32) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}

#[inline]
#[must_use]
pub fn u16_to_usize(v: u16) -> usize {
    usize::from(v)
}

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    v as u64
}

#[inline]
#[must_use]
pub fn usize_checked_add(a: usize, b: usize) -> Option<usize> {
    a.checked_add(b)
}

/// Saturating `u64` -> `usize` narrowing, for index/count contexts where a
/// value this large would already be a corrupt-state bug rather than a
/// recoverable error.
#[inline]
#[must_use]
pub fn u64_to_usize_saturating(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}
