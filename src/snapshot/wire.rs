//! Bit-exact wire encoding for snapshot metadata and root verification
//! (spec.md §4.3, §6). Hand-rolled fixed-width packing: the 42-byte
//! metadata layout is not representable as a bincode default encoding.

use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};
use crate::hash_tree::{HASH_SIZE, Hash, ZERO_HASH, hash_bytes};

use super::SnapshotSource;

pub const METADATA_SIZE: usize = HASH_SIZE + 2 + 8;

/// `rootHash[32] || branchingFactor(u16 LE) || numPages(u64 LE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub root_hash: Hash,
    pub branching_factor: u16,
    pub num_pages: u64,
}

impl SnapshotMetadata {
    #[must_use]
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut out = [0u8; METADATA_SIZE];
        out[0..HASH_SIZE].copy_from_slice(&self.root_hash);
        out[HASH_SIZE..HASH_SIZE + 2].copy_from_slice(&self.branching_factor.to_le_bytes());
        out[HASH_SIZE + 2..].copy_from_slice(&self.num_pages.to_le_bytes());
        out
    }

    /// # Errors
    /// Returns [`StoreError::Corruption`] if `bytes` is not exactly
    /// [`METADATA_SIZE`] bytes long.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != METADATA_SIZE {
            return Err(StoreError::corruption(
                "SnapshotMetadata::decode",
                format!("expected {METADATA_SIZE} bytes, got {}", bytes.len()),
            ));
        }
        let mut root_hash: Hash = ZERO_HASH;
        root_hash.copy_from_slice(&bytes[0..HASH_SIZE]);
        let branching_factor = u16::from_le_bytes([bytes[HASH_SIZE], bytes[HASH_SIZE + 1]]);
        let mut num_pages_bytes = [0u8; 8];
        num_pages_bytes.copy_from_slice(&bytes[HASH_SIZE + 2..]);
        let num_pages = u64::from_le_bytes(num_pages_bytes);
        Ok(Self { root_hash, branching_factor, num_pages })
    }
}

/// Reduces `num_pages` leaf (part) proofs with the same branching-factor
/// tree reduction as [`crate::hash_tree::HashTree`], for snapshot root
/// verification independent of any live store.
#[must_use]
pub fn reduce_proofs(proofs: &[Hash], branching_factor: u16) -> Hash {
    if proofs.is_empty() {
        return ZERO_HASH;
    }
    let bf = crate::util::num::u16_to_usize(branching_factor);
    let mut layer: Vec<Hash> = proofs.to_vec();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(bf));
        for chunk in layer.chunks(bf) {
            let mut buf = Vec::with_capacity(HASH_SIZE * bf);
            for i in 0..bf {
                buf.extend_from_slice(chunk.get(i).unwrap_or(&ZERO_HASH));
            }
            let mut hasher = Sha256::new();
            hasher.update(&buf);
            next.push(hasher.finalize().into());
        }
        layer = next;
    }
    layer[0]
}

/// `SHA256(part_bytes) == proof_hash`.
#[must_use]
pub fn verify_part(part_bytes: &[u8], proof_hash: &Hash) -> bool {
    &hash_bytes(part_bytes) == proof_hash
}

/// A stateless verifier bound to one snapshot's metadata (spec.md §6,
/// `GetSnapshotVerifier(metadata)`): checks a part against its proof, and
/// reduces a full set of proofs to confirm the root, without touching a
/// live store.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotVerifier {
    metadata: SnapshotMetadata,
}

impl SnapshotVerifier {
    #[must_use]
    pub const fn new(metadata: SnapshotMetadata) -> Self {
        Self { metadata }
    }

    #[must_use]
    pub const fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    #[must_use]
    pub fn verify_part(&self, part_bytes: &[u8], proof: &Hash) -> bool {
        verify_part(part_bytes, proof)
    }

    #[must_use]
    pub fn verify_root(&self, proofs: &[Hash]) -> bool {
        reduce_proofs(proofs, self.metadata.branching_factor) == self.metadata.root_hash
    }
}

/// Serializes a full snapshot into the cross-instance wire format (spec.md
/// §6): the 42-byte metadata, then for each part in ascending order, its
/// 32-byte proof followed by its `hashedPageSize` bytes.
///
/// # Errors
/// Returns [`crate::error::StoreError`] on I/O failure reading the source.
pub fn encode_snapshot(source: &mut dyn SnapshotSource, hashed_page_size: usize) -> Result<Vec<u8>> {
    let metadata = source.metadata();
    let mut out = Vec::with_capacity(
        METADATA_SIZE + (HASH_SIZE + hashed_page_size) * crate::util::num::u64_to_usize_saturating(metadata.num_pages),
    );
    out.extend_from_slice(&metadata.encode());
    for i in 0..metadata.num_pages {
        out.extend_from_slice(&source.get_proof(i)?);
        out.extend_from_slice(&source.get_part(i)?);
    }
    Ok(out)
}

/// Checks every part of a snapshot against its own proof, and the
/// reduction of all proofs against the metadata's root hash.
///
/// # Errors
/// Returns [`crate::error::StoreError`] on I/O failure reading the source.
pub fn verify_snapshot(source: &mut dyn SnapshotSource) -> Result<bool> {
    let metadata = source.metadata();
    let mut proofs = Vec::with_capacity(crate::util::num::u64_to_usize_saturating(metadata.num_pages));
    for i in 0..metadata.num_pages {
        let part = source.get_part(i)?;
        let proof = source.get_proof(i)?;
        if !verify_part(&part, &proof) {
            return Ok(false);
        }
        proofs.push(proof);
    }
    Ok(reduce_proofs(&proofs, metadata.branching_factor) == metadata.root_hash)
}

/// A [`SnapshotSource`] backed by a fully materialized wire-format buffer,
/// e.g. snapshot data received from a remote peer (spec.md §4.3
/// "cross-instance transfer").
pub struct WireSnapshotSource {
    metadata: SnapshotMetadata,
    hashed_page_size: usize,
    bytes: Vec<u8>,
}

impl WireSnapshotSource {
    /// # Errors
    /// Returns [`StoreError::Corruption`] if `bytes` does not match the
    /// length its own metadata declares.
    pub fn decode(bytes: Vec<u8>, hashed_page_size: usize) -> Result<Self> {
        if bytes.len() < METADATA_SIZE {
            return Err(StoreError::corruption("WireSnapshotSource::decode", "buffer shorter than metadata"));
        }
        let metadata = SnapshotMetadata::decode(&bytes[..METADATA_SIZE])?;
        let expected_len =
            METADATA_SIZE + (HASH_SIZE + hashed_page_size) * crate::util::num::u64_to_usize_saturating(metadata.num_pages);
        if bytes.len() != expected_len {
            return Err(StoreError::corruption(
                "WireSnapshotSource::decode",
                format!("buffer length {} does not match expected {expected_len}", bytes.len()),
            ));
        }
        Ok(Self { metadata, hashed_page_size, bytes })
    }

    fn part_offset(&self, i: u64) -> usize {
        METADATA_SIZE + crate::util::num::u64_to_usize_saturating(i) * (HASH_SIZE + self.hashed_page_size)
    }
}

impl SnapshotSource for WireSnapshotSource {
    fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    fn get_part(&mut self, i: u64) -> Result<Vec<u8>> {
        if i >= self.metadata.num_pages {
            return Err(StoreError::corruption("WireSnapshotSource::get_part", format!("part {i} out of range")));
        }
        let start = self.part_offset(i) + HASH_SIZE;
        Ok(self.bytes[start..start + self.hashed_page_size].to_vec())
    }

    fn get_proof(&mut self, i: u64) -> Result<Hash> {
        if i >= self.metadata.num_pages {
            return Err(StoreError::corruption("WireSnapshotSource::get_proof", format!("proof {i} out of range")));
        }
        let start = self.part_offset(i);
        let mut h: Hash = ZERO_HASH;
        h.copy_from_slice(&self.bytes[start..start + HASH_SIZE]);
        Ok(h)
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips() {
        let m = SnapshotMetadata { root_hash: [7u8; HASH_SIZE], branching_factor: 3, num_pages: 42 };
        let bytes = m.encode();
        assert_eq!(bytes.len(), METADATA_SIZE);
        assert_eq!(SnapshotMetadata::decode(&bytes).unwrap(), m);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(SnapshotMetadata::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn reduce_proofs_of_empty_is_zero() {
        assert_eq!(reduce_proofs(&[], 3), ZERO_HASH);
    }

    #[test]
    fn reduce_proofs_single_part_is_identity() {
        let h = [5u8; HASH_SIZE];
        assert_eq!(reduce_proofs(&[h], 3), h);
    }

    #[test]
    fn verify_part_checks_hash() {
        let bytes = vec![1u8, 2, 3];
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let hash: Hash = hasher.finalize().into();
        assert!(verify_part(&bytes, &hash));
        assert!(!verify_part(&[9u8], &hash));
    }

    struct FixedSource {
        metadata: SnapshotMetadata,
        parts: Vec<Vec<u8>>,
    }

    impl SnapshotSource for FixedSource {
        fn metadata(&self) -> SnapshotMetadata {
            self.metadata
        }
        fn get_part(&mut self, i: u64) -> Result<Vec<u8>> {
            Ok(self.parts[i as usize].clone())
        }
        fn get_proof(&mut self, i: u64) -> Result<Hash> {
            Ok(hash_bytes(&self.parts[i as usize]))
        }
        fn release(&mut self) {}
    }

    #[test]
    fn wire_round_trip_preserves_parts_and_proofs() {
        let parts = vec![vec![1u8; 8], vec![2u8; 8]];
        let proofs: Vec<Hash> = parts.iter().map(|p| hash_bytes(p)).collect();
        let root = reduce_proofs(&proofs, 3);
        let metadata = SnapshotMetadata { root_hash: root, branching_factor: 3, num_pages: 2 };
        let mut source = FixedSource { metadata, parts: parts.clone() };

        let encoded = encode_snapshot(&mut source, 8).unwrap();
        assert_eq!(encoded.len(), METADATA_SIZE + 2 * (HASH_SIZE + 8));

        let mut decoded = WireSnapshotSource::decode(encoded, 8).unwrap();
        assert_eq!(decoded.metadata(), metadata);
        assert_eq!(decoded.get_part(0).unwrap(), parts[0]);
        assert_eq!(decoded.get_part(1).unwrap(), parts[1]);
        assert_eq!(decoded.get_proof(0).unwrap(), proofs[0]);
        assert!(verify_snapshot(&mut decoded).unwrap());
    }

    #[test]
    fn wire_decode_rejects_truncated_buffer() {
        assert!(WireSnapshotSource::decode(vec![0u8; METADATA_SIZE], 8).is_err());
    }

    #[test]
    fn snapshot_verifier_rejects_tampered_part() {
        let parts = vec![vec![3u8; 4]];
        let proofs: Vec<Hash> = parts.iter().map(|p| hash_bytes(p)).collect();
        let root = reduce_proofs(&proofs, 2);
        let metadata = SnapshotMetadata { root_hash: root, branching_factor: 2, num_pages: 1 };
        let verifier = SnapshotVerifier::new(metadata);
        assert!(verifier.verify_part(&parts[0], &proofs[0]));
        assert!(!verifier.verify_part(&[0u8; 4], &proofs[0]));
        assert!(verifier.verify_root(&proofs));
    }
}
