//! Snapshot isolation and restore fidelity (spec.md §8, scenario 5):
//! a snapshot taken mid-stream must keep reflecting its creation-time
//! state through further writes on the source, and restoring it into a
//! fresh store must reproduce both the root hash and every value.

use pagestore::snapshot::{WireSnapshotSource, encode_snapshot};
use pagestore::{ByteArray, FileStore, MemoryStore, Store, byte_array_serializer};
use tempfile::NamedTempFile;

const PAGE_SIZE: usize = 64;
const BF: u16 = 3;
const HASHED_PAGE_SIZE: usize = 64;

#[test]
fn memory_snapshot_survives_post_creation_writes_and_restores_fidelity() {
    let a: MemoryStore<ByteArray<32>> = MemoryStore::new(PAGE_SIZE, BF, byte_array_serializer::<32>()).unwrap();
    for i in 0u64..100 {
        a.set(i, &ByteArray([(i % 251) as u8; 32])).unwrap();
    }
    let hash_before_overwrite = a.get_state_hash().unwrap();

    // A write whose new value differs from the old one.
    let target_id = 42u64;
    let old_value = a.get(target_id).unwrap();
    let new_value = ByteArray([old_value.0[0].wrapping_add(1); 32]);
    assert_ne!(new_value, old_value);
    a.set(target_id, &new_value).unwrap();
    let hash_h = a.get_state_hash().unwrap();
    assert_ne!(hash_h, hash_before_overwrite);

    let mut snapshot = a.create_snapshot().unwrap();
    assert_eq!(snapshot.metadata().root_hash, hash_h);

    // Another write after snapshot creation.
    a.set(target_id, &ByteArray([77u8; 32])).unwrap();
    assert_ne!(a.get_state_hash().unwrap(), hash_h);

    // The snapshot's parts still reflect state as of `hash_h`.
    let (page, slot) = (target_id / 2, (target_id % 2) * 32);
    let part = snapshot.get_part(page).unwrap();
    assert_eq!(&part[slot as usize..slot as usize + 32], &new_value.0[..]);

    let data = encode_snapshot(&mut snapshot, HASHED_PAGE_SIZE).unwrap();
    let fresh: MemoryStore<ByteArray<32>> = MemoryStore::new(PAGE_SIZE, BF, byte_array_serializer::<32>()).unwrap();
    let mut wire = WireSnapshotSource::decode(data, HASHED_PAGE_SIZE).unwrap();
    fresh.restore(&mut wire).unwrap();

    assert_eq!(fresh.get_state_hash().unwrap(), hash_h);
    for i in 0u64..100 {
        let expected = if i == target_id { new_value } else { ByteArray([(i % 251) as u8; 32]) };
        assert_eq!(fresh.get(i).unwrap(), expected);
    }
}

#[test]
fn file_backend_overlay_snapshot_is_isolated_across_many_writes() {
    let f = NamedTempFile::new().unwrap();
    let a: FileStore<ByteArray<32>> = FileStore::open(f.path(), PAGE_SIZE, BF, byte_array_serializer::<32>()).unwrap();
    for i in 0u64..50 {
        a.set(i, &ByteArray([i as u8; 32])).unwrap();
    }
    let hash_before = a.get_state_hash().unwrap();
    let mut snapshot = a.create_snapshot().unwrap();

    for i in 0u64..50 {
        a.set(i, &ByteArray([0xFFu8; 32])).unwrap();
    }
    assert_ne!(a.get_state_hash().unwrap(), hash_before);
    assert_eq!(snapshot.metadata().root_hash, hash_before);

    let f2 = NamedTempFile::new().unwrap();
    let restored: FileStore<ByteArray<32>> =
        FileStore::open(f2.path(), PAGE_SIZE, BF, byte_array_serializer::<32>()).unwrap();
    let data = encode_snapshot(&mut snapshot, HASHED_PAGE_SIZE).unwrap();
    let mut wire = WireSnapshotSource::decode(data, HASHED_PAGE_SIZE).unwrap();
    restored.restore(&mut wire).unwrap();
    assert_eq!(restored.get_state_hash().unwrap(), hash_before);
    for i in 0u64..50 {
        assert_eq!(restored.get(i).unwrap(), ByteArray([i as u8; 32]));
    }
}

#[test]
fn restore_rejects_a_part_of_the_wrong_length() {
    use pagestore::snapshot::{SnapshotMetadata, SnapshotSource};

    struct BadSource;
    impl SnapshotSource for BadSource {
        fn metadata(&self) -> SnapshotMetadata {
            SnapshotMetadata { root_hash: [0u8; 32], branching_factor: BF, num_pages: 1 }
        }
        fn get_part(&mut self, _i: u64) -> pagestore::Result<Vec<u8>> {
            Ok(vec![0u8; HASHED_PAGE_SIZE - 1])
        }
        fn get_proof(&mut self, _i: u64) -> pagestore::Result<pagestore::Hash> {
            Ok([0u8; 32])
        }
        fn release(&mut self) {}
    }

    let store: MemoryStore<ByteArray<32>> = MemoryStore::new(PAGE_SIZE, BF, byte_array_serializer::<32>()).unwrap();
    let mut bad = BadSource;
    assert!(store.restore(&mut bad).is_err());
}
