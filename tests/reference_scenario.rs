//! Cross-checks the hash tree against an independent, non-lazy
//! reimplementation of the same branching reduction (spec.md §8's
//! reference scenario: `itemsPerPage = 2`, `branchingFactor = 3`,
//! `V = 32 bytes`, inserting `Set(i, Value{byte(i<<4 | i)})` for
//! `i = 0..16` and checking the root hash after every insertion).

use pagestore::{ByteArray, MemoryStore, Store, byte_array_serializer};
use sha2::{Digest, Sha256};

fn naive_root(branching_factor: u16, pages: &[Vec<u8>]) -> [u8; 32] {
    if pages.is_empty() {
        return [0u8; 32];
    }
    let mut layer: Vec<[u8; 32]> =
        pages.iter().map(|p| Sha256::digest(p).into()).collect();
    let bf = branching_factor as usize;
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(bf));
        for chunk in layer.chunks(bf) {
            let mut buf = Vec::with_capacity(32 * bf);
            for i in 0..bf {
                buf.extend_from_slice(chunk.get(i).unwrap_or(&[0u8; 32]));
            }
            next.push(Sha256::digest(&buf).into());
        }
        layer = next;
    }
    layer[0]
}

#[test]
fn reference_scenario_matches_independent_reduction_after_every_insertion() {
    let store: MemoryStore<ByteArray<32>> =
        MemoryStore::new(64, 3, byte_array_serializer::<32>()).unwrap();
    let mut pages: Vec<Vec<u8>> = Vec::new();

    for i in 0u64..16 {
        let byte = ((i << 4) | i) as u8;
        store.set(i, &ByteArray([byte; 32])).unwrap();

        let page = (i / 2) as usize;
        if page >= pages.len() {
            pages.resize(page + 1, vec![0u8; 64]);
        }
        let slot = ((i % 2) * 32) as usize;
        pages[page][slot..slot + 32].copy_from_slice(&[byte; 32]);

        let expected = naive_root(3, &pages);
        assert_eq!(
            store.get_state_hash().unwrap(),
            expected,
            "root hash mismatch after inserting id {i}"
        );
    }
}

#[test]
fn reference_scenario_is_insensitive_to_insertion_order() {
    let forward: MemoryStore<ByteArray<32>> =
        MemoryStore::new(64, 3, byte_array_serializer::<32>()).unwrap();
    let reverse: MemoryStore<ByteArray<32>> =
        MemoryStore::new(64, 3, byte_array_serializer::<32>()).unwrap();

    for i in 0u64..16 {
        let byte = ((i << 4) | i) as u8;
        forward.set(i, &ByteArray([byte; 32])).unwrap();
    }
    for i in (0u64..16).rev() {
        let byte = ((i << 4) | i) as u8;
        reverse.set(i, &ByteArray([byte; 32])).unwrap();
    }

    assert_eq!(forward.get_state_hash().unwrap(), reverse.get_state_hash().unwrap());
}
