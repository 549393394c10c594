use headerchain_store::config::StoreConfig;
use headerchain_store::header::Header;
use headerchain_store::network::NetworkParams;
use headerchain_store::store::Registry;
use headerchain_store::StoreError;
use std::sync::atomic::{AtomicU64, Ordering};

static CTR: AtomicU64 = AtomicU64::new(0);

fn tmp_dir() -> std::path::PathBuf {
    let id = CTR.fetch_add(1, Ordering::SeqCst);
    let p = std::path::PathBuf::from(format!(
        "/tmp/headerchain_store_test_{}_{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&p);
    p
}

fn header_at(height: u32, prev: [u8; 32], nonce: u32) -> Header {
    Header {
        version: 1,
        prev_block_hash: prev,
        merkle_root: [0u8; 32],
        claim_trie_root: [0u8; 32],
        timestamp: 1_600_000_000 + height as u32 * 150,
        bits: headerchain_store::arith::GENESIS_BITS,
        nonce,
        block_height: height,
    }
}

fn prev_hash_bytes(registry: &Registry, chain: &headerchain_store::Blockchain, height: i64) -> [u8; 32] {
    let hash = chain.get_hash(registry, height).unwrap();
    let mut out = [0u8; 32];
    out.copy_from_slice(&hex::decode(hash).unwrap());
    out
}

#[test]
fn empty_store_has_no_headers() {
    let dir = tmp_dir();
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), NetworkParams::mainnet()).unwrap();
    let main = registry.main_chain();
    assert_eq!(main.height(), -1);
    assert_eq!(main.read_header(&registry, 0).unwrap(), None);
}

#[test]
fn linear_append_builds_a_readable_chain() {
    let dir = tmp_dir();
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), NetworkParams::mainnet()).unwrap();
    let main = registry.main_chain();

    let mut prev = [0u8; 32];
    for height in 0..10u32 {
        main.save_header(&registry, &header_at(height, prev, height)).unwrap();
        prev = prev_hash_bytes(&registry, &main, height as i64);
    }

    assert_eq!(main.height(), 9);
    assert_eq!(main.size(), 10);
    for height in 0..10u32 {
        let h = main.read_header(&registry, height as i64).unwrap().unwrap();
        assert_eq!(h.block_height, height);
        assert_eq!(h.nonce, height);
    }
}

#[test]
fn fork_creation_registers_a_second_branch_without_disturbing_main() {
    let dir = tmp_dir();
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), NetworkParams::mainnet()).unwrap();
    let main = registry.main_chain();

    let mut prev = [0u8; 32];
    for height in 0..5u32 {
        main.save_header(&registry, &header_at(height, prev, height)).unwrap();
        prev = prev_hash_bytes(&registry, &main, height as i64);
    }

    let fork_prev = prev_hash_bytes(&registry, &main, 2);
    let fork = registry.fork(0, &header_at(3, fork_prev, 999)).unwrap();

    assert_eq!(registry.all_chains().len(), 2);
    assert_eq!(fork.parent_id(), Some(0));
    assert_eq!(fork.forkpoint(), 3);
    assert_eq!(fork.height(), 3);
    // main is untouched
    assert_eq!(registry.main_chain().height(), 4);
    // fork can see headers below its own forkpoint through the parent
    let inherited = fork.read_header(&registry, 1).unwrap().unwrap();
    assert_eq!(inherited.block_height, 1);
}

#[test]
fn overtaking_fork_swaps_into_the_main_chain_slot() {
    let dir = tmp_dir();
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), NetworkParams::mainnet()).unwrap();
    let main = registry.main_chain();

    let mut prev = [0u8; 32];
    for height in 0..3u32 {
        main.save_header(&registry, &header_at(height, prev, height)).unwrap();
        prev = prev_hash_bytes(&registry, &main, height as i64);
    }
    assert_eq!(main.height(), 2);

    let fork_prev = prev_hash_bytes(&registry, &main, 1);
    let fork = registry.fork(1, &header_at(2, fork_prev, 777)).unwrap();
    assert_eq!(fork.height(), 2);
    assert_eq!(registry.main_chain().height(), 2, "equal length must not trigger a swap");

    let fork_tip = prev_hash_bytes(&registry, &fork, 2);
    fork.save_header(&registry, &header_at(3, fork_tip, 778)).unwrap();

    let new_main = registry.main_chain();
    assert_eq!(new_main.forkpoint(), 0);
    assert_eq!(new_main.height(), 3);
    assert_eq!(new_main.read_header(&registry, 2).unwrap().unwrap().nonce, 777);

    let demoted = registry.get_chain(1).unwrap();
    assert_eq!(demoted.parent_id(), Some(0));
    assert_eq!(demoted.height(), 2);
    assert_eq!(demoted.read_header(&registry, 2).unwrap().unwrap().nonce, 2);
}

#[test]
fn chunk_inside_checkpoint_region_is_delegated_to_the_main_chain() {
    let dir = tmp_dir();
    let checkpoints: &'static [headerchain_store::network::Checkpoint] =
        Vec::leak(vec![headerchain_store::network::Checkpoint {
            hash: NetworkParams::mainnet().genesis,
            target: [0u8; 32],
        }]);
    let network = NetworkParams {
        genesis: NetworkParams::mainnet().genesis,
        checkpoints,
        testnet: false,
    };
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), network).unwrap();
    let main = registry.main_chain();

    let mut prev = [0u8; 32];
    let mut chunk = Vec::new();
    for height in 0..2016u32 {
        let h = header_at(height, prev, height);
        chunk.extend_from_slice(&h.serialize());
        let hash = headerchain_store::header::hash_header(&h);
        prev.copy_from_slice(&hex::decode(hash).unwrap());
    }

    main.save_chunk(&registry, 0, &chunk).unwrap();
    assert_eq!(main.height(), 2015);

    let fork = registry.fork(0, &header_at(2016, prev, 1)).unwrap();
    // a chunk landing on a fork that overlaps the checkpoint region is
    // delegated to the main chain rather than written to the fork's own file
    assert!(fork.save_chunk(&registry, 0, &chunk).is_ok());
    assert_eq!(registry.main_chain().height(), 2015);
}

#[test]
fn reading_past_the_tip_reports_a_missing_header_error() {
    let dir = tmp_dir();
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), NetworkParams::mainnet()).unwrap();
    let main = registry.main_chain();
    main.save_header(&registry, &header_at(0, [0u8; 32], 0)).unwrap();

    let err = main.get_hash(&registry, 50).unwrap_err();
    assert!(matches!(err, StoreError::MissingHeader(50)));
}

#[test]
fn connect_chunk_verifies_and_saves_a_fresh_multi_header_chunk() {
    let dir = tmp_dir();
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), NetworkParams::mainnet()).unwrap();
    let main = registry.main_chain();

    let mut prev = [0u8; 32];
    let mut chunk = Vec::new();
    for height in 0..20u32 {
        let h = header_at(height, prev, height);
        chunk.extend_from_slice(&h.serialize());
        let hash = headerchain_store::header::hash_header(&h);
        prev.copy_from_slice(&hex::decode(hash).unwrap());
    }

    // connect_chunk is the composed verify-then-save entry point: nothing
    // has been saved yet, so a direct save_chunk call would skip exercising
    // verify_chunk's own validation path.
    assert!(main.connect_chunk(&registry, 0, &hex::encode(&chunk)));
    assert_eq!(main.height(), 19);
    assert_eq!(main.read_header(&registry, 10).unwrap().unwrap().nonce, 10);

    // a chunk that doesn't extend the chain it's handed to fails verification
    // and connect_chunk reports false rather than panicking or partially
    // writing.
    let mismatched = registry.fork(0, &header_at(5, prev_hash_bytes(&registry, &main, 4), 999)).unwrap();
    assert!(!mismatched.connect_chunk(&registry, 0, &hex::encode(&chunk)));
}

#[test]
fn non_contiguous_header_is_rejected() {
    let dir = tmp_dir();
    let registry = Registry::read_blockchains(&StoreConfig::at(&dir), NetworkParams::mainnet()).unwrap();
    let main = registry.main_chain();
    let err = main.save_header(&registry, &header_at(7, [0u8; 32], 0)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidHeader(_)));
}
