// Integration tests for the block and record storage layers
// These tests verify allocation reuse, record chaining, and file-level persistence

use tomedb::block::{BlockStorage, NIL};
use tomedb::record::RecordStorage;
use tomedb::{Error, Options};

use rand::Rng;
use tempfile::TempDir;

fn small_blocks() -> Options {
    Options::new().block_size(256)
}

/// Freed blocks are reused before the file grows
#[test]
fn test_free_block_reused() {
    let dir = TempDir::new().unwrap();
    let mut storage =
        BlockStorage::open(dir.path().join("blocks.db"), &small_blocks()).unwrap();

    let a = storage.allocate().unwrap();
    let b = storage.allocate().unwrap();
    let c = storage.allocate().unwrap();
    assert_eq!((a, b, c), (1, 2, 3));
    assert_eq!(storage.block_count(), 4);

    storage.free(b).unwrap();
    assert_eq!(storage.free_count().unwrap(), 1);

    // Next allocation comes off the free list, not the end of the file
    assert_eq!(storage.allocate().unwrap(), b);
    assert_eq!(storage.block_count(), 4);
    assert_eq!(storage.free_count().unwrap(), 0);
}

/// Block payloads survive reopening the file
#[test]
fn test_blocks_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocks.db");

    let id = {
        let mut storage = BlockStorage::open(&path, &small_blocks()).unwrap();
        let id = storage.allocate().unwrap();
        let mut block = vec![0u8; storage.block_size()];
        block[..17].copy_from_slice(b"persisted payload");
        storage.write(id, &block).unwrap();
        storage.sync().unwrap();
        id
    };

    let mut storage = BlockStorage::open(&path, &small_blocks()).unwrap();
    let payload = storage.read(id).unwrap();
    assert_eq!(&payload[..17], b"persisted payload");
}

/// Reopening with a different block size is refused
#[test]
fn test_block_size_mismatch_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocks.db");
    BlockStorage::open(&path, &small_blocks()).unwrap();

    let result = BlockStorage::open(&path, &Options::new().block_size(512));
    assert!(matches!(result, Err(Error::InvalidFormat(_))));
}

/// A file that is not a database is refused
#[test]
fn test_foreign_file_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, vec![0u8; 1024]).unwrap();

    let result = BlockStorage::open(&path, &small_blocks());
    assert!(matches!(result, Err(Error::InvalidFormat(_))));
}

/// Out-of-range and meta block IDs are refused
#[test]
fn test_invalid_block_ids_rejected() {
    let dir = TempDir::new().unwrap();
    let mut storage =
        BlockStorage::open(dir.path().join("blocks.db"), &small_blocks()).unwrap();
    storage.allocate().unwrap();

    assert!(storage.read(0).is_err());
    assert!(storage.read(99).is_err());
    assert!(storage.read(NIL).is_err());
}

/// Records spanning many blocks round-trip intact
#[test]
fn test_record_round_trip_sizes() {
    let dir = TempDir::new().unwrap();
    let mut records =
        RecordStorage::open(dir.path().join("data.db"), &small_blocks()).unwrap();

    let mut rng = rand::rng();
    for size in [0, 1, 239, 240, 241, 1000, 10_000] {
        let payload: Vec<u8> = (0..size).map(|_| rng.random()).collect();
        let id = records.create(&payload).unwrap();
        assert_eq!(records.read(id).unwrap(), payload, "size {}", size);
        assert_eq!(records.size(id).unwrap(), size);
    }
}

/// A zero-length record still owns a block and a stable locator
#[test]
fn test_empty_record_has_locator() {
    let dir = TempDir::new().unwrap();
    let mut records =
        RecordStorage::open(dir.path().join("data.db"), &small_blocks()).unwrap();

    let before = records.storage().block_count();
    let id = records.create(b"").unwrap();
    assert_eq!(records.storage().block_count(), before + 1);
    assert_eq!(records.read(id).unwrap(), Vec::<u8>::new());

    records.delete(id).unwrap();
    assert_eq!(records.storage_mut().free_count().unwrap(), 1);
}

/// Updates keep the locator while the record grows and shrinks
#[test]
fn test_update_keeps_locator() {
    let dir = TempDir::new().unwrap();
    let mut records =
        RecordStorage::open(dir.path().join("data.db"), &small_blocks()).unwrap();

    let id = records.create(b"short").unwrap();

    let long = vec![0xabu8; 5000];
    records.update(id, &long).unwrap();
    assert_eq!(records.read(id).unwrap(), long);

    records.update(id, b"short again").unwrap();
    assert_eq!(records.read(id).unwrap(), b"short again");

    // Shrinking released the tail of the chain
    let freed = records.storage_mut().free_count().unwrap();
    assert!(freed > 0, "shrinking update should free chain blocks");
}

/// Slack keeps trailing chain blocks across a shrink
#[test]
fn test_update_slack_retains_blocks() {
    let dir = TempDir::new().unwrap();
    let options = small_blocks().update_slack_blocks(2);
    let mut records = RecordStorage::open(dir.path().join("data.db"), &options).unwrap();

    let id = records.create(&vec![1u8; 2000]).unwrap();
    let chained = records.storage().block_count();

    records.update(id, b"tiny").unwrap();
    assert_eq!(records.read(id).unwrap(), b"tiny");

    // At most two trailing blocks were kept, and a regrow reuses them
    // without touching the free list.
    let freed = records.storage_mut().free_count().unwrap();
    records.update(id, &vec![2u8; 600]).unwrap();
    assert_eq!(records.storage_mut().free_count().unwrap(), freed);
    assert_eq!(records.storage().block_count(), chained);
}

/// Create/delete cycles leak no blocks
#[test]
fn test_create_delete_leaks_nothing() {
    let dir = TempDir::new().unwrap();
    let mut records =
        RecordStorage::open(dir.path().join("data.db"), &small_blocks()).unwrap();

    let mut rng = rand::rng();
    for round in 0..5 {
        let ids: Vec<_> = (0..50)
            .map(|_| {
                let size = rng.random_range(0..1500);
                records.create(&vec![round as u8; size]).unwrap()
            })
            .collect();
        for id in ids {
            records.delete(id).unwrap();
        }
    }

    let total = records.storage().block_count();
    let free = records.storage_mut().free_count().unwrap();
    // Every data block is back on the free list
    assert_eq!(total - 1, free);
}

/// Reading a freed record fails instead of returning stale bytes
#[test]
fn test_read_after_delete_fails() {
    let dir = TempDir::new().unwrap();
    let mut records =
        RecordStorage::open(dir.path().join("data.db"), &small_blocks()).unwrap();

    let id = records.create(b"gone soon").unwrap();
    records.delete(id).unwrap();
    assert!(records.read(id).is_err());
}

/// Records written under one handle are visible after reopen
#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");
    let payload = vec![0x5au8; 3000];

    let id = {
        let mut records = RecordStorage::open(&path, &small_blocks()).unwrap();
        let id = records.create(&payload).unwrap();
        records.storage_mut().sync().unwrap();
        id
    };

    let mut records = RecordStorage::open(&path, &small_blocks()).unwrap();
    assert_eq!(records.read(id).unwrap(), payload);
}
