// Integration tests for the ordered index
// These tests drive the tree through bulk loads, deletions, range scans,
// and an on-disk reopen, at a small order so nodes split and merge early

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use tomedb::record::RecordStorage;
use tomedb::tree::{BTree, MemoryNodePager, RecordNodePager};
use tomedb::{Bson, Error, Options};

use parking_lot::Mutex;
use proptest::prelude::*;
use rand::seq::SliceRandom;
use tempfile::TempDir;

fn memory_tree(order: usize) -> BTree<i64, u64, MemoryNodePager<i64, u64>> {
    BTree::new(MemoryNodePager::new(), order).unwrap()
}

/// Bulk load in shuffled order, then point lookups
#[test]
fn test_bulk_load_and_lookup() {
    let mut tree = memory_tree(4);
    let mut keys: Vec<i64> = (0..1000).collect();
    keys.shuffle(&mut rand::rng());

    for &key in &keys {
        tree.insert(key, (key * 10) as u64).unwrap();
    }

    for key in 0..1000 {
        assert_eq!(tree.find(&key).unwrap(), Some((key * 10) as u64));
    }
    assert_eq!(tree.find(&-1).unwrap(), None);
    assert_eq!(tree.find(&1000).unwrap(), None);
}

/// Iteration yields every entry in ascending key order
#[test]
fn test_iteration_is_sorted() {
    let mut tree = memory_tree(4);
    let mut keys: Vec<i64> = (0..500).collect();
    keys.shuffle(&mut rand::rng());
    for &key in &keys {
        tree.insert(key, key as u64).unwrap();
    }

    let entries: Vec<(i64, u64)> =
        tree.iter().unwrap().collect::<Result<_, _>>().unwrap();
    let expected: Vec<(i64, u64)> = (0..500).map(|k| (k, k as u64)).collect();
    assert_eq!(entries, expected);
}

/// A second insert of the same key is refused
#[test]
fn test_duplicate_insert_rejected() {
    let mut tree = memory_tree(4);
    tree.insert(7, 70).unwrap();

    let result = tree.insert(7, 71);
    assert!(matches!(result, Err(Error::DuplicateKey(_))));
    // The original mapping is untouched
    assert_eq!(tree.find(&7).unwrap(), Some(70));
}

/// Deleting half the keys leaves the other half intact
#[test]
fn test_delete_half() {
    let mut tree = memory_tree(4);
    for key in 0..400i64 {
        tree.insert(key, key as u64).unwrap();
    }

    let mut doomed: Vec<i64> = (0..400).filter(|k| k % 2 == 0).collect();
    doomed.shuffle(&mut rand::rng());
    for key in doomed {
        assert_eq!(tree.delete(&key).unwrap(), Some(key as u64));
    }

    for key in 0..400i64 {
        let expected = (key % 2 == 1).then_some(key as u64);
        assert_eq!(tree.find(&key).unwrap(), expected, "key {}", key);
    }
    assert_eq!(tree.delete(&0).unwrap(), None);
}

/// Deleting everything leaves an empty, reusable tree
#[test]
fn test_delete_all_then_reuse() {
    let mut tree = memory_tree(4);
    let mut keys: Vec<i64> = (0..200).collect();
    keys.shuffle(&mut rand::rng());
    for &key in &keys {
        tree.insert(key, 1).unwrap();
    }
    keys.shuffle(&mut rand::rng());
    for &key in &keys {
        tree.delete(&key).unwrap();
    }

    assert!(tree.is_empty());
    assert_eq!(tree.pager().node_count(), 0);

    tree.insert(42, 420).unwrap();
    assert_eq!(tree.find(&42).unwrap(), Some(420));
}

/// Range scans honor every bound combination
#[test]
fn test_range_bounds() {
    let mut tree = memory_tree(4);
    for key in (0..100i64).step_by(2) {
        tree.insert(key, key as u64).unwrap();
    }

    let collect = |tree: &mut BTree<i64, u64, MemoryNodePager<i64, u64>>,
                   lower: Bound<i64>,
                   upper: Bound<i64>|
     -> Vec<i64> {
        tree.range(lower, upper)
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect()
    };

    assert_eq!(
        collect(&mut tree, Bound::Included(10), Bound::Excluded(20)),
        vec![10, 12, 14, 16, 18]
    );
    assert_eq!(
        collect(&mut tree, Bound::Excluded(10), Bound::Included(16)),
        vec![12, 14, 16]
    );
    // Bounds falling between stored keys
    assert_eq!(
        collect(&mut tree, Bound::Included(11), Bound::Included(15)),
        vec![12, 14]
    );
    assert_eq!(
        collect(&mut tree, Bound::Unbounded, Bound::Excluded(6)),
        vec![0, 2, 4]
    );
    assert_eq!(
        collect(&mut tree, Bound::Included(96), Bound::Unbounded),
        vec![96, 98]
    );
    assert_eq!(
        collect(&mut tree, Bound::Included(200), Bound::Unbounded),
        Vec::<i64>::new()
    );
}

/// Bson keys of mixed types sort by the model's total order
#[test]
fn test_mixed_type_keys() {
    let mut tree: BTree<Bson, u64, MemoryNodePager<Bson, u64>> =
        BTree::new(MemoryNodePager::new(), 4).unwrap();

    tree.insert(Bson::String("zeta".into()), 1).unwrap();
    tree.insert(Bson::Int64(100), 2).unwrap();
    tree.insert(Bson::Null, 3).unwrap();
    tree.insert(Bson::Double(2.5), 4).unwrap();
    tree.insert(Bson::Boolean(true), 5).unwrap();

    let keys: Vec<Bson> = tree
        .iter()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(
        keys,
        vec![
            Bson::Null,
            Bson::Boolean(true),
            Bson::Double(2.5),
            Bson::Int64(100),
            Bson::String("zeta".into()),
        ]
    );
}

/// An on-disk tree reopens from its header record alone
#[test]
fn test_disk_tree_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");
    let options = Options::new().block_size(256).index_order(4);

    let header = {
        let records = Arc::new(Mutex::new(RecordStorage::open(&path, &options).unwrap()));
        let pager: RecordNodePager<i64, u64> =
            RecordNodePager::open(Arc::clone(&records), None).unwrap();
        let header = pager.header_record();
        let mut tree = BTree::new(pager, 4).unwrap();
        for key in 0..300i64 {
            tree.insert(key, (key + 1) as u64).unwrap();
        }
        header
    };

    let records = Arc::new(Mutex::new(RecordStorage::open(&path, &options).unwrap()));
    let pager = RecordNodePager::open(records, Some(header)).unwrap();
    let mut tree: BTree<i64, u64, RecordNodePager<i64, u64>> = BTree::new(pager, 4).unwrap();

    for key in 0..300i64 {
        assert_eq!(tree.find(&key).unwrap(), Some((key + 1) as u64));
    }
}

/// Clearing an on-disk tree returns every node's blocks
#[test]
fn test_disk_tree_clear_frees_nodes() {
    let dir = TempDir::new().unwrap();
    let options = Options::new().block_size(256).index_order(4);
    let records = Arc::new(Mutex::new(
        RecordStorage::open(dir.path().join("index.db"), &options).unwrap(),
    ));

    let pager: RecordNodePager<i64, u64> =
        RecordNodePager::open(Arc::clone(&records), None).unwrap();
    let mut tree = BTree::new(pager, 4).unwrap();
    for key in 0..200i64 {
        tree.insert(key, key as u64).unwrap();
    }

    tree.clear().unwrap();
    assert!(tree.is_empty());

    // Only the header record's block stays in use
    let mut guard = records.lock();
    let total = guard.storage().block_count();
    let free = guard.storage_mut().free_count().unwrap();
    assert_eq!(total - 1 - free, 1);
}

proptest! {
    /// Random insert/delete schedules agree with an in-memory model
    #[test]
    fn prop_tree_matches_model(ops in prop::collection::vec((any::<u8>(), 0i64..64), 1..300)) {
        let mut tree = memory_tree(4);
        let mut model: BTreeMap<i64, u64> = BTreeMap::new();

        for (action, key) in ops {
            if action % 3 == 0 {
                let tree_old = tree.delete(&key).unwrap();
                let model_old = model.remove(&key);
                prop_assert_eq!(tree_old, model_old);
            } else {
                let value = key as u64 + 1;
                match tree.insert(key, value) {
                    Ok(()) => {
                        prop_assert!(model.insert(key, value).is_none());
                    }
                    Err(Error::DuplicateKey(_)) => {
                        prop_assert!(model.contains_key(&key));
                    }
                    Err(other) => return Err(TestCaseError::fail(other.to_string())),
                }
            }
        }

        let entries: Vec<(i64, u64)> =
            tree.iter().unwrap().collect::<Result<_, _>>().unwrap();
        let expected: Vec<(i64, u64)> = model.into_iter().collect();
        prop_assert_eq!(entries, expected);
    }
}
