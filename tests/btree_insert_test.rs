//! Insert and point-lookup tests for the B+ tree

use std::sync::Arc;

use birchdb::buffer::BufferPoolManager;
use birchdb::common::{PageId, RecordId, SlotId, INVALID_PAGE_ID};
use birchdb::index::{BPlusTree, OrdComparator};
use birchdb::storage::disk::DiskManager;

use rand::seq::SliceRandom;
use rand::thread_rng;
use tempfile::NamedTempFile;

fn rid(key: u32) -> RecordId {
    RecordId::new(PageId::new(key), SlotId::new((key % 97) as u16))
}

fn create_tree(
    pool_size: usize,
    leaf_max: u32,
    internal_max: u32,
) -> (BPlusTree<u32, OrdComparator>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, 2, disk_manager));
    let header_page_id = bpm.new_page().unwrap();
    let tree = BPlusTree::new(
        "insert_test",
        header_page_id,
        bpm,
        OrdComparator,
        leaf_max,
        internal_max,
    )
    .unwrap();
    (tree, temp_file)
}

fn collect_keys(tree: &BPlusTree<u32, OrdComparator>) -> Vec<u32> {
    tree.begin()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect()
}

#[test]
fn test_empty_tree() {
    let (tree, _temp) = create_tree(16, 2, 3);
    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.get(&1).unwrap(), None);
    assert_eq!(tree.root_page_id().unwrap(), INVALID_PAGE_ID);
    assert!(tree.begin().unwrap().is_end());
}

#[test]
fn test_split_chain() {
    // Small fanout forces a root split, then cascading internal splits.
    let (tree, _temp) = create_tree(32, 2, 3);

    for key in [3u32, 8, 2, 7, 9, 1, 5, 10] {
        assert!(tree.insert(key, rid(key)).unwrap());
        tree.verify_integrity().unwrap();
    }

    assert_eq!(collect_keys(&tree), vec![1, 2, 3, 5, 7, 8, 9, 10]);
    for key in [1u32, 2, 3, 5, 7, 8, 9, 10] {
        assert_eq!(tree.get(&key).unwrap(), Some(rid(key)), "missing key {key}");
    }
    assert_eq!(tree.get(&4).unwrap(), None);
    assert_eq!(tree.get(&6).unwrap(), None);
}

#[test]
fn test_sequential_insert() {
    let (tree, _temp) = create_tree(64, 2, 3);

    for key in 1..=500u32 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    tree.verify_integrity().unwrap();

    for key in 1..=500u32 {
        assert_eq!(tree.get(&key).unwrap(), Some(rid(key)));
    }
    assert_eq!(collect_keys(&tree), (1..=500).collect::<Vec<_>>());
}

#[test]
fn test_reverse_insert() {
    let (tree, _temp) = create_tree(64, 2, 3);

    for key in (1..=500u32).rev() {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    tree.verify_integrity().unwrap();

    for key in 1..=500u32 {
        assert_eq!(tree.get(&key).unwrap(), Some(rid(key)));
    }
    assert_eq!(collect_keys(&tree), (1..=500).collect::<Vec<_>>());
}

#[test]
fn test_random_insert_scale() {
    // Minimum fanout, thousands of keys, a pool far smaller than the tree:
    // inserts ride through splits and evictions alike.
    let (tree, _temp) = create_tree(128, 2, 3);

    let mut keys: Vec<u32> = (1..=5000).collect();
    keys.shuffle(&mut thread_rng());

    for &key in &keys {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    tree.verify_integrity().unwrap();

    for &key in &keys {
        assert_eq!(tree.get(&key).unwrap(), Some(rid(key)), "missing key {key}");
    }
    assert_eq!(tree.get(&0).unwrap(), None);
    assert_eq!(tree.get(&5001).unwrap(), None);

    assert_eq!(collect_keys(&tree), (1..=5000).collect::<Vec<_>>());
}

#[test]
fn test_duplicate_insert_keeps_first_value() {
    let (tree, _temp) = create_tree(32, 2, 3);

    for key in 1..=50u32 {
        assert!(tree.insert(key, rid(key)).unwrap());
    }

    // Re-inserting an existing key is rejected and must not clobber the
    // stored value.
    for key in 1..=50u32 {
        let other = RecordId::new(PageId::new(9999), SlotId::new(1));
        assert!(!tree.insert(key, other).unwrap());
    }

    for key in 1..=50u32 {
        assert_eq!(tree.get(&key).unwrap(), Some(rid(key)));
    }
    tree.verify_integrity().unwrap();
}

#[test]
fn test_larger_fanout() {
    let (tree, _temp) = create_tree(64, 32, 32);

    let mut keys: Vec<u32> = (0..2000).map(|i| i * 3).collect();
    keys.shuffle(&mut thread_rng());

    for &key in &keys {
        assert!(tree.insert(key, rid(key)).unwrap());
    }
    tree.verify_integrity().unwrap();

    for &key in &keys {
        assert_eq!(tree.get(&key).unwrap(), Some(rid(key)));
    }
    // Keys between the stored multiples of three are absent.
    assert_eq!(tree.get(&1).unwrap(), None);
    assert_eq!(tree.get(&4).unwrap(), None);
}

#[test]
fn test_reopen_from_header_page() {
    let temp_file = NamedTempFile::new().unwrap();
    let header_page_id;

    {
        let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, 2, disk_manager));
        header_page_id = bpm.new_page().unwrap();
        let tree: BPlusTree<u32, OrdComparator> = BPlusTree::new(
            "reopen_test",
            header_page_id,
            Arc::clone(&bpm),
            OrdComparator,
            4,
            4,
        )
        .unwrap();

        for key in 1..=100u32 {
            tree.insert(key, rid(key)).unwrap();
        }
        bpm.flush_all_pages().unwrap();
    }

    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(32, 2, disk_manager));
    let tree: BPlusTree<u32, OrdComparator> =
        BPlusTree::open("reopen_test", header_page_id, bpm, OrdComparator, 4, 4);

    tree.verify_integrity().unwrap();
    for key in 1..=100u32 {
        assert_eq!(tree.get(&key).unwrap(), Some(rid(key)));
    }
}
