//! End-to-end tests across the pager and the index: persistence over
//! reopen, correctness under a tiny cache, and cache-size equivalence of the
//! flushed file image.

use btree::BTreeIndex;
use buffer::FilePager;
use common::RowId;
use pretty_assertions::assert_eq;
use storage::TombstoneSet;
use tempfile::tempdir;
use testsupport::prelude::*;

/// Knuth multiplicative hash: bijective on u32, so the keys are distinct
/// but arrive in scrambled order.
fn scrambled_key(i: u32) -> u32 {
    i.wrapping_mul(2654435761)
}

#[test]
fn thousand_scrambled_keys_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.pages");
    let entries: Vec<(u32, RowId)> = (0..1000).map(|i| (scrambled_key(i), i)).collect();

    {
        let pager = FilePager::create(&path, 100).unwrap();
        let mut idx = BTreeIndex::<u32, FilePager>::create(pager).unwrap();
        for &(key, rid) in &entries {
            idx.insert(key, rid).unwrap();
        }
        idx.check_integrity().unwrap();
        idx.flush().unwrap();
    }

    let pager = FilePager::open(&path, 100).unwrap();
    let mut idx = BTreeIndex::<u32, FilePager>::open(pager).unwrap();
    let mut store = TombstoneSet::new();
    idx.check_integrity().unwrap();
    assert_eq!(
        idx.select_range(u32::MIN, u32::MAX, &mut store).unwrap(),
        row_ids_in_composite_order(&entries)
    );
}

#[test]
fn ten_thousand_keys_through_a_four_page_cache() {
    let dir = tempdir().unwrap();
    let pager = FilePager::create(dir.path().join("db.pages"), 4).unwrap();
    let mut idx = BTreeIndex::<u32, FilePager>::create(pager).unwrap();
    let mut store = TombstoneSet::new();

    for key in 0..10_000u32 {
        idx.insert(key, key).unwrap();
    }

    idx.check_integrity().unwrap();
    let rows = idx.select_range(u32::MIN, u32::MAX, &mut store).unwrap();
    assert_eq!(rows, (0..10_000).collect::<Vec<_>>());
}

#[test]
fn flushed_image_does_not_depend_on_cache_size() {
    let dir = tempdir().unwrap();
    let small_path = dir.path().join("small.pages");
    let large_path = dir.path().join("large.pages");
    let entries: Vec<(u32, RowId)> = (0..2_000).map(|i| (scrambled_key(i), i)).collect();

    for (path, cache_pages) in [(&small_path, 4), (&large_path, 10_000)] {
        let pager = FilePager::create(path, cache_pages).unwrap();
        let mut idx = BTreeIndex::<u32, FilePager>::create(pager).unwrap();
        for &(key, rid) in &entries {
            idx.insert(key, rid).unwrap();
        }
        idx.flush().unwrap();
    }

    let small = std::fs::read(&small_path).unwrap();
    let large = std::fs::read(&large_path).unwrap();
    assert_eq!(small.len(), large.len());
    assert!(small == large, "page images diverge between cache sizes");
}

#[test]
fn tombstones_snapshot_alongside_the_index() {
    let dir = tempdir().unwrap();
    let index_path = dir.path().join("db.pages");
    let tombstone_path = dir.path().join("db.tombstones");

    {
        let pager = FilePager::create(&index_path, 50).unwrap();
        let mut idx = BTreeIndex::<u32, FilePager>::create(pager).unwrap();
        let mut store = TombstoneSet::new();
        for key in 0..100u32 {
            idx.insert(key, key).unwrap();
        }
        assert_eq!(idx.delete_range(40, 59, &mut store).unwrap(), 20);
        idx.flush().unwrap();
        store.save(&tombstone_path).unwrap();
    }

    let pager = FilePager::open(&index_path, 50).unwrap();
    let mut idx = BTreeIndex::<u32, FilePager>::open(pager).unwrap();
    let mut store = TombstoneSet::load(&tombstone_path).unwrap();
    assert_eq!(store.len(), 20);

    let survivors: Vec<RowId> = (0..40).chain(60..100).collect();
    assert_eq!(
        idx.select_range(u32::MIN, u32::MAX, &mut store).unwrap(),
        survivors
    );
    // the deleted range stays deleted across the reopen
    assert_eq!(idx.delete_range(40, 59, &mut store).unwrap(), 0);
}
