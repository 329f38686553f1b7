//! Driver-level invariants exercised against [`cache_storage::MemoryDriver`].

mod common;

use cache_core::{EntryOptions, Error};
use cache_storage::PolicyKind;

#[test]
fn set_then_get_round_trips_data_and_increments_hits() {
    let driver = common::build_memory_driver(common::memory_config(1 << 20, false), Some(1));
    let id = common::id("alpha");

    assert!(driver
        .set(&id, PolicyKind::Lru, b"payload".to_vec(), None, EntryOptions::default(), false)
        .unwrap());

    let first = driver.get(&id, PolicyKind::Lru).unwrap().expect("entry must be present");
    assert_eq!(first.data, b"payload");
    assert_eq!(first.hits, 1);
    assert!(first.ctime <= first.atime);

    let second = driver.get(&id, PolicyKind::Lru).unwrap().expect("entry must still be present");
    assert_eq!(second.hits, 2);
}

#[test]
fn set_without_force_on_existing_key_returns_false() {
    let driver = common::build_memory_driver(common::memory_config(1 << 20, false), Some(1));
    let id = common::id("alpha");
    assert!(driver.set(&id, PolicyKind::Lru, vec![1], None, EntryOptions::default(), false).unwrap());
    assert!(!driver.set(&id, PolicyKind::Lru, vec![2], None, EntryOptions::default(), false).unwrap());
    assert_eq!(driver.get(&id, PolicyKind::Lru).unwrap().unwrap().data, vec![1]);
}

#[test]
fn forced_set_overwrites_and_resets_policy_state() {
    let driver = common::build_memory_driver(common::memory_config(1 << 20, false), Some(1));
    let id = common::id("alpha");
    assert!(driver.set(&id, PolicyKind::Lru, vec![1], None, EntryOptions::default(), false).unwrap());
    assert!(driver.set(&id, PolicyKind::Lru, vec![2], None, EntryOptions::default(), true).unwrap());
    assert_eq!(driver.get(&id, PolicyKind::Lru).unwrap().unwrap().data, vec![2]);
}

#[test]
fn get_on_absent_identifier_is_a_miss_not_an_error() {
    let driver = common::build_memory_driver(common::memory_config(1 << 20, false), Some(1));
    assert!(driver.get(&common::id("nope"), PolicyKind::Lru).unwrap().is_none());
}

#[test]
fn delete_removes_entry_and_reports_not_found_on_absent_key() {
    let driver = common::build_memory_driver(common::memory_config(1 << 20, false), Some(1));
    let id = common::id("alpha");
    driver.set(&id, PolicyKind::Lru, vec![1], None, EntryOptions::default(), false).unwrap();
    driver.delete(&id, PolicyKind::Lru).unwrap();
    assert!(driver.get(&id, PolicyKind::Lru).unwrap().is_none());
    let err = driver.delete(&id, PolicyKind::Lru).unwrap_err();
    assert!(matches!(err, Error::NotFound));
}

#[test]
fn invalidate_expires_every_entry_declaring_the_given_identifiers() {
    let driver = common::build_memory_driver(common::memory_config(1 << 20, false), Some(1));
    let tag = common::id("tag-a");
    let opts = EntryOptions { ttl: 0, invalidated_by: vec![tag.clone()] };

    let e1 = common::id("entry-1");
    let e2 = common::id("entry-2");
    driver.set(&e1, PolicyKind::Lru, vec![1], None, opts.clone(), false).unwrap();
    driver.set(&e2, PolicyKind::Lru, vec![2], None, opts, false).unwrap();

    driver.invalidate(&[tag], PolicyKind::Lru).unwrap();

    assert!(driver.get(&e1, PolicyKind::Lru).unwrap().is_none());
    assert!(driver.get(&e2, PolicyKind::Lru).unwrap().is_none());
}

#[test]
fn invalidate_leaves_entries_not_declaring_the_identifier_untouched() {
    let driver = common::build_memory_driver(common::memory_config(1 << 20, false), Some(1));
    let tag = common::id("tag-a");
    let opts = EntryOptions { ttl: 0, invalidated_by: vec![tag.clone()] };
    let tagged = common::id("tagged");
    let untagged = common::id("untagged");
    driver.set(&tagged, PolicyKind::Lru, vec![1], None, opts, false).unwrap();
    driver.set(&untagged, PolicyKind::Lru, vec![2], None, EntryOptions::default(), false).unwrap();

    driver.invalidate(&[tag], PolicyKind::Lru).unwrap();

    assert!(driver.get(&tagged, PolicyKind::Lru).unwrap().is_none());
    assert!(driver.get(&untagged, PolicyKind::Lru).unwrap().is_some());
}

#[test]
fn entry_larger_than_max_size_is_rejected_before_admission_runs() {
    let driver = common::build_memory_driver(common::memory_config(16, false), Some(1));
    let err = driver
        .set(&common::id("too-big"), PolicyKind::Lru, vec![0u8; 256], None, EntryOptions::default(), false)
        .unwrap_err();
    assert!(matches!(err, Error::CacheTooBig { .. }));
}

#[test]
fn admission_evicts_within_target_policy_before_failing() {
    // A budget where two entries fit comfortably but a third does not
    // without evicting one of the first two.
    let driver = common::build_memory_driver(common::memory_config(7000, false), Some(1));
    assert!(driver.set(&common::id("a"), PolicyKind::Lru, vec![0u8; 3000], None, EntryOptions::default(), false).unwrap());
    assert!(driver.set(&common::id("b"), PolicyKind::Lru, vec![0u8; 3000], None, EntryOptions::default(), false).unwrap());
    assert!(driver.set(&common::id("c"), PolicyKind::Lru, vec![0u8; 3000], None, EntryOptions::default(), false).unwrap());
    // "a" was the least-recently-used entry and should have been evicted.
    assert!(driver.get(&common::id("a"), PolicyKind::Lru).unwrap().is_none());
    assert!(driver.get(&common::id("c"), PolicyKind::Lru).unwrap().is_some());
}

#[test]
fn without_evict_from_others_an_exhausted_target_policy_fails_admission() {
    let driver = common::build_memory_driver(common::memory_config(4000, false), Some(1));
    assert!(driver.set(&common::id("a"), PolicyKind::Lru, vec![0u8; 3000], None, EntryOptions::default(), false).unwrap());
    let err = driver
        .set(&common::id("b"), PolicyKind::Mru, vec![0u8; 3000], None, EntryOptions::default(), false)
        .unwrap_err();
    assert!(matches!(err, Error::NoCachesToEvict { .. }));
}

#[test]
fn size_limit_cross_policy_eviction_prefers_target_policy_first() {
    // evictFromOthers=true; LRU and MRU each already hold an entry, and a
    // new LRU entry needs more room than is free. Admission evicts from the
    // target policy (LRU) first; since that alone frees enough space, the
    // MRU entry must survive untouched.
    let driver = common::build_memory_driver(common::memory_config(10_000, true), Some(1));
    let lru_old = common::id("lru-old");
    let mru_old = common::id("mru-old");
    let lru_new = common::id("lru-new");

    assert!(driver.set(&lru_old, PolicyKind::Lru, vec![0u8; 4000], None, EntryOptions::default(), false).unwrap());
    assert!(driver.set(&mru_old, PolicyKind::Mru, vec![0u8; 4000], None, EntryOptions::default(), false).unwrap());

    assert!(driver.set(&lru_new, PolicyKind::Lru, vec![0u8; 4000], None, EntryOptions::default(), false).unwrap());

    assert!(driver.get(&lru_old, PolicyKind::Lru).unwrap().is_none(), "lru-old should have been evicted to admit lru-new");
    assert!(driver.get(&lru_new, PolicyKind::Lru).unwrap().is_some());
    assert!(driver.get(&mru_old, PolicyKind::Mru).unwrap().is_some(), "a single target-policy eviction was enough; mru-old must survive");
    let usage = driver.resource_usage();
    assert!(usage.total_bytes <= 10_000);
}

#[test]
fn resource_usage_reports_fraction_against_configured_max_size() {
    let driver = common::build_memory_driver(common::memory_config(1000, false), Some(1));
    driver.set(&common::id("a"), PolicyKind::Fifo, vec![0u8; 100], None, EntryOptions::default(), false).unwrap();
    let usage = driver.resource_usage();
    let fifo = usage.policies.get(&PolicyKind::Fifo).unwrap();
    assert!(fifo.bytes > 0);
    assert!(fifo.fraction > 0.0 && fifo.fraction < 1.0);
    assert_eq!(usage.total_entries, 1);
}
