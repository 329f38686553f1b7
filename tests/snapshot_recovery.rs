//! Binary snapshot recovery for the memory driver.

mod common;

use cache_core::EntryOptions;
use cache_storage::{PolicyKind, PolicySnapshot, Snapshot};
use std::collections::BTreeMap;
use std::time::Duration;

#[tokio::test]
async fn driver_replays_a_pre_existing_snapshot_on_init() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("seed.dat");

    let clock = common::clock();
    let id = common::id("seeded");
    let key = cache_core::CacheKey::from_identifier(&id);
    let entry = cache_core::Entry::new(clock.as_ref(), id.clone(), b"hello".to_vec(), None, EntryOptions::default());

    let mut snapshot = Snapshot::new();
    let mut caches = BTreeMap::new();
    caches.insert(key.clone(), entry);
    snapshot.caches.insert(PolicyKind::Lru, caches);
    snapshot.policies.insert(PolicyKind::Lru, PolicySnapshot::Linked { order: vec![key] });

    cache_storage::snapshot::write_atomic(&snapshot_path, &snapshot).unwrap();

    let driver = common::build_memory_driver(
        common::memory_config_with_recovery(1 << 20, &snapshot_path),
        Some(1),
    );
    driver.init().unwrap();

    let restored = driver.get(&id, PolicyKind::Lru).unwrap().expect("replayed entry must be present");
    assert_eq!(restored.data, b"hello");
}

#[tokio::test]
async fn driver_drops_already_expired_entries_during_replay() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("seed.dat");

    let clock = common::clock();
    let expired_id = common::id("expired");
    let live_id = common::id("live");

    let mut expired_entry = cache_core::Entry::new(
        clock.as_ref(),
        expired_id.clone(),
        vec![1],
        None,
        EntryOptions { ttl: 1000, invalidated_by: vec![] },
    );
    expired_entry.ctime = chrono::Utc::now() - chrono::Duration::seconds(10);
    expired_entry.atime = expired_entry.ctime;

    let live_entry = cache_core::Entry::new(
        clock.as_ref(),
        live_id.clone(),
        vec![2],
        None,
        EntryOptions { ttl: 60_000, invalidated_by: vec![] },
    );

    let expired_key = cache_core::CacheKey::from_identifier(&expired_id);
    let live_key = cache_core::CacheKey::from_identifier(&live_id);

    let mut snapshot = Snapshot::new();
    let mut caches = BTreeMap::new();
    caches.insert(expired_key, expired_entry);
    caches.insert(live_key.clone(), live_entry);
    snapshot.caches.insert(PolicyKind::Fifo, caches);
    snapshot.policies.insert(
        PolicyKind::Fifo,
        PolicySnapshot::Linked { order: vec![live_key] },
    );

    cache_storage::snapshot::write_atomic(&snapshot_path, &snapshot).unwrap();

    let driver = common::build_memory_driver(
        common::memory_config_with_recovery(1 << 20, &snapshot_path),
        Some(1),
    );
    driver.init().unwrap();

    assert!(driver.get(&expired_id, PolicyKind::Fifo).unwrap().is_none());
    assert!(driver.get(&live_id, PolicyKind::Fifo).unwrap().is_some());
}

#[tokio::test]
async fn missing_snapshot_file_starts_empty_rather_than_failing_init() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("does-not-exist.dat");
    let driver = common::build_memory_driver(
        common::memory_config_with_recovery(1 << 20, &snapshot_path),
        Some(1),
    );
    driver.init().unwrap();
    assert!(driver.get(&common::id("anything"), PolicyKind::Lru).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn background_writer_persists_current_state_after_an_interval() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("periodic.dat");

    let mut config = common::memory_config_with_recovery(1 << 20, &snapshot_path);
    config.recovery.snapshot_interval = Duration::from_millis(10);
    let driver = common::build_memory_driver(config, Some(1));
    driver.init().unwrap();

    driver
        .set(&common::id("alpha"), PolicyKind::Lru, b"data".to_vec(), None, EntryOptions::default(), false)
        .unwrap();

    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    let restored = cache_storage::snapshot::read(&snapshot_path).unwrap();
    assert!(restored.is_some(), "background writer should have persisted a snapshot by now");
    let restored = restored.unwrap();
    assert!(restored.caches.get(&PolicyKind::Lru).map(|m| !m.is_empty()).unwrap_or(false));
}
