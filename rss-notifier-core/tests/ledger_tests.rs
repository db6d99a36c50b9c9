use std::time::Duration;

use chrono::{TimeZone, Utc};
use rss_notifier_core::{EntryIdentity, FeedEntry, LedgerError, SeenSet, SeenStore};

fn identity(n: u32) -> EntryIdentity {
    FeedEntry {
        id: Some(format!("guid-{n}")),
        ..Default::default()
    }
    .identity()
}

#[tokio::test]
async fn missing_file_loads_empty_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let store = SeenStore::new(dir.path().join("data/seen.json"));

    let set = store.load().await;
    assert!(set.is_empty());
    assert_eq!(set.last_run(), None);
}

#[tokio::test]
async fn corrupt_file_loads_empty_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    tokio::fs::write(&path, b"{ this is not json ").await.unwrap();

    let set = SeenStore::new(&path).load().await;
    assert_eq!(set, SeenSet::default());
}

#[tokio::test]
async fn save_then_load_round_trips_and_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/seen.json");
    let store = SeenStore::new(&path);

    let mut set = SeenSet::default();
    set.extend([identity(3), identity(1), identity(2)]);
    set.stamp(Utc.with_ymd_and_hms(2024, 10, 21, 7, 28, 0).unwrap());
    store.save(&set).await.unwrap();

    let first = tokio::fs::read(&path).await.unwrap();
    let loaded = store.load().await;
    assert_eq!(loaded, set);

    store.save(&store.load().await).await.unwrap();
    store.save(&store.load().await).await.unwrap();
    let second = tokio::fs::read(&path).await.unwrap();
    assert_eq!(first, second, "re-saving an unchanged ledger must not change the file");
    assert_eq!(store.load().await, set);
}

#[tokio::test]
async fn persisted_layout_has_seen_and_last_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    let store = SeenStore::new(&path);

    store.save(&SeenSet::default()).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    assert_eq!(value, serde_json::json!({ "seen": [], "last_run": null }));

    let mut set = SeenSet::default();
    set.insert(identity(1));
    set.stamp(Utc::now());
    store.save(&set).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    assert_eq!(value["seen"], serde_json::json!([identity(1).as_str()]));
    assert!(value["last_run"].is_string());
}

#[tokio::test]
async fn save_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    SeenStore::new(&path).save(&SeenSet::default()).await.unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["seen.json".to_string()]);
}

#[tokio::test]
async fn ledgers_written_by_older_tools_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    let legacy = r#"{
  "seen": ["a9993e364706816aba3e25717850c26c9cd0d89d"],
  "last_run": "2024-10-21T07:28:00.123456+00:00"
}"#;
    tokio::fs::write(&path, legacy).await.unwrap();

    let set = SeenStore::new(&path).load().await;
    assert_eq!(set.len(), 1);
    assert!(set.contains(&EntryIdentity::from("a9993e364706816aba3e25717850c26c9cd0d89d".to_string())));
    assert!(set.last_run().is_some());

    tokio::fs::write(&path, r#"{"seen": ["x"], "last_run": "yesterday"}"#).await.unwrap();
    let set = SeenStore::new(&path).load().await;
    assert_eq!(set.len(), 1);
    assert_eq!(set.last_run(), None);
}

#[test]
fn seen_set_absorbs_duplicates() {
    let mut set = SeenSet::default();
    assert!(set.insert(identity(1)));
    assert!(!set.insert(identity(1)));
    set.extend([identity(1), identity(2)]);
    assert_eq!(set.len(), 2);
}

#[tokio::test]
async fn lock_is_exclusive_until_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let store = SeenStore::new(dir.path().join("seen.json"));

    let held = store.lock().await.unwrap();
    assert!(held.path().exists());
    assert!(matches!(store.lock().await, Err(LedgerError::Locked(_))));

    let lock_path = held.path().to_path_buf();
    drop(held);
    assert!(!lock_path.exists());
    let again = store.lock().await.unwrap();
    drop(again);
}

#[tokio::test]
async fn stale_lock_is_broken() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    tokio::fs::write(dir.path().join("seen.json.lock"), b"pid=1\n").await.unwrap();

    let strict = SeenStore::new(&path);
    assert!(matches!(strict.lock().await, Err(LedgerError::Locked(_))));

    let lenient = SeenStore::new(&path).with_lock_stale_after(Duration::ZERO);
    let lock = lenient.lock().await.unwrap();
    assert!(lock.path().exists());
}

#[tokio::test]
async fn failed_save_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    // a non-empty directory in the ledger's place makes the final rename fail
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), b"x").unwrap();

    let err = SeenStore::new(&path).save(&SeenSet::default()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Io { .. }));
    assert!(!dir.path().join("seen.json.tmp").exists());
}

#[tokio::test]
async fn lock_taken_over_by_another_run_survives_release() {
    let dir = tempfile::tempdir().unwrap();
    let store = SeenStore::new(dir.path().join("seen.json"));

    let held = store.lock().await.unwrap();
    let lock_path = held.path().to_path_buf();
    std::fs::write(&lock_path, b"pid=0 someone else\n").unwrap();
    drop(held);

    assert!(lock_path.exists(), "release must not delete a lock it no longer owns");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_run_breaks_a_stale_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    let lock_path = dir.path().join("seen.json.lock");
    let stale = std::fs::File::create(&lock_path).unwrap();
    stale
        .set_modified(std::time::SystemTime::now() - Duration::from_secs(2 * 3600))
        .unwrap();
    drop(stale);

    let stores: Vec<_> = (0..4).map(|_| SeenStore::new(&path)).collect();
    let attempts = stores.iter().map(|store| store.lock());
    let results = futures_util::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::Locked(_))));
    assert!(!dir.path().join("seen.json.lock.break").exists());
}

#[tokio::test]
async fn abandoned_breaker_is_cleared_on_the_next_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    tokio::fs::write(dir.path().join("seen.json.lock"), b"pid=1\n").await.unwrap();
    tokio::fs::write(dir.path().join("seen.json.lock.break"), b"pid=1\n").await.unwrap();

    let lenient = SeenStore::new(&path).with_lock_stale_after(Duration::ZERO);
    assert!(matches!(lenient.lock().await, Err(LedgerError::Locked(_))));
    assert!(!dir.path().join("seen.json.lock.break").exists());

    let lock = lenient.lock().await.unwrap();
    assert!(lock.path().exists());
}
