mod common;

use cloudsync_lib::core::{ChangeKind, ChangeWatcher, FilterSet, WatchConfig, WatchError};
use common::write_file;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn fast_config() -> WatchConfig {
    WatchConfig {
        poll_interval: Duration::from_millis(20),
        debounce: Duration::ZERO,
        capacity: 100,
    }
}

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_reports_create_modify_remove() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.txt", "1");

    let cancel = CancellationToken::new();
    let mut handle = ChangeWatcher::spawn(dir.path(), FilterSet::empty(), fast_config(), cancel.clone())
        .await
        .unwrap();

    write_file(dir.path(), "new.txt", "hello");
    let event = timeout(WAIT, handle.events.recv()).await.unwrap().unwrap();
    assert_eq!(event.relative_path, "new.txt");
    assert_eq!(event.kind, ChangeKind::Created);
    assert!(!event.is_dir);

    write_file(dir.path(), "a.txt", "changed");
    let event = timeout(WAIT, handle.events.recv()).await.unwrap().unwrap();
    assert_eq!(event.relative_path, "a.txt");
    assert_eq!(event.kind, ChangeKind::Modified);

    std::fs::remove_file(dir.path().join("new.txt")).unwrap();
    let event = timeout(WAIT, handle.events.recv()).await.unwrap().unwrap();
    assert_eq!(event.relative_path, "new.txt");
    assert_eq!(event.kind, ChangeKind::Removed);

    cancel.cancel();
    timeout(WAIT, handle.join).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_new_directory_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let mut handle = ChangeWatcher::spawn(dir.path(), FilterSet::empty(), fast_config(), cancel.clone())
        .await
        .unwrap();

    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let event = timeout(WAIT, handle.events.recv()).await.unwrap().unwrap();
    assert_eq!(event.relative_path, "sub");
    assert_eq!(event.kind, ChangeKind::Created);
    assert!(event.is_dir);

    cancel.cancel();
}

#[tokio::test]
async fn test_ignored_paths_are_silent() {
    let dir = tempfile::tempdir().unwrap();
    let filter = FilterSet::new(&["*.tmp", "cache/"], &[] as &[&str]);
    let cancel = CancellationToken::new();
    let mut handle = ChangeWatcher::spawn(dir.path(), filter, fast_config(), cancel.clone())
        .await
        .unwrap();

    write_file(dir.path(), "scratch.tmp", "x");
    write_file(dir.path(), "cache/blob", "x");
    write_file(dir.path(), "real.txt", "x");

    let event = timeout(WAIT, handle.events.recv()).await.unwrap().unwrap();
    assert_eq!(event.relative_path, "real.txt");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(handle.events.try_recv(), Err(TryRecvError::Empty)));

    cancel.cancel();
}

#[tokio::test]
async fn test_debounce_suppresses_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let config = WatchConfig {
        debounce: Duration::from_secs(30),
        ..fast_config()
    };
    let cancel = CancellationToken::new();
    let mut handle = ChangeWatcher::spawn(dir.path(), FilterSet::empty(), config, cancel.clone())
        .await
        .unwrap();

    write_file(dir.path(), "a.txt", "1");
    let event = timeout(WAIT, handle.events.recv()).await.unwrap().unwrap();
    assert_eq!(event.kind, ChangeKind::Created);

    write_file(dir.path(), "a.txt", "22");
    tokio::time::sleep(Duration::from_millis(200)).await;
    write_file(dir.path(), "a.txt", "333");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(handle.events.try_recv(), Err(TryRecvError::Empty)));

    cancel.cancel();
}

#[tokio::test]
async fn test_full_channel_drops_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = WatchConfig {
        capacity: 1,
        ..fast_config()
    };
    let cancel = CancellationToken::new();
    let mut handle = ChangeWatcher::spawn(dir.path(), FilterSet::empty(), config, cancel.clone())
        .await
        .unwrap();

    for i in 0..5 {
        write_file(dir.path(), &format!("f{}.txt", i), "x");
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    // 只保留了第一个事件，其余被丢弃，监视器仍在运行
    assert!(handle.events.try_recv().is_ok());
    assert!(matches!(handle.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(!handle.join.is_finished());

    write_file(dir.path(), "later.txt", "x");
    let event = timeout(WAIT, handle.events.recv()).await.unwrap().unwrap();
    assert_eq!(event.relative_path, "later.txt");

    cancel.cancel();
}

#[tokio::test]
async fn test_missing_root_fails_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let err = ChangeWatcher::spawn(&missing, FilterSet::empty(), fast_config(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::Init(_)));
}

#[tokio::test]
async fn test_stream_ends_after_cancel() {
    use tokio_stream::StreamExt;

    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let handle = ChangeWatcher::spawn(dir.path(), FilterSet::empty(), fast_config(), cancel.clone())
        .await
        .unwrap();
    let mut stream = handle.into_stream();

    write_file(dir.path(), "a.txt", "x");
    let event = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(event.relative_path, "a.txt");

    cancel.cancel();
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
}
