//! Unit tests for the operation dispatcher: caching behavior, directory
//! listing side effects, truncate and the one-shot mutating calls.

use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use boxfs::fs::{
    cache::{CachePolicy, StatCache},
    ops::Dispatcher,
    OpenMode,
};
use boxfs::remote::{memory::MemoryStore, MetadataSource, RemoteStore};
use boxfs::Error;

fn dispatcher_with_window(window: Duration) -> (Arc<MemoryStore>, Dispatcher) {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(StatCache::new(window));
    let ops = Dispatcher::with_cache(store.clone(), cache);
    (store, ops)
}

#[test]
fn policy_construction_caches_within_the_configured_window() -> boxfs::Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.put_content("/a.txt", b"abc", None)?;
    let policy = CachePolicy {
        fresh_window: Duration::from_secs(30),
        ..CachePolicy::default()
    };
    let ops = Dispatcher::new(store.clone(), policy);

    ops.getattr("/a.txt")?;
    ops.getattr("/a.txt")?;

    assert_eq!(store.metadata_calls(), 1);
    assert_eq!(ops.cache().len(), 1);
    Ok(())
}

#[test]
fn second_getattr_within_window_hits_the_cache() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_secs(30));
    store.put_content("/a.txt", b"abc", None)?;

    let first = ops.getattr("/a.txt")?;
    let second = ops.getattr("/a.txt")?;

    assert_eq!(first, second);
    assert_eq!(store.metadata_calls(), 1);
    Ok(())
}

#[test]
fn getattr_after_expiry_refetches_and_overwrites() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_millis(30));
    store.put_content("/a.txt", b"abc", None)?;

    ops.getattr("/a.txt")?;
    thread::sleep(Duration::from_millis(60));

    // Grow the object; the refetch must observe the new size.
    let (_, rev) = store.get_content("/a.txt")?.unwrap();
    store.put_content("/a.txt", b"abcdef", Some(&rev))?;

    let refreshed = ops.getattr("/a.txt")?;
    assert_eq!(refreshed.size, 6);
    assert_eq!(store.metadata_calls(), 2);
    Ok(())
}

#[test]
fn getattr_of_missing_path_is_not_found() {
    let (_, ops) = dispatcher_with_window(Duration::from_secs(30));
    let err = ops.getattr("/ghost").expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NotFound(_))
    ));
}

#[test]
fn readdir_populates_the_cache_for_each_child() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_secs(30));
    store.put_content("/docs/a.txt", b"a", None)?;
    store.put_content("/docs/b.txt", b"bb", None)?;
    store.create_folder("/docs/sub")?;

    let children = ops.readdir("/docs")?;
    let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "sub"]);

    // The getattr burst that follows a listing is free.
    assert_eq!(store.metadata_calls(), 0);
    assert_eq!(ops.getattr("/docs/a.txt")?.size, 1);
    assert_eq!(ops.getattr("/docs/b.txt")?.size, 2);
    assert!(ops.getattr("/docs/sub")?.is_dir);
    assert_eq!(store.metadata_calls(), 0);
    Ok(())
}

#[test]
fn truncate_shrinks_under_current_revision() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_secs(30));
    store.put_content("/a.txt", b"hello world", None)?;

    ops.truncate("/a.txt", 5)?;

    let (bytes, _) = store.get_content("/a.txt")?.unwrap();
    assert_eq!(bytes, b"hello");
    Ok(())
}

#[test]
fn truncate_zero_pads_when_growing() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_secs(30));
    store.put_content("/a.txt", b"abc", None)?;

    ops.truncate("/a.txt", 6)?;

    let (bytes, _) = store.get_content("/a.txt")?.unwrap();
    assert_eq!(bytes, b"abc\0\0\0");
    Ok(())
}

#[test]
fn truncate_missing_path_is_not_found() {
    let (_, ops) = dispatcher_with_window(Duration::from_secs(30));
    let err = ops.truncate("/ghost", 4).expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NotFound(_))
    ));
}

#[test]
fn mutating_calls_leave_cache_entries_to_ttl_expiry() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_millis(40));
    store.put_content("/a.txt", b"abc", None)?;

    ops.getattr("/a.txt")?;
    ops.unlink("/a.txt")?;

    // No proactive invalidation: within the window the stale stat is still
    // served even though the object is gone.
    assert!(ops.getattr("/a.txt").is_ok());

    thread::sleep(Duration::from_millis(80));
    let err = ops.getattr("/a.txt").expect_err("entry expired, object gone");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NotFound(_))
    ));
    Ok(())
}

#[test]
fn mkdir_rename_and_link_are_one_shot_remote_calls() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_secs(30));

    ops.mkdir("/dir")?;
    assert!(store.metadata("/dir")?.unwrap().is_dir);

    store.put_content("/dir/a.txt", b"abc", None)?;
    ops.rename("/dir/a.txt", "/dir/b.txt")?;
    assert!(store.metadata("/dir/a.txt")?.is_none());
    assert!(store.metadata("/dir/b.txt")?.is_some());

    // Links are a best-effort copy.
    ops.link("/dir/b.txt", "/dir/c.txt")?;
    let (bytes, _) = store.get_content("/dir/c.txt")?.unwrap();
    assert_eq!(bytes, b"abc");

    ops.rmdir("/dir")?;
    assert!(store.metadata("/dir")?.is_none());
    assert!(store.metadata("/dir/b.txt")?.is_none());
    Ok(())
}

#[test]
fn readlink_returns_object_content() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_secs(30));
    store.put_content("/target", b"/real/path", None)?;

    assert_eq!(ops.readlink("/target")?, b"/real/path");
    Ok(())
}

#[test]
fn open_sessions_counts_live_handles() -> boxfs::Result<()> {
    let (store, ops) = dispatcher_with_window(Duration::from_secs(30));
    store.put_content("/a.txt", b"abc", None)?;

    let fh1 = ops.open("/a.txt", OpenMode::default())?;
    let fh2 = ops.open("/a.txt", OpenMode::default())?;
    assert_eq!(ops.open_sessions(), 2);

    ops.release(fh2)?;
    let _ = ops.release(fh1);
    assert_eq!(ops.open_sessions(), 0);
    Ok(())
}
