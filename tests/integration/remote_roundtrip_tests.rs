//! End-to-end dispatcher flows over the in-memory store: the full
//! open/write/release lifecycle, rename and truncate, plus the background
//! sweeper running against a live cache.

use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use boxfs::fs::{
    cache::{spawn_sweeper, StatCache},
    ops::Dispatcher,
    OpenMode,
};
use boxfs::remote::memory::MemoryStore;
use boxfs::Error;

fn dispatcher() -> (Arc<MemoryStore>, Dispatcher) {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(StatCache::new(Duration::from_secs(30)));
    let ops = Dispatcher::with_cache(store.clone(), cache);
    (store, ops)
}

#[test]
fn create_write_release_reopen_roundtrip() -> boxfs::Result<()> {
    let (_, ops) = dispatcher();

    ops.mkdir("/docs")?;
    let fh = ops.open("/docs/note.txt", OpenMode::create())?;
    ops.write(fh, 0, b"hello")?;
    ops.write(fh, 5, b" world")?;
    assert_eq!(ops.read(fh, 0, 64)?, b"hello world");
    ops.release(fh)?;

    let fh2 = ops.open("/docs/note.txt", OpenMode::default())?;
    assert_eq!(ops.read(fh2, 0, 64)?, b"hello world");
    ops.release(fh2)?;
    Ok(())
}

#[test]
fn listing_then_stat_then_edit_flow() -> boxfs::Result<()> {
    let (store, ops) = dispatcher();

    ops.mkdir("/docs")?;
    for name in ["a.txt", "b.txt"] {
        let fh = ops.open(&format!("/docs/{name}"), OpenMode::create())?;
        ops.write(fh, 0, name.as_bytes())?;
        ops.release(fh)?;
    }

    let listing = ops.readdir("/docs")?;
    assert_eq!(listing.len(), 2);

    // Stats for listed children come from the cache.
    let before = store.metadata_calls();
    assert_eq!(ops.getattr("/docs/a.txt")?.size, 5);
    assert_eq!(store.metadata_calls(), before);

    ops.rename("/docs/a.txt", "/docs/renamed.txt")?;
    let fh = ops.open("/docs/renamed.txt", OpenMode::default())?;
    assert_eq!(ops.read(fh, 0, 16)?, b"a.txt");
    ops.release(fh)?;

    ops.truncate("/docs/renamed.txt", 1)?;
    let fh = ops.open("/docs/renamed.txt", OpenMode::default())?;
    assert_eq!(ops.read(fh, 0, 16)?, b"a");
    ops.release(fh)?;
    Ok(())
}

#[test]
fn concurrent_editors_surface_a_conflict_at_close() -> boxfs::Result<()> {
    let (_, ops) = dispatcher();

    let fh = ops.open("/shared.txt", OpenMode::create())?;
    ops.write(fh, 0, b"base")?;
    ops.release(fh)?;

    let editor_a = ops.open("/shared.txt", OpenMode::default())?;
    let editor_b = ops.open("/shared.txt", OpenMode::default())?;

    ops.write(editor_a, 0, b"AAAA")?;
    ops.release(editor_a)?;

    ops.write(editor_b, 0, b"BBBB")?;
    let err = ops.release(editor_b).expect_err("second close must conflict");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Conflict { .. })
    ));

    // The winning editor's content survives.
    let fh = ops.open("/shared.txt", OpenMode::default())?;
    assert_eq!(ops.read(fh, 0, 16)?, b"AAAA");
    let _ = ops.release(fh);
    Ok(())
}

#[test]
fn background_sweeper_evicts_while_calls_proceed() -> boxfs::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(StatCache::new(Duration::from_secs(30)));
    let ops = Dispatcher::with_cache(store.clone(), Arc::clone(&cache));

    let fh = ops.open("/a.txt", OpenMode::create())?;
    ops.release(fh)?;
    ops.getattr("/a.txt")?;
    assert_eq!(cache.len(), 1);

    let sweeper = spawn_sweeper(
        Arc::clone(&cache),
        Duration::from_millis(50),
        Duration::from_millis(10),
    );

    // The entry ages past the threshold and a sweep pass collects it.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(cache.len(), 0);

    // The dispatcher keeps working against the swept cache.
    assert_eq!(ops.getattr("/a.txt")?.size, 0);
    sweeper.stop();
    Ok(())
}
