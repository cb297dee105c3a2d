//! Unit tests for the in-memory remote store, chiefly its revision
//! conflict rules and prefix semantics.

use boxfs::remote::{memory::MemoryStore, MetadataSource, RemoteStore};
use boxfs::Error;

#[test]
fn put_and_get_roundtrip_advances_revision() -> boxfs::Result<()> {
    let store = MemoryStore::new();

    let rev1 = store.put_content("/a.txt", b"one", None)?;
    let (bytes, rev) = store.get_content("/a.txt")?.unwrap();
    assert_eq!(bytes, b"one");
    assert_eq!(rev, rev1);

    let rev2 = store.put_content("/a.txt", b"two", Some(&rev1))?;
    assert_ne!(rev1, rev2);
    Ok(())
}

#[test]
fn stale_parent_revision_conflicts() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    let rev1 = store.put_content("/a.txt", b"one", None)?;
    store.put_content("/a.txt", b"two", Some(&rev1))?;

    let err = store
        .put_content("/a.txt", b"three", Some(&rev1))
        .expect_err("stale rev must conflict");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Conflict { .. })
    ));

    // Overwriting an existing object with no token at all conflicts too.
    let err = store
        .put_content("/a.txt", b"three", None)
        .expect_err("missing rev must conflict");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Conflict { .. })
    ));
    Ok(())
}

#[test]
fn metadata_reports_files_folders_and_absence() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    store.put_content("/dir/a.txt", b"abc", None)?;

    assert!(store.metadata("/")?.unwrap().is_dir);
    assert!(store.metadata("/dir")?.unwrap().is_dir);
    let file = store.metadata("/dir/a.txt")?.unwrap();
    assert!(!file.is_dir);
    assert_eq!(file.size, 3);
    assert!(file.rev.is_some());
    assert!(store.metadata("/ghost")?.is_none());
    Ok(())
}

#[test]
fn list_folder_returns_immediate_children_only() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    store.put_content("/dir/a.txt", b"a", None)?;
    store.put_content("/dir/sub/deep.txt", b"d", None)?;

    let names: Vec<String> = store
        .list_folder("/dir")?
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(names, ["a.txt", "sub"]);

    let root: Vec<String> = store.list_folder("/")?.into_iter().map(|(n, _)| n).collect();
    assert_eq!(root, ["dir"]);
    Ok(())
}

#[test]
fn list_folder_of_missing_directory_fails() {
    let store = MemoryStore::new();
    let err = store.list_folder("/ghost").expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::NotFound(_))
    ));
}

#[test]
fn delete_removes_subtree() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    store.put_content("/dir/a.txt", b"a", None)?;
    store.put_content("/dir/sub/b.txt", b"b", None)?;

    store.delete("/dir")?;
    assert!(store.metadata("/dir")?.is_none());
    assert!(store.metadata("/dir/a.txt")?.is_none());
    assert!(store.metadata("/dir/sub/b.txt")?.is_none());
    Ok(())
}

#[test]
fn move_carries_subtree() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    store.put_content("/old/a.txt", b"a", None)?;
    store.put_content("/old/sub/b.txt", b"b", None)?;

    store.move_object("/old", "/new")?;
    assert!(store.metadata("/old")?.is_none());
    assert!(store.metadata("/new")?.unwrap().is_dir);
    assert_eq!(store.get_content("/new/a.txt")?.unwrap().0, b"a");
    assert_eq!(store.get_content("/new/sub/b.txt")?.unwrap().0, b"b");
    Ok(())
}

#[test]
fn copy_leaves_source_in_place() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    store.put_content("/a.txt", b"abc", None)?;

    store.copy_object("/a.txt", "/b.txt")?;
    assert_eq!(store.get_content("/a.txt")?.unwrap().0, b"abc");
    assert_eq!(store.get_content("/b.txt")?.unwrap().0, b"abc");
    Ok(())
}

#[test]
fn create_folder_rejects_duplicates() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    store.create_folder("/dir")?;
    assert!(store.create_folder("/dir").is_err());
    Ok(())
}

#[test]
fn get_content_of_folder_is_an_error() -> boxfs::Result<()> {
    let store = MemoryStore::new();
    store.create_folder("/dir")?;
    assert!(store.get_content("/dir").is_err());
    Ok(())
}
