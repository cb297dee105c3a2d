//! Remote object-store boundary.
//!
//! The store offers whole-object get/put, list-by-prefix and optimistic
//! revision tokens only; nothing resembling partial writes, stat
//! consistency or locking. Everything above this module is built around
//! those limitations.

use std::time::SystemTime;

use crate::Result;

pub mod http;
pub mod memory;

/// Opaque optimistic-concurrency token (a revision identifier on the wire).
pub type Revision = String;

/// Object metadata as reported by the remote store. Derived once per fetch
/// and replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub is_dir: bool,
    pub size: u64,
    pub modified: SystemTime,
    pub rev: Option<Revision>,
}

impl Metadata {
    pub fn directory() -> Self {
        Self {
            is_dir: true,
            size: 0,
            modified: SystemTime::now(),
            rev: None,
        }
    }

    pub fn file(size: u64, modified: SystemTime, rev: Revision) -> Self {
        Self {
            is_dir: false,
            size,
            modified,
            rev: Some(rev),
        }
    }
}

/// Metadata-only view of the store; all the stat cache ever needs.
pub trait MetadataSource: Send + Sync {
    /// Metadata for a single path, or `None` if the object does not exist.
    /// Any other failure is terminal for the calling operation.
    fn metadata(&self, path: &str) -> Result<Option<Metadata>>;

    /// Immediate children of a directory as `(name, metadata)` pairs.
    fn list_folder(&self, path: &str) -> Result<Vec<(String, Metadata)>>;
}

/// Full object-store surface consumed by the dispatcher and handle table.
///
/// Retries, timeouts and authentication live behind this trait; callers
/// treat every error as terminal for that one call.
pub trait RemoteStore: MetadataSource {
    /// Whole-object download: content plus its current revision, or `None`
    /// if the object does not exist.
    fn get_content(&self, path: &str) -> Result<Option<(Vec<u8>, Revision)>>;

    /// Whole-object upload. `parent_rev` requests optimistic-concurrency
    /// protection: a mismatch with the object's current revision fails with
    /// `Error::Conflict`. Returns the new revision.
    fn put_content(&self, path: &str, data: &[u8], parent_rev: Option<&Revision>)
        -> Result<Revision>;

    fn move_object(&self, from: &str, to: &str) -> Result<()>;

    fn copy_object(&self, from: &str, to: &str) -> Result<()>;

    fn delete(&self, path: &str) -> Result<()>;

    fn create_folder(&self, path: &str) -> Result<()>;
}

/// Join a child name onto a remote path (`/` is the root).
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent of a remote path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final component of a remote path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
