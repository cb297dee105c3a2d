//! Filesystem core for boxfs.
//!
//! Three pieces reconcile POSIX expectations with the remote store's
//! whole-object semantics: the stat cache ([`cache`]), the file-handle
//! table ([`handle`]) and the operation dispatcher ([`ops`]). The [`fuse`]
//! module adapts them to the kernel transport.

pub mod cache;
pub mod fuse;
pub mod handle;
pub mod ops;

/// The subset of open(2) flags the remote store can honor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub create: bool,
    pub truncate: bool,
}

impl OpenMode {
    pub fn from_flags(flags: i32) -> Self {
        Self {
            create: flags & libc::O_CREAT != 0,
            truncate: flags & libc::O_TRUNC != 0,
        }
    }

    pub fn create() -> Self {
        Self {
            create: true,
            truncate: true,
        }
    }

    /// CREATE and TRUNC both discard existing content and start from an
    /// empty buffer.
    pub fn creates_empty(&self) -> bool {
        self.create || self.truncate
    }
}
