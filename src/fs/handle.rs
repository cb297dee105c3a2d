//! File-handle table bridging the open/read/write/release lifecycle to
//! whole-object remote operations.
//!
//! Each open call buffers the entire object in memory; reads and writes
//! touch only that buffer, and the buffer is pushed back wholesale at
//! release time under the session's concurrency token. Handles come from a
//! 64-bit monotonic counter and are never reused; wraparound is assumed
//! unreachable for the process lifetime.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    fs::OpenMode,
    remote::{RemoteStore, Revision},
    Error, Result,
};

/// In-memory state of one open call. The buffer is privately owned by the
/// session; two opens of the same path get independent buffers and the last
/// release wins, consistent with the store's last-write-wins object model.
#[derive(Debug)]
pub struct FileSession {
    pub path: String,
    buffer: Vec<u8>,
    rev: Option<Revision>,
}

pub struct FileHandleTable {
    store: Arc<dyn RemoteStore>,
    sessions: DashMap<u64, FileSession>,
    next_handle: AtomicU64,
}

impl FileHandleTable {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Open `path` and register a session.
    ///
    /// CREATE/TRUNC starts from an empty buffer and pushes it immediately,
    /// establishing the object and capturing the resulting revision so the
    /// session's own release does not conflict with this push. A plain open
    /// fetches current content and revision, or fails NotFound.
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<u64> {
        let existing = self.store.get_content(path)?;

        let (buffer, rev) = if mode.creates_empty() {
            let parent = existing.as_ref().map(|(_, rev)| rev.clone());
            let rev = self.store.put_content(path, &[], parent.as_ref())?;
            (Vec::new(), Some(rev))
        } else if let Some((bytes, rev)) = existing {
            (bytes, Some(rev))
        } else {
            return Err(Error::NotFound(path.to_string()).into());
        };

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.sessions.insert(
            handle,
            FileSession {
                path: path.to_string(),
                buffer,
                rev,
            },
        );
        debug!(handle, path, "opened file session");
        Ok(handle)
    }

    /// Up to `size` bytes from the session buffer starting at `offset`.
    pub fn read(&self, handle: u64, offset: u64, size: u32) -> Result<Vec<u8>> {
        let session = self
            .sessions
            .get(&handle)
            .ok_or(Error::InvalidHandle(handle))?;
        let start = (offset as usize).min(session.buffer.len());
        let end = (start + size as usize).min(session.buffer.len());
        Ok(session.buffer[start..end].to_vec())
    }

    /// Copy `data` into the session buffer at `offset`, zero-extending as
    /// needed. Returns the number of bytes written.
    pub fn write(&self, handle: u64, offset: u64, data: &[u8]) -> Result<u32> {
        let mut session = self
            .sessions
            .get_mut(&handle)
            .ok_or(Error::InvalidHandle(handle))?;
        let start = offset as usize;
        let end = start + data.len();
        if session.buffer.len() < end {
            session.buffer.resize(end, 0);
        }
        session.buffer[start..end].copy_from_slice(data);
        Ok(data.len() as u32)
    }

    /// Write the session's full buffer back to the remote store under its
    /// concurrency token, then drop the session. The session is removed even
    /// when the push fails: the caller sees a failed close and must reopen
    /// and rewrite, a known data-loss window of whole-object semantics.
    pub fn release(&self, handle: u64) -> Result<()> {
        let (_, session) = self
            .sessions
            .remove(&handle)
            .ok_or(Error::InvalidHandle(handle))?;
        match self
            .store
            .put_content(&session.path, &session.buffer, session.rev.as_ref())
        {
            Ok(rev) => {
                debug!(handle, path = %session.path, rev, "write-back complete");
                Ok(())
            }
            Err(err) => {
                warn!(handle, path = %session.path, error = %err, "write-back failed; buffered data lost");
                Err(err)
            }
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }
}
