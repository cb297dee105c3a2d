//! Operation dispatch: one method per POSIX-shaped call, each composed from
//! the stat cache, the handle table and remote store calls.
//!
//! Mutating operations (mkdir, rename, unlink, ...) deliberately do not
//! invalidate affected cache entries; staleness is bounded by the TTL alone.

use std::sync::Arc;

use tracing::debug;

use crate::{
    fs::{
        cache::{CachePolicy, StatCache},
        handle::FileHandleTable,
        OpenMode,
    },
    remote::{join_path, Metadata, RemoteStore},
    Error, Result,
};

pub struct Dispatcher {
    store: Arc<dyn RemoteStore>,
    cache: Arc<StatCache>,
    handles: FileHandleTable,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RemoteStore>, policy: CachePolicy) -> Self {
        let cache = Arc::new(StatCache::new(policy.fresh_window));
        Self::with_cache(store, cache)
    }

    pub fn with_cache(store: Arc<dyn RemoteStore>, cache: Arc<StatCache>) -> Self {
        Self {
            handles: FileHandleTable::new(Arc::clone(&store)),
            store,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<StatCache> {
        &self.cache
    }

    pub fn open_sessions(&self) -> usize {
        self.handles.open_sessions()
    }

    /// Cached metadata when fresh; otherwise one remote fetch whose result
    /// overwrites the cache entry. An absent object is NotFound.
    pub fn getattr(&self, path: &str) -> Result<Metadata> {
        if let Some(stats) = self.cache.lookup(path) {
            return Ok(stats);
        }
        debug!(path, "stat cache miss, fetching metadata");
        let stats = self
            .store
            .metadata(path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.cache.store(path, stats.clone());
        Ok(stats)
    }

    /// Immediate children of a directory. Every child's metadata is stored
    /// into the cache as a side effect, so the getattr burst that follows a
    /// listing is served without further remote calls.
    pub fn readdir(&self, path: &str) -> Result<Vec<(String, Metadata)>> {
        let children = self.store.list_folder(path)?;
        for (name, stats) in &children {
            self.cache.store(&join_path(path, name), stats.clone());
        }
        Ok(children)
    }

    pub fn open(&self, path: &str, mode: OpenMode) -> Result<u64> {
        self.handles.open(path, mode)
    }

    /// Buffer read; no remote I/O on this path.
    pub fn read(&self, handle: u64, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.handles.read(handle, offset, size)
    }

    /// Buffer write; no remote I/O on this path.
    pub fn write(&self, handle: u64, offset: u64, data: &[u8]) -> Result<u32> {
        self.handles.write(handle, offset, data)
    }

    /// Write-back and session teardown; a conflict from the store surfaces
    /// as a failed close.
    pub fn release(&self, handle: u64) -> Result<()> {
        self.handles.release(handle)
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.store.create_folder(path)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.store.delete(path)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.store.delete(path)
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.store.move_object(from, to)
    }

    /// Hard links and symlinks are approximated by a best-effort remote
    /// copy; the store has no link concept.
    pub fn link(&self, source: &str, target: &str) -> Result<()> {
        self.store.copy_object(source, target)
    }

    pub fn readlink(&self, path: &str) -> Result<Vec<u8>> {
        self.store
            .get_content(path)?
            .map(|(bytes, _)| bytes)
            .ok_or_else(|| Error::NotFound(path.to_string()).into())
    }

    /// Fetch, truncate or zero-pad to `length`, and push the whole object
    /// back under its current revision.
    pub fn truncate(&self, path: &str, length: u64) -> Result<()> {
        let (mut data, rev) = self
            .store
            .get_content(path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        data.resize(length as usize, 0);
        self.store.put_content(path, &data, Some(&rev))?;
        Ok(())
    }
}
