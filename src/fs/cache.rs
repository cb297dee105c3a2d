//! Time-bounded metadata cache.
//!
//! Exists purely to bound remote round-trips for repeated getattr-style
//! calls (directory listings, `ls` patterns). Strict consistency is not a
//! goal: the remote store is only eventually consistent across clients, so
//! entries are served within a freshness window and evicted afterwards,
//! both lazily on lookup and from a background sweep.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::logging::{log_stat_cache_metrics, StatCacheSnapshot};
use crate::remote::Metadata;

/// Cache policy knobs. By default entries are served for 3 seconds and the
/// sweeper wakes every 10 to evict anything older than 4.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub fresh_window: Duration,
    pub sweep_interval: Duration,
    pub sweep_threshold: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            fresh_window: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(10),
            sweep_threshold: Duration::from_secs(4),
        }
    }
}

/// One cached stat. `cached_at` is optional so an entry missing its
/// timestamp is representable: such an entry is malformed and must be
/// evicted wherever it is encountered, never served and never allowed to
/// abort a sweep pass.
#[derive(Debug, Clone)]
pub struct StatEntry {
    pub stats: Metadata,
    pub cached_at: Option<Instant>,
}

impl StatEntry {
    pub fn new(stats: Metadata) -> Self {
        Self {
            stats,
            cached_at: Some(Instant::now()),
        }
    }
}

/// Path -> stat mapping guarded by a single lock. The lock is held only for
/// the duration of map access, never across a network call; two concurrent
/// misses on the same path may therefore both fetch remotely, and the last
/// store wins.
pub struct StatCache {
    entries: Mutex<HashMap<String, StatEntry>>,
    fresh_window: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
    malformed_evicted: AtomicU64,
}

impl StatCache {
    pub fn new(fresh_window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fresh_window,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            malformed_evicted: AtomicU64::new(0),
        }
    }

    /// Cached metadata iff present and fresh; `None` means the caller must
    /// refresh from the remote source. Stale and malformed entries found
    /// here are dropped on the spot. Performs no network I/O.
    pub fn lookup(&self, path: &str) -> Option<Metadata> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(entry) => {
                let fresh = entry
                    .cached_at
                    .map(|at| at.elapsed() < self.fresh_window)
                    .unwrap_or(false);
                if fresh {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.stats.clone());
                }
                if entry.cached_at.is_none() {
                    warn!(path, "evicting malformed cache entry on lookup");
                    self.malformed_evicted.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                }
                entries.remove(path);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite the entry for `path`, timestamped now. Idempotent;
    /// concurrent stores for one path race benignly (last write wins).
    pub fn store(&self, path: &str, stats: Metadata) {
        self.entries
            .lock()
            .insert(path.to_string(), StatEntry::new(stats));
    }

    /// Raw entry insertion; lets diagnostics and tests plant entries with
    /// arbitrary (including missing) timestamps.
    pub fn insert_entry(&self, path: &str, entry: StatEntry) {
        self.entries.lock().insert(path.to_string(), entry);
    }

    /// Drop the entry for `path` so the next lookup forces a refresh.
    pub fn invalidate(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// One sweep pass: evict every entry older than `threshold` along with
    /// any malformed entry. Each entry is judged independently so one bad
    /// entry can never stop the pass. Returns the number evicted.
    pub fn sweep_once(&self, threshold: Duration) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|path, entry| match entry.cached_at {
            Some(at) if at.elapsed() <= threshold => true,
            Some(_) => {
                debug!(path, "sweeping expired cache entry");
                self.evicted.fetch_add(1, Ordering::Relaxed);
                false
            }
            None => {
                warn!(path, "sweeping malformed cache entry (missing timestamp)");
                self.malformed_evicted.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
        before - entries.len()
    }

    pub fn snapshot(&self) -> StatCacheSnapshot {
        StatCacheSnapshot {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            malformed_evicted: self.malformed_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the background sweeper thread; signal it to stop and join it
/// via [`Sweeper::stop`].
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper").finish()
    }
}

impl Sweeper {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Spawn the proactive eviction loop: sleep `interval`, sweep with
/// `threshold`, emit a metrics snapshot, repeat until stopped. Only the
/// cache is touched; call-handling threads run independently.
pub fn spawn_sweeper(cache: Arc<StatCache>, interval: Duration, threshold: Duration) -> Sweeper {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        while !stop_flag.load(Ordering::SeqCst) {
            // Sleep in short slices so stop requests take effect promptly.
            let deadline = Instant::now() + interval;
            while Instant::now() < deadline {
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                thread::sleep(remaining.min(Duration::from_millis(200)));
            }
            if !cache.is_empty() {
                let evicted = cache.sweep_once(threshold);
                if evicted > 0 {
                    info!(evicted, "cache sweep evicted entries");
                }
            }
            log_stat_cache_metrics(cache.snapshot());
        }
    });
    Sweeper {
        stop,
        handle: Some(handle),
    }
}
