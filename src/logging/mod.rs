//! Logging initialization using `tracing` and `tracing-subscriber`.

use tracing::info;
use tracing_subscriber::{fmt, util::SubscriberInitExt, EnvFilter};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

/// Snapshot of stat-cache health, emitted from the background sweeper so
/// hit rates and eviction churn are visible in logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatCacheSnapshot {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
    pub malformed_evicted: u64,
}

/// Initialize global tracing subscriber. Safe to call multiple times; subsequent
/// calls will no-op.
pub fn init_logging(format: LogFormat) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Human => {
            let _ = builder.finish().try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().finish().try_init();
        }
    };

    Ok(())
}

/// Emit structured stat-cache metrics. Called once per sweep pass to keep
/// log volume bounded.
pub fn log_stat_cache_metrics(snapshot: StatCacheSnapshot) {
    info!(
        target = "boxfs::stat_cache",
        entries = snapshot.entries,
        hits = snapshot.hits,
        misses = snapshot.misses,
        evicted = snapshot.evicted,
        malformed_evicted = snapshot.malformed_evicted,
        "stat_cache_snapshot"
    );
}
