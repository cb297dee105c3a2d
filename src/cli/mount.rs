//! Implementation of `boxfs mount`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    time::Duration,
};

use clap::Args;
use ctrlc;
use tracing::{info, instrument};

use crate::{
    fs::{
        cache::{spawn_sweeper, CachePolicy, Sweeper},
        fuse::{self, MountHandle},
        ops::Dispatcher,
    },
    remote::{http::HttpStore, memory::MemoryStore, RemoteStore},
    Error, Result,
};

#[derive(Debug, Clone, Args)]
pub struct MountArgs {
    /// OAuth access token for the remote store
    #[arg(long = "token", env = "BOXFS_TOKEN")]
    pub token: Option<String>,

    /// Path to the mount target directory
    #[arg(long = "mnt-path")]
    pub mnt_path: Option<PathBuf>,

    /// Serve an in-memory store instead of the remote API (for local
    /// experimentation; contents vanish on exit)
    #[arg(long = "memory")]
    pub memory: bool,

    /// Seconds a cached stat entry is served without revalidation
    #[arg(long = "stat-ttl", default_value_t = 3)]
    pub stat_ttl: u64,

    /// Seconds between background cache sweeps
    #[arg(long = "sweep-interval", default_value_t = 10)]
    pub sweep_interval: u64,

    /// Age in seconds beyond which the sweeper evicts an entry
    #[arg(long = "sweep-threshold", default_value_t = 4)]
    pub sweep_threshold: u64,
}

impl MountArgs {
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            fresh_window: Duration::from_secs(self.stat_ttl),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            sweep_threshold: Duration::from_secs(self.sweep_threshold),
        }
    }
}

#[derive(Debug)]
pub struct MountContext {
    pub mnt_path: PathBuf,
    pub fuse_handle: Option<MountHandle>,
    pub sweeper: Option<Sweeper>,
}

pub fn execute(args: MountArgs) -> Result<()> {
    // Execute the mount and hold it until a termination signal is received.
    let mut ctx = mount(args)?;

    if let Some(handle) = ctx.fuse_handle.take() {
        info!("boxfs mount active; press Ctrl+C to unmount");

        #[derive(Debug)]
        enum Event {
            Signal,
            Unmounted,
        }

        let (tx, rx) = mpsc::channel();

        // Handle SIGINT/SIGTERM.
        ctrlc::set_handler({
            let tx = tx.clone();
            move || {
                let _ = tx.send(Event::Signal);
            }
        })
        .map_err(|e| Error::Cli(format!("failed to install signal handler: {e}")))?;

        // Watch for external unmounts.
        let mount_path = ctx.mnt_path.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_millis(500));
            if !is_mounted(&mount_path) {
                let _ = tx.send(Event::Unmounted);
                break;
            }
        });

        // Wait for either event.
        match rx.recv() {
            Ok(Event::Signal) => {
                info!("signal received; unmounting {}", ctx.mnt_path.display());
                handle.unmount();
            }
            Ok(Event::Unmounted) => {
                info!(
                    "detected external unmount; exiting for {}",
                    ctx.mnt_path.display()
                );
                // Join the session to ensure the background thread is cleaned up.
                handle.unmount();
            }
            Err(_) => {
                handle.unmount();
            }
        }
    }

    if let Some(sweeper) = ctx.sweeper.take() {
        sweeper.stop();
    }

    Ok(())
}

/// Check if a path is currently mounted (Linux-only, /proc/mounts).
fn is_mounted(path: &Path) -> bool {
    if let Ok(contents) = fs::read_to_string("/proc/mounts") {
        let target = path.to_string_lossy();
        return contents
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|p| p == target);
    }
    false
}

/// Perform mount orchestration used by both the CLI and tests.
#[instrument(skip(args), fields(mnt = ?args.mnt_path, memory = args.memory))]
pub fn mount(args: MountArgs) -> Result<MountContext> {
    let mnt_path = args
        .mnt_path
        .clone()
        .ok_or_else(|| Error::Cli("mnt_path is required".into()))?;

    if !mnt_path.exists() || !mnt_path.is_dir() {
        return Err(Error::InvalidTargetDir(mnt_path.display().to_string()).into());
    }

    let store: Arc<dyn RemoteStore> = if args.memory {
        info!("serving an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let token = args
            .token
            .clone()
            .ok_or_else(|| Error::Cli("token is required".into()))?;
        Arc::new(HttpStore::new(token))
    };

    let policy = args.cache_policy();
    let ops = Arc::new(Dispatcher::new(store, policy));

    let sweeper = spawn_sweeper(
        Arc::clone(ops.cache()),
        policy.sweep_interval,
        policy.sweep_threshold,
    );
    info!(
        ttl_secs = policy.fresh_window.as_secs(),
        sweep_secs = policy.sweep_interval.as_secs(),
        "stat cache configured"
    );

    let fuse_handle = Some(fuse::spawn_fs(ops, &mnt_path)?);
    info!(mnt = %mnt_path.display(), "mount ready");

    Ok(MountContext {
        mnt_path,
        fuse_handle,
        sweeper: Some(sweeper),
    })
}
