use thiserror::Error;

pub mod cli;
pub mod fs;
pub mod logging;
pub mod remote;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no such remote object: {0}")]
    NotFound(String),
    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),
    #[error("revision conflict writing {path} (expected {expected})")]
    Conflict { path: String, expected: String },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("remote store error: {0}")]
    Remote(String),
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("invalid mount target: {0}")]
    InvalidTargetDir(String),
    #[error("target is not mounted: {0}")]
    NotMounted(String),
}

impl Error {
    /// Errno for the FUSE reply boundary. A revision conflict deliberately
    /// surfaces as EIO: a failed write-back is reported, never retried or
    /// merged (last-writer-wins is not attempted).
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::InvalidHandle(_) => libc::EBADF,
            Error::Unsupported(_) => libc::EROFS,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }
}

/// Errno for an arbitrary error chain; unrecognized errors map to EIO.
pub fn errno_of(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<Error>()
        .map(Error::errno)
        .unwrap_or(libc::EIO)
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    // Initialize logging before doing anything else. Defaults to human format for the CLI.
    logging::init_logging(logging::LogFormat::Human)?;

    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;
    cli::dispatch(cli_args)
}
