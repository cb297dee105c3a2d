//! CLI module; subcommands live here.

use clap::{CommandFactory, Parser, Subcommand};

use crate::Result;

pub mod mount;
pub mod unmount;

#[derive(Debug, Clone)]
pub enum Command {
    Mount(mount::MountArgs),
    Unmount(unmount::UnmountArgs),
}

#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub command: Option<Command>,
}

pub fn dispatch(args: CliArgs) -> Result<()> {
    match args.command {
        Some(Command::Mount(m)) => mount::execute(m),
        Some(Command::Unmount(u)) => unmount::execute(u),
        None => Ok(()),
    }
}

#[derive(Parser, Debug)]
#[command(name = "boxfs", version, about = "FUSE mount for revisioned cloud object stores")]
struct Cli {
    #[command(subcommand)]
    command: Option<Subcommands>,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Mount the remote store at a target directory and serve it in the
    /// foreground until interrupted or externally unmounted.
    Mount(mount::MountArgs),
    /// Unmount a previously mounted boxfs target.
    Unmount(unmount::UnmountArgs),
}

/// Parse CLI arguments into internal representation.
pub fn parse_args<I, S>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = args.into_iter().map(Into::into).collect();
    let cli = Cli::parse_from(argv);
    let command = match cli.command {
        Some(Subcommands::Mount(args)) => Some(Command::Mount(args)),
        Some(Subcommands::Unmount(args)) => Some(Command::Unmount(args)),
        None => None,
    };

    Ok(CliArgs { command })
}

/// Build the underlying clap `Command` (useful for help/usage contract tests).
pub fn clap_command() -> clap::Command {
    Cli::command()
}
