use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackctl")]
#[command(about = "Deploy, inspect and lock declarative stacks of local content servers")]
pub struct Cli {
    /// Stack file path (defaults to stack.yaml, searched upward)
    #[arg(short, long, global = true)]
    pub stack: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy the stack's nodes
    Deploy {
        /// Keep workers serving until Ctrl-C
        #[arg(long)]
        hold: bool,
    },
    /// Report nodes whose recorded workers no longer respond
    Drift {
        /// Output reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear recorded outputs of nodes that no longer respond
    Refresh,
    /// Inspect or release the deployment lock
    #[command(subcommand)]
    Lock(LockCommands),
    /// Show the stack's audit log
    Audit {
        /// Show at most this many entries (most recent)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Serve a directory over HTTP (the built-in content worker)
    Serve {
        #[arg(long)]
        port: u16,

        #[arg(long)]
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum LockCommands {
    /// Show the current lock holder
    Status,
    /// Force-release the lock
    Release,
}
