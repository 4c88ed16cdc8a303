use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use driftsync_core::ConflictPolicy;

#[derive(Parser)]
#[command(name = "driftsync")]
#[command(about = "Keep a folder in sync with a remote copy, offline first")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the metadata database and config.json
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Root directory of the remote copy (remembered once set)
    #[arg(long, global = true, value_name = "PATH")]
    pub remote_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage sync folders
    Folder {
        #[command(subcommand)]
        command: FolderCommands,
    },
    /// Run a sync pass and drain due operations
    Sync {
        /// Only sync this folder
        #[arg(long, value_name = "ID")]
        folder: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show folder and queue status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and resolve conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Inspect and manage the offline operation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Watch folders and sync on change until Ctrl-C
    Watch {
        /// Only watch this folder
        #[arg(long, value_name = "ID")]
        folder: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum FolderCommands {
    /// Register a local directory for syncing
    Add {
        /// Folder identifier
        id: String,
        /// Local directory to sync
        path: PathBuf,
        /// Path under the remote root (defaults to the folder id)
        #[arg(long, value_name = "PATH")]
        remote_root: Option<String>,
        /// Only push local changes
        #[arg(long)]
        one_way: bool,
        /// Conflict policy applied during passes
        #[arg(long, value_enum, default_value_t = PolicyArg::AskUser)]
        policy: PolicyArg,
        /// Gitignore-style exclude pattern (repeatable, later wins)
        #[arg(long = "exclude", value_name = "PATTERN")]
        excludes: Vec<String>,
        /// Do not sync automatically in `watch`
        #[arg(long)]
        no_auto_sync: bool,
    },
    /// List sync folders
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget a sync folder and its metadata (files are left alone)
    Remove {
        /// Folder identifier
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List open conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one conflict
    Resolve {
        /// Conflict ID or unique ID prefix
        id: String,
        /// How to resolve it
        #[arg(value_enum)]
        policy: PolicyArg,
    },
    /// Resolve every open conflict with one policy
    ResolveAll {
        #[arg(value_enum)]
        policy: PolicyArg,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued operations
    List {
        /// Include failed and completed operations
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-queue a failed operation
    Retry {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Drop an operation that has not completed
    Cancel {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Purge completed operations and resolved conflicts past retention
    Cleanup,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PolicyArg {
    KeepLocal,
    KeepServer,
    KeepNewest,
    AskUser,
}

impl From<PolicyArg> for ConflictPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::KeepLocal => Self::KeepLocal,
            PolicyArg::KeepServer => Self::KeepServer,
            PolicyArg::KeepNewest => Self::KeepNewest,
            PolicyArg::AskUser => Self::AskUser,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
