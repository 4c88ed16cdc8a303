//! driftsync CLI - Command-line interface for the driftsync engine
//!
//! Registers folders, runs sync passes, and inspects conflicts and the
//! offline operation queue.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands, ConflictCommands, FolderCommands, QueueCommands};
use crate::commands::common::resolve_data_dir;
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{
    run_conflicts_list, run_conflicts_resolve, run_conflicts_resolve_all,
};
use crate::commands::folder::{run_folder_add, run_folder_list, run_folder_remove, NewFolder};
use crate::commands::queue::{run_queue_cancel, run_queue_cleanup, run_queue_list, run_queue_retry};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "driftsync=info".parse::<tracing_subscriber::filter::Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let paths = resolve_data_dir(cli.data_dir)?;
    let remote_dir = cli.remote_dir;

    match cli.command {
        Commands::Folder { command } => match command {
            FolderCommands::Add {
                id,
                path,
                remote_root,
                one_way,
                policy,
                excludes,
                no_auto_sync,
            } => {
                let new = NewFolder {
                    id: &id,
                    path: &path,
                    remote_root: remote_root.as_deref(),
                    one_way,
                    policy: policy.into(),
                    excludes,
                    auto_sync: !no_auto_sync,
                };
                run_folder_add(new, &paths).await?;
            }
            FolderCommands::List { json } => run_folder_list(json, &paths).await?,
            FolderCommands::Remove { id } => run_folder_remove(&id, &paths).await?,
        },
        Commands::Sync { folder, json } => {
            run_sync(folder.as_deref(), json, &paths, remote_dir).await?;
        }
        Commands::Status { json } => run_status(json, &paths).await?,
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { json } => run_conflicts_list(json, &paths).await?,
            ConflictCommands::Resolve { id, policy } => {
                run_conflicts_resolve(&id, policy.into(), &paths, remote_dir).await?;
            }
            ConflictCommands::ResolveAll { policy } => {
                run_conflicts_resolve_all(policy.into(), &paths, remote_dir).await?;
            }
        },
        Commands::Queue { command } => match command {
            QueueCommands::List { all, json } => run_queue_list(all, json, &paths).await?,
            QueueCommands::Retry { id } => run_queue_retry(&id, &paths).await?,
            QueueCommands::Cancel { id } => run_queue_cancel(&id, &paths).await?,
            QueueCommands::Cleanup => run_queue_cleanup(&paths).await?,
        },
        Commands::Watch { folder } => run_watch(folder.as_deref(), &paths, remote_dir).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
