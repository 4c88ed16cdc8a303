use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::commands::common::{open_orchestrator, target_folders, DataPaths};
use crate::error::CliError;

pub async fn run_watch(
    folder: Option<&str>,
    paths: &DataPaths,
    remote_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let orchestrator = Arc::new(open_orchestrator(paths, remote_dir).await?);
    let folders = target_folders(orchestrator.store(), folder).await?;
    if folders.is_empty() {
        println!("No sync folders configured.");
        return Ok(());
    }

    let stop = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for id in folders {
        println!("Watching {id}");
        let orchestrator = Arc::clone(&orchestrator);
        let stop = stop.clone();
        tasks.spawn(async move { orchestrator.watch_folder(&id, stop).await });
    }
    {
        let orchestrator = Arc::clone(&orchestrator);
        let stop = stop.clone();
        tasks.spawn(async move { orchestrator.run_queue(stop).await });
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("Stopping...");
        }
        Some(finished) = tasks.join_next() => {
            // A watcher gave up early; stop the rest and report it
            finished.map_err(|error| CliError::Io(std::io::Error::other(error)))??;
        }
    }

    stop.cancel();
    orchestrator.shutdown();
    while let Some(finished) = tasks.join_next().await {
        finished.map_err(|error| CliError::Io(std::io::Error::other(error)))??;
    }
    Ok(())
}
