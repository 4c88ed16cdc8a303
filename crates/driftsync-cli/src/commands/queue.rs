use driftsync_core::queue::OperationQueue;
use driftsync_core::{MetadataStore, OperationId, PendingOperation};

use crate::commands::common::{
    format_operation_lines, load_config, now_ms, open_store, resolve_by_prefix, DataPaths,
};
use crate::error::CliError;

fn open_queue(paths: &DataPaths) -> Result<(MetadataStore, OperationQueue), CliError> {
    let store = open_store(paths)?;
    let queue = OperationQueue::new(store.clone(), load_config(paths)?);
    Ok((store, queue))
}

pub async fn run_queue_list(all: bool, as_json: bool, paths: &DataPaths) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let operations = if all {
        store.list_operations(None).await?
    } else {
        store.list_pending().await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_operation_lines(&operations, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_retry(id: &str, paths: &DataPaths) -> Result<(), CliError> {
    let (store, queue) = open_queue(paths)?;
    let operation_id = resolve_operation_id(id, &store.list_operations(None).await?)?;
    let operation = queue.retry(&operation_id).await?;
    println!("{}", operation.id);
    Ok(())
}

pub async fn run_queue_cancel(id: &str, paths: &DataPaths) -> Result<(), CliError> {
    let (store, queue) = open_queue(paths)?;
    let operation_id = resolve_operation_id(id, &store.list_operations(None).await?)?;
    queue.cancel(&operation_id).await?;
    println!("{operation_id}");
    Ok(())
}

pub async fn run_queue_cleanup(paths: &DataPaths) -> Result<(), CliError> {
    let (_, queue) = open_queue(paths)?;
    let report = queue.cleanup(now_ms()).await?;
    println!(
        "Purged {} operations and {} resolved conflicts",
        report.operations, report.conflicts
    );
    Ok(())
}

pub fn resolve_operation_id(
    query: &str,
    operations: &[PendingOperation],
) -> Result<OperationId, CliError> {
    resolve_by_prefix(
        query,
        operations
            .iter()
            .map(|operation| (operation.id.to_string(), operation.id)),
    )
}
