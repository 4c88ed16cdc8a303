use std::path::PathBuf;

use driftsync_core::{ConflictPolicy, MetadataStore};

use crate::commands::common::{
    format_conflict_lines, open_orchestrator, open_store, resolve_by_prefix, DataPaths,
};
use crate::error::CliError;

pub async fn run_conflicts_list(as_json: bool, paths: &DataPaths) -> Result<(), CliError> {
    let conflicts = open_store(paths)?.list_open_conflicts(None).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No open conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve(
    id: &str,
    policy: ConflictPolicy,
    paths: &DataPaths,
    remote_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let orchestrator = open_orchestrator(paths, remote_dir).await?;
    let conflict_id = resolve_conflict_id(id, orchestrator.store()).await?;
    let resolution = orchestrator.resolve_conflict(&conflict_id, policy).await?;
    println!("{conflict_id}  {}", serde_json::to_string(&resolution)?.trim_matches('"'));
    Ok(())
}

pub async fn run_conflicts_resolve_all(
    policy: ConflictPolicy,
    paths: &DataPaths,
    remote_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let orchestrator = open_orchestrator(paths, remote_dir).await?;
    let report = orchestrator.resolve_all_conflicts(policy).await?;
    for path in &report.resolved {
        println!("resolved  {path}");
    }
    for path in &report.skipped {
        println!("open      {path}");
    }
    Ok(())
}

async fn resolve_conflict_id(
    query: &str,
    store: &MetadataStore,
) -> Result<driftsync_core::ConflictId, CliError> {
    let open = store.list_open_conflicts(None).await?;
    resolve_by_prefix(
        query,
        open.into_iter().map(|conflict| (conflict.id.to_string(), conflict.id)),
    )
}
