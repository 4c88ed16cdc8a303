use std::path::PathBuf;

use crate::commands::common::{format_report_lines, now_ms, open_orchestrator, target_folders, DataPaths};
use crate::error::CliError;

pub async fn run_sync(
    folder: Option<&str>,
    as_json: bool,
    paths: &DataPaths,
    remote_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let orchestrator = open_orchestrator(paths, remote_dir).await?;
    let folders = target_folders(orchestrator.store(), folder).await?;
    if folders.is_empty() {
        println!("No sync folders configured.");
        return Ok(());
    }

    let mut reports = Vec::new();
    let mut failed = 0;
    for id in &folders {
        match orchestrator.trigger_sync(id).await {
            Ok(report) => reports.push(report),
            Err(error) => {
                eprintln!("{id}: {error}");
                failed += 1;
            }
        }
    }
    let drained = orchestrator.process_queue(now_ms()).await?;

    if as_json {
        let payload = serde_json::json!({ "reports": reports, "queue": drained });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for report in &reports {
            for line in format_report_lines(report) {
                println!("{line}");
            }
        }
        println!(
            "queue: {} completed, {} retrying, {} failed",
            drained.completed, drained.retrying, drained.failed
        );
    }

    if failed > 0 {
        return Err(CliError::SyncFailed(failed));
    }
    Ok(())
}
