//! Native filesystem watching via `notify`

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::models::{FileAction, FileEvent};
use crate::{util, Error, Result};

/// What the native watcher reports to the detector loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// A normalized event for a path under the root
    Event(FileEvent),
    /// The backend lost events (overflow, unknown kind); a full scan is needed
    Rescan,
}

/// Keeps the native watcher alive; dropping it stops event delivery.
pub struct FolderWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FolderWatcher {
    /// Watch `root` recursively, pushing signals into a bounded channel.
    ///
    /// `notify` delivers callbacks on its own thread; a full channel blocks
    /// that thread until the detector catches up.
    pub fn start(root: &Path, capacity: usize) -> Result<(Self, mpsc::Receiver<WatchSignal>)> {
        let root = root
            .canonicalize()
            .map_err(|error| Error::Watcher(format!("{}: {error}", root.display())))?;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let callback_root = root.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let signals = match result {
                    Ok(event) => convert_event(&callback_root, &event, util::now_millis()),
                    Err(error) => {
                        tracing::warn!(%error, "File watcher error");
                        vec![WatchSignal::Rescan]
                    }
                };
                for signal in signals {
                    if tx.blocking_send(signal).is_err() {
                        // Receiver gone; the detector has stopped
                        return;
                    }
                }
            },
            Config::default(),
        )
        .map_err(|error| Error::Watcher(error.to_string()))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|error| Error::Watcher(error.to_string()))?;
        tracing::info!(root = %root.display(), "Watching folder");

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    /// Canonical root being watched
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map a raw `notify` event to zero or more signals relative to `root`.
pub fn convert_event(root: &Path, event: &Event, now: i64) -> Vec<WatchSignal> {
    if event.need_rescan() {
        return vec![WatchSignal::Rescan];
    }

    let relative = |path: &PathBuf| util::relative_path(root, path).ok().filter(|p| !p.is_empty());
    let single = |action: FileAction| {
        event
            .paths
            .first()
            .and_then(relative)
            .map(|path| WatchSignal::Event(FileEvent::new(path, action, now)))
            .into_iter()
            .collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Create(_) => single(FileAction::Created),
        EventKind::Remove(_) => single(FileAction::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
            match (relative(&event.paths[0]), relative(&event.paths[1])) {
                (Some(from), Some(to)) => vec![WatchSignal::Event(FileEvent::moved(from, to, now))],
                // Moved out of the root
                (Some(from), None) => vec![WatchSignal::Event(FileEvent::new(
                    from,
                    FileAction::Deleted,
                    now,
                ))],
                // Moved in from elsewhere
                (None, Some(to)) => vec![WatchSignal::Event(FileEvent::new(
                    to,
                    FileAction::Created,
                    now,
                ))],
                (None, None) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => single(FileAction::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => single(FileAction::Created),
        EventKind::Modify(ModifyKind::Name(_)) => vec![WatchSignal::Rescan],
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => Vec::new(),
        EventKind::Modify(_) => single(FileAction::Modified),
        EventKind::Any | EventKind::Other => vec![WatchSignal::Rescan],
    }
}
