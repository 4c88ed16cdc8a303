//! Reconciliation scans and lazy content hashing

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::ExcludeMatcher;
use crate::models::{FileAction, FileEvent, FileRecord};
use crate::{util, Result};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// A file or directory found on disk, without its content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub size: u64,
    pub modified_at: i64,
    pub is_directory: bool,
}

/// Walk `root`, skipping excluded paths (and everything below excluded directories).
///
/// Symlinks are not followed and are not synced. Entries removed while the
/// walk is running are left out; a missing `root` is an error.
pub fn walk_local(root: &Path, excludes: &ExcludeMatcher) -> Result<Vec<LocalEntry>> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            util::relative_path(root, entry.path()).map_or(true, |relative| {
                !excludes.is_excluded(&relative, entry.file_type().is_dir())
            })
        });

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.depth() > 0 && is_not_found(error.io_error()) => {
                tracing::debug!(path = ?error.path(), "Entry vanished during walk");
                continue;
            }
            Err(error) => return Err(std::io::Error::from(error).into()),
        };
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            tracing::debug!(path = %entry.path().display(), "Skipping symlink");
            continue;
        }

        let Some(metadata) = stat(entry.path())? else {
            tracing::debug!(path = %entry.path().display(), "Entry vanished during walk");
            continue;
        };
        let modified_at = metadata.modified().map_or(0, util::system_time_millis);
        entries.push(LocalEntry {
            relative_path: util::relative_path(root, entry.path())?,
            absolute_path: entry.into_path(),
            size: if file_type.is_dir() { 0 } else { metadata.len() },
            modified_at,
            is_directory: file_type.is_dir(),
        });
    }
    Ok(entries)
}

fn is_not_found(error: Option<&std::io::Error>) -> bool {
    error.is_some_and(|error| error.kind() == std::io::ErrorKind::NotFound)
}

/// Metadata without following symlinks; `None` once the path is gone.
fn stat(path: &Path) -> Result<Option<std::fs::Metadata>> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(error) if is_not_found(Some(&error)) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Compare a walk against stored records by size and mtime only.
///
/// Unknown paths are `Created`, changed stats are `Modified`, stored paths
/// missing on disk are `Deleted`. Output is sorted by path.
pub fn reconcile(entries: &[LocalEntry], known: &[FileRecord], now: i64) -> Vec<FileEvent> {
    let known: HashMap<&str, &FileRecord> = known
        .iter()
        .map(|record| (record.relative_path.as_str(), record))
        .collect();

    let mut events = Vec::new();
    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    for entry in entries {
        seen.insert(entry.relative_path.as_str());
        match known.get(entry.relative_path.as_str()) {
            None => events.push(FileEvent::new(
                entry.relative_path.clone(),
                FileAction::Created,
                now,
            )),
            Some(record)
                if !entry.is_directory && record.stat_differs(entry.size, entry.modified_at) =>
            {
                events.push(FileEvent::new(
                    entry.relative_path.clone(),
                    FileAction::Modified,
                    now,
                ));
            }
            Some(_) => {}
        }
    }

    for path in known.keys() {
        if !seen.contains(path) {
            events.push(FileEvent::new(*path, FileAction::Deleted, now));
        }
    }

    events.sort_by(|a, b| a.path.cmp(&b.path));
    events
}

/// Streaming BLAKE3 digest of a file as lower-case hex.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0_u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// `hash_file` on the blocking pool.
pub async fn hash_file_async(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|error| crate::Error::Io(std::io::Error::other(error)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn walk_skips_excluded_trees() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        write(dir.path(), "notes/b.md", "b");
        write(dir.path(), "target/debug/app", "bin");
        write(dir.path(), "c.txt.driftsync-part", "partial");

        let excludes =
            ExcludeMatcher::new(dir.path(), &["target/".to_string()], None).unwrap();
        let paths: Vec<_> = walk_local(dir.path(), &excludes)
            .unwrap()
            .into_iter()
            .map(|entry| (entry.relative_path, entry.is_directory))
            .collect();

        assert_eq!(
            paths,
            vec![
                ("a.txt".to_string(), false),
                ("notes".to_string(), true),
                ("notes/b.md".to_string(), false),
            ]
        );
    }

    #[test]
    fn vanished_paths_stat_to_none_but_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        assert!(stat(&dir.path().join("a.txt")).unwrap().is_some());
        assert!(stat(&dir.path().join("gone.txt")).unwrap().is_none());

        let excludes = ExcludeMatcher::new(dir.path(), &[], None).unwrap();
        assert!(walk_local(&dir.path().join("missing"), &excludes).is_err());
    }

    #[test]
    fn reconcile_reports_created_modified_deleted() {
        let entry = |path: &str, size: u64, mtime: i64| LocalEntry {
            relative_path: path.to_string(),
            absolute_path: PathBuf::from("/root").join(path),
            size,
            modified_at: mtime,
            is_directory: false,
        };
        let record = |path: &str, size: u64, mtime: i64| {
            let mut record = FileRecord::new("docs", path, "laptop");
            record.size = size;
            record.modified_at = mtime;
            record
        };

        let entries = vec![entry("same.txt", 1, 10), entry("changed.txt", 2, 30), entry("new.txt", 3, 40)];
        let known = vec![record("same.txt", 1, 10), record("changed.txt", 2, 20), record("gone.txt", 4, 10)];

        let events: Vec<_> = reconcile(&entries, &known, 99)
            .into_iter()
            .map(|event| (event.path, event.action))
            .collect();
        assert_eq!(
            events,
            vec![
                ("changed.txt".to_string(), FileAction::Modified),
                ("gone.txt".to_string(), FileAction::Deleted),
                ("new.txt".to_string(), FileAction::Created),
            ]
        );
    }

    #[test]
    fn hash_matches_one_shot_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let payload: Vec<u8> = (0..200_000_u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &payload).unwrap();

        let expected = blake3::hash(&payload).to_hex().to_string();
        assert_eq!(hash_file(&path).unwrap(), expected);
    }
}
