//! Gitignore-style path exclusion

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::transfer::PART_SUFFIX;
use crate::{util, Error, Result};

/// Decides whether a relative path takes part in sync.
///
/// Patterns are evaluated in order with gitignore semantics: later patterns
/// override earlier ones and `!pattern` re-includes. Temporary download files
/// and the metadata database are always excluded.
#[derive(Debug, Clone)]
pub struct ExcludeMatcher {
    gitignore: Gitignore,
}

impl ExcludeMatcher {
    /// Build a matcher for `root`. `store_path` is the metadata database, if it
    /// lives inside the folder.
    pub fn new(root: &Path, patterns: &[String], store_path: Option<&Path>) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            builder
                .add_line(None, pattern)
                .map_err(|error| Error::InvalidInput(format!("exclude pattern {pattern}: {error}")))?;
        }

        // Added last so user negations cannot re-include them
        let mut forced = vec![format!("*{PART_SUFFIX}")];
        if let Some(relative) = store_path.and_then(|path| util::relative_path(root, path).ok()) {
            forced.push(format!("/{relative}"));
            forced.push(format!("/{relative}-wal"));
            forced.push(format!("/{relative}-shm"));
            forced.push(format!("/{relative}-journal"));
        }
        for line in &forced {
            builder
                .add_line(None, line)
                .map_err(|error| Error::InvalidInput(error.to_string()))?;
        }

        let gitignore = builder
            .build()
            .map_err(|error| Error::InvalidInput(format!("exclude patterns: {error}")))?;
        Ok(Self { gitignore })
    }

    /// Whether `relative_path` (or any parent directory) is excluded.
    pub fn is_excluded(&self, relative_path: &str, is_dir: bool) -> bool {
        if relative_path.is_empty() {
            return false;
        }
        self.gitignore
            .matched_path_or_any_parents(relative_path, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> ExcludeMatcher {
        let patterns: Vec<String> = patterns.iter().map(ToString::to_string).collect();
        ExcludeMatcher::new(Path::new("/data/docs"), &patterns, None).unwrap()
    }

    #[test]
    fn later_patterns_override_earlier() {
        let m = matcher(&["*.log", "!keep.log"]);
        assert!(m.is_excluded("debug.log", false));
        assert!(!m.is_excluded("keep.log", false));
        assert!(!m.is_excluded("notes.txt", false));

        let reversed = matcher(&["!keep.log", "*.log"]);
        assert!(reversed.is_excluded("keep.log", false));
    }

    #[test]
    fn directory_patterns_cover_children() {
        let m = matcher(&["build/", ".git"]);
        assert!(m.is_excluded("build", true));
        assert!(m.is_excluded("build/out/app.bin", false));
        assert!(m.is_excluded(".git/config", false));
        assert!(!m.is_excluded("src/build.rs", false));
    }

    #[test]
    fn partial_downloads_and_store_are_always_excluded() {
        let root = Path::new("/data/docs");
        let store = root.join(".driftsync").join("driftsync.db");
        let m = ExcludeMatcher::new(
            root,
            &["!*.driftsync-part".to_string()],
            Some(store.as_path()),
        )
        .unwrap();

        assert!(m.is_excluded("big.iso.driftsync-part", false));
        assert!(m.is_excluded(".driftsync/driftsync.db", false));
        assert!(m.is_excluded(".driftsync/driftsync.db-wal", false));
        assert!(!m.is_excluded(".driftsync/other.txt", false));
    }
}
