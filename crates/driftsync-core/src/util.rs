//! Shared utility functions used across multiple modules.

use std::path::{Component, Path};
use std::time::SystemTime;

use crate::{Error, Result};

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert a filesystem timestamp to Unix milliseconds (0 when before the epoch).
pub fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| {
            i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
        })
}

/// Relative path of `path` under `root`, using `/` separators on every platform.
///
/// Rejects paths outside the root and paths containing `..`.
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let stripped = path.strip_prefix(root).map_err(|_| {
        Error::InvalidInput(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut parts = Vec::new();
    for component in stripped.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "unsupported path component in {}",
                    path.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Validate a relative path coming from a remote listing or the CLI.
pub fn normalize_relative_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("path must not be empty".to_string()));
    }
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(Error::InvalidInput(format!("invalid relative path: {raw}")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn relative_path_uses_forward_slashes() {
        let root = PathBuf::from("/data/root");
        let path = root.join("docs").join("a.txt");
        assert_eq!(relative_path(&root, &path).unwrap(), "docs/a.txt");
        assert!(relative_path(&root, Path::new("/elsewhere/a.txt")).is_err());
    }

    #[test]
    fn compact_text_trims_and_truncates() {
        assert_eq!(compact_text("  timed out \n"), "timed out");
        assert_eq!(compact_text(&"x".repeat(500)).len(), 180);
    }

    #[test]
    fn normalize_relative_path_rejects_traversal() {
        assert_eq!(normalize_relative_path("/docs/a.txt").unwrap(), "docs/a.txt");
        assert!(normalize_relative_path("../etc/passwd").is_err());
        assert!(normalize_relative_path("a//b").is_err());
        assert!(normalize_relative_path("  ").is_err());
    }
}
