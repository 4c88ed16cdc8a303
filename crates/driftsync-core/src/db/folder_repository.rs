//! Sync folder repository implementation

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::models::{FolderStatus, SyncFolderConfig};
use rusqlite::{params, Connection, OptionalExtension};

use super::parse_column;

const SELECT_COLUMNS: &str = "SELECT id, device_id, local_root, remote_root, sync_type, auto_sync,
        conflict_policy, exclude_patterns, last_sync_at, status
     FROM sync_folders";

/// Trait for sync folder storage operations
pub trait FolderRepository {
    /// Insert or replace a folder configuration
    fn save(&self, folder: &SyncFolderConfig) -> Result<()>;

    /// Load a folder by id
    fn load(&self, id: &str) -> Result<Option<SyncFolderConfig>>;

    /// All folders ordered by id
    fn list(&self) -> Result<Vec<SyncFolderConfig>>;

    /// Remove a folder together with its records, operations, conflicts and sessions
    fn delete(&self, id: &str) -> Result<bool>;

    /// Record the start time of a fully successful pass
    fn set_last_sync_at(&self, id: &str, at: i64) -> Result<()>;

    /// Update the folder status
    fn set_status(&self, id: &str, status: FolderStatus) -> Result<()>;
}

/// `SQLite` implementation of `FolderRepository`
pub struct SqliteFolderRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteFolderRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_folder(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncFolderConfig> {
        let local_root: String = row.get(2)?;
        let excludes: String = row.get(7)?;
        Ok(SyncFolderConfig {
            id: row.get(0)?,
            device_id: row.get(1)?,
            local_root: PathBuf::from(local_root),
            remote_root: row.get(3)?,
            sync_type: parse_column(row, 4)?,
            auto_sync: row.get::<_, i32>(5)? != 0,
            conflict_resolution_policy: parse_column(row, 6)?,
            exclude_patterns: serde_json::from_str(&excludes).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
            last_sync_at: row.get(8)?,
            status: parse_column(row, 9)?,
        })
    }

    fn expect_row(rows: usize, id: &str) -> Result<()> {
        if rows == 0 {
            return Err(Error::NotFound(format!("sync folder {id}")));
        }
        Ok(())
    }
}

impl FolderRepository for SqliteFolderRepository<'_> {
    fn save(&self, folder: &SyncFolderConfig) -> Result<()> {
        let excludes = serde_json::to_string(&folder.exclude_patterns)?;
        self.conn.execute(
            "INSERT INTO sync_folders (
                id, device_id, local_root, remote_root, sync_type, auto_sync,
                conflict_policy, exclude_patterns, last_sync_at, status
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                device_id = excluded.device_id,
                local_root = excluded.local_root,
                remote_root = excluded.remote_root,
                sync_type = excluded.sync_type,
                auto_sync = excluded.auto_sync,
                conflict_policy = excluded.conflict_policy,
                exclude_patterns = excluded.exclude_patterns,
                last_sync_at = excluded.last_sync_at,
                status = excluded.status",
            params![
                folder.id,
                folder.device_id,
                folder.local_root.to_string_lossy(),
                folder.remote_root,
                folder.sync_type.as_str(),
                i32::from(folder.auto_sync),
                folder.conflict_resolution_policy.as_str(),
                excludes,
                folder.last_sync_at,
                folder.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<SyncFolderConfig>> {
        let folder = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id],
                Self::parse_folder,
            )
            .optional()?;
        Ok(folder)
    }

    fn list(&self) -> Result<Vec<SyncFolderConfig>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
        let folders = stmt
            .query_map([], Self::parse_folder)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        for table in [
            "file_records",
            "pending_operations",
            "conflicts",
            "upload_sessions",
        ] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE folder_id = ?"),
                params![id],
            )?;
        }
        let rows = tx.execute("DELETE FROM sync_folders WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn set_last_sync_at(&self, id: &str, at: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_folders SET last_sync_at = ? WHERE id = ?",
            params![at, id],
        )?;
        Self::expect_row(rows, id)
    }

    fn set_status(&self, id: &str, status: FolderStatus) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_folders SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        Self::expect_row(rows, id)
    }
}
