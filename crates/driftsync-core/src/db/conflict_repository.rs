//! Conflict repository implementation

use crate::error::{Error, Result};
use crate::models::{Conflict, ConflictId, ConflictPolicy};
use rusqlite::{params, Connection, OptionalExtension};

use super::parse_column;

const SELECT_COLUMNS: &str = "SELECT id, folder_id, relative_path, local_modified_at,
        remote_modified_at, local_hash, remote_hash, reason, detected_at,
        resolution, resolved_at
     FROM conflicts";

/// Trait for conflict storage operations
pub trait ConflictRepository {
    /// Record an open conflict, replacing an open one on the same path
    fn record(&self, conflict: &Conflict) -> Result<()>;

    /// Get a conflict by id (open or archived)
    fn get(&self, id: &ConflictId) -> Result<Option<Conflict>>;

    /// Open conflicts, optionally for one folder, oldest first
    fn list_open(&self, folder_id: Option<&str>) -> Result<Vec<Conflict>>;

    /// Archive a conflict with the chosen resolution
    fn mark_resolved(&self, id: &ConflictId, resolution: ConflictPolicy, at: i64) -> Result<()>;

    /// Drop the open conflict for a path, if any (e.g. it no longer differs)
    fn clear_open(&self, folder_id: &str, relative_path: &str) -> Result<bool>;

    /// Delete archived conflicts resolved before `before` (Unix ms)
    fn purge_resolved(&self, before: i64) -> Result<usize>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conflict> {
        let resolution: Option<String> = row.get(9)?;
        let resolution = resolution
            .map(|value| value.parse::<ConflictPolicy>())
            .transpose()
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    9,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?;

        Ok(Conflict {
            id: parse_column(row, 0)?,
            folder_id: row.get(1)?,
            relative_path: row.get(2)?,
            local_modified_at: row.get(3)?,
            remote_modified_at: row.get(4)?,
            local_hash: row.get(5)?,
            remote_hash: row.get(6)?,
            reason: row.get(7)?,
            detected_at: row.get(8)?,
            resolution,
            resolved_at: row.get(10)?,
        })
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn record(&self, conflict: &Conflict) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM conflicts
             WHERE folder_id = ? AND relative_path = ? AND resolved_at IS NULL",
            params![conflict.folder_id, conflict.relative_path],
        )?;
        tx.execute(
            "INSERT INTO conflicts (
                id, folder_id, relative_path, local_modified_at, remote_modified_at,
                local_hash, remote_hash, reason, detected_at, resolution, resolved_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.id.as_str(),
                conflict.folder_id,
                conflict.relative_path,
                conflict.local_modified_at,
                conflict.remote_modified_at,
                conflict.local_hash,
                conflict.remote_hash,
                conflict.reason,
                conflict.detected_at,
                conflict.resolution.map(ConflictPolicy::as_str),
                conflict.resolved_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &ConflictId) -> Result<Option<Conflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id.as_str()],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn list_open(&self, folder_id: Option<&str>) -> Result<Vec<Conflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE resolved_at IS NULL AND (?1 IS NULL OR folder_id = ?1)
             ORDER BY detected_at ASC, relative_path ASC"
        ))?;
        let conflicts = stmt
            .query_map(params![folder_id], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }

    fn mark_resolved(&self, id: &ConflictId, resolution: ConflictPolicy, at: i64) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE conflicts SET resolution = ?, resolved_at = ?
             WHERE id = ? AND resolved_at IS NULL",
            params![resolution.as_str(), at, id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("open conflict {id}")));
        }
        Ok(())
    }

    fn clear_open(&self, folder_id: &str, relative_path: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM conflicts
             WHERE folder_id = ? AND relative_path = ? AND resolved_at IS NULL",
            params![folder_id, relative_path],
        )?;
        Ok(rows > 0)
    }

    fn purge_resolved(&self, before: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM conflicts WHERE resolved_at IS NOT NULL AND resolved_at < ?",
            params![before],
        )?;
        Ok(rows)
    }
}
