//! File record repository implementation

use crate::error::Result;
use crate::models::FileRecord;
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_column, u64_column, u64_param};

const SELECT_COLUMNS: &str = "SELECT folder_id, relative_path, size, content_hash, is_directory,
        modified_at, sync_status, version, device_id, vector_clock
     FROM file_records";

/// Trait for file record storage operations
pub trait FileRepository {
    /// Insert or replace the record for its `(folder, path)`
    fn upsert(&self, record: &FileRecord) -> Result<()>;

    /// Get the record for a path
    fn get(&self, folder_id: &str, relative_path: &str) -> Result<Option<FileRecord>>;

    /// List records at or below `prefix` (empty prefix lists the whole folder)
    fn list_under(&self, folder_id: &str, prefix: &str) -> Result<Vec<FileRecord>>;

    /// Remove the record for a path; returns whether a row existed
    fn delete(&self, folder_id: &str, relative_path: &str) -> Result<bool>;

    /// Move the record at `from`, and any below it, to `to` in one
    /// transaction. Records already at the destination are replaced.
    fn rename(&self, folder_id: &str, from: &str, to: &str) -> Result<bool>;
}

/// `SQLite` implementation of `FileRepository`
pub struct SqliteFileRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteFileRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        let clock: String = row.get(9)?;
        Ok(FileRecord {
            folder_id: row.get(0)?,
            relative_path: row.get(1)?,
            size: u64_column(row, 2)?,
            content_hash: row.get(3)?,
            is_directory: row.get::<_, i32>(4)? != 0,
            modified_at: row.get(5)?,
            sync_status: parse_column(row, 6)?,
            version: u64_column(row, 7)?,
            device_id: row.get(8)?,
            vector_clock: serde_json::from_str(&clock).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    9,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })?,
        })
    }
}

impl FileRepository for SqliteFileRepository<'_> {
    fn upsert(&self, record: &FileRecord) -> Result<()> {
        let clock = serde_json::to_string(&record.vector_clock)?;
        self.conn.execute(
            "INSERT INTO file_records (
                folder_id, relative_path, size, content_hash, is_directory,
                modified_at, sync_status, version, device_id, vector_clock
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(folder_id, relative_path) DO UPDATE SET
                size = excluded.size,
                content_hash = excluded.content_hash,
                is_directory = excluded.is_directory,
                modified_at = excluded.modified_at,
                sync_status = excluded.sync_status,
                version = excluded.version,
                device_id = excluded.device_id,
                vector_clock = excluded.vector_clock",
            params![
                record.folder_id,
                record.relative_path,
                u64_param(record.size),
                record.content_hash,
                i32::from(record.is_directory),
                record.modified_at,
                record.sync_status.as_str(),
                u64_param(record.version),
                record.device_id,
                clock,
            ],
        )?;
        Ok(())
    }

    fn get(&self, folder_id: &str, relative_path: &str) -> Result<Option<FileRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE folder_id = ? AND relative_path = ?"),
                params![folder_id, relative_path],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_under(&self, folder_id: &str, prefix: &str) -> Result<Vec<FileRecord>> {
        let prefix = prefix.trim_matches('/');
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE folder_id = ?1
               AND (?2 = '' OR relative_path = ?2 OR substr(relative_path, 1, length(?2) + 1) = ?2 || '/')
             ORDER BY relative_path"
        ))?;

        let records = stmt
            .query_map(params![folder_id, prefix], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn delete(&self, folder_id: &str, relative_path: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM file_records WHERE folder_id = ? AND relative_path = ?",
            params![folder_id, relative_path],
        )?;
        Ok(rows > 0)
    }

    fn rename(&self, folder_id: &str, from: &str, to: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM file_records
             WHERE folder_id = ?1
               AND (relative_path = ?2 OR substr(relative_path, 1, length(?2) + 1) = ?2 || '/')",
            params![folder_id, to],
        )?;
        let rows = tx.execute(
            "UPDATE file_records SET relative_path = ?3 || substr(relative_path, length(?2) + 1)
             WHERE folder_id = ?1
               AND (relative_path = ?2 OR substr(relative_path, 1, length(?2) + 1) = ?2 || '/')",
            params![folder_id, from, to],
        )?;
        tx.commit()?;
        Ok(rows > 0)
    }
}
