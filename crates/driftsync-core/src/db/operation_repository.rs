//! Pending operation repository implementation

use std::collections::HashMap;

use crate::error::Result;
use crate::models::{OperationId, OperationStatus, PendingOperation};
use rusqlite::{params, Connection, OptionalExtension};

use super::parse_column;

const SELECT_COLUMNS: &str = "SELECT id, folder_id, operation_type, file_path, local_file_path,
        destination_path, status, retry_count, max_retries, created_at,
        next_attempt_at, last_retry_at, completed_at, error_message
     FROM pending_operations";

/// Trait for operation queue storage
pub trait OperationRepository {
    /// Insert `operation`, replacing any active operation on the same path.
    ///
    /// Returns the id of the replaced operation, if any.
    fn enqueue_or_replace(&self, operation: &PendingOperation) -> Result<Option<OperationId>>;

    /// Get an operation by id
    fn get(&self, id: &OperationId) -> Result<Option<PendingOperation>>;

    /// Persist every mutable field of an existing operation
    fn update(&self, operation: &PendingOperation) -> Result<()>;

    /// Active (`pending`/`retrying`) operations, oldest first
    fn list_active(&self) -> Result<Vec<PendingOperation>>;

    /// Operations filtered by status (all when `None`), oldest first
    fn list(&self, status: Option<OperationStatus>) -> Result<Vec<PendingOperation>>;

    /// Remove an operation; returns whether a row existed
    fn delete(&self, id: &OperationId) -> Result<bool>;

    /// Delete completed operations finished before `before` (Unix ms)
    fn purge_completed(&self, before: i64) -> Result<usize>;

    /// Number of operations per status
    fn count_by_status(&self) -> Result<HashMap<OperationStatus, usize>>;
}

/// `SQLite` implementation of `OperationRepository`
pub struct SqliteOperationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOperationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingOperation> {
        Ok(PendingOperation {
            id: parse_column(row, 0)?,
            folder_id: row.get(1)?,
            operation_type: parse_column(row, 2)?,
            file_path: row.get(3)?,
            local_file_path: row.get(4)?,
            destination_path: row.get(5)?,
            status: parse_column(row, 6)?,
            retry_count: row.get(7)?,
            max_retries: row.get(8)?,
            created_at: row.get(9)?,
            next_attempt_at: row.get(10)?,
            last_retry_at: row.get(11)?,
            completed_at: row.get(12)?,
            error_message: row.get(13)?,
        })
    }
}

impl OperationRepository for SqliteOperationRepository<'_> {
    fn enqueue_or_replace(&self, operation: &PendingOperation) -> Result<Option<OperationId>> {
        let tx = self.conn.unchecked_transaction()?;

        let replaced: Option<String> = tx
            .query_row(
                "SELECT id FROM pending_operations
                 WHERE folder_id = ? AND file_path = ? AND status IN ('pending', 'retrying')",
                params![operation.folder_id, operation.file_path],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = &replaced {
            tx.execute("DELETE FROM pending_operations WHERE id = ?", params![id])?;
        }

        tx.execute(
            "INSERT INTO pending_operations (
                id, folder_id, operation_type, file_path, local_file_path,
                destination_path, status, retry_count, max_retries, created_at,
                next_attempt_at, last_retry_at, completed_at, error_message
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                operation.id.as_str(),
                operation.folder_id,
                operation.operation_type.as_str(),
                operation.file_path,
                operation.local_file_path,
                operation.destination_path,
                operation.status.as_str(),
                operation.retry_count,
                operation.max_retries,
                operation.created_at,
                operation.next_attempt_at,
                operation.last_retry_at,
                operation.completed_at,
                operation.error_message,
            ],
        )?;
        tx.commit()?;

        Ok(replaced.and_then(|id| id.parse().ok()))
    }

    fn get(&self, id: &OperationId) -> Result<Option<PendingOperation>> {
        let operation = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?"),
                params![id.as_str()],
                Self::parse_operation,
            )
            .optional()?;
        Ok(operation)
    }

    fn update(&self, operation: &PendingOperation) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE pending_operations SET
                status = ?, retry_count = ?, max_retries = ?, next_attempt_at = ?,
                last_retry_at = ?, completed_at = ?, error_message = ?
             WHERE id = ?",
            params![
                operation.status.as_str(),
                operation.retry_count,
                operation.max_retries,
                operation.next_attempt_at,
                operation.last_retry_at,
                operation.completed_at,
                operation.error_message,
                operation.id.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(crate::Error::NotFound(operation.id.to_string()));
        }
        Ok(())
    }

    fn list_active(&self) -> Result<Vec<PendingOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE status IN ('pending', 'retrying')
             ORDER BY created_at ASC, id ASC"
        ))?;
        let operations = stmt
            .query_map([], Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(operations)
    }

    fn list(&self, status: Option<OperationStatus>) -> Result<Vec<PendingOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;
        let operations = stmt
            .query_map(params![status.map(OperationStatus::as_str)], Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(operations)
    }

    fn delete(&self, id: &OperationId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM pending_operations WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn purge_completed(&self, before: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM pending_operations
             WHERE status = 'completed' AND completed_at IS NOT NULL AND completed_at < ?",
            params![before],
        )?;
        Ok(rows)
    }

    fn count_by_status(&self) -> Result<HashMap<OperationStatus, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM pending_operations GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((parse_column::<OperationStatus>(row, 0)?, row.get::<_, usize>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }
}
